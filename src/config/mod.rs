//! Configuration for tfstream
//!
//! Settings are layered, lowest priority first:
//!
//! 1. Hardcoded defaults
//! 2. Config file (`.tfstream.yml` in the working directory, otherwise
//!    `<config dir>/tfstream/config.yml`)
//! 3. Environment variables (`TFSTREAM_*`, `NO_COLOR`)
//! 4. Command-line flags (applied by the binary)
//!
//! Validation collects every problem before failing, so a broken config
//! file is reported in one go.

pub mod loader;

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, FilterError};
use crate::filter::{
    BlockSuppressor, LineCategory, PatternRegistry, PatternRule, DEFAULT_READ_BUFFER_BYTES,
};

pub use loader::{discover_config_file, load_config, load_config_with, PROJECT_CONFIG_FILE};

pub const ENV_BINARY: &str = "TFSTREAM_BINARY";
pub const ENV_REFRESH_MS: &str = "TFSTREAM_REFRESH_MS";
pub const ENV_MAX_ACTIVE: &str = "TFSTREAM_MAX_ACTIVE";
pub const ENV_NO_COLOR: &str = "NO_COLOR";

/// Complete runtime configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TfstreamConfig {
    /// Executable to run
    pub binary: String,
    /// Live region refresh cadence
    pub refresh_interval_ms: u64,
    /// Active resources listed in the live region
    pub max_active: usize,
    /// Per-stream read buffer size
    pub read_buffer_bytes: usize,
    /// Print noise lines (blank lines, state lock chatter)
    pub show_noise: bool,
    pub color: bool,
    pub suppress: SuppressSettings,
    /// Write logs here instead of stderr
    pub log_file: Option<PathBuf>,
    /// Extra rules, evaluated before the built-in ones
    pub patterns: Vec<PatternSetting>,
}

/// Block suppression markers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SuppressSettings {
    pub enabled: bool,
    pub start: String,
    pub end: String,
}

/// A user-supplied classification rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PatternSetting {
    pub category: LineCategory,
    pub regex: String,
}

impl Default for TfstreamConfig {
    fn default() -> Self {
        Self {
            binary: "terraform".to_string(),
            refresh_interval_ms: 150,
            max_active: 5,
            read_buffer_bytes: DEFAULT_READ_BUFFER_BYTES,
            show_noise: false,
            color: true,
            suppress: SuppressSettings::default(),
            log_file: None,
            patterns: Vec::new(),
        }
    }
}

impl Default for SuppressSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            start: r"^Terraform will perform the following actions:".to_string(),
            end: r"^Plan: \d+ to (?:import|add)".to_string(),
        }
    }
}

impl TfstreamConfig {
    pub fn from_yaml_str(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    /// Apply environment overrides. Unparseable values are returned as
    /// validation problems rather than silently ignored.
    pub fn merge_env_vars<F>(&mut self, lookup: F) -> Vec<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut problems = Vec::new();

        if let Some(binary) = lookup(ENV_BINARY).filter(|value| !value.trim().is_empty()) {
            self.binary = binary;
        }

        if let Some(value) = lookup(ENV_REFRESH_MS) {
            match value.trim().parse::<u64>() {
                Ok(ms) => self.refresh_interval_ms = ms,
                Err(_) => problems.push(format!("{ENV_REFRESH_MS}={value:?} is not a number")),
            }
        }

        if let Some(value) = lookup(ENV_MAX_ACTIVE) {
            match value.trim().parse::<usize>() {
                Ok(max) => self.max_active = max,
                Err(_) => problems.push(format!("{ENV_MAX_ACTIVE}={value:?} is not a number")),
            }
        }

        // https://no-color.org: any non-empty value disables colour
        if lookup(ENV_NO_COLOR).is_some_and(|value| !value.is_empty()) {
            self.color = false;
        }

        problems
    }

    /// Check every setting, reporting all problems together
    pub fn validate(&self) -> Result<(), ConfigError> {
        let problems = self.problems();
        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }

    /// Every invalid setting, in a stable order
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.binary.trim().is_empty() {
            problems.push("binary must not be empty".to_string());
        }
        if self.refresh_interval_ms == 0 {
            problems.push("refresh_interval_ms must be at least 1".to_string());
        }
        if self.max_active == 0 {
            problems.push("max_active must be at least 1".to_string());
        }
        if self.read_buffer_bytes == 0 {
            problems.push("read_buffer_bytes must be at least 1".to_string());
        }
        if self.suppress.enabled {
            for (name, pattern) in [("start", &self.suppress.start), ("end", &self.suppress.end)] {
                if let Err(e) = regex::Regex::new(pattern) {
                    problems.push(format!("suppress.{name} is not a valid regex: {e}"));
                }
            }
        }
        for (i, setting) in self.patterns.iter().enumerate() {
            if let Err(e) = regex::Regex::new(&setting.regex) {
                problems.push(format!("patterns[{i}] is not a valid regex: {e}"));
            }
        }
        problems
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    /// Built-in rules with the configured extras ahead of them
    pub fn build_registry(&self) -> Result<PatternRegistry, FilterError> {
        let extra = self
            .patterns
            .iter()
            .map(|setting| PatternRule::new(setting.category, &setting.regex))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(PatternRegistry::terraform().with_priority_rules(extra))
    }

    pub fn build_suppressor(&self) -> Result<Option<BlockSuppressor>, FilterError> {
        if !self.suppress.enabled {
            return Ok(None);
        }
        BlockSuppressor::new(&self.suppress.start, &self.suppress.end).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = TfstreamConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.binary, "terraform");
        assert_eq!(config.refresh_interval(), Duration::from_millis(150));
        assert!(config.suppress.enabled);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = TfstreamConfig::from_yaml_str(
            r#"
binary: tofu
max_active: 8
suppress:
  enabled: false
"#,
        )
        .unwrap();

        assert_eq!(config.binary, "tofu");
        assert_eq!(config.max_active, 8);
        assert!(!config.suppress.enabled);
        assert_eq!(config.suppress.start, SuppressSettings::default().start);
        assert_eq!(config.refresh_interval_ms, 150);
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        assert!(TfstreamConfig::from_yaml_str("refresh_ms: 10").is_err());
    }

    #[test]
    fn test_custom_patterns_parse_and_take_priority() {
        let config = TfstreamConfig::from_yaml_str(
            r#"
patterns:
  - category: noise
    regex: '^Outputs:$'
  - category: resource_start
    regex: '^(?P<resource_id>\S+): Provisioning with'
"#,
        )
        .unwrap();

        assert_eq!(config.patterns.len(), 2);
        assert_eq!(config.patterns[0].category, LineCategory::Noise);

        let registry = config.build_registry().unwrap();
        let (rule, _) = registry.first_match("Outputs:").unwrap();
        assert_eq!(rule.category(), LineCategory::Noise);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = TfstreamConfig::default();
        let problems = config.merge_env_vars(env(&[
            (ENV_BINARY, "/opt/bin/terraform"),
            (ENV_REFRESH_MS, "250"),
            (ENV_MAX_ACTIVE, "2"),
            (ENV_NO_COLOR, "1"),
        ]));

        assert!(problems.is_empty());
        assert_eq!(config.binary, "/opt/bin/terraform");
        assert_eq!(config.refresh_interval_ms, 250);
        assert_eq!(config.max_active, 2);
        assert!(!config.color);
    }

    #[test]
    fn test_empty_no_color_keeps_colour() {
        let mut config = TfstreamConfig::default();
        config.merge_env_vars(env(&[(ENV_NO_COLOR, "")]));
        assert!(config.color);
    }

    #[test]
    fn test_bad_env_values_are_reported() {
        let mut config = TfstreamConfig::default();
        let problems = config.merge_env_vars(env(&[(ENV_REFRESH_MS, "fast")]));
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains(ENV_REFRESH_MS));
        assert_eq!(config.refresh_interval_ms, 150);
    }

    #[test]
    fn test_validation_accumulates_problems() {
        let config = TfstreamConfig {
            binary: " ".to_string(),
            refresh_interval_ms: 0,
            max_active: 0,
            suppress: SuppressSettings {
                enabled: true,
                start: "(".to_string(),
                end: "END".to_string(),
            },
            patterns: vec![PatternSetting {
                category: LineCategory::Noise,
                regex: "[".to_string(),
            }],
            ..TfstreamConfig::default()
        };

        match config.validate() {
            Err(ConfigError::Invalid(problems)) => assert_eq!(problems.len(), 5),
            other => panic!("expected invalid config, got {other:?}"),
        }
    }

    #[test]
    fn test_disabled_suppression_builds_nothing() {
        let mut config = TfstreamConfig::default();
        assert!(config.build_suppressor().unwrap().is_some());
        config.suppress.enabled = false;
        assert!(config.build_suppressor().unwrap().is_none());
    }

    #[test]
    fn test_default_markers_hide_plan_body() {
        let mut suppressor = TfstreamConfig::default().build_suppressor().unwrap().unwrap();
        use crate::filter::SuppressDecision::{Drop, Pass};

        assert_eq!(suppressor.filter("aws_vpc.main: Refreshing state..."), Pass);
        assert_eq!(suppressor.filter("Terraform will perform the following actions:"), Drop);
        assert_eq!(suppressor.filter("  # aws_instance.web will be created"), Drop);
        assert_eq!(suppressor.filter("Plan: 1 to add, 0 to change, 0 to destroy."), Drop);
        assert_eq!(suppressor.filter("aws_instance.web: Creating..."), Pass);
    }

    #[test]
    fn test_default_markers_close_on_import_plan() {
        let mut suppressor = TfstreamConfig::default().build_suppressor().unwrap().unwrap();
        use crate::filter::SuppressDecision::{Drop, Pass};

        assert_eq!(suppressor.filter("Terraform will perform the following actions:"), Drop);
        assert_eq!(suppressor.filter("  # aws_s3_bucket.logs will be imported"), Drop);
        assert_eq!(
            suppressor.filter("Plan: 1 to import, 0 to add, 0 to change, 0 to destroy."),
            Drop
        );
        assert!(!suppressor.is_suppressing());
        assert_eq!(suppressor.filter("  Enter a value: yes"), Pass);
        assert_eq!(suppressor.filter("aws_s3_bucket.logs: Importing... [id=logs]"), Pass);
        assert_eq!(suppressor.filter("aws_s3_bucket.logs: Import complete [id=logs]"), Pass);
        assert_eq!(
            suppressor.filter("Apply complete! Resources: 1 imported, 0 added, 0 changed, 0 destroyed."),
            Pass
        );
        assert!(suppressor.finish().is_none());
    }
}
