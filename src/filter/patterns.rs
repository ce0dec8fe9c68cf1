//! Ordered registry of line-shape rules
//!
//! Rules are compiled once and evaluated in priority order. The first rule
//! whose regex matches a line decides its category, so a footer line that
//! happens to contain a resource-like substring is still a footer.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use super::classifier::LineCategory;
use crate::error::{FilterError, Result};

/// Capture holding the resource address
pub const RESOURCE_ID: &str = "resource_id";
/// Capture holding the operation verb (`Creating`, `Destruction`, ...)
pub const VERB: &str = "verb";
/// Capture holding a duration reported by the tool (`12s`, `1m30s`)
pub const DURATION: &str = "duration";

/// Built-in rules for Terraform/OpenTofu output, highest priority first
const TERRAFORM_RULES: &[(LineCategory, &str)] = &[
    (
        LineCategory::SectionFooter,
        r"^(?P<verb>Apply|Destroy) complete! Resources: (?:(?P<imported>\d+) imported, )?(?P<added>\d+) added, (?P<changed>\d+) changed, (?P<destroyed>\d+) destroyed",
    ),
    (
        LineCategory::SectionFooter,
        r"^Plan: (?:(?P<imported>\d+) to import, )?(?P<added>\d+) to add, (?P<changed>\d+) to change, (?P<destroyed>\d+) to destroy",
    ),
    (LineCategory::SectionFooter, r"^No changes\."),
    (
        LineCategory::ResourceError,
        r"^(?P<resource_id>\S.*?): (?P<verb>Creation|Modifications|Destruction|Read|Import) errored after (?P<duration>\S+)",
    ),
    (
        LineCategory::ResourceError,
        r"^│\s+with (?P<resource_id>[^,\s]+),",
    ),
    (LineCategory::Noise, r"^\s*$"),
    (LineCategory::Noise, r"^[╷╵│]\s*$"),
    (LineCategory::Noise, r"^(?:Acquiring|Releasing) state lock"),
    (LineCategory::Noise, r"^\S.*?: Refreshing state\.\.\."),
    (
        LineCategory::ResourceComplete,
        r"^(?P<resource_id>\S.*?): (?P<verb>Creation|Modifications|Destruction|Read|Import) complete(?: after (?P<duration>\S+))?",
    ),
    (
        LineCategory::ResourceProgress,
        r"^(?P<resource_id>\S.*?): Still (?P<verb>creating|modifying|destroying|reading|importing)\.\.\. \[(?:id=[^\]]*?, )?(?P<duration>[0-9hms.]+) elapsed\]",
    ),
    (
        LineCategory::ResourceStart,
        r"^(?P<resource_id>\S.*?): (?P<verb>Creating|Modifying|Destroying|Reading|Importing)\.\.\.",
    ),
];

static TERRAFORM: Lazy<Vec<PatternRule>> = Lazy::new(|| {
    TERRAFORM_RULES
        .iter()
        .map(|(category, pattern)| {
            PatternRule::new(*category, pattern).expect("built-in terraform pattern compiles")
        })
        .collect()
});

/// One line-shape rule
#[derive(Debug, Clone)]
pub struct PatternRule {
    category: LineCategory,
    regex: Regex,
    captures: Vec<String>,
}

impl PatternRule {
    /// Compile a rule
    pub fn new(category: LineCategory, pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern).map_err(|source| FilterError::Pattern {
            pattern: pattern.to_string(),
            source,
        })?;
        let captures = regex
            .capture_names()
            .flatten()
            .map(str::to_string)
            .collect();

        Ok(Self {
            category,
            regex,
            captures,
        })
    }

    pub fn category(&self) -> LineCategory {
        self.category
    }

    pub fn regex(&self) -> &Regex {
        &self.regex
    }

    /// Named captures this rule can extract
    pub fn capture_names(&self) -> &[String] {
        &self.captures
    }

    pub fn has_resource_id(&self) -> bool {
        self.captures.iter().any(|name| name == RESOURCE_ID)
    }
}

/// Fixed, ordered set of rules
#[derive(Debug, Clone)]
pub struct PatternRegistry {
    rules: Vec<PatternRule>,
}

impl PatternRegistry {
    pub fn new(rules: Vec<PatternRule>) -> Self {
        Self { rules }
    }

    /// Default rules for Terraform-compatible tools
    pub fn terraform() -> Self {
        Self::new(TERRAFORM.clone())
    }

    /// Put `extra` ahead of the existing rules so they win ties
    pub fn with_priority_rules(mut self, extra: Vec<PatternRule>) -> Self {
        if extra.is_empty() {
            return self;
        }
        let mut rules = extra;
        rules.append(&mut self.rules);
        self.rules = rules;
        self
    }

    /// First rule matching `text`, with its captures
    pub fn first_match<'r, 't>(&'r self, text: &'t str) -> Option<(&'r PatternRule, Captures<'t>)> {
        self.rules
            .iter()
            .find_map(|rule| rule.regex.captures(text).map(|captures| (rule, captures)))
    }

    pub fn rules(&self) -> &[PatternRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl Default for PatternRegistry {
    fn default() -> Self {
        Self::terraform()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn category_of(registry: &PatternRegistry, line: &str) -> Option<LineCategory> {
        registry.first_match(line).map(|(rule, _)| rule.category())
    }

    #[test]
    fn test_terraform_registry_compiles_every_rule() {
        let registry = PatternRegistry::terraform();
        assert_eq!(registry.len(), TERRAFORM_RULES.len());
        assert!(!registry.is_empty());
    }

    #[test]
    fn test_footer_outranks_resource_shapes() {
        let registry = PatternRegistry::terraform();
        assert_eq!(
            category_of(
                &registry,
                "Apply complete! Resources: 2 added, 0 changed, 1 destroyed."
            ),
            Some(LineCategory::SectionFooter)
        );
        assert_eq!(
            category_of(&registry, "Plan: 3 to add, 1 to change, 0 to destroy."),
            Some(LineCategory::SectionFooter)
        );
    }

    #[test]
    fn test_refresh_lines_are_noise_not_starts() {
        let registry = PatternRegistry::terraform();
        assert_eq!(
            category_of(
                &registry,
                "aws_vpc.main: Refreshing state... [id=vpc-0a1b2c]"
            ),
            Some(LineCategory::Noise)
        );
    }

    #[test]
    fn test_unmatched_line_has_no_rule() {
        let registry = PatternRegistry::terraform();
        assert!(registry.first_match("Terraform has been successfully initialized!").is_none());
    }

    #[test]
    fn test_priority_rules_win() {
        let custom = PatternRule::new(LineCategory::Noise, r"^Plan:").unwrap();
        let registry = PatternRegistry::terraform().with_priority_rules(vec![custom]);

        assert_eq!(registry.len(), TERRAFORM_RULES.len() + 1);
        assert_eq!(
            category_of(&registry, "Plan: 1 to add, 0 to change, 0 to destroy."),
            Some(LineCategory::Noise)
        );
    }

    #[test]
    fn test_capture_names_are_recorded() {
        let rule = PatternRule::new(
            LineCategory::ResourceStart,
            r"^(?P<resource_id>\S+): (?P<verb>Creating)\.\.\.",
        )
        .unwrap();
        assert!(rule.has_resource_id());
        assert_eq!(rule.capture_names(), &["resource_id", "verb"]);

        let footer = PatternRule::new(LineCategory::SectionFooter, r"^No changes\.").unwrap();
        assert!(!footer.has_resource_id());
    }

    #[test]
    fn test_invalid_pattern_is_reported() {
        let err = PatternRule::new(LineCategory::Plain, r"(unclosed").unwrap_err();
        assert!(matches!(err, FilterError::Pattern { ref pattern, .. } if pattern == "(unclosed"));
    }
}
