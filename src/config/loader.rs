use super::TfstreamConfig;
use crate::error::ConfigError;
use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Looked up in the working directory before the user config dir
pub const PROJECT_CONFIG_FILE: &str = ".tfstream.yml";

const USER_CONFIG_FILE: &str = "config.yml";

/// `<config dir>/tfstream/config.yml`, if a home directory is known
pub fn user_config_path() -> Option<PathBuf> {
    ProjectDirs::from("io", "tfstream", "tfstream")
        .map(|dirs| dirs.config_dir().join(USER_CONFIG_FILE))
}

/// First existing config file: project file in `cwd`, then `user_file`
pub fn discover_config_file(cwd: &Path, user_file: Option<&Path>) -> Option<PathBuf> {
    let project = cwd.join(PROJECT_CONFIG_FILE);
    if project.is_file() {
        return Some(project);
    }
    user_file.filter(|path| path.is_file()).map(Path::to_path_buf)
}

/// Load and validate configuration.
///
/// An explicit path must exist. Without one the discovered file is used,
/// falling back to defaults. Environment overrides come from `lookup`.
pub async fn load_config<F>(
    explicit: Option<&Path>,
    cwd: &Path,
    lookup: F,
) -> Result<TfstreamConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    load_config_with(explicit, cwd, lookup, |_| {}).await
}

/// [`load_config`] with command-line `overrides` applied before validation,
/// so flag values are checked like every other setting.
pub async fn load_config_with<F, O>(
    explicit: Option<&Path>,
    cwd: &Path,
    lookup: F,
    overrides: O,
) -> Result<TfstreamConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    O: FnOnce(&mut TfstreamConfig),
{
    let path = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => discover_config_file(cwd, user_config_path().as_deref()),
    };

    let mut config = match &path {
        Some(path) => read_config_file(path).await?,
        None => {
            tracing::debug!("No config file found, using defaults");
            TfstreamConfig::default()
        }
    };

    let mut problems = config.merge_env_vars(lookup);
    overrides(&mut config);
    problems.extend(config.problems());

    if problems.is_empty() {
        Ok(config)
    } else {
        Err(ConfigError::Invalid(problems))
    }
}

async fn read_config_file(path: &Path) -> Result<TfstreamConfig, ConfigError> {
    tracing::debug!("Loading config from {}", path.display());

    let content = fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

    // an empty file is a valid, all-defaults config
    if content.trim().is_empty() {
        return Ok(TfstreamConfig::default());
    }

    TfstreamConfig::from_yaml_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
