use std::path::PathBuf;
use thiserror::Error;

use crate::filter::types::StreamSource;

/// Result alias for the streaming filter
pub type Result<T> = std::result::Result<T, FilterError>;

/// Failures in the child process lifecycle and filter setup
#[derive(Debug, Error)]
pub enum FilterError {
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to capture {0} of child process")]
    PipeUnavailable(StreamSource),

    #[error("Failed to read child {stream}: {source}")]
    StreamRead {
        stream: StreamSource,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to wait for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Terminal write failed: {0}")]
    Terminal(#[from] std::io::Error),
}

impl FilterError {
    /// Whether the child process was never started
    pub fn is_spawn_failure(&self) -> bool {
        matches!(self, FilterError::Spawn { .. })
    }
}

/// Failures while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid configuration:\n  {}", .0.join("\n  "))]
    Invalid(Vec<String>),
}
