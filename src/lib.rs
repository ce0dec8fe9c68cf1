//! # tfstream
//!
//! Wraps an infrastructure-provisioning CLI and turns its chatty output into
//! a compact live progress region.
//!
//! ## Usage
//!
//! ```bash
//! tfstream -- apply -auto-approve
//! tfstream --binary tofu --plain -- plan
//! ```
//!
//! ## Modules
//!
//! - `filter` - Child process plumbing, line classification, progress tracking and rendering
//! - `config` - Layered configuration (defaults, YAML file, environment)
//! - `error` - Error types for the filter and configuration
//! - `logging` - `tracing` subscriber setup
pub mod config;
pub mod error;
pub mod filter;
pub mod logging;

pub use config::TfstreamConfig;
pub use error::{ConfigError, FilterError};
