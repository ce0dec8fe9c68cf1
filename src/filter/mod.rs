//! Streaming output filter and progress renderer
//!
//! ```text
//! child stdout ─┐
//!               ├─> Pipeline: classify -> suppress -> model -> view
//! child stderr ─┘
//! ```
//!
//! The [`StreamMultiplexer`] owns the child process, the [`Pipeline`] is the
//! single writer of the [`ProgressModel`] and the only caller of the
//! [`ProgressView`].

pub mod classifier;
pub mod multiplexer;
pub mod patterns;
pub mod pipeline;
pub mod progress;
pub mod render;
pub mod suppressor;
pub mod types;

pub use classifier::{strip_ansi, ClassifiedLine, LineCategory, LineClassifier};
pub use multiplexer::{
    exit_code_of, StreamMultiplexer, DEFAULT_PARTIAL_LINE_FLUSH, DEFAULT_READ_BUFFER_BYTES,
};
pub use patterns::{PatternRegistry, PatternRule};
pub use pipeline::{LineOutcome, Pipeline, PipelineMessage, PipelineOptions, PipelineReport};
pub use progress::{ProgressModel, ProgressSnapshot, ResourceRecord, ResourceStatus};
pub use render::{ProgressView, RenderMode, RenderOptions, RunSummary, TerminalRenderer};
pub use suppressor::{BlockSuppressor, SuppressDecision, SuppressionState, UnterminatedBlock};
pub use types::{RunOutcome, StdinSource, StreamSource, WrappedCommand};
