//! The single writer of the progress state
//!
//! Both stream readers send their lines into one channel; the pipeline is the
//! only consumer. It classifies each line, runs it through the block
//! suppressor, applies it to the progress model and drives the view, so model
//! mutations, snapshots and terminal writes never interleave.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};

use super::classifier::{looks_like_resource_line, ClassifiedLine, LineCategory, LineClassifier};
use super::progress::{ProgressModel, ProgressSnapshot};
use super::render::{ProgressView, RenderMode, RunSummary};
use super::suppressor::{BlockSuppressor, SuppressDecision, UnterminatedBlock};
use super::types::StreamSource;
use crate::error::FilterError;

/// Message from a stream reader
#[derive(Debug)]
pub enum PipelineMessage {
    Line {
        source: StreamSource,
        text: String,
        /// The bytes were not valid UTF-8 and were decoded lossily
        lossy: bool,
    },
    ReadFailed {
        source: StreamSource,
        error: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub mode: RenderMode,
    pub refresh_interval: Duration,
    /// Print noise lines instead of dropping them
    pub show_noise: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            mode: RenderMode::Progress,
            refresh_interval: Duration::from_millis(150),
            show_noise: false,
        }
    }
}

/// What happened to one line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOutcome {
    /// Hidden by the block suppressor
    Suppressed,
    /// Printed above the live region
    Printed,
    /// Absorbed into the live region; `changed` if the model moved
    Tracked { changed: bool },
    /// Dropped as noise
    Dropped,
}

/// Severity of the diagnostic box a stream is currently inside
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Diagnostic {
    Error,
    Warning,
}

/// Final accounting of a run
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub snapshot: ProgressSnapshot,
    pub unterminated_block: Option<UnterminatedBlock>,
    pub suppressed_lines: usize,
    pub printed_lines: usize,
}

pub struct Pipeline<V: ProgressView> {
    classifier: LineClassifier,
    suppressor: Option<BlockSuppressor>,
    model: ProgressModel,
    view: V,
    options: PipelineOptions,
    printed_lines: usize,
    read_errors: Vec<FilterError>,
    malformed_logged: bool,
    lossy_logged: bool,
    render_failed: bool,
    /// Model changed since the last redraw
    dirty: bool,
    /// Open diagnostic box per stream, indexed by [`stream_slot`]
    diagnostics: [Option<Diagnostic>; 2],
}

impl<V: ProgressView> Pipeline<V> {
    pub fn new(
        classifier: LineClassifier,
        suppressor: Option<BlockSuppressor>,
        view: V,
        options: PipelineOptions,
    ) -> Self {
        Self {
            classifier,
            suppressor,
            model: ProgressModel::new(),
            view,
            options,
            printed_lines: 0,
            read_errors: Vec::new(),
            malformed_logged: false,
            lossy_logged: false,
            render_failed: false,
            dirty: false,
            diagnostics: [None; 2],
        }
    }

    pub fn model(&self) -> &ProgressModel {
        &self.model
    }

    pub fn view(&self) -> &V {
        &self.view
    }

    pub fn into_view(self) -> V {
        self.view
    }

    /// Drain `rx` until every reader has hung up, redrawing on state changes
    /// and on every refresh tick.
    pub async fn run(&mut self, mut rx: mpsc::Receiver<PipelineMessage>) {
        let mut ticker = time::interval(self.options.refresh_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let live = self.options.mode == RenderMode::Progress;

        self.redraw();
        loop {
            tokio::select! {
                message = rx.recv() => {
                    match message {
                        Some(PipelineMessage::Line { source, text, lossy }) => {
                            if lossy && !self.lossy_logged {
                                self.lossy_logged = true;
                                tracing::info!("Child {} produced invalid UTF-8; decoding lossily", source);
                            }
                            self.handle_line_from(source, &text);
                            if std::mem::take(&mut self.dirty) {
                                self.redraw();
                            }
                        }
                        Some(PipelineMessage::ReadFailed { source, error }) => {
                            // logged by finish, once the live region is gone
                            self.read_errors.push(FilterError::StreamRead { stream: source, source: error });
                        }
                        None => break,
                    }
                }
                _ = ticker.tick(), if live => self.redraw(),
            }
        }
    }

    /// Route one stdout line through suppression, the model and the view
    pub fn handle_line(&mut self, text: &str) -> LineOutcome {
        self.handle_line_from(StreamSource::Stdout, text)
    }

    pub fn handle_line_from(&mut self, source: StreamSource, text: &str) -> LineOutcome {
        let line = self.classifier.classify(text);

        if let Some(suppressor) = self.suppressor.as_mut() {
            if suppressor.filter(&line.plain_text) == SuppressDecision::Drop {
                return LineOutcome::Suppressed;
            }
        }

        let line = self.scope_diagnostic(source, line);

        if line.category == LineCategory::Plain
            && !self.malformed_logged
            && looks_like_resource_line(&line.plain_text)
        {
            self.malformed_logged = true;
            tracing::info!("Unrecognized resource line shape: {}", line.plain_text);
        }

        let changed = self.model.apply(&line);
        self.dirty |= changed;

        if self.should_print(&line) {
            self.print(&line);
            LineOutcome::Printed
        } else if line.category == LineCategory::Noise {
            LineOutcome::Dropped
        } else {
            LineOutcome::Tracked { changed }
        }
    }

    /// Track `╷ │ Error: ... ╵` boxes; a `│ with <id>,` line only fails its
    /// resource inside an error box, warnings use the same frame.
    fn scope_diagnostic(
        &mut self,
        source: StreamSource,
        mut line: ClassifiedLine,
    ) -> ClassifiedLine {
        let slot = &mut self.diagnostics[stream_slot(source)];
        let text = line.plain_text.trim_start();

        if let Some(body) = text.strip_prefix('│') {
            let body = body.trim_start();
            if body.starts_with("Error:") {
                *slot = Some(Diagnostic::Error);
            } else if body.starts_with("Warning:") {
                *slot = Some(Diagnostic::Warning);
            }
            if line.category == LineCategory::ResourceError && *slot != Some(Diagnostic::Error) {
                line.category = LineCategory::Plain;
                line.resource_id = None;
            }
        } else if text.starts_with('╷') || text.starts_with('╵') {
            *slot = None;
        }
        line
    }

    fn should_print(&self, line: &ClassifiedLine) -> bool {
        if self.options.mode == RenderMode::Plain {
            return true;
        }
        match line.category {
            LineCategory::Plain | LineCategory::SectionFooter | LineCategory::ResourceError => true,
            LineCategory::Noise => self.options.show_noise,
            _ => false,
        }
    }

    fn print(&mut self, line: &ClassifiedLine) {
        self.printed_lines += 1;
        if let Err(e) = self.view.print_line(line) {
            self.report_render_failure(&e);
        }
    }

    /// Redraw the live region from a fresh snapshot
    pub fn redraw(&mut self) {
        self.dirty = false;
        let snapshot = self.model.snapshot();
        if let Err(e) = self.view.draw(&snapshot) {
            self.report_render_failure(&e);
        }
    }

    fn report_render_failure(&mut self, error: &std::io::Error) {
        if !self.render_failed {
            self.render_failed = true;
            tracing::warn!("Terminal write failed, continuing to drain output: {}", error);
        }
    }

    /// Read failures collected while draining
    pub fn take_read_errors(&mut self) -> Vec<FilterError> {
        std::mem::take(&mut self.read_errors)
    }

    /// Close the run: report an unterminated block and replace the live
    /// region with the final summary.
    ///
    /// Warnings are logged only after the summary is written so they never
    /// land inside the live region.
    pub fn finish(&mut self, exit_code: Option<i32>) -> PipelineReport {
        let unterminated_block = self.suppressor.as_mut().and_then(BlockSuppressor::finish);

        let snapshot = self.model.snapshot();
        let summary = RunSummary {
            snapshot: snapshot.clone(),
            exit_code,
            unterminated_block: unterminated_block.clone(),
        };
        if let Err(e) = self.view.finish(&summary) {
            self.report_render_failure(&e);
        }

        if let Some(block) = &unterminated_block {
            tracing::warn!(
                "Output ended inside a suppressed block opened by {:?}; {} lines discarded",
                block.opened_by,
                block.dropped_lines
            );
        }
        for error in &self.read_errors {
            tracing::error!("{}", error);
        }

        PipelineReport {
            snapshot,
            unterminated_block,
            suppressed_lines: self
                .suppressor
                .as_ref()
                .map(BlockSuppressor::total_dropped)
                .unwrap_or(0),
            printed_lines: self.printed_lines,
        }
    }
}

fn stream_slot(source: StreamSource) -> usize {
    match source {
        StreamSource::Stdout => 0,
        StreamSource::Stderr => 1,
    }
}
