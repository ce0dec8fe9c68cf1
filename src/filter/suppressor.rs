//! Marker-delimited block suppression
//!
//! Hides high-volume sections such as the full plan diff. Lines from the
//! start marker through the end marker (both inclusive) never reach the
//! progress model or the terminal.

use regex::Regex;

use crate::error::{FilterError, Result};

/// What to do with a line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressDecision {
    Pass,
    Drop,
}

/// Suppression toggle and its markers
#[derive(Debug, Clone)]
pub struct SuppressionState {
    pub active: bool,
    pub start: Regex,
    pub end: Regex,
}

/// Reported when the stream ends inside a suppressed block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnterminatedBlock {
    /// The line that opened the block
    pub opened_by: String,
    /// Lines dropped since the block opened, the start marker included
    pub dropped_lines: usize,
}

#[derive(Debug, Clone)]
pub struct BlockSuppressor {
    state: SuppressionState,
    opened_by: Option<String>,
    dropped_in_block: usize,
    total_dropped: usize,
    blocks: usize,
}

impl BlockSuppressor {
    pub fn new(start: &str, end: &str) -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|source| FilterError::Pattern {
                pattern: pattern.to_string(),
                source,
            })
        };
        Ok(Self::from_regexes(compile(start)?, compile(end)?))
    }

    pub fn from_regexes(start: Regex, end: Regex) -> Self {
        Self {
            state: SuppressionState {
                active: false,
                start,
                end,
            },
            opened_by: None,
            dropped_in_block: 0,
            total_dropped: 0,
            blocks: 0,
        }
    }

    /// Feed one line (ANSI already stripped) through the state machine
    pub fn filter(&mut self, line: &str) -> SuppressDecision {
        if self.state.active {
            self.dropped_in_block += 1;
            self.total_dropped += 1;
            if self.state.end.is_match(line) {
                tracing::debug!(
                    "Suppressed block closed after {} lines",
                    self.dropped_in_block
                );
                self.state.active = false;
                self.opened_by = None;
                self.dropped_in_block = 0;
            }
            return SuppressDecision::Drop;
        }

        if self.state.start.is_match(line) {
            self.state.active = true;
            self.opened_by = Some(line.to_string());
            self.dropped_in_block = 1;
            self.total_dropped += 1;
            self.blocks += 1;
            return SuppressDecision::Drop;
        }

        SuppressDecision::Pass
    }

    pub fn is_suppressing(&self) -> bool {
        self.state.active
    }

    pub fn state(&self) -> &SuppressionState {
        &self.state
    }

    pub fn total_dropped(&self) -> usize {
        self.total_dropped
    }

    /// Number of blocks opened so far
    pub fn blocks(&self) -> usize {
        self.blocks
    }

    /// End of stream. Returns the anomaly if a block was left open; the
    /// dropped lines stay dropped.
    pub fn finish(&mut self) -> Option<UnterminatedBlock> {
        if !self.state.active {
            return None;
        }
        self.state.active = false;
        let anomaly = UnterminatedBlock {
            opened_by: self.opened_by.take().unwrap_or_default(),
            dropped_lines: self.dropped_in_block,
        };
        self.dropped_in_block = 0;
        Some(anomaly)
    }
}
