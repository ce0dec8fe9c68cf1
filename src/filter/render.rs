//! Terminal rendering of the live progress region
//!
//! In progress mode a fixed-height region at the bottom of the terminal is
//! redrawn in place: the cursor moves back to the top of the region, the
//! region is cleared and every line rewritten. Pass-through lines are
//! printed where the region starts and the region is redrawn below them, so
//! they scroll naturally above it.

use std::io::{self, Write};
use std::time::Duration;

use crossterm::cursor::MoveToPreviousLine;
use crossterm::queue;
use crossterm::terminal::{self, Clear, ClearType};
use indicatif::{HumanDuration, ProgressStyle};

use super::classifier::ClassifiedLine;
use super::progress::{ProgressSnapshot, ResourceStatus};
use super::suppressor::UnterminatedBlock;

/// SGR sequences used by the renderer. Every coloured segment is closed
/// with [`sgr::RESET`].
pub mod sgr {
    pub const RESET: &str = "\x1b[0m";
    pub const BOLD: &str = "\x1b[1m";
    pub const DIM: &str = "\x1b[2m";
    pub const RED: &str = "\x1b[31m";
    pub const GREEN: &str = "\x1b[32m";
    pub const YELLOW: &str = "\x1b[33m";
    pub const CYAN: &str = "\x1b[36m";
}

/// Spinner frames; the trailing character is indicatif's "finished" tick
const SPINNER_TICKS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏✓";
const SPINNER_FRAME: Duration = Duration::from_millis(100);
const FALLBACK_WIDTH: usize = 80;
const MIN_WIDTH: usize = 20;

/// How output is presented
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    /// Live region redrawn in place
    Progress,
    /// Every visible line printed verbatim, summary at the end
    Plain,
}

#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub mode: RenderMode,
    pub color: bool,
    /// Active resources listed in the region
    pub max_active: usize,
    /// Fixed width; `None` asks the terminal
    pub width: Option<u16>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            mode: RenderMode::Progress,
            color: true,
            max_active: 5,
            width: None,
        }
    }
}

/// Everything the final summary needs
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub snapshot: ProgressSnapshot,
    pub exit_code: Option<i32>,
    pub unterminated_block: Option<UnterminatedBlock>,
}

/// Consumer of pipeline output
pub trait ProgressView {
    /// Print a pass-through line above the live region
    fn print_line(&mut self, line: &ClassifiedLine) -> io::Result<()>;

    /// Redraw the live region from a snapshot
    fn draw(&mut self, snapshot: &ProgressSnapshot) -> io::Result<()>;

    /// Replace the live region with the static summary; no more redraws
    fn finish(&mut self, summary: &RunSummary) -> io::Result<()>;
}

struct Segment {
    style: Option<&'static str>,
    text: String,
}

impl Segment {
    fn plain(text: impl Into<String>) -> Self {
        Self {
            style: None,
            text: text.into(),
        }
    }

    fn styled(style: &'static str, text: impl Into<String>) -> Self {
        Self {
            style: Some(style),
            text: text.into(),
        }
    }
}

/// ANSI terminal implementation of [`ProgressView`]
pub struct TerminalRenderer<W: Write> {
    out: W,
    options: RenderOptions,
    /// Region lines currently on screen above the cursor
    drawn: usize,
    last_frame: Option<Vec<String>>,
    finished: bool,
    spinner: ProgressStyle,
}

impl<W: Write> TerminalRenderer<W> {
    pub fn new(out: W, options: RenderOptions) -> Self {
        Self {
            out,
            options,
            drawn: 0,
            last_frame: None,
            finished: false,
            spinner: ProgressStyle::default_spinner().tick_chars(SPINNER_TICKS),
        }
    }

    pub fn options(&self) -> &RenderOptions {
        &self.options
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Fixed height of the live region
    pub fn region_height(&self) -> usize {
        1 + self.options.max_active
    }

    fn width(&self) -> usize {
        let columns = match self.options.width {
            Some(width) => usize::from(width),
            None => terminal::size()
                .map(|(columns, _)| usize::from(columns))
                .unwrap_or(FALLBACK_WIDTH),
        };
        // Writing into the last column triggers auto-wrap on some terminals
        columns.saturating_sub(1).max(MIN_WIDTH)
    }

    /// Lines of the live region for `snapshot`, exactly [`region_height`] long
    ///
    /// [`region_height`]: TerminalRenderer::region_height
    pub fn frame_lines(&self, snapshot: &ProgressSnapshot) -> Vec<String> {
        let width = self.width();
        let mut frame = Vec::with_capacity(self.region_height());
        frame.push(self.compose(&self.summary_segments(snapshot), width));

        let max_active = self.options.max_active;
        let overflow = snapshot.active.len() > max_active;
        let listed = if overflow {
            max_active.saturating_sub(1)
        } else {
            snapshot.active.len()
        };

        for record in snapshot.active.iter().take(listed) {
            let elapsed = record.elapsed_at(snapshot.taken_at);
            let mut detail = String::new();
            if let Some(verb) = &record.verb {
                detail.push_str(verb);
                detail.push(' ');
            }
            detail.push_str(&format_duration(elapsed));

            let segments = vec![
                Segment::plain("  "),
                Segment::styled(sgr::CYAN, "↻"),
                Segment::plain(format!(" {} ", record.id)),
                Segment::styled(sgr::DIM, detail),
            ];
            frame.push(self.compose(&segments, width));
        }

        if overflow && max_active > 0 {
            let hidden = snapshot.active.len() - listed;
            let segments = vec![Segment::styled(sgr::DIM, format!("  … and {hidden} more"))];
            frame.push(self.compose(&segments, width));
        }

        frame.resize(self.region_height(), String::new());
        frame
    }

    fn summary_segments(&self, snapshot: &ProgressSnapshot) -> Vec<Segment> {
        let tick = snapshot.elapsed.as_millis() / SPINNER_FRAME.as_millis();
        let spinner = self.spinner.get_tick_str(tick as u64);
        let mut segments = vec![
            Segment::styled(sgr::CYAN, spinner),
            Segment::plain(" "),
            Segment::styled(sgr::BOLD, format_duration(snapshot.elapsed)),
            Segment::plain("  "),
        ];

        let pending = snapshot.count(ResourceStatus::Pending);
        if pending > 0 {
            segments.push(Segment::styled(sgr::DIM, format!("{pending} pending")));
            segments.push(Segment::plain("  "));
        }
        segments.push(Segment::styled(
            sgr::YELLOW,
            format!("{} running", snapshot.count(ResourceStatus::Running)),
        ));
        segments.push(Segment::plain("  "));
        segments.push(Segment::styled(
            sgr::GREEN,
            format!("{} done", snapshot.count(ResourceStatus::Done)),
        ));
        segments.push(Segment::plain("  "));
        segments.push(Segment::styled(
            sgr::RED,
            format!("{} failed", snapshot.count(ResourceStatus::Failed)),
        ));
        segments.push(Segment::styled(
            sgr::DIM,
            format!("  ({} lines)", snapshot.total_lines),
        ));
        segments
    }

    fn compose(&self, segments: &[Segment], width: usize) -> String {
        let mut line = String::new();
        let mut remaining = width;

        for segment in segments {
            if remaining == 0 {
                break;
            }
            let text = truncate(&segment.text, remaining);
            remaining -= text.chars().count();

            match segment.style {
                Some(style) if self.options.color => {
                    line.push_str(style);
                    line.push_str(&text);
                    line.push_str(sgr::RESET);
                }
                _ => line.push_str(&text),
            }
        }
        line
    }

    fn summary_lines(&self, summary: &RunSummary) -> Vec<String> {
        let snapshot = &summary.snapshot;
        let failed = snapshot.count(ResourceStatus::Failed);
        let succeeded = summary.exit_code.unwrap_or(0) == 0 && failed == 0;
        let width = usize::MAX;

        let mut headline = vec![
            if succeeded {
                Segment::styled(sgr::GREEN, "✓")
            } else {
                Segment::styled(sgr::RED, "✗")
            },
            Segment::plain(format!(" Finished in {}: ", HumanDuration(snapshot.elapsed))),
            Segment::styled(
                sgr::GREEN,
                format!("{} done", snapshot.count(ResourceStatus::Done)),
            ),
            Segment::plain(", "),
            Segment::styled(sgr::RED, format!("{failed} failed")),
            Segment::plain(format!(
                ", {} still running",
                snapshot.count(ResourceStatus::Running)
            )),
        ];
        if let Some(code) = summary.exit_code.filter(|code| *code != 0) {
            headline.push(Segment::styled(sgr::RED, format!(" (exit code {code})")));
        }

        let mut lines = vec![self.compose(&headline, width)];

        if let Some(footer) = &snapshot.footer {
            lines.push(self.compose(&[Segment::plain(format!("  {footer}"))], width));
        }

        if !snapshot.failed.is_empty() {
            lines.push(self.compose(&[Segment::styled(sgr::BOLD, "  Failed resources:")], width));
            for record in &snapshot.failed {
                let segments = vec![
                    Segment::plain("    "),
                    Segment::styled(sgr::RED, "✗"),
                    Segment::plain(format!(" {}", record.id)),
                ];
                lines.push(self.compose(&segments, width));
            }
        }

        if let Some(block) = &summary.unterminated_block {
            let text = format!(
                "  ⚠ Output ended inside a suppressed block ({} lines hidden, opened by {:?})",
                block.dropped_lines, block.opened_by
            );
            lines.push(self.compose(&[Segment::styled(sgr::YELLOW, text)], width));
        }

        lines
    }

    /// Move to the top of the region and clear it
    fn queue_clear(&mut self, buf: &mut Vec<u8>) -> io::Result<()> {
        if self.drawn > 0 {
            let rows = u16::try_from(self.drawn).unwrap_or(u16::MAX);
            queue!(buf, MoveToPreviousLine(rows), Clear(ClearType::FromCursorDown))?;
            self.drawn = 0;
        }
        Ok(())
    }

    fn push_line(&self, buf: &mut Vec<u8>, line: &ClassifiedLine) {
        if self.options.color {
            buf.extend_from_slice(line.raw_text.as_bytes());
            if line.has_ansi() {
                buf.extend_from_slice(sgr::RESET.as_bytes());
            }
        } else {
            buf.extend_from_slice(line.plain_text.as_bytes());
        }
        buf.push(b'\n');
    }

    fn push_frame(&mut self, buf: &mut Vec<u8>, frame: &[String]) {
        for line in frame {
            buf.extend_from_slice(line.as_bytes());
            buf.push(b'\n');
        }
        if self.options.color {
            buf.extend_from_slice(sgr::RESET.as_bytes());
        }
        self.drawn = frame.len();
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        self.out.write_all(buf)?;
        self.out.flush()
    }
}

impl<W: Write> ProgressView for TerminalRenderer<W> {
    fn print_line(&mut self, line: &ClassifiedLine) -> io::Result<()> {
        let mut buf = Vec::with_capacity(line.raw_text.len() + 64);

        if self.options.mode == RenderMode::Progress && !self.finished {
            self.queue_clear(&mut buf)?;
            self.push_line(&mut buf, line);
            if let Some(frame) = self.last_frame.take() {
                self.push_frame(&mut buf, &frame);
                self.last_frame = Some(frame);
            }
        } else {
            self.push_line(&mut buf, line);
        }

        self.write(&buf)
    }

    fn draw(&mut self, snapshot: &ProgressSnapshot) -> io::Result<()> {
        if self.options.mode == RenderMode::Plain || self.finished {
            return Ok(());
        }

        let frame = self.frame_lines(snapshot);
        let mut buf = Vec::new();
        self.queue_clear(&mut buf)?;
        self.push_frame(&mut buf, &frame);
        self.last_frame = Some(frame);
        self.write(&buf)
    }

    fn finish(&mut self, summary: &RunSummary) -> io::Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        let mut buf = Vec::new();
        self.queue_clear(&mut buf)?;
        self.last_frame = None;
        for line in self.summary_lines(summary) {
            buf.extend_from_slice(line.as_bytes());
            buf.push(b'\n');
        }
        self.write(&buf)
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    if max_chars == 0 {
        return String::new();
    }
    let mut truncated: String = text.chars().take(max_chars - 1).collect();
    truncated.push('…');
    truncated
}

/// Compact elapsed time: `42s`, `3m 05s`, `1h 02m 03s`
pub fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {:02}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
