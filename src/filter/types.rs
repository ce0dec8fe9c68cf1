//! Core types shared across the streaming filter

use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

use super::progress::ProgressSnapshot;
use super::suppressor::UnterminatedBlock;

/// Stream source identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamSource {
    Stdout,
    Stderr,
}

impl fmt::Display for StreamSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamSource::Stdout => write!(f, "stdout"),
            StreamSource::Stderr => write!(f, "stderr"),
        }
    }
}

/// The fully resolved command to run as the child process.
///
/// The executable path is an explicit value so callers and tests can point
/// it anywhere, rather than reading an environment override at spawn time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub working_dir: Option<PathBuf>,
}

impl WrappedCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: HashMap::new(),
            working_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Human readable command line for logs
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// Where the child's standard input comes from
pub enum StdinSource {
    /// Forward the parent's stdin byte-for-byte
    Parent,
    /// Forward an arbitrary reader (scripted input)
    Reader(Box<dyn Read + Send>),
    /// Child gets an already-closed stdin
    Closed,
}

impl fmt::Debug for StdinSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StdinSource::Parent => write!(f, "Parent"),
            StdinSource::Reader(_) => write!(f, "Reader(..)"),
            StdinSource::Closed => write!(f, "Closed"),
        }
    }
}

/// Result of a completed run
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Exit code of the child; signal deaths map to 128 + signal on Unix
    pub exit_code: i32,
    /// Final progress state
    pub snapshot: ProgressSnapshot,
    /// Set when the output ended inside a suppressed block
    pub unterminated_block: Option<UnterminatedBlock>,
    /// Lines hidden by the block suppressor
    pub suppressed_lines: usize,
    /// Wall-clock duration of the run
    pub duration: Duration,
}

impl RunOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrapped_command_builder() {
        let command = WrappedCommand::new("terraform")
            .arg("apply")
            .args(["-auto-approve", "-input=false"])
            .env("TF_IN_AUTOMATION", "1")
            .working_dir("/tmp");

        assert_eq!(command.program, "terraform");
        assert_eq!(command.args, vec!["apply", "-auto-approve", "-input=false"]);
        assert_eq!(command.env.get("TF_IN_AUTOMATION").map(String::as_str), Some("1"));
        assert_eq!(command.working_dir, Some(PathBuf::from("/tmp")));
        assert_eq!(command.display(), "terraform apply -auto-approve -input=false");
    }

    #[test]
    fn test_display_without_args() {
        assert_eq!(WrappedCommand::new("tofu").display(), "tofu");
    }

    #[test]
    fn test_stream_source_display() {
        assert_eq!(StreamSource::Stdout.to_string(), "stdout");
        assert_eq!(StreamSource::Stderr.to_string(), "stderr");
    }
}
