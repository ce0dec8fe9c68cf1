//! Child process plumbing
//!
//! Owns the child's three standard streams. stdin is copied on a dedicated
//! OS thread so a blocked read on the parent's terminal never stalls the
//! stdout/stderr readers; both output streams are read line by line on
//! their own tasks and funnelled into the [`Pipeline`].

use std::io::Read;
use std::process::Stdio;
use std::thread;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;

use super::pipeline::{Pipeline, PipelineMessage};
use super::render::ProgressView;
use super::types::{RunOutcome, StdinSource, StreamSource, WrappedCommand};
use crate::error::{FilterError, Result};

/// Default per-stream read buffer; long enough for huge inline diffs
pub const DEFAULT_READ_BUFFER_BYTES: usize = 32 * 1024 * 1024;

/// How long an unterminated line may sit in the buffer before it is shown
pub const DEFAULT_PARTIAL_LINE_FLUSH: Duration = Duration::from_millis(200);

const CHANNEL_CAPACITY: usize = 1024;
const STDIN_CHUNK_BYTES: usize = 4096;

pub struct StreamMultiplexer {
    command: WrappedCommand,
    read_buffer_bytes: usize,
    partial_flush: Duration,
}

impl StreamMultiplexer {
    pub fn new(command: WrappedCommand) -> Self {
        Self {
            command,
            read_buffer_bytes: DEFAULT_READ_BUFFER_BYTES,
            partial_flush: DEFAULT_PARTIAL_LINE_FLUSH,
        }
    }

    pub fn with_read_buffer(mut self, bytes: usize) -> Self {
        self.read_buffer_bytes = bytes.max(1);
        self
    }

    /// Idle time after which a line without a newline (a prompt) is sent on
    pub fn with_partial_flush(mut self, after: Duration) -> Self {
        self.partial_flush = after.max(Duration::from_millis(1));
        self
    }

    pub fn command(&self) -> &WrappedCommand {
        &self.command
    }

    /// Run the child to completion, feeding its output through `pipeline`.
    ///
    /// Spawn failures return before anything is drawn. Read failures stop
    /// only the affected stream; the error is returned after the child has
    /// exited and the live region has been finalized.
    pub async fn run<V: ProgressView>(
        self,
        stdin: StdinSource,
        pipeline: &mut Pipeline<V>,
    ) -> Result<RunOutcome> {
        let start = Instant::now();
        let program = self.command.program.clone();

        let mut cmd = Command::new(&self.command.program);
        cmd.args(&self.command.args);
        for (key, value) in &self.command.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &self.command.working_dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(match stdin {
            StdinSource::Closed => Stdio::null(),
            _ => Stdio::piped(),
        });
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        tracing::debug!("Spawning {}", self.command.display());
        let mut child = cmd.spawn().map_err(|source| FilterError::Spawn {
            program: program.clone(),
            source,
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or(FilterError::PipeUnavailable(StreamSource::Stdout))?;
        let stderr = child
            .stderr
            .take()
            .ok_or(FilterError::PipeUnavailable(StreamSource::Stderr))?;

        let stdin_task = child
            .stdin
            .take()
            .and_then(|child_stdin| forward_stdin(stdin, child_stdin));

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let readers = [
            tokio::spawn(forward_lines(
                stdout,
                StreamSource::Stdout,
                self.read_buffer_bytes,
                self.partial_flush,
                tx.clone(),
            )),
            tokio::spawn(forward_lines(
                stderr,
                StreamSource::Stderr,
                self.read_buffer_bytes,
                self.partial_flush,
                tx,
            )),
        ];

        pipeline.run(rx).await;

        let status = child.wait().await;
        if let Some(task) = stdin_task {
            task.abort();
        }
        let mut reader_failures = Vec::new();
        for reader in readers {
            if let Err(e) = reader.await {
                reader_failures.push(e);
            }
        }

        let exit_code = match &status {
            Ok(status) => Some(exit_code_of(*status)),
            Err(_) => None,
        };
        tracing::debug!("{} exited with {:?}", program, exit_code);

        let report = pipeline.finish(exit_code);
        for failure in reader_failures {
            tracing::warn!("Stream reader task failed: {}", failure);
        }
        let status = status.map_err(|source| FilterError::Wait {
            program: program.clone(),
            source,
        })?;

        if let Some(error) = pipeline.take_read_errors().into_iter().next() {
            return Err(error);
        }

        Ok(RunOutcome {
            exit_code: exit_code_of(status),
            snapshot: report.snapshot,
            unterminated_block: report.unterminated_block,
            suppressed_lines: report.suppressed_lines,
            duration: start.elapsed(),
        })
    }
}

/// Copy `source` into the child's stdin chunk by chunk, flushing each one.
///
/// Reading happens on an OS thread because the parent's stdin can block
/// forever; the thread is left behind when the child exits.
fn forward_stdin(source: StdinSource, mut child_stdin: ChildStdin) -> Option<JoinHandle<()>> {
    let mut reader: Box<dyn Read + Send> = match source {
        StdinSource::Parent => Box::new(std::io::stdin()),
        StdinSource::Reader(reader) => reader,
        StdinSource::Closed => return None,
    };

    let (chunk_tx, mut chunk_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let spawned = thread::Builder::new()
        .name("stdin-forward".to_string())
        .spawn(move || {
            let mut buf = [0u8; STDIN_CHUNK_BYTES];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if chunk_tx.send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        tracing::debug!("Stopped forwarding stdin: {}", e);
                        break;
                    }
                }
            }
        });
    if let Err(e) = spawned {
        tracing::warn!("Could not start stdin forwarding: {}", e);
        return None;
    }

    Some(tokio::spawn(async move {
        while let Some(chunk) = chunk_rx.recv().await {
            let written = async {
                child_stdin.write_all(&chunk).await?;
                child_stdin.flush().await
            };
            if let Err(e) = written.await {
                tracing::debug!("Child stdin closed: {}", e);
                break;
            }
        }
        // dropping child_stdin delivers EOF
    }))
}

/// Read `stream` line by line into the pipeline channel.
///
/// Lines are never truncated; invalid UTF-8 is decoded lossily and flagged.
/// Bytes left without a newline for `partial_flush` are sent as a line of
/// their own so prompts like `Enter a value: ` show up before the answer.
pub(crate) async fn forward_lines<R>(
    stream: R,
    source: StreamSource,
    capacity: usize,
    partial_flush: Duration,
    tx: mpsc::Sender<PipelineMessage>,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::with_capacity(capacity, stream);
    let mut buf = Vec::new();

    loop {
        // read_until keeps already-read bytes in `buf` when the timeout
        // cancels it, so the next call carries on with the same line
        let waited = time::timeout(partial_flush, reader.read_until(b'\n', &mut buf)).await;
        let read = match waited {
            Ok(read) => read,
            Err(_) if buf.is_empty() => continue,
            Err(_) => {
                tracing::trace!("Flushing {} byte partial line from {}", buf.len(), source);
                if send_line(&tx, source, std::mem::take(&mut buf)).await.is_err() {
                    break;
                }
                continue;
            }
        };

        match read {
            Ok(0) => {
                // an unterminated tail that arrived right before EOF
                if !buf.is_empty() {
                    let _ = send_line(&tx, source, std::mem::take(&mut buf)).await;
                }
                break;
            }
            Ok(_) if buf.last() != Some(&b'\n') => {
                // EOF ends the line; the next read returns 0
                let _ = send_line(&tx, source, std::mem::take(&mut buf)).await;
                break;
            }
            Ok(_) => {
                if send_line(&tx, source, std::mem::take(&mut buf)).await.is_err() {
                    break;
                }
            }
            Err(error) => {
                let _ = tx.send(PipelineMessage::ReadFailed { source, error }).await;
                break;
            }
        }
    }
}

async fn send_line(
    tx: &mpsc::Sender<PipelineMessage>,
    source: StreamSource,
    mut bytes: Vec<u8>,
) -> std::result::Result<(), mpsc::error::SendError<PipelineMessage>> {
    if bytes.last() == Some(&b'\n') {
        bytes.pop();
        if bytes.last() == Some(&b'\r') {
            bytes.pop();
        }
    }
    let (text, lossy) = match String::from_utf8(bytes) {
        Ok(text) => (text, false),
        Err(e) => (String::from_utf8_lossy(e.as_bytes()).into_owned(), true),
    };
    tx.send(PipelineMessage::Line { source, text, lossy }).await
}

/// Exit code of the child; on Unix a signal death maps to 128 + signal
pub fn exit_code_of(status: std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}
