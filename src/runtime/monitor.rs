//! Output monitor
//!
//! One monitor task per agent owns the `Child`. It turns every stdout line
//! into an INFO log event and every stderr line into an ERROR log event,
//! applies termination requests, and publishes exactly one `completed` or
//! `crashed` status once the process exits. A read error on one stream only
//! ends that stream.

use std::io;
use std::time::Duration;

use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::LogLevel;

use super::process::{signal_child, ExitOutcome, ProcessHandle, ProcessSignal};
use super::publisher::AgentPublisher;

/// How long to wait for a cancelled monitor before aborting it
const CANCEL_WAIT: Duration = Duration::from_millis(500);

/// Called once with the exit outcome after the final status is published
pub(crate) type ExitCallback = Box<dyn FnOnce(ExitOutcome) + Send + 'static>;

/// Longest line published as one event; longer lines are split
const MAX_LINE_BYTES: usize = 64 * 1024;

/// Cancel-safe line reader with a bounded line length
///
/// Bytes move from the `BufReader` into `buf` without an await in between,
/// so a read interrupted by `select!` loses nothing. A line that reaches
/// `max_line` bytes without a newline is returned as a chunk.
struct LineReader<R> {
    reader: BufReader<R>,
    buf: Vec<u8>,
    max_line: usize,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    fn new(inner: R) -> Self {
        Self::with_limit(inner, MAX_LINE_BYTES)
    }

    fn with_limit(inner: R, max_line: usize) -> Self {
        Self {
            reader: BufReader::new(inner),
            buf: Vec::new(),
            max_line: max_line.max(1),
        }
    }

    /// Next line (or chunk) without its terminator; `None` at end of stream
    async fn next_line(&mut self) -> io::Result<Option<String>> {
        loop {
            let available = self.reader.fill_buf().await?;
            if available.is_empty() {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(self.take_line()));
            }

            let room = self.max_line - self.buf.len();
            let window = &available[..available.len().min(room)];
            let (used, complete) = match window.iter().position(|b| *b == b'\n') {
                Some(newline) => (newline + 1, true),
                None => (window.len(), false),
            };
            self.buf.extend_from_slice(&window[..used]);
            self.reader.consume(used);

            if complete || self.buf.len() >= self.max_line {
                return Ok(Some(self.take_line()));
            }
        }
    }

    fn take_line(&mut self) -> String {
        let line = String::from_utf8_lossy(&self.buf)
            .trim_end_matches(['\n', '\r'])
            .to_string();
        self.buf.clear();
        line
    }
}

async fn next_line<R: AsyncRead + Unpin>(
    reader: &mut Option<LineReader<R>>,
) -> io::Result<Option<String>> {
    match reader {
        Some(reader) => reader.next_line().await,
        None => std::future::pending().await,
    }
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    fn level(self) -> LogLevel {
        match self {
            Stream::Stdout => LogLevel::Info,
            Stream::Stderr => LogLevel::Error,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Stream::Stdout => "stdout",
            Stream::Stderr => "stderr",
        }
    }
}

/// Supervisor-side handle on a monitor task
#[derive(Debug)]
pub(crate) struct MonitorHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl MonitorHandle {
    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Let the monitor finish within `limit`, then cancel it
    pub(crate) async fn finish(mut self, limit: Duration) {
        if tokio::time::timeout(limit, &mut self.join).await.is_ok() {
            return;
        }
        self.cancel.cancel();
        if tokio::time::timeout(CANCEL_WAIT, &mut self.join).await.is_err() {
            tracing::warn!("Monitor task did not stop after cancellation; aborting");
            self.join.abort();
        }
    }
}

/// Start monitoring `child`
pub(crate) fn spawn(
    agent_id: String,
    child: Child,
    publisher: AgentPublisher,
    drain_timeout: Duration,
    on_exit: ExitCallback,
) -> (ProcessHandle, MonitorHandle) {
    let (process, control_rx, exit_tx) = ProcessHandle::channel(child.id());
    let cancel = CancellationToken::new();

    let monitor = Monitor {
        agent_id,
        publisher,
        drain_timeout,
        cancel: cancel.clone(),
    };
    let join = tokio::spawn(monitor.run(child, control_rx, exit_tx, on_exit));

    (process, MonitorHandle { cancel, join })
}

struct Monitor {
    agent_id: String,
    publisher: AgentPublisher,
    drain_timeout: Duration,
    cancel: CancellationToken,
}

impl Monitor {
    async fn run(
        self,
        mut child: Child,
        mut control_rx: mpsc::Receiver<ProcessSignal>,
        exit_tx: watch::Sender<Option<ExitOutcome>>,
        on_exit: ExitCallback,
    ) {
        let mut stdout = child.stdout.take().map(LineReader::new);
        let mut stderr = child.stderr.take().map(LineReader::new);

        let outcome = loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::debug!(agent_id = %self.agent_id, "Monitor cancelled before exit");
                    return;
                }
                Some(signal) = control_rx.recv() => {
                    if let Err(e) = signal_child(&mut child, signal) {
                        tracing::warn!(
                            agent_id = %self.agent_id,
                            ?signal,
                            error = %e,
                            "Failed to signal agent process"
                        );
                    }
                }
                line = next_line(&mut stdout), if stdout.is_some() => {
                    if !self.on_line(Stream::Stdout, line) {
                        stdout = None;
                    }
                }
                line = next_line(&mut stderr), if stderr.is_some() => {
                    if !self.on_line(Stream::Stderr, line) {
                        stderr = None;
                    }
                }
                status = child.wait() => {
                    break match status {
                        Ok(status) => ExitOutcome::from_status(status),
                        Err(e) => {
                            tracing::error!(
                                agent_id = %self.agent_id,
                                error = %e,
                                "Failed to wait for agent process"
                            );
                            ExitOutcome::unknown()
                        }
                    };
                }
            }
        };

        // Unblocks Stop as soon as the process is gone
        let _ = exit_tx.send(Some(outcome));

        self.drain(&mut stdout, &mut stderr).await;

        let status = outcome.status();
        self.publisher.status(
            status,
            json!({"exit_code": outcome.code, "signal": outcome.signal}),
        );
        tracing::info!(
            agent_id = %self.agent_id,
            exit_code = ?outcome.code,
            signal = ?outcome.signal,
            status = %status.as_str(),
            "Agent process exited"
        );

        on_exit(outcome);
    }

    /// Read what is left in the pipes, bounded by the drain timeout
    async fn drain<R: AsyncRead + Unpin, E: AsyncRead + Unpin>(
        &self,
        stdout: &mut Option<LineReader<R>>,
        stderr: &mut Option<LineReader<E>>,
    ) {
        let drain = async {
            while stdout.is_some() || stderr.is_some() {
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    line = next_line(stdout), if stdout.is_some() => {
                        if !self.on_line(Stream::Stdout, line) {
                            *stdout = None;
                        }
                    }
                    line = next_line(stderr), if stderr.is_some() => {
                        if !self.on_line(Stream::Stderr, line) {
                            *stderr = None;
                        }
                    }
                }
            }
        };

        if tokio::time::timeout(self.drain_timeout, drain).await.is_err() {
            tracing::debug!(
                agent_id = %self.agent_id,
                "Output still open after exit; stopped draining"
            );
        }
    }

    /// Publish one line; returns false once the stream is finished
    fn on_line(&self, stream: Stream, line: io::Result<Option<String>>) -> bool {
        match line {
            Ok(Some(line)) => {
                let message = line.trim_end();
                if !message.is_empty() {
                    self.publisher.log(stream.level(), message);
                }
                true
            }
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(
                    agent_id = %self.agent_id,
                    stream = stream.name(),
                    error = %e,
                    "Failed to read agent output"
                );
                false
            }
        }
    }
}
