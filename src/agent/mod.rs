//! Bot agent (§4.2) — one agent owns one child process.
//!
//! [`BotAgent`] is the common contract both launch strategies implement.
//! [`ProcessSkeleton`] is the shared plumbing: it owns the [`tokio::process::Child`],
//! spawns the two reader tasks (stdout, stderr), and exposes the
//! start/send/stop/is_alive operations every variant wires into its own
//! spawn/teardown specifics.

pub mod container;
pub mod process;
pub mod registry;
#[cfg(test)]
pub(crate) mod fake;

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{error, warn};
use uuid::Uuid;

use crate::wire::Message;

/// Bounded grace period `stop()` waits for a graceful exit before killing
/// the child (§4.2, §5 "Cancellation & timeouts").
pub const STOP_GRACE_PERIOD: Duration = Duration::from_secs(3);

/// Callback invoked once per parsed inbound [`Message`], on whichever reader
/// task (stdout or stderr) produced it. Synchronous and non-blocking by
/// design: it typically just enqueues onto an `mpsc` channel that a single
/// `dispatch::MessageDispatcher::run` consumer drains in order, so message
/// handling never blocks a reader task (§4.2, §5 "Inbound messages are
/// processed in the order read from stdout").
pub type OnMessage = Arc<dyn Fn(Message) + Send + Sync>;

/// The common contract every launch strategy implements (§4.2).
#[async_trait]
pub trait BotAgent: Send + Sync {
    /// Spawn the child and start its reader tasks. Called at most once per
    /// agent instance; the registry enforces that by construction.
    async fn start(&mut self, on_message: OnMessage) -> anyhow::Result<()>;

    /// Serialize and write `msg` to the child's stdin. Never propagates an
    /// error upward (§4.2, §7 "Transient I/O") — a failed write is logged
    /// and dropped; the next heartbeat sweep reconciles.
    async fn send_message(&self, msg: &Message);

    /// True iff the child process exists and has not exited.
    async fn is_alive(&mut self) -> bool;

    /// Cancel reader tasks, await their termination, then terminate the
    /// child (escalating to a kill past [`STOP_GRACE_PERIOD`]). Idempotent.
    async fn stop(&mut self);

    fn bot_gid(&self) -> Uuid;
}

/// Shared process skeleton used by both [`process::RawProcessAgent`] and
/// [`container::ContainerAgent`] — the polymorphic-agent design note (§9):
/// "model as a tagged variant ... the shared stdout/stderr reader belongs
/// to the skeleton."
pub struct ProcessSkeleton {
    bot_gid: Uuid,
    child: Option<Child>,
    stdin: Option<Arc<Mutex<tokio::process::ChildStdin>>>,
    readers: Vec<JoinHandle<()>>,
}

impl ProcessSkeleton {
    pub fn new(bot_gid: Uuid) -> Self {
        Self { bot_gid, child: None, stdin: None, readers: Vec::new() }
    }

    pub fn bot_gid(&self) -> Uuid {
        self.bot_gid
    }

    /// Spawn `command` with piped stdio and start the stdout/stderr reader
    /// tasks, each parsing [`Message`] lines and handing them to
    /// `on_message` (§4.2). Stderr is not free-form: a bot's own `bot_log`
    /// messages travel in-band; anything that lands on stderr is still
    /// parsed as wire-format (falling back to a raw log line on failure).
    pub async fn spawn(&mut self, mut command: Command, on_message: OnMessage) -> anyhow::Result<()> {
        command.stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::piped());
        let mut child = command.spawn()?;

        let stdin = child.stdin.take().expect("piped stdin");
        let stdout = child.stdout.take().expect("piped stdout");
        let stderr = child.stderr.take().expect("piped stderr");

        let bot_gid = self.bot_gid;
        let on_stdout = on_message.clone();
        let stdout_task = tokio::spawn(read_stream(bot_gid, stdout, on_stdout, "stdout"));

        let on_stderr = on_message;
        let stderr_task = tokio::spawn(read_stream(bot_gid, stderr, on_stderr, "stderr"));

        self.child = Some(child);
        self.stdin = Some(Arc::new(Mutex::new(stdin)));
        self.readers = vec![stdout_task, stderr_task];
        Ok(())
    }

    pub async fn send_message(&self, msg: &Message) {
        let Some(stdin) = &self.stdin else {
            warn!(bot_gid = %self.bot_gid, "send_message with no stdin piped, dropping");
            return;
        };
        let line = match msg.to_line() {
            Ok(line) => line,
            Err(e) => {
                warn!(bot_gid = %self.bot_gid, error = %e, "failed to encode outbound message, dropping");
                return;
            }
        };
        let mut guard = stdin.lock().await;
        if let Err(e) = guard.write_all(&line).await {
            warn!(bot_gid = %self.bot_gid, error = %e, "stdin write failed, dropping message");
            return;
        }
        if let Err(e) = guard.flush().await {
            warn!(bot_gid = %self.bot_gid, error = %e, "stdin flush failed");
        }
    }

    pub async fn is_alive(&mut self) -> bool {
        match &mut self.child {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Cancel readers, await them, send a graceful terminate, escalate to
    /// kill past the grace period. Idempotent — calling on an already
    /// stopped skeleton is a no-op.
    pub async fn stop(&mut self) {
        for reader in self.readers.drain(..) {
            reader.abort();
            let _ = reader.await;
        }
        // Dropping stdin already signals EOF to a well-behaved bot; give it
        // `STOP_GRACE_PERIOD` to notice and exit on its own before escalating.
        self.stdin = None;

        let Some(mut child) = self.child.take() else { return };

        match tokio::time::timeout(STOP_GRACE_PERIOD, child.wait()).await {
            Ok(_) => {}
            Err(_) => {
                warn!(bot_gid = %self.bot_gid, "child did not exit within grace period, killing");
                let _ = child.kill().await;
                let _ = child.wait().await;
            }
        }
    }
}

async fn read_stream<R>(bot_gid: Uuid, stream: R, on_message: OnMessage, stream_name: &'static str)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match Message::from_line(bot_gid, line.as_bytes()) {
                    Ok(msg) => on_message(msg),
                    Err(e) => {
                        error!(bot_gid = %bot_gid, stream = stream_name, error = %e, raw = %line, "failed to parse message, skipping line");
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                error!(bot_gid = %bot_gid, stream = stream_name, error = %e, "reader stream error, stopping reader");
                break;
            }
        }
    }
}
