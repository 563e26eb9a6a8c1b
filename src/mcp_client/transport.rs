//! Transport bindings.
//!
//! `Transport` is the closed set of ways to reach a provider. Every variant
//! offers the same three capabilities (send a request, send a notification,
//! tear down), so the lifecycle and dispatch layers never branch on kind
//! after construction.
//!
//! The stdio binding lives here:
//! - Writing JSON-RPC requests to the child's stdin, one per line
//! - A background reader that demultiplexes stdout lines by request id
//! - A background reader that keeps a bounded tail of stderr for diagnostics

use std::collections::{HashMap, VecDeque};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Mutex;

use super::errors::McpError;
use super::events::{BridgeEvent, EventSink};
use super::http::HttpTransport;
use super::pending::PendingRequests;
use super::types::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

// ─── Constants ───────────────────────────────────────────────────────────────

/// How long teardown waits for a child to exit after stdin closes.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Stderr lines retained for diagnostics.
const STDERR_TAIL_LINES: usize = 40;

// ─── Transport ───────────────────────────────────────────────────────────────

/// A provider connection of one of the supported kinds.
pub enum Transport {
    Stdio(StdioTransport),
    Http(HttpTransport),
    #[cfg(test)]
    Spy(SpyTransport),
}

impl Transport {
    /// Put a registered request on the wire.
    ///
    /// Stdio only writes; the reader task settles the entry later. HTTP
    /// settles the entry from the response body before returning.
    pub async fn send(
        &self,
        request: &JsonRpcRequest,
        pending: &PendingRequests,
    ) -> Result<(), McpError> {
        match self {
            Transport::Stdio(t) => t.send(request).await,
            Transport::Http(t) => t.send(request, pending).await,
            #[cfg(test)]
            Transport::Spy(t) => t.send(request, pending),
        }
    }

    /// Send a JSON-RPC notification (no response expected).
    pub async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        match self {
            Transport::Stdio(t) => t.notify(method, params).await,
            Transport::Http(t) => t.notify(method, params).await,
            #[cfg(test)]
            Transport::Spy(_) => Ok(()),
        }
    }

    /// Release the connection. Idempotent.
    pub async fn teardown(&self) {
        match self {
            Transport::Stdio(t) => t.teardown().await,
            Transport::Http(t) => t.teardown().await,
            #[cfg(test)]
            Transport::Spy(_) => {}
        }
    }

    /// Whether the underlying connection can still carry requests.
    pub fn is_alive(&self) -> bool {
        match self {
            Transport::Stdio(t) => t.is_alive(),
            Transport::Http(_) => true,
            #[cfg(test)]
            Transport::Spy(_) => true,
        }
    }

    /// Recent stderr output, for local-process providers.
    pub fn stderr_tail(&self) -> Option<String> {
        match self {
            Transport::Stdio(t) => Some(t.stderr_tail()),
            _ => None,
        }
    }
}

// ─── Stdio ───────────────────────────────────────────────────────────────────

/// Settings for spawning a local-process provider.
pub struct SpawnOptions<'a> {
    pub command: &'a str,
    pub args: &'a [String],
    pub env: &'a HashMap<String, String>,
    pub cwd: Option<&'a str>,
}

/// Line-delimited JSON-RPC over a child process's stdio.
pub struct StdioTransport {
    provider: String,
    writer: Mutex<Option<ChildStdin>>,
    child: Mutex<Option<Child>>,
    /// Cleared by teardown, or by the reader when stdout closes.
    alive: Arc<AtomicBool>,
    stderr: Arc<StdMutex<VecDeque<String>>>,
}

impl StdioTransport {
    /// Spawn the provider process and start its reader tasks.
    pub fn spawn(
        provider: &str,
        opts: SpawnOptions<'_>,
        pending: Arc<PendingRequests>,
        events: EventSink,
    ) -> Result<Self, McpError> {
        let mut cmd = Command::new(opts.command);
        cmd.args(opts.args);
        // Overlay on the inherited environment.
        for (key, value) in opts.env {
            cmd.env(key, value);
        }
        if let Some(dir) = opts.cwd {
            cmd.current_dir(dir);
        }

        // Windows: prevent console window from appearing for child processes
        #[cfg(target_os = "windows")]
        {
            const CREATE_NO_WINDOW: u32 = 0x08000000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| McpError::SpawnFailed {
            name: provider.to_string(),
            reason: format!("{}: {e}", opts.command),
        })?;

        let capture_failed = |stream: &str| McpError::SpawnFailed {
            name: provider.to_string(),
            reason: format!("failed to capture {stream}"),
        };
        let stdin = child.stdin.take().ok_or_else(|| capture_failed("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| capture_failed("stdout"))?;
        let stderr_pipe = child.stderr.take();

        let alive = Arc::new(AtomicBool::new(true));
        let stderr = Arc::new(StdMutex::new(VecDeque::new()));

        tokio::spawn(read_stdout(
            provider.to_string(),
            stdout,
            pending,
            Arc::clone(&alive),
            events,
        ));
        if let Some(pipe) = stderr_pipe {
            tokio::spawn(read_stderr(provider.to_string(), pipe, Arc::clone(&stderr)));
        }

        tracing::debug!(provider, command = opts.command, pid = ?child.id(), "spawned provider process");

        Ok(Self {
            provider: provider.to_string(),
            writer: Mutex::new(Some(stdin)),
            child: Mutex::new(Some(child)),
            alive,
            stderr,
        })
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Recent stderr lines joined with newlines.
    pub fn stderr_tail(&self) -> String {
        let lines = self.stderr.lock().unwrap_or_else(|e| e.into_inner());
        lines.iter().cloned().collect::<Vec<_>>().join("\n")
    }

    async fn write_line(&self, mut line: String) -> Result<(), McpError> {
        if !self.is_alive() {
            return Err(McpError::ProviderUnavailable {
                name: self.provider.clone(),
            });
        }
        line.push('\n');

        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or_else(|| McpError::ProviderUnavailable {
            name: self.provider.clone(),
        })?;
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| McpError::TransportError {
                provider: self.provider.clone(),
                reason: format!("failed to write to stdin: {e}"),
            })?;
        writer.flush().await.map_err(|e| McpError::TransportError {
            provider: self.provider.clone(),
            reason: format!("failed to flush stdin: {e}"),
        })
    }

    async fn send(&self, request: &JsonRpcRequest) -> Result<(), McpError> {
        let json = serde_json::to_string(request).map_err(|e| McpError::TransportError {
            provider: self.provider.clone(),
            reason: format!("failed to serialize request: {e}"),
        })?;
        self.write_line(json).await
    }

    async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        let notification = JsonRpcNotification::new(method, params);
        let json = serde_json::to_string(&notification).map_err(|e| McpError::TransportError {
            provider: self.provider.clone(),
            reason: format!("failed to serialize notification: {e}"),
        })?;
        self.write_line(json).await
    }

    /// Close stdin, give the child a moment to exit, then kill and reap it.
    async fn teardown(&self) {
        self.alive.store(false, Ordering::Release);

        // Dropping stdin signals EOF to the provider.
        self.writer.lock().await.take();

        let mut guard = self.child.lock().await;
        if let Some(mut child) = guard.take() {
            match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
                Ok(Ok(status)) => {
                    tracing::debug!(provider = %self.provider, %status, "provider exited on stdin close");
                }
                _ => {
                    if let Err(e) = child.kill().await {
                        tracing::warn!(provider = %self.provider, error = %e, "failed to kill provider process");
                    }
                }
            }
        }
    }
}

/// Demultiplex stdout lines to pending requests until EOF.
async fn read_stdout<R>(
    provider: String,
    stdout: R,
    pending: Arc<PendingRequests>,
    alive: Arc<AtomicBool>,
    events: EventSink,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();

    let reason = loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break "stdout closed".to_string(),
            Ok(_) => dispatch_line(&provider, &buf, &pending),
            Err(e) => break format!("stdout read error: {e}"),
        }
    };

    // `alive` already false means teardown closed us; the registry rejects pending.
    if alive.swap(false, Ordering::AcqRel) {
        let rejected = pending.reject_all(|| McpError::ProviderExited {
            name: provider.clone(),
            reason: reason.clone(),
        });
        tracing::warn!(provider = %provider, rejected, reason = %reason, "provider process exited");
        events.emit(BridgeEvent::ProviderExited { provider, rejected });
    }
}

fn dispatch_line(provider: &str, raw: &[u8], pending: &PendingRequests) {
    let line = String::from_utf8_lossy(raw);
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return;
    }

    let value = match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(provider, error = %e, line = %trimmed, "dropping malformed line from provider");
            return;
        }
    };

    match JsonRpcResponse::from_value(value) {
        Some(response) => {
            pending.settle(response);
        }
        None => {
            tracing::debug!(provider, line = %trimmed, "ignoring unsolicited message");
        }
    }
}

async fn read_stderr<R>(provider: String, stderr: R, tail: Arc<StdMutex<VecDeque<String>>>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf).trim_end().to_string();
                tracing::debug!(provider = %provider, stderr = %line, "provider stderr");
                let mut lines = tail.lock().unwrap_or_else(|e| e.into_inner());
                if lines.len() == STDERR_TAIL_LINES {
                    lines.pop_front();
                }
                lines.push_back(line);
            }
        }
    }
}

// ─── Spy (tests) ─────────────────────────────────────────────────────────────

/// Scripted responder: given a request, optionally return the full response message.
#[cfg(test)]
pub type Responder = Box<dyn Fn(&JsonRpcRequest) -> Option<serde_json::Value> + Send + Sync>;

/// Records every request and answers from a script.
#[cfg(test)]
pub struct SpyTransport {
    pub sent: Arc<StdMutex<Vec<JsonRpcRequest>>>,
    responder: Responder,
}

#[cfg(test)]
impl SpyTransport {
    pub fn new(responder: Responder) -> Self {
        Self {
            sent: Arc::new(StdMutex::new(Vec::new())),
            responder,
        }
    }

    fn send(&self, request: &JsonRpcRequest, pending: &PendingRequests) -> Result<(), McpError> {
        self.sent.lock().unwrap().push(request.clone());
        if let Some(message) = (self.responder)(request) {
            if let Some(response) = JsonRpcResponse::from_value(message) {
                pending.settle(response);
            }
        }
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
