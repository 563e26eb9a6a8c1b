//! Provider lifecycle management.
//!
//! A `ProviderInstance` owns one transport, its pending-request map, and the
//! tool catalog discovered from it. State moves
//! `Unconfigured → Initializing → Ready`, or `Initializing → Failed`; a Ready
//! provider leaves service only when its process exits or on teardown.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use super::config::{ProviderConfig, Timeouts, TransportConfig, TransportKind};
use super::errors::McpError;
use super::events::EventSink;
use super::http::HttpTransport;
use super::pending::{InFlight, PendingRequests};
use super::transport::{SpawnOptions, StdioTransport, Transport};
use super::types::{
    initialize_params, InitializeResult, JsonRpcRequest, ServerInfo, ToolDescriptor,
    ToolsListResult,
};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Upper bound on `tools/list` pages followed via `nextCursor`.
const MAX_LIST_PAGES: usize = 32;

/// Time allowed for a failing process to flush stderr before it is reported.
const STDERR_SETTLE: Duration = Duration::from_millis(200);

/// Cap on stderr included in an init failure message.
const STDERR_REASON_MAX: usize = 2000;

// ─── State ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderState {
    Unconfigured,
    Initializing,
    Ready,
    /// Terminal: the provider never became usable.
    Failed,
    /// Torn down, or its process exited after being Ready.
    Stopped,
}

/// Diagnostic snapshot of one provider.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    pub name: String,
    pub kind: TransportKind,
    pub state: ProviderState,
    pub tool_count: usize,
    pub in_flight: Vec<InFlight>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr_tail: Option<String>,
}

// ─── ProviderInstance ────────────────────────────────────────────────────────

/// One configured provider and everything it owns.
pub struct ProviderInstance {
    name: String,
    kind: TransportKind,
    state: ProviderState,
    failure: Option<String>,
    transport: Option<Transport>,
    pending: Arc<PendingRequests>,
    timeouts: Timeouts,
    tools: Vec<ToolDescriptor>,
    server_info: Option<ServerInfo>,
}

impl ProviderInstance {
    pub fn new(config: &ProviderConfig, timeouts: Timeouts) -> Self {
        Self {
            name: config.name.clone(),
            kind: config.transport.kind(),
            state: ProviderState::Unconfigured,
            failure: None,
            transport: None,
            pending: Arc::new(PendingRequests::new(&config.name)),
            timeouts,
            tools: Vec::new(),
            server_info: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// Lifecycle state, folding in a process exit noticed by the reader task.
    pub fn state(&self) -> ProviderState {
        match (&self.state, &self.transport) {
            (ProviderState::Ready, Some(t)) if !t.is_alive() => ProviderState::Stopped,
            (state, _) => *state,
        }
    }

    /// Whether dispatch may route calls here.
    pub fn is_ready(&self) -> bool {
        self.state() == ProviderState::Ready
    }

    /// Discovered catalog (empty until discovery succeeds).
    pub fn tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    /// Requests currently awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    // ─── Bring-up ────────────────────────────────────────────────────────

    /// Establish the transport and perform the MCP handshake.
    ///
    /// On failure the provider is left `Failed` with its transport torn down.
    pub async fn initialize(
        &mut self,
        config: &ProviderConfig,
        events: &EventSink,
    ) -> Result<(), McpError> {
        self.state = ProviderState::Initializing;

        match self.bring_up(config, events).await {
            Ok(()) => {
                self.state = ProviderState::Ready;
                tracing::info!(
                    provider = %self.name,
                    kind = %self.kind,
                    server = ?self.server_info.as_ref().and_then(|s| s.name.as_deref()),
                    "provider ready"
                );
                Ok(())
            }
            Err(e) => {
                let reason = self.failure_reason(&e).await;
                if let Some(transport) = self.transport.take() {
                    transport.teardown().await;
                }
                self.pending.reject_all(|| McpError::ProviderUnavailable {
                    name: self.name.clone(),
                });
                self.state = ProviderState::Failed;
                self.failure = Some(reason.clone());
                tracing::warn!(provider = %self.name, reason = %reason, "provider failed to initialize");
                Err(match e {
                    McpError::SpawnFailed { .. } | McpError::ConfigError { .. } => e,
                    _ => McpError::InitFailed {
                        name: self.name.clone(),
                        reason,
                    },
                })
            }
        }
    }

    async fn bring_up(&mut self, config: &ProviderConfig, events: &EventSink) -> Result<(), McpError> {
        config.validate()?;

        let transport = match &config.transport {
            TransportConfig::LocalProcess {
                command,
                args,
                env,
                cwd,
            } => Transport::Stdio(StdioTransport::spawn(
                &self.name,
                SpawnOptions {
                    command,
                    args,
                    env,
                    cwd: cwd.as_deref(),
                },
                Arc::clone(&self.pending),
                events.clone(),
            )?),
            TransportConfig::HttpRequestResponse { url, headers }
            | TransportConfig::HttpEventStream { url, headers } => Transport::Http(
                HttpTransport::new(&self.name, url, headers, self.kind, events.clone())?,
            ),
        };
        self.transport = Some(transport);

        let result = self.issue("initialize", Some(initialize_params())).await?;
        let init: InitializeResult = serde_json::from_value(result).map_err(|e| {
            McpError::InitFailed {
                name: self.name.clone(),
                reason: format!("failed to parse initialize response: {e}"),
            }
        })?;
        if let Some(version) = init.protocol_version.as_deref() {
            if version != super::types::PROTOCOL_VERSION {
                tracing::debug!(provider = %self.name, version, "provider negotiated a different protocol version");
            }
        }
        self.server_info = init.server_info;

        self.transport_ref()?
            .notify("notifications/initialized", None)
            .await?;
        Ok(())
    }

    /// Human-readable failure reason, with stderr context for local processes.
    async fn failure_reason(&self, error: &McpError) -> String {
        let base = match error {
            McpError::InitFailed { reason, .. } | McpError::SpawnFailed { reason, .. } => {
                reason.clone()
            }
            other => other.to_string(),
        };
        let Some(transport) = self.transport.as_ref() else {
            return base;
        };
        if !matches!(transport, Transport::Stdio(_)) {
            return base;
        }
        tokio::time::sleep(STDERR_SETTLE).await;
        match transport.stderr_tail() {
            Some(tail) if !tail.trim().is_empty() => {
                let mut tail = tail.trim().to_string();
                if tail.len() > STDERR_REASON_MAX {
                    let cut = char_boundary_at_or_below(&tail, STDERR_REASON_MAX);
                    tail.truncate(cut);
                    tail.push_str("...(truncated)");
                }
                format!("{base} | stderr: {tail}")
            }
            _ => base,
        }
    }

    /// Fetch the tool catalog. Failure leaves the catalog empty.
    pub async fn discover(&mut self) -> Result<usize, McpError> {
        match self.list_tools().await {
            Ok(tools) => {
                tracing::debug!(provider = %self.name, tools = tools.len(), "discovered tools");
                self.tools = tools;
                Ok(self.tools.len())
            }
            Err(e) => {
                self.tools.clear();
                Err(e)
            }
        }
    }

    /// Follow `nextCursor` through every `tools/list` page.
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, McpError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let params = cursor.as_ref().map(|c| serde_json::json!({"cursor": c}));
            let result = self.request("tools/list", params).await?;
            let page: ToolsListResult =
                serde_json::from_value(result).map_err(|e| McpError::ParseError {
                    provider: self.name.clone(),
                    reason: format!("invalid tools/list result: {e}"),
                })?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }
        Ok(tools)
    }

    // ─── Requests ────────────────────────────────────────────────────────

    fn transport_ref(&self) -> Result<&Transport, McpError> {
        self.transport
            .as_ref()
            .ok_or_else(|| McpError::ProviderUnavailable {
                name: self.name.clone(),
            })
    }

    /// Send a request with the method's deadline and await its single outcome.
    async fn issue(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, McpError> {
        let transport = self.transport_ref()?;
        let ticket = self.pending.register(method, self.timeouts.for_method(method));
        let request = JsonRpcRequest::new(ticket.id, method, params);
        tracing::debug!(provider = %self.name, id = request.id, method, "sending request");
        self.pending
            .complete(ticket, transport.send(&request, &self.pending))
            .await
    }

    /// Send a request to a Ready provider.
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, McpError> {
        if !self.is_ready() {
            return Err(McpError::ProviderUnavailable {
                name: self.name.clone(),
            });
        }
        self.issue(method, params).await
    }

    /// Invoke `tools/call` and return the raw result.
    pub async fn call_tool(
        &self,
        tool: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, McpError> {
        let params = serde_json::json!({
            "name": tool,
            "arguments": arguments,
        });
        self.request("tools/call", Some(params)).await
    }

    // ─── Teardown ────────────────────────────────────────────────────────

    /// Release the transport, reject everything in flight, forget the catalog.
    /// Idempotent.
    pub async fn teardown(&mut self) {
        if let Some(transport) = self.transport.take() {
            transport.teardown().await;
        }
        let rejected = self.pending.reject_all(|| McpError::ProviderShutdown {
            name: self.name.clone(),
        });
        if rejected > 0 {
            tracing::info!(provider = %self.name, rejected, "rejected in-flight requests on shutdown");
        }
        self.tools.clear();
        if self.state != ProviderState::Failed {
            self.state = ProviderState::Stopped;
        }
    }

    pub fn status(&self) -> ProviderStatus {
        ProviderStatus {
            name: self.name.clone(),
            kind: self.kind,
            state: self.state(),
            tool_count: self.tools.len(),
            in_flight: self.pending.in_flight(),
            failure: self.failure.clone(),
            server_name: self.server_info.as_ref().and_then(|s| s.name.clone()),
            stderr_tail: self.transport.as_ref().and_then(Transport::stderr_tail),
        }
    }

    /// A Ready provider over an arbitrary transport, for dispatch tests.
    #[cfg(test)]
    pub(crate) fn ready_with(name: &str, transport: Transport, tools: Vec<ToolDescriptor>) -> Self {
        Self {
            name: name.to_string(),
            kind: TransportKind::LocalProcess,
            state: ProviderState::Ready,
            failure: None,
            transport: Some(transport),
            pending: Arc::new(PendingRequests::new(name)),
            timeouts: Timeouts {
                metadata_ms: 500,
                tool_call_ms: 500,
            },
            tools,
            server_info: None,
        }
    }
}

/// Largest char boundary in `s` at or below `index`.
fn char_boundary_at_or_below(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    (0..=index).rev().find(|i| s.is_char_boundary(*i)).unwrap_or(0)
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::mcp_client::config::parse_config;

    /// A minimal stdio MCP provider in POSIX sh. Request ids are predictable:
    /// 1 = initialize, 2 = tools/list, 3+ = tools/call.
    const FAKE_PROVIDER: &str = r#"
read init
echo '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2025-03-26","capabilities":{},"serverInfo":{"name":"fake","version":"0.1"}}}'
read initialized
read list
echo '{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"echo","description":"Echo text","inputSchema":{"type":"object","properties":{"text":{"type":"string"}}}}]}}'
read call
echo '{"jsonrpc":"2.0","id":3,"result":{"content":[{"type":"text","text":"hi"}]}}'
sleep 30
"#;

    fn sh_config(name: &str, script: &str) -> ProviderConfig {
        let yaml = format!(
            "providers:\n  - name: {name}\n    kind: local_process\n    command: sh\n    args: [\"-c\", {script:?}]\n"
        );
        parse_config(&yaml).unwrap().providers.remove(0)
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let config = sh_config("fake", FAKE_PROVIDER);
        let mut provider = ProviderInstance::new(&config, Timeouts::default());
        assert_eq!(provider.state(), ProviderState::Unconfigured);

        provider.initialize(&config, &EventSink::new()).await.unwrap();
        assert_eq!(provider.state(), ProviderState::Ready);
        assert_eq!(provider.status().server_name.as_deref(), Some("fake"));

        assert_eq!(provider.discover().await.unwrap(), 1);
        assert_eq!(provider.tools()[0].name, "echo");

        let result = provider
            .call_tool("echo", serde_json::json!({"text": "hi"}))
            .await
            .unwrap();
        assert_eq!(result["content"][0]["text"], "hi");

        provider.teardown().await;
        assert_eq!(provider.state(), ProviderState::Stopped);
        assert_eq!(provider.pending_count(), 0);
        assert!(provider.tools().is_empty());
        // Idempotent.
        provider.teardown().await;
    }

    #[tokio::test]
    async fn test_spawn_failure_marks_failed() {
        let mut config = sh_config("ghost", "x");
        config.transport = TransportConfig::LocalProcess {
            command: "/nonexistent/provider".into(),
            args: vec![],
            env: Default::default(),
            cwd: None,
        };
        let mut provider = ProviderInstance::new(&config, Timeouts::default());
        let err = provider.initialize(&config, &EventSink::new()).await.unwrap_err();
        assert!(matches!(err, McpError::SpawnFailed { .. }));
        assert_eq!(provider.state(), ProviderState::Failed);
        assert!(provider.status().failure.is_some());

        // Requests are refused without I/O.
        assert!(matches!(
            provider.request("tools/list", None).await,
            Err(McpError::ProviderUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_handshake_failure_includes_stderr() {
        let config = sh_config("broken", "echo 'ImportError: no module named mcp' >&2; exit 1");
        let mut provider = ProviderInstance::new(&config, Timeouts::default());
        let err = provider.initialize(&config, &EventSink::new()).await.unwrap_err();
        match err {
            McpError::InitFailed { reason, .. } => {
                assert!(reason.contains("ImportError"), "reason was: {reason}");
            }
            other => panic!("expected InitFailed, got {other:?}"),
        }
        assert_eq!(provider.state(), ProviderState::Failed);
    }

    #[tokio::test]
    async fn test_cat_provider_fails_handshake_by_timeout() {
        let config = sh_config("echo", "exec cat");
        let timeouts = Timeouts {
            metadata_ms: 200,
            tool_call_ms: 200,
        };
        let mut provider = ProviderInstance::new(&config, timeouts);
        let err = provider.initialize(&config, &EventSink::new()).await.unwrap_err();
        match err {
            McpError::InitFailed { reason, .. } => assert!(reason.contains("timed out")),
            other => panic!("expected InitFailed, got {other:?}"),
        }
        assert_eq!(provider.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_exit_after_ready_moves_to_stopped() {
        let script = r#"
read init
echo '{"jsonrpc":"2.0","id":1,"result":{}}'
read initialized
read call
exit 0
"#;
        let config = sh_config("flaky", script);
        let mut provider = ProviderInstance::new(&config, Timeouts::default());
        provider.initialize(&config, &EventSink::new()).await.unwrap();

        let err = provider
            .call_tool("anything", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::ProviderExited { .. }));
        assert_eq!(provider.state(), ProviderState::Stopped);
        assert!(!provider.is_ready());
    }

    #[tokio::test]
    async fn test_discovery_failure_keeps_provider_ready() {
        let script = r#"
read init
echo '{"jsonrpc":"2.0","id":1,"result":{}}'
read initialized
read list
echo '{"jsonrpc":"2.0","id":2,"error":{"code":-32601,"message":"Method not found"}}'
sleep 30
"#;
        let config = sh_config("notools", script);
        let mut provider = ProviderInstance::new(&config, Timeouts::default());
        provider.initialize(&config, &EventSink::new()).await.unwrap();

        assert!(matches!(
            provider.discover().await,
            Err(McpError::ServerError { .. })
        ));
        assert!(provider.tools().is_empty());
        assert!(provider.is_ready());
        provider.teardown().await;
    }

    #[tokio::test]
    async fn test_discovery_follows_cursor() {
        let script = r#"
read init
echo '{"jsonrpc":"2.0","id":1,"result":{}}'
read initialized
read list
echo '{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"a"}],"nextCursor":"page2"}}'
read list
echo '{"jsonrpc":"2.0","id":3,"result":{"tools":[{"name":"b"}]}}'
sleep 30
"#;
        let config = sh_config("paged", script);
        let mut provider = ProviderInstance::new(&config, Timeouts::default());
        provider.initialize(&config, &EventSink::new()).await.unwrap();
        assert_eq!(provider.discover().await.unwrap(), 2);
        let names: Vec<&str> = provider.tools().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        provider.teardown().await;
    }

    #[tokio::test]
    async fn test_rediscovery_with_bad_payload_clears_catalog() {
        let script = r#"
read init
echo '{"jsonrpc":"2.0","id":1,"result":{}}'
read initialized
read list
echo '{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"a"}]}}'
read list
echo '{"jsonrpc":"2.0","id":3,"result":{"tools":"not-a-list"}}'
sleep 30
"#;
        let config = sh_config("drifting", script);
        let mut provider = ProviderInstance::new(&config, Timeouts::default());
        provider.initialize(&config, &EventSink::new()).await.unwrap();
        assert_eq!(provider.discover().await.unwrap(), 1);

        assert!(matches!(
            provider.discover().await,
            Err(McpError::ParseError { .. })
        ));
        assert!(provider.tools().is_empty());
        assert!(provider.is_ready());
        provider.teardown().await;
    }

    #[test]
    fn test_char_boundary_at_or_below() {
        let s = "aé"; // 'é' occupies bytes 1..3
        assert_eq!(char_boundary_at_or_below(s, 2), 1);
        assert_eq!(char_boundary_at_or_below(s, 10), 3);
    }
}
