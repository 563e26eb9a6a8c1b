//! Streaming-HTTP transport binding.
//!
//! Each JSON-RPC request is an HTTP POST. The provider answers either with a
//! single JSON body or with a `text/event-stream` whose last event is the
//! response. For event-stream providers, the `Mcp-Session-Id` issued on
//! `initialize` is echoed on every later request.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::Client as HttpClient;

use super::config::TransportKind;
use super::errors::McpError;
use super::events::{BridgeEvent, EventSink};
use super::pending::PendingRequests;
use super::sse::read_last_event;
use super::types::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, PROTOCOL_VERSION};

// ─── Constants ───────────────────────────────────────────────────────────────

/// TCP connection timeout. Overall deadlines come from the pending map.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Bound on the best-effort session `DELETE` during teardown.
const SESSION_CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

pub const SESSION_HEADER: &str = "Mcp-Session-Id";
pub const PROTOCOL_VERSION_HEADER: &str = "MCP-Protocol-Version";
const ACCEPT_BOTH: &str = "application/json, text/event-stream";

// ─── HttpTransport ───────────────────────────────────────────────────────────

/// One logical session against a remote MCP endpoint.
pub struct HttpTransport {
    provider: String,
    url: String,
    /// Statically configured headers, validated at construction.
    headers: HeaderMap,
    /// Only event-stream providers track a session token.
    tracks_session: bool,
    session: RwLock<Option<String>>,
    http: HttpClient,
    events: EventSink,
}

impl HttpTransport {
    pub fn new(
        provider: &str,
        url: &str,
        headers: &HashMap<String, String>,
        kind: TransportKind,
        events: EventSink,
    ) -> Result<Self, McpError> {
        let mut header_map = HeaderMap::new();
        for (key, value) in headers {
            let name = HeaderName::from_bytes(key.as_bytes()).map_err(|e| McpError::ConfigError {
                reason: format!("provider '{provider}': invalid header name '{key}': {e}"),
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| McpError::ConfigError {
                reason: format!("provider '{provider}': invalid value for header '{key}': {e}"),
            })?;
            header_map.insert(name, value);
        }

        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| McpError::TransportError {
                provider: provider.to_string(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            provider: provider.to_string(),
            url: url.to_string(),
            headers: header_map,
            tracks_session: kind == TransportKind::HttpEventStream,
            session: RwLock::new(None),
            http,
            events,
        })
    }

    /// The captured session token, if any.
    pub fn session_id(&self) -> Option<String> {
        self.session.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn post(&self) -> reqwest::RequestBuilder {
        let mut builder = self
            .http
            .post(&self.url)
            .headers(self.headers.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, ACCEPT_BOTH)
            .header(PROTOCOL_VERSION_HEADER, PROTOCOL_VERSION);
        if let Some(session) = self.session_id() {
            builder = builder.header(SESSION_HEADER, session);
        }
        builder
    }

    fn transport_error(&self, e: reqwest::Error) -> McpError {
        McpError::TransportError {
            provider: self.provider.clone(),
            reason: if e.is_connect() {
                format!("connection to {} failed: {e}", self.url)
            } else {
                e.to_string()
            },
        }
    }

    fn parse_error(&self, reason: String) -> McpError {
        McpError::ParseError {
            provider: self.provider.clone(),
            reason,
        }
    }

    /// POST a request and settle its pending entry from the response.
    pub async fn send(
        &self,
        request: &JsonRpcRequest,
        pending: &PendingRequests,
    ) -> Result<(), McpError> {
        let response = self
            .post()
            .json(request)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(McpError::HttpStatus {
                provider: self.provider.clone(),
                status: status.as_u16(),
                body,
            });
        }

        if self.tracks_session && request.method == "initialize" {
            let issued = response
                .headers()
                .get(SESSION_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            if let Some(token) = issued {
                tracing::debug!(provider = %self.provider, "captured session token");
                *self.session.write().unwrap_or_else(|e| e.into_inner()) = Some(token);
            }
        }

        let is_event_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));

        let message = if is_event_stream {
            let events = &self.events;
            let provider = &self.provider;
            read_last_event(response.bytes_stream(), provider, |payload| {
                events.emit(BridgeEvent::ToolProgress {
                    provider: provider.clone(),
                    payload,
                });
            })
            .await?
            .ok_or_else(|| self.parse_error("event stream ended without a response".into()))?
        } else {
            let body = response.text().await.map_err(|e| self.transport_error(e))?;
            serde_json::from_str::<serde_json::Value>(&body)
                .map_err(|e| self.parse_error(format!("invalid JSON body: {e}")))?
        };

        let response = JsonRpcResponse::from_value(message)
            .ok_or_else(|| self.parse_error("body is not a JSON-RPC response".into()))?;
        // The body answers this POST; never route it to another request.
        if response.id != request.id {
            tracing::warn!(
                provider = %self.provider,
                expected = request.id,
                got = response.id,
                "response id does not match request"
            );
            return Err(self.parse_error(format!(
                "response id {} does not match request id {}",
                response.id, request.id
            )));
        }
        pending.settle(response);
        Ok(())
    }

    /// POST a notification; any 2xx (usually 202) is success.
    pub async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        let notification = JsonRpcNotification::new(method, params);
        let response = self
            .post()
            .json(&notification)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(McpError::HttpStatus {
                provider: self.provider.clone(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    /// End the server-side session (best-effort) and forget the token.
    pub async fn teardown(&self) {
        let token = self
            .session
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(token) = token else {
            return;
        };

        let request = self
            .http
            .delete(&self.url)
            .headers(self.headers.clone())
            .header(SESSION_HEADER, token)
            .timeout(SESSION_CLOSE_TIMEOUT)
            .send();
        match request.await {
            Ok(resp) => {
                tracing::debug!(provider = %self.provider, status = %resp.status(), "session closed");
            }
            Err(e) => {
                tracing::debug!(provider = %self.provider, error = %e, "session close failed");
            }
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
