//! MCP Client error types.
//!
//! Nothing here is fatal to the hosting process. Provider-level failures
//! (`SpawnFailed`, `InitFailed`) are recovered by the registry; everything
//! else surfaces as the result of a single call.

use thiserror::Error;

/// Errors that can occur during MCP client operations.
#[derive(Debug, Error)]
pub enum McpError {
    /// A provider process failed to start.
    #[error("failed to spawn provider '{name}': {reason}")]
    SpawnFailed { name: String, reason: String },

    /// The initialization handshake failed.
    #[error("provider '{name}' initialization failed: {reason}")]
    InitFailed { name: String, reason: String },

    /// I/O or connection failure while talking to a provider.
    #[error("transport error for provider '{provider}': {reason}")]
    TransportError { provider: String, reason: String },

    /// A message from the provider could not be decoded.
    #[error("malformed message from provider '{provider}': {reason}")]
    ParseError { provider: String, reason: String },

    /// No matching response arrived before the deadline.
    #[error("request '{method}' to provider '{provider}' timed out after {timeout_ms}ms")]
    Timeout {
        provider: String,
        method: String,
        timeout_ms: u64,
    },

    /// Provider returned a JSON-RPC error object.
    #[error("server error [{code}]: {message}")]
    ServerError {
        code: i32,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// No ready provider owns the requested tool.
    #[error("unknown tool: '{name}'")]
    UnknownTool { name: String },

    /// Non-2xx HTTP response for a single request.
    #[error("provider '{provider}' returned HTTP {status}: {body}")]
    HttpStatus {
        provider: String,
        status: u16,
        body: String,
    },

    /// The provider process exited while the request was in flight.
    #[error("provider '{name}' exited: {reason}")]
    ProviderExited { name: String, reason: String },

    /// The provider was torn down while the request was in flight.
    #[error("provider '{name}' was shut down")]
    ProviderShutdown { name: String },

    /// The provider exists but is not accepting requests.
    #[error("provider '{name}' is not ready")]
    ProviderUnavailable { name: String },

    /// Configuration error (unreadable file, bad kind, duplicate names).
    #[error("config error: {reason}")]
    ConfigError { reason: String },
}

impl McpError {
    /// Whether this error means the provider itself went away, as opposed to
    /// a single request failing.
    pub fn is_provider_fault(&self) -> bool {
        matches!(
            self,
            McpError::ProviderExited { .. }
                | McpError::ProviderShutdown { .. }
                | McpError::ProviderUnavailable { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_message_is_verbatim() {
        let err = McpError::ServerError {
            code: -32602,
            message: "path must be absolute".into(),
            data: None,
        };
        assert!(err.to_string().contains("path must be absolute"));
    }

    #[test]
    fn test_timeout_display_names_method() {
        let err = McpError::Timeout {
            provider: "files".into(),
            method: "tools/call".into(),
            timeout_ms: 30_000,
        };
        assert_eq!(
            err.to_string(),
            "request 'tools/call' to provider 'files' timed out after 30000ms"
        );
    }

    #[test]
    fn test_is_provider_fault() {
        assert!(McpError::ProviderExited {
            name: "p".into(),
            reason: "eof".into(),
        }
        .is_provider_fault());
        assert!(McpError::ProviderShutdown { name: "p".into() }.is_provider_fault());
        assert!(!McpError::UnknownTool { name: "x".into() }.is_provider_fault());
        assert!(!McpError::HttpStatus {
            provider: "p".into(),
            status: 500,
            body: String::new(),
        }
        .is_provider_fault());
    }
}
