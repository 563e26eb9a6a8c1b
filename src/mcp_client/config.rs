//! Provider configuration loading and validation.
//!
//! Reads a YAML (or JSON) providers file and resolves environment variables.
//! The configuration is immutable once loaded; the bootstrapper owns it and
//! hands it to `McpClient::initialize`.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::errors::McpError;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Deadline for discovery and metadata calls (`initialize`, `tools/list`).
const DEFAULT_METADATA_TIMEOUT_MS: u64 = 10_000;

/// Deadline for `tools/call`. Tool execution is expected to be slower.
const DEFAULT_TOOL_CALL_TIMEOUT_MS: u64 = 30_000;

// ─── Public Types ────────────────────────────────────────────────────────────

/// Transport kind, without the kind-specific fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    LocalProcess,
    HttpRequestResponse,
    HttpEventStream,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TransportKind::LocalProcess => "local_process",
            TransportKind::HttpRequestResponse => "http_request_response",
            TransportKind::HttpEventStream => "http_event_stream",
        };
        f.write_str(s)
    }
}

/// Kind-specific transport settings, tagged by `kind` in the config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportConfig {
    #[serde(alias = "stdio")]
    LocalProcess {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        /// Overlay on top of the host process environment.
        #[serde(default)]
        env: HashMap<String, String>,
        #[serde(default)]
        cwd: Option<String>,
    },
    #[serde(alias = "http")]
    HttpRequestResponse {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
    #[serde(alias = "streamable_http", alias = "sse")]
    HttpEventStream {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
}

impl TransportConfig {
    pub fn kind(&self) -> TransportKind {
        match self {
            TransportConfig::LocalProcess { .. } => TransportKind::LocalProcess,
            TransportConfig::HttpRequestResponse { .. } => TransportKind::HttpRequestResponse,
            TransportConfig::HttpEventStream { .. } => TransportKind::HttpEventStream,
        }
    }
}

/// One configured provider. `name` is the unique key.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    /// Shell command run once before initialization by the bootstrapper.
    /// Carried for completeness; never executed by this crate.
    #[serde(default)]
    pub setup: Option<String>,
    #[serde(flatten)]
    pub transport: TransportConfig,
}

impl ProviderConfig {
    /// Check the fields a provider needs before it can be brought up.
    pub fn validate(&self) -> Result<(), McpError> {
        if self.name.trim().is_empty() {
            return Err(McpError::ConfigError {
                reason: "provider name must not be empty".into(),
            });
        }
        match &self.transport {
            TransportConfig::LocalProcess { command, .. } => {
                if command.trim().is_empty() {
                    return Err(McpError::ConfigError {
                        reason: format!("provider '{}': command must not be empty", self.name),
                    });
                }
            }
            TransportConfig::HttpRequestResponse { url, .. }
            | TransportConfig::HttpEventStream { url, .. } => {
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(McpError::ConfigError {
                        reason: format!(
                            "provider '{}': url must start with http:// or https://, got '{url}'",
                            self.name
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Per-method request deadlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Timeouts {
    #[serde(default = "default_metadata_timeout_ms")]
    pub metadata_ms: u64,
    #[serde(default = "default_tool_call_timeout_ms")]
    pub tool_call_ms: u64,
}

fn default_metadata_timeout_ms() -> u64 {
    DEFAULT_METADATA_TIMEOUT_MS
}
fn default_tool_call_timeout_ms() -> u64 {
    DEFAULT_TOOL_CALL_TIMEOUT_MS
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            metadata_ms: DEFAULT_METADATA_TIMEOUT_MS,
            tool_call_ms: DEFAULT_TOOL_CALL_TIMEOUT_MS,
        }
    }
}

impl Timeouts {
    /// Deadline for a JSON-RPC method.
    pub fn for_method(&self, method: &str) -> Duration {
        if method == "tools/call" {
            Duration::from_millis(self.tool_call_ms)
        } else {
            Duration::from_millis(self.metadata_ms)
        }
    }
}

/// Top-level providers file.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub timeouts: Timeouts,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Load and parse a providers file.
///
/// Performs environment-variable interpolation on `${VAR_NAME}` or
/// `${VAR_NAME:-default}` before parsing.
pub fn load_config(path: &Path) -> Result<BridgeConfig, McpError> {
    let raw = std::fs::read_to_string(path).map_err(|e| McpError::ConfigError {
        reason: format!("failed to read {}: {e}", path.display()),
    })?;
    parse_config(&raw)
}

/// Parse providers config text (YAML or JSON) and validate it.
pub fn parse_config(raw: &str) -> Result<BridgeConfig, McpError> {
    let interpolated = interpolate_env_vars(raw);

    let config: BridgeConfig =
        serde_yaml::from_str(&interpolated).map_err(|e| McpError::ConfigError {
            reason: format!("failed to parse config: {e}"),
        })?;

    let mut seen = HashSet::new();
    for provider in &config.providers {
        provider.validate()?;
        if !seen.insert(provider.name.as_str()) {
            return Err(McpError::ConfigError {
                reason: format!("duplicate provider name '{}'", provider.name),
            });
        }
    }

    Ok(config)
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_expr.push(c);
            }
            result.push_str(&resolve_var_expr(&var_expr));
        } else {
            result.push(ch);
        }
    }

    result
}

/// Resolve a variable expression like `VAR` or `VAR:-default`.
fn resolve_var_expr(expr: &str) -> String {
    if let Some(idx) = expr.find(":-") {
        let var_name = &expr[..idx];
        let default = &expr[idx + 2..];
        std::env::var(var_name).unwrap_or_else(|_| expand_tilde(default))
    } else {
        std::env::var(expr).unwrap_or_default()
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
