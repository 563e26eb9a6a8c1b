//! MCP Client — JSON-RPC over stdio and streaming HTTP for tool providers.
//!
//! This module handles:
//! - Spawning local-process providers and speaking line-delimited JSON-RPC
//! - Talking to remote providers over HTTP (plain JSON or SSE responses)
//! - Correlating responses to requests by id, with per-method deadlines
//! - Tool discovery and first-registered-wins catalog merging
//! - Tool call dispatch and provider shutdown

pub mod client;
pub mod config;
pub mod errors;
pub mod events;
pub mod http;
pub mod lifecycle;
pub mod pending;
pub mod registry;
pub mod sse;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

// Re-exports for convenience
pub use client::McpClient;
pub use config::{load_config, parse_config, BridgeConfig, ProviderConfig, Timeouts, TransportKind};
pub use errors::McpError;
pub use events::BridgeEvent;
pub use lifecycle::{ProviderState, ProviderStatus};
pub use registry::ToolRegistry;
pub use types::ToolDescriptor;
