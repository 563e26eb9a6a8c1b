//! MCP Client — high-level interface for tool execution.
//!
//! Orchestrates provider lifecycle, the merged tool catalog, and tool call
//! dispatch. This is the surface the conversational engine talks to.

use std::collections::HashSet;
use std::time::Instant;

use futures::future::join_all;

use super::config::BridgeConfig;
use super::errors::McpError;
use super::events::{BridgeEvent, EventSink};
use super::lifecycle::{ProviderInstance, ProviderStatus};
use super::registry::{openai_tool, ToolRegistry};
use super::types::ToolDescriptor;

// ─── McpClient ───────────────────────────────────────────────────────────────

/// High-level MCP client that manages multiple providers and routes tool calls.
#[derive(Default)]
pub struct McpClient {
    /// Provider instances in configuration order.
    providers: Vec<ProviderInstance>,
    /// Merged catalog of the providers that came up.
    registry: ToolRegistry,
    events: EventSink,
}

impl McpClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive lifecycle and tool-call events. A new subscription replaces
    /// the previous one.
    pub fn subscribe(&self) -> tokio::sync::mpsc::Receiver<BridgeEvent> {
        self.events.subscribe()
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    /// Bring up every configured provider and build the merged catalog.
    ///
    /// Providers initialize concurrently and independently. Returns the
    /// providers that failed (partial startup is OK). Any previously running
    /// providers are shut down first.
    pub async fn initialize(&mut self, config: &BridgeConfig) -> Vec<(String, McpError)> {
        self.shutdown().await;

        let mut instances: Vec<ProviderInstance> = config
            .providers
            .iter()
            .map(|p| ProviderInstance::new(p, config.timeouts))
            .collect();

        let events = &self.events;
        let outcomes = join_all(instances.iter_mut().zip(&config.providers).map(
            |(instance, provider_config)| async move {
                instance.initialize(provider_config, events).await?;
                if let Err(e) = instance.discover().await {
                    tracing::warn!(
                        provider = %instance.name(),
                        error = %e,
                        "tool discovery failed; provider stays ready with an empty catalog"
                    );
                }
                Ok::<usize, McpError>(instance.tools().len())
            },
        ))
        .await;

        let mut failures = Vec::new();
        for (instance, outcome) in instances.iter().zip(outcomes) {
            let provider = instance.name().to_string();
            match outcome {
                Ok(tool_count) => {
                    self.events.emit(BridgeEvent::ProviderReady {
                        provider,
                        tool_count,
                    });
                }
                Err(e) => {
                    tracing::warn!(provider = %provider, error = %e, "provider excluded");
                    self.events.emit(BridgeEvent::ProviderFailed {
                        provider: provider.clone(),
                        reason: e.to_string(),
                    });
                    failures.push((provider, e));
                }
            }
        }

        let mut registry = ToolRegistry::new();
        for instance in instances.iter().filter(|i| i.is_ready()) {
            registry.register_provider_tools(instance.name(), instance.tools());
        }

        tracing::info!(
            configured = instances.len(),
            ready = instances.iter().filter(|i| i.is_ready()).count(),
            tools = registry.len(),
            "providers initialized"
        );

        self.providers = instances;
        self.registry = registry;
        failures
    }

    /// Tear down every provider and discard all state. Idempotent.
    pub async fn shutdown(&mut self) {
        if self.providers.is_empty() {
            return;
        }
        join_all(self.providers.iter_mut().map(|p| p.teardown())).await;
        tracing::info!(providers = self.providers.len(), "providers shut down");
        self.providers.clear();
        self.registry = ToolRegistry::new();
    }

    // ─── Catalog ─────────────────────────────────────────────────────────

    /// The merged catalog of all Ready providers in configuration order.
    /// A name already listed by an earlier provider is skipped.
    pub fn tool_catalog(&self) -> Vec<ToolDescriptor> {
        let mut seen = HashSet::new();
        self.ready_providers()
            .flat_map(|p| p.tools())
            .filter(|tool| seen.insert(tool.name.as_str()))
            .cloned()
            .collect()
    }

    /// The catalog in OpenAI function-calling schema.
    pub fn openai_tools(&self) -> Vec<serde_json::Value> {
        self.tool_catalog().iter().map(openai_tool).collect()
    }

    /// Collisions recorded when the catalog was built at initialize time.
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    fn ready_providers(&self) -> impl Iterator<Item = &ProviderInstance> {
        self.providers.iter().filter(|p| p.is_ready())
    }

    /// First Ready provider whose catalog lists `tool`.
    fn owner_of(&self, tool: &str) -> Option<&ProviderInstance> {
        self.ready_providers()
            .find(|p| p.tools().iter().any(|t| t.name == tool))
    }

    fn provider(&self, name: &str) -> Option<&ProviderInstance> {
        self.providers.iter().find(|p| p.name() == name)
    }

    // ─── Tool Execution ──────────────────────────────────────────────────

    /// Invoke a tool by name and return its result as JSON text.
    ///
    /// Names no Ready provider lists fail before any transport I/O.
    pub async fn invoke(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<String, McpError> {
        let provider = self
            .owner_of(tool_name)
            .ok_or_else(|| McpError::UnknownTool {
                name: tool_name.to_string(),
            })?;
        let provider_name = provider.name();

        self.events.emit(BridgeEvent::ToolStarted {
            tool: tool_name.to_string(),
            provider: provider_name.to_string(),
        });
        let start = Instant::now();

        let outcome = provider.call_tool(tool_name, arguments).await.and_then(|result| {
            serde_json::to_string(&result).map_err(|e| McpError::ParseError {
                provider: provider_name.to_string(),
                reason: format!("failed to serialize tool result: {e}"),
            })
        });
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match &outcome {
            Ok(_) => {
                tracing::info!(
                    tool = tool_name,
                    provider = provider_name,
                    elapsed_ms,
                    "tool call completed"
                );
                self.events.emit(BridgeEvent::ToolCompleted {
                    tool: tool_name.to_string(),
                    provider: provider_name.to_string(),
                    elapsed_ms,
                });
            }
            Err(e) => {
                tracing::warn!(
                    tool = tool_name,
                    provider = provider_name,
                    elapsed_ms,
                    provider_fault = e.is_provider_fault(),
                    error = %e,
                    "tool call failed"
                );
                self.events.emit(BridgeEvent::ToolFailed {
                    tool: tool_name.to_string(),
                    error: e.to_string(),
                });
            }
        }
        outcome
    }

    // ─── Status ──────────────────────────────────────────────────────────

    /// Number of providers currently usable.
    pub fn initialized_count(&self) -> usize {
        self.providers.iter().filter(|p| p.is_ready()).count()
    }

    /// Configured provider names in configuration order.
    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    pub fn provider_status(&self, name: &str) -> Option<ProviderStatus> {
        self.provider(name).map(ProviderInstance::status)
    }

    /// Build a client around already-Ready providers.
    #[cfg(test)]
    pub(crate) fn with_providers(providers: Vec<ProviderInstance>) -> Self {
        let mut registry = ToolRegistry::new();
        for p in &providers {
            registry.register_provider_tools(p.name(), p.tools());
        }
        Self {
            providers,
            registry,
            events: EventSink::new(),
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
