//! Tool registry — collision bookkeeping for the merged catalog.
//!
//! Provides:
//! - Registration of a provider's catalog in configuration order
//! - First-registered-wins resolution of duplicate tool names
//! - A record of the definitions that lost a collision
//! - Export of a tool in the OpenAI function-calling schema

use std::collections::HashMap;

use serde::Serialize;

use super::types::ToolDescriptor;

// ─── ToolRegistry ────────────────────────────────────────────────────────────

/// A tool that lost a name collision to an earlier provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShadowedTool {
    pub tool: String,
    /// Provider whose copy is ignored.
    pub provider: String,
    /// Provider that owns the name.
    pub owner: String,
}

/// Tool ownership across providers, as seen at initialize time.
///
/// A name is owned by the first provider that registered it.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    /// `tool_name → owning provider`.
    owners: HashMap<String, String>,
    shadowed: Vec<ShadowedTool>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider's tools. Names already owned by an earlier
    /// provider are recorded as shadowed.
    pub fn register_provider_tools(&mut self, provider: &str, tools: &[ToolDescriptor]) {
        for tool in tools {
            if let Some(owner) = self.owners.get(&tool.name) {
                tracing::warn!(
                    tool = %tool.name,
                    provider,
                    owner = %owner,
                    "duplicate tool name; keeping the first provider's definition"
                );
                self.shadowed.push(ShadowedTool {
                    tool: tool.name.clone(),
                    provider: provider.to_string(),
                    owner: owner.clone(),
                });
                continue;
            }
            self.owners.insert(tool.name.clone(), provider.to_string());
        }
    }

    /// Tools dropped because an earlier provider already owned the name.
    pub fn shadowed(&self) -> &[ShadowedTool] {
        &self.shadowed
    }

    /// Number of distinct tool names.
    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

/// One tool in OpenAI function-calling form.
///
/// The input schema is passed through unchanged as `parameters`.
pub fn openai_tool(def: &ToolDescriptor) -> serde_json::Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": def.name,
            "description": def.description,
            "parameters": def.input_schema,
        }
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tool(name: &str, description: &str) -> ToolDescriptor {
        ToolDescriptor {
            name: name.to_string(),
            description: description.to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": { "query": { "type": "string" } },
                "required": ["query"]
            }),
        }
    }

    #[test]
    fn test_register_counts_distinct_names() {
        let mut registry = ToolRegistry::new();
        registry.register_provider_tools("files", &[sample_tool("list_dir", "List")]);
        registry.register_provider_tools("web", &[sample_tool("fetch", "Fetch")]);

        assert_eq!(registry.len(), 2);
        assert!(registry.shadowed().is_empty());
    }

    #[test]
    fn test_collision_first_registered_wins() {
        let mut registry = ToolRegistry::new();
        registry.register_provider_tools("web", &[sample_tool("search", "Web search")]);
        registry.register_provider_tools(
            "docs",
            &[sample_tool("search", "Doc search"), sample_tool("open", "Open")],
        );
        registry.register_provider_tools("archive", &[sample_tool("search", "Old search")]);

        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.shadowed(),
            &[
                ShadowedTool {
                    tool: "search".into(),
                    provider: "docs".into(),
                    owner: "web".into(),
                },
                ShadowedTool {
                    tool: "search".into(),
                    provider: "archive".into(),
                    owner: "web".into(),
                },
            ]
        );
    }

    #[test]
    fn test_openai_tool_shape() {
        let tool = openai_tool(&sample_tool("list_dir", "List a directory"));
        assert_eq!(tool["type"], "function");
        assert_eq!(tool["function"]["name"], "list_dir");
        assert_eq!(tool["function"]["description"], "List a directory");
        assert_eq!(tool["function"]["parameters"]["required"][0], "query");
    }

    #[test]
    fn test_empty_registry() {
        let registry = ToolRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.shadowed().is_empty());
    }
}
