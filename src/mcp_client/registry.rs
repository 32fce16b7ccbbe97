//! Tool catalog aggregated across all ready providers.
//!
//! Tools are keyed by their qualified name `server.tool`, so two providers may
//! expose tools with the same bare name without colliding.

use std::collections::BTreeMap;

use super::types::McpToolDefinition;

// ─── ToolRegistry ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    /// `qualified name → (server name, definition)`.
    tools: BTreeMap<String, (String, McpToolDefinition)>,
}

/// Build the qualified name of a provider's tool.
pub fn qualified_name(server: &str, tool: &str) -> String {
    format!("{server}.{tool}")
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the tools listed for `server_name`.
    pub fn register_server_tools(&mut self, server_name: &str, tools: Vec<McpToolDefinition>) {
        self.unregister_server(server_name);
        for tool in tools {
            let name = qualified_name(server_name, &tool.name);
            self.tools.insert(name, (server_name.to_string(), tool));
        }
    }

    /// Remove all tools belonging to a server.
    pub fn unregister_server(&mut self, server_name: &str) {
        self.tools.retain(|_, (srv, _)| srv != server_name);
    }

    /// Split a registered qualified name into `(server, bare tool name)`.
    ///
    /// Server names may themselves contain dots, so the owner recorded at
    /// registration time wins over a naive split.
    pub fn resolve<'a>(&'a self, name: &'a str) -> Option<(&'a str, &'a str)> {
        let (server, def) = self.tools.get(name)?;
        Some((server.as_str(), def.name.as_str()))
    }

    /// All qualified tool names, sorted.
    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.keys().map(|k| k.as_str()).collect()
    }

    /// `(qualified name, description)` pairs, sorted by name.
    pub fn descriptions(&self) -> Vec<(&str, &str)> {
        self.tools
            .iter()
            .map(|(name, (_, def))| (name.as_str(), def.description.as_str()))
            .collect()
    }

    /// Count tools belonging to a specific server.
    pub fn tools_for_server(&self, server_name: &str) -> usize {
        self.tools
            .values()
            .filter(|(srv, _)| srv == server_name)
            .count()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn clear(&mut self) {
        self.tools.clear();
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
