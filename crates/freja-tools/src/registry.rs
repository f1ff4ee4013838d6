// Copyright (c) 2025-2026 The Freja Authors
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::Value;
use tracing::debug;

use crate::tool::{validate_params, Tool};

/// Name + description + parameter schema of a registered tool.
///
/// The agent core maps these into the provider wire shape; keeping the type
/// here leaves the tools crate independent of the model crate.
#[derive(Debug, Clone)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Central tool map.  Read-mostly: registration happens at startup and
/// inside the MCP scope, so a std `RwLock` around the map is enough; the
/// guard is never held across an await.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: RwLock::new(HashMap::new()) }
    }

    pub fn register(&self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&self, tool: Arc<dyn Tool>) {
        self.tools
            .write()
            .unwrap()
            .insert(tool.name().to_string(), tool);
    }

    /// Remove a tool by name (MCP scope teardown).  Returns whether it existed.
    pub fn unregister(&self, name: &str) -> bool {
        self.tools.write().unwrap().remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().unwrap().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.read().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    /// Schemas for all registered tools, sorted by name.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .tools
            .read()
            .unwrap()
            .values()
            .map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters(),
            })
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Validate and dispatch one tool call.
    ///
    /// Never returns an error: unknown names, invalid parameters, and tool
    /// panics all come back as a string envelope for the model.
    pub async fn execute(&self, name: &str, args: Value) -> String {
        let Some(tool) = self.get(name) else {
            return format!("Tool not found: {name}");
        };

        let errors = validate_params(&tool.parameters(), &args);
        if !errors.is_empty() {
            return format!("Invalid parameters: {}", errors.join("; "));
        }

        debug!(tool = name, "executing tool");
        let task = tokio::spawn(async move { tool.execute(args).await });
        match task.await {
            Ok(result) => result,
            Err(e) => format!("Error executing tool: {e}"),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;

    use super::*;

    struct SampleTool;

    #[async_trait]
    impl Tool for SampleTool {
        fn name(&self) -> &str {
            "sample"
        }
        fn description(&self) -> &str {
            "sample tool"
        }
        fn parameters(&self) -> Value {
            json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "minLength": 2},
                    "count": {"type": "integer", "minimum": 1, "maximum": 10}
                },
                "required": ["query", "count"]
            })
        }
        async fn execute(&self, _args: Value) -> String {
            "ok".to_string()
        }
    }

    struct PanickyTool;

    #[async_trait]
    impl Tool for PanickyTool {
        fn name(&self) -> &str {
            "panicky"
        }
        fn description(&self) -> &str {
            "always panics"
        }
        fn parameters(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }
        async fn execute(&self, _args: Value) -> String {
            panic!("boom");
        }
    }

    #[tokio::test]
    async fn executes_valid_call() {
        let reg = ToolRegistry::new();
        reg.register(SampleTool);
        let out = reg.execute("sample", json!({"query": "hi", "count": 2})).await;
        assert_eq!(out, "ok");
    }

    #[tokio::test]
    async fn returns_validation_error_without_invoking_tool() {
        let reg = ToolRegistry::new();
        reg.register(SampleTool);
        let out = reg.execute("sample", json!({"query": "hi"})).await;
        assert!(out.starts_with("Invalid parameters:"));
        assert!(out.contains("missing required count"));
    }

    #[tokio::test]
    async fn unknown_tool_is_reported() {
        let reg = ToolRegistry::new();
        let out = reg.execute("nope", json!({})).await;
        assert_eq!(out, "Tool not found: nope");
    }

    #[tokio::test]
    async fn tool_panic_becomes_error_string() {
        let reg = ToolRegistry::new();
        reg.register(PanickyTool);
        let out = reg.execute("panicky", json!({})).await;
        assert!(out.starts_with("Error executing tool:"), "{out}");
    }

    #[test]
    fn schemas_are_sorted_by_name() {
        let reg = ToolRegistry::new();
        reg.register(PanickyTool);
        reg.register(SampleTool);
        let names: Vec<String> = reg.schemas().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["panicky", "sample"]);
    }

    #[test]
    fn unregister_removes_tool() {
        let reg = ToolRegistry::new();
        reg.register(SampleTool);
        assert!(reg.unregister("sample"));
        assert!(!reg.unregister("sample"));
        assert!(reg.get("sample").is_none());
    }
}
