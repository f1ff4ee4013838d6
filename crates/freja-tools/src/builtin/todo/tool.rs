// Copyright (c) 2025-2026 The Freja Authors
//
// SPDX-License-Identifier: MIT
use std::path::Path;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::service::TodoService;
use crate::tool::Tool;

/// Task management over the persistent TODO board.
pub struct TodoTool {
    service: TodoService,
}

impl TodoTool {
    pub fn new(workspace: &Path) -> Self {
        Self { service: TodoService::new(workspace) }
    }
}

#[async_trait]
impl Tool for TodoTool {
    fn name(&self) -> &str {
        "todo"
    }

    fn description(&self) -> &str {
        "Manage the persistent TODO board (memory/todo.md).\n\
         Actions: init, add, list, update, bulk_update, move, done, remove,\n\
         bulk_remove, archive, reorder, stats, review_daily.\n\
         Ids look like T0001; depends_on must stay acyclic."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": [
                        "init", "add", "list", "update", "bulk_update", "move", "done",
                        "remove", "bulk_remove", "archive", "reorder", "stats", "review_daily"
                    ],
                    "description": "Action to perform"
                },
                "id": {"type": "string", "description": "Task id (T####)"},
                "ids": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Task ids for bulk actions"
                },
                "title": {"type": "string", "description": "Task title (for add)"},
                "note": {"type": "string", "description": "Free-form note"},
                "status": {
                    "type": "string",
                    "enum": ["todo", "doing", "blocked", "done", "archived"],
                    "description": "Task status"
                },
                "priority": {
                    "type": "integer",
                    "minimum": 1,
                    "maximum": 4,
                    "description": "1 = urgent .. 4 = someday"
                },
                "due": {"type": "string", "description": "Due date (YYYY-MM-DD or ISO datetime)"},
                "tags": {"type": "array", "items": {"type": "string"}},
                "depends_on": {"type": "array", "items": {"type": "string"}},
                "patch": {
                    "type": "object",
                    "description": "Fields to change (update/bulk_update)"
                },
                "filters": {"type": "object", "description": "List/archive filters"},
                "sort_by": {
                    "type": "string",
                    "enum": ["priority", "due", "created", "updated"]
                },
                "sort_order": {"type": "string", "enum": ["asc", "desc"]},
                "limit": {"type": "integer", "minimum": 1}
            },
            "required": ["action"]
        })
    }

    async fn execute(&self, args: Value) -> String {
        let action = args["action"].as_str().unwrap_or_default().to_string();
        let payload = self.service.handle(&action, &args);
        serde_json::to_string(&payload).unwrap_or_else(|e| format!("Error: {e}"))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_and_list_through_the_tool() {
        let dir = tempfile::tempdir().unwrap();
        let tool = TodoTool::new(dir.path());

        let out = tool.execute(json!({"action": "add", "title": "ship release"})).await;
        let parsed: Value = serde_json::from_str(&out).unwrap();
        assert!(parsed["ok"].as_bool().unwrap());
        assert_eq!(parsed["items"][0]["id"], "T0001");

        let listed = tool.execute(json!({"action": "list"})).await;
        let parsed: Value = serde_json::from_str(&listed).unwrap();
        assert_eq!(parsed["items"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn errors_come_back_in_the_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let tool = TodoTool::new(dir.path());
        let out = tool.execute(json!({"action": "remove", "id": "T9999"})).await;
        let parsed: Value = serde_json::from_str(&out).unwrap();
        assert!(!parsed["ok"].as_bool().unwrap());
        assert!(parsed["errors"][0].as_str().unwrap().contains("Task not found"));
    }
}
