// Copyright (c) 2025-2026 The Freja Authors
//
// SPDX-License-Identifier: MIT
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use freja_config::CodexToolConfig;

use super::client::{CodexClient, CodexRequest, CodexRunner, MODES, SANDBOXES};
use crate::tool::Tool;

/// Run codex CLI tasks non-interactively.
pub struct CodexRunTool {
    client: Arc<dyn CodexRunner>,
}

impl CodexRunTool {
    pub fn new(workspace: &Path, config: CodexToolConfig, restrict_to_workspace: bool) -> Self {
        Self {
            client: Arc::new(CodexClient::new(workspace, config, restrict_to_workspace)),
        }
    }

    pub fn with_client(client: Arc<dyn CodexRunner>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for CodexRunTool {
    fn name(&self) -> &str {
        "codex_run"
    }

    fn description(&self) -> &str {
        "Run Codex CLI non-interactively for coding tasks. Supports exec and\n\
         review mode. When allowDangerousFullAccess is enabled, full access\n\
         is applied automatically."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "prompt": {
                    "type": "string",
                    "minLength": 1,
                    "description": "Task instructions for Codex"
                },
                "mode": {
                    "type": "string",
                    "enum": MODES,
                    "description": "exec for general tasks, review for code review"
                },
                "working_dir": {
                    "type": "string",
                    "description": "Working directory (relative paths are under workspace)"
                },
                "sandbox": {
                    "type": "string",
                    "enum": SANDBOXES,
                    "description": "Codex sandbox mode"
                },
                "model": {"type": "string", "description": "Optional model override"},
                "timeout_sec": {
                    "type": "integer",
                    "minimum": 1,
                    "maximum": 7200,
                    "description": "Optional timeout override in seconds"
                }
            },
            "required": ["prompt"]
        })
    }

    async fn execute(&self, args: Value) -> String {
        let request = CodexRequest {
            prompt: args["prompt"].as_str().unwrap_or_default().to_string(),
            mode: args["mode"].as_str().unwrap_or("exec").to_string(),
            working_dir: args["working_dir"].as_str().map(str::to_string),
            sandbox: args["sandbox"].as_str().map(str::to_string),
            model: args["model"].as_str().map(str::to_string),
            timeout_sec: args["timeout_sec"].as_u64(),
        };
        let payload = self.client.run(request).await;
        serde_json::to_string(&payload).unwrap_or_else(|e| format!("Error: {e}"))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
