// Copyright (c) 2025-2026 The Freja Authors
//
// SPDX-License-Identifier: MIT
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tool::{SpawnHandler, Tool};

/// Delegate a bounded background task to the subagent manager.
///
/// The call returns immediately; the subagent's summary re-enters the bus
/// as a system-channel message routed back to the current conversation.
pub struct SpawnTool {
    handler: Arc<dyn SpawnHandler>,
    context: Mutex<(String, String)>,
}

impl SpawnTool {
    pub fn new(handler: Arc<dyn SpawnHandler>) -> Self {
        Self { handler, context: Mutex::new((String::new(), String::new())) }
    }

    pub fn set_context(&self, channel: &str, chat_id: &str) {
        *self.context.lock().unwrap() = (channel.to_string(), chat_id.to_string());
    }
}

#[async_trait]
impl Tool for SpawnTool {
    fn name(&self) -> &str {
        "spawn"
    }

    fn description(&self) -> &str {
        "Spawn a background subagent for a self-contained task. The result\n\
         is announced back into this conversation when the subagent finishes."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task": {
                    "type": "string",
                    "minLength": 1,
                    "description": "Full instructions for the subagent"
                },
                "goal": {
                    "type": "string",
                    "description": "Short label describing the desired outcome"
                }
            },
            "required": ["task"]
        })
    }

    async fn execute(&self, args: Value) -> String {
        let (channel, chat_id) = self.context.lock().unwrap().clone();
        if channel.is_empty() || chat_id.is_empty() {
            return "Error: no session context (channel/chat_id)".to_string();
        }

        let task = args["task"].as_str().unwrap_or_default();
        let goal = args["goal"].as_str().unwrap_or(task);
        let task_id = format!("{:08x}", rand::random::<u32>());

        self.handler
            .spawn(&task_id, task, goal, &channel, &chat_id)
            .await
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use tokio::sync::Mutex as AsyncMutex;

    use super::*;

    struct RecordingHandler {
        calls: AsyncMutex<Vec<(String, String, String, String)>>,
    }

    #[async_trait]
    impl SpawnHandler for RecordingHandler {
        async fn spawn(
            &self,
            task_id: &str,
            instructions: &str,
            goal: &str,
            origin_channel: &str,
            origin_chat_id: &str,
        ) -> String {
            self.calls.lock().await.push((
                instructions.to_string(),
                goal.to_string(),
                origin_channel.to_string(),
                origin_chat_id.to_string(),
            ));
            format!("Subagent {task_id} started")
        }
    }

    #[tokio::test]
    async fn delegates_to_handler_with_origin() {
        let handler = Arc::new(RecordingHandler { calls: AsyncMutex::new(Vec::new()) });
        let tool = SpawnTool::new(handler.clone());
        tool.set_context("telegram", "abc123");

        let out = tool
            .execute(json!({"task": "summarize the report", "goal": "summary"}))
            .await;
        assert!(out.starts_with("Subagent "));

        let calls = handler.calls.lock().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "summarize the report");
        assert_eq!(calls[0].1, "summary");
        assert_eq!(calls[0].2, "telegram");
        assert_eq!(calls[0].3, "abc123");
    }

    #[tokio::test]
    async fn goal_defaults_to_task() {
        let handler = Arc::new(RecordingHandler { calls: AsyncMutex::new(Vec::new()) });
        let tool = SpawnTool::new(handler.clone());
        tool.set_context("cli", "direct");
        tool.execute(json!({"task": "do the thing"})).await;
        assert_eq!(handler.calls.lock().await[0].1, "do the thing");
    }

    #[tokio::test]
    async fn errors_without_context() {
        let handler = Arc::new(RecordingHandler { calls: AsyncMutex::new(Vec::new()) });
        let tool = SpawnTool::new(handler);
        let out = tool.execute(json!({"task": "x"})).await;
        assert!(out.contains("no session context"));
    }
}
