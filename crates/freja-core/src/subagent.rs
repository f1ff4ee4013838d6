// Copyright (c) 2025-2026 The Freja Authors
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use freja_bus::{InboundMessage, MessageBus};
use freja_model::{ChatMessage, LLMProvider, ToolCallPayload, ToolDefinition};
use freja_tools::{build_subagent_tools, SpawnHandler, ToolFactoryDeps};

/// Bounded fan-out: each spawned task runs an isolated tool-calling loop
/// (no `message`/`spawn`/`cron` tools, no shared session state) and
/// announces its summary back onto the bus as a system-channel message the
/// main loop routes to the originating conversation.
#[derive(Clone)]
pub struct SubagentManager {
    provider: Arc<dyn LLMProvider>,
    bus: MessageBus,
    deps: ToolFactoryDeps,
    model: String,
    max_iterations: usize,
    temperature: f32,
    max_tokens: u32,
}

impl SubagentManager {
    pub fn new(
        provider: Arc<dyn LLMProvider>,
        bus: MessageBus,
        deps: ToolFactoryDeps,
        model: String,
        main_max_iterations: usize,
        temperature: f32,
        max_tokens: u32,
    ) -> Self {
        Self {
            provider,
            bus,
            deps,
            model,
            // Background runs are bounded tighter than the interactive loop.
            max_iterations: (main_max_iterations / 2).max(8),
            temperature,
            max_tokens,
        }
    }

    async fn run_subagent(
        self,
        task_id: String,
        instructions: String,
        goal: String,
        origin_channel: String,
        origin_chat_id: String,
    ) {
        info!(task_id = %task_id, goal = %goal, "subagent started");
        let registry = build_subagent_tools(&self.deps);
        let definitions: Vec<ToolDefinition> = registry
            .schemas()
            .into_iter()
            .map(|s| ToolDefinition::function(s.name, s.description, s.parameters))
            .collect();

        let mut messages = vec![
            ChatMessage::system(format!(
                "You are a background subagent working on one task.\n\
                 Workspace: {}\n\
                 Goal: {goal}\n\
                 Work autonomously with the available tools and finish with a\n\
                 concise summary of what you did and found. Your final text\n\
                 reply is delivered back to the requesting conversation.",
                self.deps.workspace.display()
            )),
            ChatMessage::user(instructions),
        ];

        let mut summary: Option<String> = None;
        for _ in 0..self.max_iterations {
            let response = match self
                .provider
                .chat(&messages, &definitions, &self.model, self.max_tokens, self.temperature)
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    warn!(task_id = %task_id, error = %e, "subagent model call failed");
                    summary = Some(format!("Subagent failed: {e}"));
                    break;
                }
            };

            if !response.has_tool_calls() {
                summary = response.content;
                break;
            }

            let payloads: Vec<ToolCallPayload> = response
                .tool_calls
                .iter()
                .map(|tc| ToolCallPayload::function(&tc.id, &tc.name, &tc.arguments))
                .collect();
            messages.push(ChatMessage::assistant_tool_calls(
                response.content.clone(),
                payloads,
                response.reasoning_content.clone(),
            ));
            for tc in &response.tool_calls {
                let result = registry.execute(&tc.name, tc.arguments.clone()).await;
                messages.push(ChatMessage::tool_result(&tc.id, &tc.name, result));
            }
        }

        let summary = summary
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "Subagent finished without a final summary.".to_string());

        let mut announce = InboundMessage::new(
            "system",
            format!("subagent:{task_id}"),
            format!("{origin_channel}:{origin_chat_id}"),
            format!("Subagent task '{goal}' finished.\n\n{summary}"),
        );
        announce
            .metadata
            .insert("task_id".to_string(), json!(task_id));
        self.bus.publish_inbound(announce).await;
        info!(task_id = %task_id, "subagent finished");
    }
}

#[async_trait]
impl SpawnHandler for SubagentManager {
    async fn spawn(
        &self,
        task_id: &str,
        instructions: &str,
        goal: &str,
        origin_channel: &str,
        origin_chat_id: &str,
    ) -> String {
        let manager = self.clone();
        let task_id = task_id.to_string();
        let id_for_reply = task_id.clone();
        let instructions = instructions.to_string();
        let goal = goal.to_string();
        let origin_channel = origin_channel.to_string();
        let origin_chat_id = origin_chat_id.to_string();

        tokio::spawn(async move {
            manager
                .run_subagent(task_id, instructions, goal, origin_channel, origin_chat_id)
                .await;
        });

        format!("Subagent {id_for_reply} started; its result will be announced here when ready.")
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use freja_model::{ChatResponse, ScriptedProvider, ToolCallRequest};
    use freja_tools::SpawnHandler;

    use super::*;

    fn deps(dir: &tempfile::TempDir) -> ToolFactoryDeps {
        ToolFactoryDeps {
            workspace: dir.path().to_path_buf(),
            restrict_to_workspace: true,
            exec_config: freja_config::ExecToolConfig::default(),
            codex_config: freja_config::CodexToolConfig::default(),
            web_search_config: freja_config::WebSearchConfig::default(),
            browser_config: freja_config::BrowserToolConfig { enabled: false, ..Default::default() },
        }
    }

    fn manager(dir: &tempfile::TempDir, provider: Arc<ScriptedProvider>) -> Arc<SubagentManager> {
        Arc::new(SubagentManager::new(
            provider,
            MessageBus::new(),
            deps(dir),
            "m".to_string(),
            40,
            0.7,
            1024,
        ))
    }

    #[tokio::test]
    async fn announce_routes_back_to_origin_session() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(ScriptedProvider::new(vec![ChatResponse::text("summary text")]));
        let manager = manager(&dir, provider);
        let bus = manager.bus.clone();

        let handle = Arc::clone(&manager);
        let reply = handle
            .spawn("t1", "do the thing", "the thing", "telegram", "abc123")
            .await;
        assert!(reply.contains("t1"));

        let announce = tokio::time::timeout(Duration::from_secs(2), bus.consume_inbound(Duration::from_secs(2)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(announce.channel, "system");
        assert_eq!(announce.chat_id, "telegram:abc123");
        assert!(announce.sender_id.starts_with("subagent:"));
        assert!(announce.content.contains("summary text"));
    }

    #[tokio::test]
    async fn subagent_sees_isolated_tool_set() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(ScriptedProvider::new(vec![ChatResponse::text("done")]));
        let manager = manager(&dir, provider.clone());

        (*manager)
            .clone()
            .run_subagent(
                "t2".into(),
                "noop".into(),
                "noop".into(),
                "cli".into(),
                "direct".into(),
            )
            .await;

        let seen = provider.tool_names_seen();
        assert_eq!(seen.len(), 1);
        for forbidden in ["message", "spawn", "cron"] {
            assert!(!seen[0].contains(&forbidden.to_string()), "{forbidden} leaked");
        }
        assert!(seen[0].contains(&"read_file".to_string()));
    }

    #[tokio::test]
    async fn tool_calls_run_until_text_reply() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(ScriptedProvider::new(vec![
            ChatResponse::with_tool_calls(vec![ToolCallRequest {
                id: "c1".into(),
                name: "list_dir".into(),
                arguments: serde_json::json!({}),
            }]),
            ChatResponse::text("looked around"),
        ]));
        let manager = manager(&dir, provider.clone());
        let bus = manager.bus.clone();

        (*manager)
            .clone()
            .run_subagent("t3".into(), "look".into(), "look".into(), "cli".into(), "d".into())
            .await;

        assert_eq!(provider.call_count(), 2);
        let announce = bus.consume_inbound(Duration::from_secs(1)).await.unwrap();
        assert!(announce.content.contains("looked around"));
    }
}
