// Copyright (c) 2025-2026 The Freja Authors
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::json;
use tracing::{debug, info, warn};

use freja_model::{ChatMessage, LLMProvider, ToolDefinition};

/// Callback that runs the decided tasks as a direct agent turn.
pub type ExecuteFn = Arc<dyn Fn(String) -> BoxFuture<'static, String> + Send + Sync>;

/// Periodic self-trigger: reads HEARTBEAT.md, asks the model whether there
/// is anything worth doing right now, and executes the returned task list
/// through the agent when the decision is `run`.
pub struct HeartbeatService {
    workspace: PathBuf,
    provider: Arc<dyn LLMProvider>,
    model: String,
    interval: Duration,
    enabled: bool,
    on_execute: ExecuteFn,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl HeartbeatService {
    pub fn new(
        workspace: PathBuf,
        provider: Arc<dyn LLMProvider>,
        model: impl Into<String>,
        interval: Duration,
        enabled: bool,
        on_execute: ExecuteFn,
    ) -> Arc<Self> {
        Arc::new(Self {
            workspace,
            provider,
            model: model.into(),
            interval,
            enabled,
            on_execute,
            task: Mutex::new(None),
        })
    }

    /// Start the periodic task.  Idempotent: a second call while the task
    /// is alive is a no-op.  Returns whether a new task was started.
    pub fn start(self: &Arc<Self>) -> bool {
        if !self.enabled {
            return false;
        }
        let mut slot = self.task.lock().unwrap();
        if slot.as_ref().map(|t| !t.is_finished()).unwrap_or(false) {
            return false;
        }

        let service = Arc::clone(self);
        *slot = Some(tokio::spawn(async move {
            info!(interval_s = service.interval.as_secs(), "heartbeat started");
            loop {
                tokio::time::sleep(service.interval).await;
                if let Some(result) = service.trigger_now().await {
                    let preview: String = result.chars().take(120).collect();
                    info!(result = %preview, "heartbeat executed");
                }
            }
        }));
        true
    }

    pub fn stop(&self) {
        if let Some(task) = self.task.lock().unwrap().take() {
            task.abort();
        }
    }

    /// One heartbeat decision cycle.  Returns the execution result when the
    /// model decided to run, `None` on skip.
    pub async fn trigger_now(&self) -> Option<String> {
        let heartbeat_path = self.workspace.join("HEARTBEAT.md");
        let content = std::fs::read_to_string(&heartbeat_path).ok()?;
        if is_trivially_empty(&content) {
            debug!("heartbeat file has no actionable content; skipping");
            return None;
        }

        let decision_tool = ToolDefinition::function(
            "heartbeat",
            "Decide whether the heartbeat checklist needs action right now.",
            json!({
                "type": "object",
                "properties": {
                    "action": {
                        "type": "string",
                        "enum": ["run", "skip"],
                        "description": "run when something needs doing now, otherwise skip"
                    },
                    "tasks": {
                        "type": "string",
                        "description": "Concrete instructions for what to do (required for run)"
                    }
                },
                "required": ["action"]
            }),
        );

        let messages = vec![
            ChatMessage::system(
                "You are the heartbeat check of a personal agent. Read the \
                 checklist and decide: call the heartbeat tool with action \
                 \"run\" and concrete tasks when something is due now, or \
                 action \"skip\" when nothing needs attention.",
            ),
            ChatMessage::user(format!("HEARTBEAT.md:\n\n{content}")),
        ];

        let response = match self
            .provider
            .chat(&messages, &[decision_tool], &self.model, 1024, 0.3)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "heartbeat decision call failed");
                return None;
            }
        };

        let decision = response
            .tool_calls
            .iter()
            .find(|call| call.name == "heartbeat")?;
        if decision.arguments["action"].as_str() != Some("run") {
            debug!("heartbeat decision: skip");
            return None;
        }
        let tasks = decision.arguments["tasks"].as_str()?.trim().to_string();
        if tasks.is_empty() {
            return None;
        }

        Some((self.on_execute)(tasks).await)
    }
}

/// Only blank lines, headers, and unchecked-but-empty checkboxes count as
/// "nothing to do".
fn is_trivially_empty(content: &str) -> bool {
    content.lines().all(|line| {
        let trimmed = line.trim();
        trimmed.is_empty()
            || trimmed.starts_with('#')
            || trimmed == "- [ ]"
            || trimmed == "- [x]"
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use freja_model::{ChatResponse, ScriptedProvider, ToolCallRequest};

    use super::*;

    fn decision(action: &str, tasks: Option<&str>) -> ChatResponse {
        let mut arguments = json!({"action": action});
        if let Some(tasks) = tasks {
            arguments["tasks"] = json!(tasks);
        }
        ChatResponse::with_tool_calls(vec![ToolCallRequest {
            id: "call_1".into(),
            name: "heartbeat".into(),
            arguments,
        }])
    }

    fn service(
        dir: &tempfile::TempDir,
        provider: Arc<ScriptedProvider>,
        executed: Arc<Mutex<Vec<String>>>,
    ) -> Arc<HeartbeatService> {
        let on_execute: ExecuteFn = Arc::new(move |tasks: String| {
            let executed = Arc::clone(&executed);
            Box::pin(async move {
                executed.lock().unwrap().push(tasks);
                "done".to_string()
            })
        });
        HeartbeatService::new(
            dir.path().to_path_buf(),
            provider,
            "m",
            Duration::from_secs(9999),
            true,
            on_execute,
        )
    }

    #[tokio::test]
    async fn run_decision_executes_tasks() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("HEARTBEAT.md"), "- [ ] check inbox").unwrap();
        let provider = Arc::new(ScriptedProvider::new(vec![decision(
            "run",
            Some("Check inbox and summarize"),
        )]));
        let executed = Arc::new(Mutex::new(Vec::new()));
        let service = service(&dir, provider, Arc::clone(&executed));

        let result = service.trigger_now().await;
        assert_eq!(result.as_deref(), Some("done"));
        assert_eq!(executed.lock().unwrap().as_slice(), ["Check inbox and summarize"]);
    }

    #[tokio::test]
    async fn skip_decision_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("HEARTBEAT.md"), "- [ ] check inbox").unwrap();
        let provider = Arc::new(ScriptedProvider::new(vec![decision("skip", None)]));
        let executed = Arc::new(Mutex::new(Vec::new()));
        let service = service(&dir, provider, Arc::clone(&executed));

        assert!(service.trigger_now().await.is_none());
        assert!(executed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_heartbeat_file_skips_without_model_call() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(ScriptedProvider::new(vec![decision("run", Some("x"))]));
        let executed = Arc::new(Mutex::new(Vec::new()));
        let service = service(&dir, provider.clone(), executed);

        assert!(service.trigger_now().await.is_none());
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn empty_checklist_skips_without_model_call() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("HEARTBEAT.md"),
            "# Heartbeat Tasks\n\n## Active Tasks\n\n- [ ]\n",
        )
        .unwrap();
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let executed = Arc::new(Mutex::new(Vec::new()));
        let service = service(&dir, provider.clone(), executed);

        assert!(service.trigger_now().await.is_none());
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let on_execute: ExecuteFn = Arc::new(|_tasks| Box::pin(async { String::new() }));
        let service = HeartbeatService::new(
            dir.path().to_path_buf(),
            provider,
            "m",
            Duration::from_secs(9999),
            true,
            on_execute,
        );

        assert!(service.start(), "first start spawns the task");
        assert!(!service.start(), "second start is a no-op");
        service.stop();
    }

    #[tokio::test]
    async fn disabled_service_never_starts() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let on_execute: ExecuteFn = Arc::new(|_| Box::pin(async { String::new() }));
        let service = HeartbeatService::new(
            dir.path().to_path_buf(),
            provider,
            "m",
            Duration::from_secs(1),
            false,
            on_execute,
        );
        assert!(!service.start());
        assert!(service.task.lock().unwrap().is_none());
    }
}
