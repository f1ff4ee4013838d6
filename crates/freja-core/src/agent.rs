// Copyright (c) 2025-2026 The Freja Authors
//
// SPDX-License-Identifier: MIT
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use serde_json::Value;
use tracing::{error, info, warn};

use freja_bus::{InboundMessage, MessageBus, OutboundMessage};
use freja_config::Config;
use freja_cron::CronService;
use freja_model::{ChatMessage, ChatResponse, LLMProvider, ToolCallPayload, ToolDefinition};
use freja_redact::Redactor;
use freja_tools::{build_main_agent_tools, MainAgentTools, ToolFactoryDeps, ToolRegistry};

use crate::context::ContextBuilder;
use crate::memory::MemoryStore;
use crate::outbound::{OutboundPolicy, PolicyOutboundSink, RECENT_IMAGE_META_KEY};
use crate::session::{Session, SessionEntry, SessionStore};
use crate::subagent::SubagentManager;

/// Fixed reply when the tool-calling iteration hits its cap.
pub const MAX_ITERATIONS_NOTICE: &str =
    "Reached the maximum number of tool iterations without a final response.";

const EMPTY_RESPONSE_FALLBACK: &str = "I've completed processing but have no response to give.";
const SYSTEM_TURN_FALLBACK: &str = "Background task completed.";
const TOOL_RESULT_PERSIST_LIMIT: usize = 500;

/// Fire-and-forget progress callback: `(text, is_tool_hint)`.
pub type ProgressFn = Arc<dyn Fn(&str, bool) + Send + Sync>;

struct TurnOutcome {
    final_content: String,
    entries: Vec<SessionEntry>,
    tools_used: Vec<String>,
}

/// The main event loop: consume inbound → build context → iterate the model
/// with tools → persist → reply.  One message at a time; per-session turns
/// are linearized through the store's per-key locks.
pub struct AgentLoop {
    bus: MessageBus,
    provider: Arc<dyn LLMProvider>,
    workspace: PathBuf,
    model: String,
    max_iterations: usize,
    temperature: f32,
    max_tokens: u32,
    memory_window: usize,
    send_progress: bool,
    send_tool_hints: bool,
    context: ContextBuilder,
    sessions: Arc<SessionStore>,
    memory: Arc<MemoryStore>,
    policy: Arc<OutboundPolicy>,
    tools: MainAgentTools,
    consolidating: Mutex<HashSet<String>>,
    running: AtomicBool,
}

impl AgentLoop {
    pub fn new(
        bus: MessageBus,
        provider: Arc<dyn LLMProvider>,
        config: &Config,
        cron: Option<Arc<CronService>>,
    ) -> Arc<Self> {
        let workspace = config.workspace();
        if let Err(e) = std::fs::create_dir_all(&workspace) {
            warn!(error = %e, "cannot create workspace directory");
        }

        let mut extra_secrets = Vec::new();
        if let Some(key) = provider.api_key() {
            extra_secrets.push(key.to_string());
        }
        if let Some(base) = provider.api_base() {
            extra_secrets.push(base.to_string());
        }
        let redactor = Redactor::new(
            config.security.redact_sensitive_output,
            Some(&workspace),
            Some(&freja_config::config_path()),
            &extra_secrets,
        );
        let policy = Arc::new(OutboundPolicy::new(&workspace, redactor));
        let sink = Arc::new(PolicyOutboundSink::new(bus.clone(), Arc::clone(&policy)));

        let model = config
            .model
            .clone()
            .unwrap_or_else(|| provider.default_model().to_string());
        let deps = ToolFactoryDeps::from_config(config);
        let subagents = Arc::new(SubagentManager::new(
            Arc::clone(&provider),
            bus.clone(),
            deps.clone(),
            model.clone(),
            config.max_iterations,
            config.temperature,
            config.max_tokens,
        ));
        let tools = build_main_agent_tools(&deps, sink, subagents.clone(), cron);

        Arc::new(Self {
            bus,
            provider,
            context: ContextBuilder::new(&workspace),
            sessions: Arc::new(SessionStore::new(&workspace)),
            memory: Arc::new(MemoryStore::new(&workspace)),
            policy,
            tools,
            model,
            max_iterations: config.max_iterations,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            memory_window: config.memory_window,
            send_progress: config.channels.send_progress,
            send_tool_hints: config.channels.send_tool_hints,
            workspace,
            consolidating: Mutex::new(HashSet::new()),
            running: AtomicBool::new(false),
        })
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.tools.registry
    }

    pub fn workspace(&self) -> &PathBuf {
        &self.workspace
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Consume inbound messages until stopped.  Never propagates an error
    /// past an individual message: failures are logged and answered with a
    /// generic apology.
    pub async fn run(&self) {
        self.running.store(true, Ordering::SeqCst);
        info!("agent loop started");

        while self.running.load(Ordering::SeqCst) {
            // The 1 s timeout is the stop-flag poll interval.
            let Some(msg) = self.bus.consume_inbound(Duration::from_secs(1)).await else {
                continue;
            };

            match self.process_message(&msg, None).await {
                Ok(Some(reply)) => self.publish_outbound_safe(reply).await,
                Ok(None) => {}
                Err(e) => {
                    error!(error = %e, channel = %msg.channel, "error processing message");
                    self.publish_outbound_safe(OutboundMessage::new(
                        &msg.channel,
                        &msg.chat_id,
                        format!("Sorry, I encountered an error: {e}"),
                    ))
                    .await;
                }
            }
        }
        info!("agent loop stopped");
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        info!("agent loop stopping");
    }

    /// Synchronous processing path for CLI and cron usage.
    pub async fn process_direct(
        &self,
        content: &str,
        session_key: Option<&str>,
        channel: &str,
        chat_id: &str,
        on_progress: Option<ProgressFn>,
    ) -> String {
        let mut msg = InboundMessage::new(channel, "user", chat_id, content);
        msg.session_key_override = session_key.map(str::to_string);

        match self.process_message(&msg, on_progress.as_ref()).await {
            Ok(Some(reply)) => self.policy.redact_text(&reply.content),
            Ok(None) => String::new(),
            Err(e) => format!("Sorry, I encountered an error: {e}"),
        }
    }

    /// Publish through the outbound policy (redaction + media
    /// normalization).  Tools and the cron dispatcher share this path.
    pub async fn publish_outbound_safe(&self, msg: OutboundMessage) {
        self.bus.publish_outbound(self.policy.redact_outbound(msg)).await;
    }

    pub async fn process_message(
        &self,
        msg: &InboundMessage,
        on_progress: Option<&ProgressFn>,
    ) -> anyhow::Result<Option<OutboundMessage>> {
        // Subagent results come back as system-channel messages whose
        // chat_id encodes the origin conversation.
        if msg.channel == "system" {
            return self.process_system_message(msg, on_progress).await;
        }

        match msg.content.trim() {
            "/new" => return self.handle_new_session(msg).await.map(Some),
            "/help" => {
                return Ok(Some(OutboundMessage::new(
                    &msg.channel,
                    &msg.chat_id,
                    "Commands:\n/new — archive this conversation and start fresh\n/help — show this help",
                )))
            }
            _ => {}
        }

        let preview: String = msg.content.chars().take(80).collect();
        info!(channel = %msg.channel, sender = %msg.sender_id, preview = %preview, "processing message");

        let session_key = msg.session_key();
        let lock = self.sessions.lock_for(&session_key);
        let _guard = lock.lock().await;
        let mut session = self.sessions.get_or_create(&session_key);

        self.maybe_consolidate(&mut session).await;

        // Image carry-over: a fresh image is remembered for two follow-up
        // turns; otherwise a remembered one is re-attached and decremented.
        let incoming_media = self.policy.normalize_media_paths(&msg.media);
        let mut effective_media = incoming_media.clone();
        if let Some(latest) = self.policy.extract_latest_image(&incoming_media) {
            self.policy.remember_recent_image(&mut session, &latest);
        } else if let Some(recent) = self.policy.consume_recent_image(&mut session) {
            if !effective_media.contains(&recent) {
                effective_media.push(recent);
            }
        }

        let message_id = msg.metadata.get("message_id").and_then(Value::as_str);
        self.tools.set_context(&msg.channel, &msg.chat_id, message_id);

        let history = session.history(self.memory_window);
        let mut messages = self.context.build_messages(
            &history,
            &msg.content,
            (!effective_media.is_empty()).then_some(effective_media.as_slice()),
            &msg.channel,
            &msg.chat_id,
        );

        let mut outcome = self.run_iteration(&mut messages, on_progress).await?;

        // A turn where the message tool already delivered content and the
        // model closed with empty text needs no auto-reply.
        let sent_in_turn = self.tools.message.take_sent_in_turn();
        let suppress_reply = sent_in_turn && outcome.final_content.trim().is_empty();
        if outcome.final_content.trim().is_empty() && !suppress_reply {
            outcome.final_content = EMPTY_RESPONSE_FALLBACK.to_string();
        }

        self.persist_turn(&mut session, &msg.content, false, &outcome)?;

        if suppress_reply {
            return Ok(None);
        }
        let mut reply = OutboundMessage::new(
            &msg.channel,
            &msg.chat_id,
            self.policy.redact_text(&outcome.final_content),
        );
        // Metadata passes through for channel-specific routing (threads).
        reply.reply_to = message_id.map(str::to_string);
        reply.metadata = msg.metadata.clone();
        Ok(Some(reply))
    }

    async fn process_system_message(
        &self,
        msg: &InboundMessage,
        on_progress: Option<&ProgressFn>,
    ) -> anyhow::Result<Option<OutboundMessage>> {
        info!(sender = %msg.sender_id, "processing system message");

        let (origin_channel, origin_chat_id) = msg
            .chat_id
            .split_once(':')
            .unwrap_or(("cli", msg.chat_id.as_str()));

        let session_key = format!("{origin_channel}:{origin_chat_id}");
        let lock = self.sessions.lock_for(&session_key);
        let _guard = lock.lock().await;
        let mut session = self.sessions.get_or_create(&session_key);

        self.tools.set_context(origin_channel, origin_chat_id, None);

        let history = session.history(self.memory_window);
        let mut messages = self.context.build_messages(
            &history,
            &msg.content,
            None,
            origin_channel,
            origin_chat_id,
        );

        let mut outcome = self.run_iteration(&mut messages, on_progress).await?;
        if outcome.final_content.trim().is_empty() {
            outcome.final_content = SYSTEM_TURN_FALLBACK.to_string();
        }

        let user_record = format!("[System: {}] {}", msg.sender_id, msg.content);
        self.persist_turn(&mut session, &user_record, true, &outcome)?;

        Ok(Some(OutboundMessage::new(
            origin_channel,
            origin_chat_id,
            self.policy.redact_text(&outcome.final_content),
        )))
    }

    /// The tool-calling iteration: call the model, execute requested tools
    /// in order, feed results back, until a tool-free response or the cap.
    async fn run_iteration(
        &self,
        messages: &mut Vec<ChatMessage>,
        on_progress: Option<&ProgressFn>,
    ) -> anyhow::Result<TurnOutcome> {
        let definitions = self.tool_definitions();
        let mut entries: Vec<SessionEntry> = Vec::new();
        let mut tools_used: Vec<String> = Vec::new();
        let mut final_content: Option<String> = None;

        for _ in 0..self.max_iterations {
            let response = self
                .provider
                .chat(messages, &definitions, &self.model, self.max_tokens, self.temperature)
                .await
                .context("model call failed")?;

            if !response.has_tool_calls() {
                final_content = Some(strip_think_blocks(
                    response.content.as_deref().unwrap_or_default(),
                ));
                break;
            }

            // Interim narration never reaches the user directly; it rides
            // the progress callback only.
            self.report_progress(on_progress, &response);

            let payloads: Vec<ToolCallPayload> = response
                .tool_calls
                .iter()
                .map(|tc| ToolCallPayload::function(&tc.id, &tc.name, &tc.arguments))
                .collect();
            ContextBuilder::add_assistant_message(
                messages,
                response.content.clone(),
                payloads.clone(),
                response.reasoning_content.clone(),
            );
            let mut assistant_entry =
                SessionEntry::new("assistant", response.content.clone().unwrap_or_default());
            assistant_entry.tool_calls = serde_json::to_value(&payloads).ok();
            entries.push(assistant_entry);

            for call in &response.tool_calls {
                tools_used.push(call.name.clone());
                let safe_args = self.policy.redact_text(&call.arguments.to_string());
                let args_preview: String = safe_args.chars().take(200).collect();
                info!(tool = %call.name, args = %args_preview, "tool call");

                let result = self
                    .tools
                    .registry
                    .execute(&call.name, call.arguments.clone())
                    .await;
                ContextBuilder::add_tool_result(messages, &call.id, &call.name, &result);

                let mut tool_entry = SessionEntry::new("tool", result);
                tool_entry.tool_call_id = Some(call.id.clone());
                tool_entry.name = Some(call.name.clone());
                entries.push(tool_entry);
            }
        }

        Ok(TurnOutcome {
            final_content: final_content.unwrap_or_else(|| MAX_ITERATIONS_NOTICE.to_string()),
            entries,
            tools_used,
        })
    }

    /// Append the turn to the session log and persist it.
    ///
    /// Tool results are truncated at 500 chars; assistant and tool content
    /// is always redacted; user content is redacted when the turn came
    /// through the system channel.
    fn persist_turn(
        &self,
        session: &mut Session,
        user_content: &str,
        redact_user: bool,
        outcome: &TurnOutcome,
    ) -> anyhow::Result<()> {
        let user_text = if redact_user {
            self.policy.redact_text(user_content)
        } else {
            user_content.to_string()
        };
        session.push_entry(SessionEntry::new("user", user_text));

        for entry in &outcome.entries {
            let mut stored = entry.clone();
            if stored.role == "tool" {
                stored.content = truncate_chars(&stored.content, TOOL_RESULT_PERSIST_LIMIT);
            }
            stored.content = self.policy.redact_text(&stored.content);
            session.push_entry(stored);
        }

        let mut final_entry =
            SessionEntry::new("assistant", self.policy.redact_text(&outcome.final_content));
        if !outcome.tools_used.is_empty() {
            final_entry.tools_used = Some(outcome.tools_used.clone());
        }
        session.push_entry(final_entry);

        self.sessions.save(session)
    }

    /// Window check: when the unarchived tail reaches the memory window and
    /// no consolidation is in flight for this key, consolidate under the
    /// per-session lock the caller already holds.
    async fn maybe_consolidate(&self, session: &mut Session) {
        let unarchived = session.messages.len().saturating_sub(session.last_consolidated);
        if unarchived < self.memory_window {
            return;
        }
        let key = session.key.clone();
        if !self.consolidating.lock().unwrap().insert(key.clone()) {
            return;
        }

        let ok = self
            .memory
            .consolidate(session, self.provider.as_ref(), &self.model, false, self.memory_window)
            .await;
        if ok {
            if let Err(e) = self.sessions.save(session) {
                warn!(error = %e, "saving consolidated session failed");
            }
        }
        self.consolidating.lock().unwrap().remove(&key);
    }

    /// `/new`: archive synchronously, and only clear when archival worked.
    async fn handle_new_session(&self, msg: &InboundMessage) -> anyhow::Result<OutboundMessage> {
        let session_key = msg.session_key();
        let lock = self.sessions.lock_for(&session_key);
        let _guard = lock.lock().await;
        let mut session = self.sessions.get_or_create(&session_key);

        let archived = self
            .memory
            .consolidate(
                &mut session,
                self.provider.as_ref(),
                &self.model,
                true,
                self.memory_window,
            )
            .await;
        if !archived {
            return Ok(OutboundMessage::new(
                &msg.channel,
                &msg.chat_id,
                "Could not archive this conversation to memory; the session is unchanged. Try again.",
            ));
        }

        session.messages.clear();
        session.last_consolidated = 0;
        session.metadata.remove(RECENT_IMAGE_META_KEY);
        self.sessions.save(&session)?;
        self.sessions.invalidate(&session_key);

        Ok(OutboundMessage::new(&msg.channel, &msg.chat_id, "New session started."))
    }

    fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .registry
            .schemas()
            .into_iter()
            .map(|s| ToolDefinition::function(s.name, s.description, s.parameters))
            .collect()
    }

    fn report_progress(&self, on_progress: Option<&ProgressFn>, response: &ChatResponse) {
        let Some(callback) = on_progress else {
            return;
        };
        if self.send_progress {
            if let Some(content) = &response.content {
                let cleaned = strip_think_blocks(content);
                let cleaned = cleaned.trim();
                if !cleaned.is_empty() {
                    callback(cleaned, false);
                }
            }
        }
        if self.send_tool_hints {
            for call in &response.tool_calls {
                callback(&tool_hint(&call.name, &call.arguments), true);
            }
        }
    }
}

/// Compact one-line hint like `web_search("rust 2026")`.
fn tool_hint(name: &str, args: &Value) -> String {
    let first_string = args
        .as_object()
        .and_then(|map| map.values().find_map(Value::as_str));
    match first_string {
        Some(value) => {
            let shortened: String = value.chars().take(40).collect();
            format!("{name}(\"{shortened}\")")
        }
        None => format!("{name}()"),
    }
}

/// Remove `<think>…</think>` blocks some models embed in plain content.
/// An unclosed block swallows the rest of the text.
fn strip_think_blocks(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    loop {
        match rest.find("<think>") {
            Some(start) => {
                out.push_str(&rest[..start]);
                match rest[start..].find("</think>") {
                    Some(end_offset) => {
                        rest = &rest[start + end_offset + "</think>".len()..];
                    }
                    None => break,
                }
            }
            None => {
                out.push_str(rest);
                break;
            }
        }
    }
    out.trim().to_string()
}

fn truncate_chars(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let cut: String = text.chars().take(limit).collect();
    format!("{cut}... (truncated)")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use freja_model::{ChatResponse, ScriptedProvider, ToolCallRequest};
    use serde_json::json;

    use super::*;

    fn config(dir: &tempfile::TempDir) -> Config {
        let mut config = Config::default();
        config.workspace_path = Some(dir.path().join("workspace").to_string_lossy().into_owned());
        config.tools.web.browser.enabled = false;
        config.memory_window = 50;
        config
    }

    fn agent(dir: &tempfile::TempDir, responses: Vec<ChatResponse>) -> Arc<AgentLoop> {
        let provider = Arc::new(ScriptedProvider::new(responses));
        AgentLoop::new(MessageBus::new(), provider, &config(dir), None)
    }

    #[test]
    fn strip_think_removes_blocks() {
        assert_eq!(strip_think_blocks("<think>reasoning</think>answer"), "answer");
        assert_eq!(strip_think_blocks("a<think>x</think>b<think>y</think>c"), "abc");
        assert_eq!(strip_think_blocks("plain"), "plain");
        assert_eq!(strip_think_blocks("head<think>unclosed"), "head");
    }

    #[test]
    fn tool_hint_prefers_first_string_argument() {
        assert_eq!(tool_hint("web_search", &json!({"query": "rust"})), "web_search(\"rust\")");
        assert_eq!(tool_hint("todo", &json!({"count": 3})), "todo()");
    }

    #[test]
    fn truncate_appends_marker() {
        let out = truncate_chars(&"x".repeat(600), 500);
        assert!(out.ends_with("... (truncated)"));
        assert!(out.len() < 600 + 32);
    }

    #[tokio::test]
    async fn direct_turn_persists_user_and_assistant() {
        let dir = tempfile::tempdir().unwrap();
        let agent = agent(&dir, vec![ChatResponse::text("hello there")]);
        let reply = agent.process_direct("hi", None, "cli", "direct", None).await;
        assert_eq!(reply, "hello there");

        let session = agent.sessions().get_or_create("cli:direct");
        assert_eq!(session.messages.len(), 2);
        assert_eq!(session.messages[0].role, "user");
        assert_eq!(session.messages[1].role, "assistant");
    }

    #[tokio::test]
    async fn tool_loop_records_tools_used_and_tool_entries() {
        let dir = tempfile::tempdir().unwrap();
        let agent = agent(
            &dir,
            vec![
                ChatResponse::with_tool_calls(vec![ToolCallRequest {
                    id: "c1".into(),
                    name: "list_dir".into(),
                    arguments: json!({}),
                }]),
                ChatResponse::text("done"),
            ],
        );
        let reply = agent.process_direct("look", None, "cli", "direct", None).await;
        assert_eq!(reply, "done");

        let session = agent.sessions().get_or_create("cli:direct");
        // user, assistant(tool_calls), tool, assistant(final)
        assert_eq!(session.messages.len(), 4);
        assert!(session.messages[1].tool_calls.is_some());
        assert_eq!(session.messages[2].role, "tool");
        assert_eq!(session.messages[2].tool_call_id.as_deref(), Some("c1"));
        assert_eq!(
            session.messages[3].tools_used,
            Some(vec!["list_dir".to_string()])
        );
    }

    #[tokio::test]
    async fn iteration_cap_yields_fixed_notice() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(&dir);
        config.max_iterations = 3;

        let responses: Vec<ChatResponse> = (0..5)
            .map(|i| {
                ChatResponse::with_tool_calls(vec![ToolCallRequest {
                    id: format!("c{i}"),
                    name: "list_dir".into(),
                    arguments: json!({}),
                }])
            })
            .collect();
        let provider = Arc::new(ScriptedProvider::new(responses));
        let agent = AgentLoop::new(MessageBus::new(), provider.clone(), &config, None);

        let reply = agent.process_direct("go", None, "cli", "direct", None).await;
        assert_eq!(reply, MAX_ITERATIONS_NOTICE);
        assert_eq!(provider.call_count(), 3);

        let session = agent.sessions().get_or_create("cli:direct");
        let final_entry = session.messages.last().unwrap();
        assert_eq!(final_entry.tools_used.as_ref().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn long_tool_output_is_truncated_in_session() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = dir.path().join("workspace");
        std::fs::create_dir_all(&workspace).unwrap();
        std::fs::write(workspace.join("big.txt"), "y".repeat(2000)).unwrap();

        let agent = agent(
            &dir,
            vec![
                ChatResponse::with_tool_calls(vec![ToolCallRequest {
                    id: "c1".into(),
                    name: "read_file".into(),
                    arguments: json!({"path": "big.txt"}),
                }]),
                ChatResponse::text("read it"),
            ],
        );
        agent.process_direct("read", None, "cli", "direct", None).await;

        let session = agent.sessions().get_or_create("cli:direct");
        let tool_entry = session.messages.iter().find(|m| m.role == "tool").unwrap();
        assert!(tool_entry.content.len() < 600, "{}", tool_entry.content.len());
        assert!(tool_entry.content.contains("(truncated)"));
    }

    #[tokio::test]
    async fn help_command_is_static() {
        let dir = tempfile::tempdir().unwrap();
        let agent = agent(&dir, vec![]);
        let reply = agent.process_direct("/help", None, "cli", "direct", None).await;
        assert!(reply.contains("/new"));
        // no model call happened
        let session = agent.sessions().get_or_create("cli:direct");
        assert!(session.messages.is_empty());
    }

    #[tokio::test]
    async fn new_session_failure_keeps_messages() {
        let dir = tempfile::tempdir().unwrap();
        let agent = agent(
            &dir,
            vec![ChatResponse::text("first reply"), ChatResponse::text("not-json")],
        );
        agent.process_direct("hello", None, "cli", "direct", None).await;

        let reply = agent.process_direct("/new", None, "cli", "direct", None).await;
        assert!(reply.contains("unchanged"), "{reply}");
        let session = agent.sessions().get_or_create("cli:direct");
        assert_eq!(session.messages.len(), 2);
    }

    #[tokio::test]
    async fn new_session_success_clears_and_writes_history() {
        let dir = tempfile::tempdir().unwrap();
        let agent = agent(
            &dir,
            vec![
                ChatResponse::text("first reply"),
                ChatResponse::text(
                    r#"{"history_entry":"archived chat","memory_update":"mem"}"#,
                ),
            ],
        );
        agent.process_direct("hello", None, "cli", "direct", None).await;

        let reply = agent.process_direct("/new", None, "cli", "direct", None).await;
        assert_eq!(reply, "New session started.");

        let session = agent.sessions().get_or_create("cli:direct");
        assert!(session.messages.is_empty());
        assert_eq!(session.last_consolidated, 0);

        let history = std::fs::read_to_string(
            dir.path().join("workspace/memory/HISTORY.md"),
        )
        .unwrap();
        assert_eq!(history.matches("archived chat").count(), 1);
    }

    #[tokio::test]
    async fn progress_callback_receives_narration_and_hints() {
        let dir = tempfile::tempdir().unwrap();
        let agent = agent(
            &dir,
            vec![
                ChatResponse {
                    content: Some("Let me check the files.".to_string()),
                    reasoning_content: None,
                    tool_calls: vec![ToolCallRequest {
                        id: "c1".into(),
                        name: "list_dir".into(),
                        arguments: json!({"path": "."}),
                    }],
                },
                ChatResponse::text("done"),
            ],
        );

        let seen: Arc<Mutex<Vec<(String, bool)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: ProgressFn = Arc::new(move |text, hint| {
            sink.lock().unwrap().push((text.to_string(), hint));
        });

        let reply = agent
            .process_direct("check", None, "cli", "direct", Some(callback))
            .await;
        assert_eq!(reply, "done");

        let seen = seen.lock().unwrap();
        assert!(seen.iter().any(|(t, hint)| !hint && t.contains("check the files")));
        assert!(seen.iter().any(|(t, hint)| *hint && t.starts_with("list_dir(")));
        // interim narration must not be in the final reply
        assert!(!reply.contains("check the files"));
    }

    #[tokio::test]
    async fn window_trigger_consolidates_before_the_turn() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(&dir);
        config.memory_window = 4;
        let provider = Arc::new(ScriptedProvider::new(vec![
            ChatResponse::text(
                r#"{"history_entry":"window archived","memory_update":"mem"}"#,
            ),
            ChatResponse::text("final reply"),
        ]));
        let agent = AgentLoop::new(MessageBus::new(), provider, &config, None);

        {
            let mut session = agent.sessions().get_or_create("cli:direct");
            for i in 0..6 {
                session.add_message(if i % 2 == 0 { "user" } else { "assistant" }, &format!("m{i}"));
            }
            agent.sessions().save(&session).unwrap();
        }

        let reply = agent.process_direct("new input", None, "cli", "direct", None).await;
        assert_eq!(reply, "final reply");

        let session = agent.sessions().get_or_create("cli:direct");
        assert_eq!(session.last_consolidated, 4);
        let history =
            std::fs::read_to_string(dir.path().join("workspace/memory/HISTORY.md")).unwrap();
        assert!(history.contains("window archived"));
    }
}
