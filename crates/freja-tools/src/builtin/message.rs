// Copyright (c) 2025-2026 The Freja Authors
//
// SPDX-License-Identifier: MIT
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use freja_bus::OutboundMessage;

use crate::tool::{OutboundSink, Tool};

/// Send a free-form message to the current channel/chat mid-turn.
///
/// The agent loop injects the target context before each turn and inspects
/// the sent-in-turn flag afterwards: when the tool delivered something and
/// the model produced no final content, the auto-reply is suppressed.
pub struct MessageTool {
    sink: Arc<dyn OutboundSink>,
    context: Mutex<(String, String, Option<String>)>,
    sent_in_turn: AtomicBool,
}

impl MessageTool {
    pub fn new(sink: Arc<dyn OutboundSink>) -> Self {
        Self {
            sink,
            context: Mutex::new((String::new(), String::new(), None)),
            sent_in_turn: AtomicBool::new(false),
        }
    }

    /// Point the tool at the conversation that is currently being processed.
    /// `message_id` becomes `reply_to` on everything sent this turn.
    /// Also resets the sent-in-turn flag.
    pub fn set_context(&self, channel: &str, chat_id: &str, message_id: Option<&str>) {
        *self.context.lock().unwrap() = (
            channel.to_string(),
            chat_id.to_string(),
            message_id.map(str::to_string),
        );
        self.sent_in_turn.store(false, Ordering::SeqCst);
    }

    /// Whether the tool sent anything since the last `set_context`; reading
    /// clears the flag.
    pub fn take_sent_in_turn(&self) -> bool {
        self.sent_in_turn.swap(false, Ordering::SeqCst)
    }
}

#[async_trait]
impl Tool for MessageTool {
    fn name(&self) -> &str {
        "message"
    }

    fn description(&self) -> &str {
        "Send a message to the user on the current channel. Use for interim\n\
         updates or when attaching files (media paths)."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "content": {"type": "string", "description": "Message text to send"},
                "media": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Optional file paths to attach"
                }
            },
            "required": ["content"]
        })
    }

    async fn execute(&self, args: Value) -> String {
        let (channel, chat_id, reply_to) = self.context.lock().unwrap().clone();
        if channel.is_empty() || chat_id.is_empty() {
            return "Error: no session context (channel/chat_id)".to_string();
        }

        let content = args["content"].as_str().unwrap_or_default().to_string();
        let media: Vec<String> = args["media"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let mut msg = OutboundMessage::new(channel, chat_id, content);
        msg.reply_to = reply_to;
        msg.media = media;
        self.sink.send(msg).await;
        self.sent_in_turn.store(true, Ordering::SeqCst);
        "Message sent.".to_string()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use tokio::sync::Mutex as AsyncMutex;

    use super::*;

    struct RecordingSink {
        sent: AsyncMutex<Vec<OutboundMessage>>,
    }

    #[async_trait]
    impl OutboundSink for RecordingSink {
        async fn send(&self, msg: OutboundMessage) {
            self.sent.lock().await.push(msg);
        }
    }

    fn tool_with_sink() -> (MessageTool, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink { sent: AsyncMutex::new(Vec::new()) });
        (MessageTool::new(sink.clone()), sink)
    }

    #[tokio::test]
    async fn sends_to_current_context() {
        let (tool, sink) = tool_with_sink();
        tool.set_context("telegram", "999", Some("m-42"));
        let out = tool.execute(json!({"content": "hi there"})).await;
        assert_eq!(out, "Message sent.");

        let sent = sink.sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].channel, "telegram");
        assert_eq!(sent[0].chat_id, "999");
        assert_eq!(sent[0].content, "hi there");
        assert_eq!(sent[0].reply_to.as_deref(), Some("m-42"));
    }

    #[tokio::test]
    async fn errors_without_context() {
        let (tool, _sink) = tool_with_sink();
        let out = tool.execute(json!({"content": "hi"})).await;
        assert!(out.contains("no session context"));
    }

    #[tokio::test]
    async fn sent_in_turn_flag_is_set_and_cleared_on_read() {
        let (tool, _sink) = tool_with_sink();
        tool.set_context("cli", "direct", None);
        assert!(!tool.take_sent_in_turn());
        tool.execute(json!({"content": "x"})).await;
        assert!(tool.take_sent_in_turn());
        assert!(!tool.take_sent_in_turn());
    }

    #[tokio::test]
    async fn set_context_resets_flag() {
        let (tool, _sink) = tool_with_sink();
        tool.set_context("cli", "direct", None);
        tool.execute(json!({"content": "x"})).await;
        tool.set_context("cli", "direct", None);
        assert!(!tool.take_sent_in_turn());
    }

    #[tokio::test]
    async fn media_paths_are_forwarded() {
        let (tool, sink) = tool_with_sink();
        tool.set_context("feishu", "ou_1", None);
        tool.execute(json!({"content": "file", "media": ["workspace/shot.png"]}))
            .await;
        let sent = sink.sent.lock().await;
        assert_eq!(sent[0].media, vec!["workspace/shot.png".to_string()]);
    }
}
