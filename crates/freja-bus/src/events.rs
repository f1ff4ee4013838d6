// Copyright (c) 2025-2026 The Freja Authors
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A message delivered by a chat channel.  Immutable once published.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub channel: String,
    pub sender_id: String,
    pub chat_id: String,
    pub content: String,
    #[serde(default)]
    pub media: Vec<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Overrides the derived session key (used by cron agent turns).
    #[serde(default)]
    pub session_key_override: Option<String>,
}

impl InboundMessage {
    pub fn new(
        channel: impl Into<String>,
        sender_id: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            sender_id: sender_id.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            media: Vec::new(),
            metadata: Map::new(),
            session_key_override: None,
        }
    }

    /// Session key: the override when present, else `"{channel}:{chat_id}"`.
    pub fn session_key(&self) -> String {
        match &self.session_key_override {
            Some(key) if !key.is_empty() => key.clone(),
            _ => format!("{}:{}", self.channel, self.chat_id),
        }
    }
}

/// A reply routed back to a channel.  Produced only by the agent loop or
/// tools, and always passed through the outbound policy before delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub channel: String,
    pub chat_id: String,
    pub content: String,
    #[serde(default)]
    pub reply_to: Option<String>,
    #[serde(default)]
    pub media: Vec<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl OutboundMessage {
    pub fn new(
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            reply_to: None,
            media: Vec::new(),
            metadata: Map::new(),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_key_defaults_to_channel_and_chat_id() {
        let msg = InboundMessage::new("telegram", "u1", "999", "hi");
        assert_eq!(msg.session_key(), "telegram:999");
    }

    #[test]
    fn session_key_override_wins() {
        let mut msg = InboundMessage::new("cli", "user", "direct", "hi");
        msg.session_key_override = Some("cron:job-1".to_string());
        assert_eq!(msg.session_key(), "cron:job-1");
    }

    #[test]
    fn empty_override_is_ignored() {
        let mut msg = InboundMessage::new("cli", "user", "direct", "hi");
        msg.session_key_override = Some(String::new());
        assert_eq!(msg.session_key(), "cli:direct");
    }
}
