// Copyright (c) 2025-2026 The Freja Authors
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Local;
use tracing::warn;

use freja_model::{ChatMessage, ContentPart, Role, ToolCallPayload};

use crate::memory::MemoryStore;

/// Assembles the LLM message list for one turn: system prompt, redacted
/// history, then the current user message (multimodal when images ride
/// along).
pub struct ContextBuilder {
    workspace: PathBuf,
    memory: MemoryStore,
}

impl ContextBuilder {
    pub fn new(workspace: &Path) -> Self {
        Self { workspace: workspace.to_path_buf(), memory: MemoryStore::new(workspace) }
    }

    pub fn build_messages(
        &self,
        history: &[(String, String)],
        current_message: &str,
        media: Option<&[String]>,
        channel: &str,
        chat_id: &str,
    ) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::system(self.system_prompt(channel, chat_id))];

        for (role, content) in history {
            messages.push(ChatMessage {
                role: parse_role(role),
                content: Some(freja_model::MessageContent::Text(content.clone())),
                tool_calls: None,
                tool_call_id: None,
                name: None,
                reasoning_content: None,
            });
        }

        messages.push(self.build_user_message(current_message, media));
        messages
    }

    /// Shape helper: append the assistant message that carries tool calls.
    pub fn add_assistant_message(
        messages: &mut Vec<ChatMessage>,
        content: Option<String>,
        tool_calls: Vec<ToolCallPayload>,
        reasoning_content: Option<String>,
    ) {
        messages.push(ChatMessage::assistant_tool_calls(
            content,
            tool_calls,
            reasoning_content,
        ));
    }

    /// Shape helper: append one tool-result message keyed by call id + name.
    pub fn add_tool_result(
        messages: &mut Vec<ChatMessage>,
        tool_call_id: &str,
        name: &str,
        result: &str,
    ) {
        messages.push(ChatMessage::tool_result(tool_call_id, name, result));
    }

    fn build_user_message(&self, content: &str, media: Option<&[String]>) -> ChatMessage {
        let images: Vec<String> = media
            .unwrap_or_default()
            .iter()
            .filter_map(|path| self.encode_image(path))
            .collect();
        if images.is_empty() {
            return ChatMessage::user(content);
        }

        let mut parts: Vec<ContentPart> =
            images.into_iter().map(ContentPart::image).collect();
        parts.push(ContentPart::text(content));
        ChatMessage::user_with_parts(parts)
    }

    /// Read an image file into a base64 data URL.  The MIME type comes from
    /// the system table; when that has no entry for the extension, the
    /// suffix itself is used (`image/<ext>`).
    fn encode_image(&self, path: &str) -> Option<String> {
        let p = Path::new(path);
        let bytes = match std::fs::read(p) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(path, error = %e, "skipping unreadable media file");
                return None;
            }
        };

        let extension = p
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let mime = mime_guess::from_path(p)
            .first()
            .filter(|m| m.type_() == mime_guess::mime::IMAGE)
            .map(|m| m.essence_str().to_string())
            .or_else(|| (!extension.is_empty()).then(|| format!("image/{extension}")))?;

        Some(format!("data:{mime};base64,{}", BASE64.encode(bytes)))
    }

    fn system_prompt(&self, channel: &str, chat_id: &str) -> String {
        let mut prompt = format!(
            "You are Freja, a personal assistant agent reachable over chat.\n\n\
             Your workspace is at: {}\n\
             Current channel: {channel}\n\
             Chat ID: {chat_id}\n\
             Current time: {}\n\n\
             You can read and write files in the workspace, run shell commands,\n\
             search and fetch the web, automate a browser, manage the TODO board,\n\
             schedule reminders, send interim messages, and spawn subagents for\n\
             background work. Prefer tools over guessing. Keep replies concise.",
            self.workspace.display(),
            Local::now().format("%Y-%m-%d %H:%M (%A)"),
        );

        if let Some(memory) = self.memory.read_long_term() {
            prompt.push_str("\n\n## Long-term memory\n\n");
            prompt.push_str(&memory);
        }
        prompt
    }
}

fn parse_role(role: &str) -> Role {
    match role {
        "assistant" => Role::Assistant,
        "system" => Role::System,
        "tool" => Role::Tool,
        _ => Role::User,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
