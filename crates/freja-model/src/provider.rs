// Copyright (c) 2025-2026 The Freja Authors
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;

use crate::{ChatMessage, ChatResponse, ToolDefinition};

/// The single operation the agent core needs from a language model.
///
/// `api_key` / `api_base` are exposed so the redactor can register them as
/// literal secrets at startup; providers without either return `None`.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        model: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> anyhow::Result<ChatResponse>;

    fn default_model(&self) -> &str;

    fn api_key(&self) -> Option<&str> {
        None
    }

    fn api_base(&self) -> Option<&str> {
        None
    }
}
