// Copyright (c) 2025-2026 The Freja Authors
//
// SPDX-License-Identifier: MIT
use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::{ChatMessage, ChatResponse, LLMProvider, ToolDefinition};

/// Test provider that replays a fixed list of responses in order.
///
/// Every call records a snapshot of the message list and the advertised tool
/// names so tests can assert on what the model actually saw.  When the script
/// runs dry it returns a fixed placeholder response instead of failing, which
/// keeps loop tests from hanging on an unexpected extra iteration.
pub struct ScriptedProvider {
    responses: Mutex<VecDeque<ChatResponse>>,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
    tool_names_seen: Mutex<Vec<Vec<String>>>,
    api_key: Option<String>,
    api_base: Option<String>,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<ChatResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: Mutex::new(Vec::new()),
            tool_names_seen: Mutex::new(Vec::new()),
            api_key: None,
            api_base: None,
        }
    }

    /// Variant with endpoint credentials, for redaction tests.
    pub fn with_credentials(
        responses: Vec<ChatResponse>,
        api_key: impl Into<String>,
        api_base: impl Into<String>,
    ) -> Self {
        Self {
            api_key: Some(api_key.into()),
            api_base: Some(api_base.into()),
            ..Self::new(responses)
        }
    }

    /// Message snapshots of every call made so far.
    pub fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Tool names advertised on each call.
    pub fn tool_names_seen(&self) -> Vec<Vec<String>> {
        self.tool_names_seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        _model: &str,
        _max_tokens: u32,
        _temperature: f32,
    ) -> anyhow::Result<ChatResponse> {
        self.calls.lock().unwrap().push(messages.to_vec());
        self.tool_names_seen
            .lock()
            .unwrap()
            .push(tools.iter().map(|t| t.function.name.clone()).collect());
        let next = self.responses.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| ChatResponse::text("no scripted response")))
    }

    fn default_model(&self) -> &str {
        "scripted-model"
    }

    fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    fn api_base(&self) -> Option<&str> {
        self.api_base.as_deref()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
