// Copyright (c) 2025-2026 The Freja Authors
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::{ChatMessage, ChatResponse, LLMProvider, ToolCallRequest, ToolDefinition};

/// Request/response client for any OpenAI-compatible chat-completions
/// endpoint (OpenAI, OpenRouter, DeepSeek, vLLM, llama.cpp, LiteLLM…).
///
/// Streaming is intentionally not used: the runtime is turn-based and each
/// turn is a single request/response exchange.
pub struct OpenAiCompatProvider {
    client: reqwest::Client,
    api_key: String,
    api_base: String,
    default_model: String,
}

impl OpenAiCompatProvider {
    pub fn new(
        api_key: impl Into<String>,
        api_base: impl Into<String>,
        default_model: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key: api_key.into(),
            api_base: api_base.into(),
            default_model: default_model.into(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.api_base.trim_end_matches('/'))
    }
}

#[async_trait]
impl LLMProvider for OpenAiCompatProvider {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        model: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> anyhow::Result<ChatResponse> {
        let mut body = json!({
            "model": model,
            "messages": messages,
            "max_tokens": max_tokens,
            "temperature": temperature,
        });
        if !tools.is_empty() {
            body["tools"] = serde_json::to_value(tools)?;
        }

        debug!(model, n_messages = messages.len(), n_tools = tools.len(), "chat request");

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let payload: Value = response.json().await?;
        if !status.is_success() {
            let detail = payload["error"]["message"]
                .as_str()
                .unwrap_or("(no error body)");
            anyhow::bail!("provider returned {status}: {detail}");
        }

        Ok(parse_chat_response(&payload))
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn api_key(&self) -> Option<&str> {
        Some(&self.api_key)
    }

    fn api_base(&self) -> Option<&str> {
        Some(&self.api_base)
    }
}

/// Extract content / reasoning / tool calls from `choices[0].message`.
///
/// Tool-call arguments arrive as a JSON-encoded string; invalid JSON is
/// replaced by an empty object so one malformed call cannot poison the turn.
fn parse_chat_response(payload: &Value) -> ChatResponse {
    let message = &payload["choices"][0]["message"];

    let tool_calls = message["tool_calls"]
        .as_array()
        .map(|calls| {
            calls
                .iter()
                .filter_map(|call| {
                    let name = call["function"]["name"].as_str()?;
                    let arguments = call["function"]["arguments"]
                        .as_str()
                        .and_then(|raw| serde_json::from_str::<Value>(raw).ok())
                        .unwrap_or_else(|| json!({}));
                    Some(ToolCallRequest {
                        id: call["id"].as_str().unwrap_or_default().to_string(),
                        name: name.to_string(),
                        arguments,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    ChatResponse {
        content: message["content"].as_str().map(str::to_string),
        reasoning_content: message["reasoning_content"].as_str().map(str::to_string),
        tool_calls,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
