// Copyright (c) 2025-2026 The Freja Authors
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::tool::Tool;

const DEFAULT_MAX_CHARS: usize = 50_000;
const HTTP_TIMEOUT_SECS: u64 = 30;

/// Fetch a URL and return readable text: HTML is converted to plain text,
/// JSON is pretty-printed, everything else passes through truncated.
pub struct WebFetchTool {
    client: reqwest::Client,
}

impl WebFetchTool {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(HTTP_TIMEOUT_SECS))
            .redirect(reqwest::redirect::Policy::limited(3))
            .user_agent("freja-agent/0.4")
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl Default for WebFetchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for WebFetchTool {
    fn name(&self) -> &str {
        "web_fetch"
    }

    fn description(&self) -> &str {
        "Fetch a URL and return its content as readable text.\n\
         HTML is converted to text, JSON is pretty-printed.\n\
         http/https only; output is truncated at max_chars (default 50000)."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {"type": "string", "description": "The URL to fetch (http or https)"},
                "max_chars": {
                    "type": "integer",
                    "description": "Maximum characters to return (default 50000)"
                }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, args: Value) -> String {
        let url = args["url"].as_str().unwrap_or_default();
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return format!("Error: only http/https URLs are supported: {url}");
        }
        let max_chars = args["max_chars"].as_u64().unwrap_or(DEFAULT_MAX_CHARS as u64) as usize;

        debug!(url, "web_fetch");

        let response = match self.client.get(url).send().await {
            Ok(r) => r,
            Err(e) => return format!("Error: fetch failed: {e}"),
        };
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_lowercase();
        let body = match response.text().await {
            Ok(b) => b,
            Err(e) => return format!("Error: reading body failed: {e}"),
        };

        let text = if content_type.contains("html") {
            html2text::from_read(body.as_bytes(), 100)
        } else if content_type.contains("json") {
            serde_json::from_str::<Value>(&body)
                .and_then(|v| serde_json::to_string_pretty(&v))
                .unwrap_or(body)
        } else {
            body
        };

        truncate_chars(&text, max_chars)
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_chars).collect();
    format!("{truncated}\n... (truncated, {} more chars)", count - max_chars)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
