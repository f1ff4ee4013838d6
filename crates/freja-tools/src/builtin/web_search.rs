// Copyright (c) 2025-2026 The Freja Authors
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use freja_config::{SearchProviderConfig, WebSearchConfig};

use crate::tool::Tool;

const HTTP_TIMEOUT_SECS: u64 = 10;

/// Normalized search result item.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// Real-time web search dispatching on the configured provider
/// (brave / tavily / serper), each with its own endpoint, auth header,
/// and response shape.
pub struct WebSearchTool {
    config: WebSearchConfig,
    client: reqwest::Client,
}

impl WebSearchTool {
    pub fn new(config: WebSearchConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(HTTP_TIMEOUT_SECS))
            .user_agent("freja-agent/0.4")
            .build()
            .unwrap_or_default();
        Self { config, client }
    }

    fn provider_config(&self, provider: &str) -> &SearchProviderConfig {
        match provider {
            "tavily" => &self.config.providers.tavily,
            "serper" => &self.config.providers.serper,
            _ => &self.config.providers.brave,
        }
    }

    async fn search(&self, query: &str, count: usize) -> Result<Vec<SearchHit>, String> {
        let provider = self.config.provider.to_lowercase();
        let (env_key, default_base) = match provider.as_str() {
            "brave" => ("BRAVE_API_KEY", "https://api.search.brave.com/res/v1/web/search"),
            "tavily" => ("TAVILY_API_KEY", "https://api.tavily.com/search"),
            "serper" => ("SERPER_API_KEY", "https://google.serper.dev/search"),
            other => return Err(format!("Error: unknown search provider: {other}")),
        };

        let provider_cfg = self.provider_config(&provider);
        let api_key = provider_cfg
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var(env_key).ok().filter(|k| !k.is_empty()));
        let Some(api_key) = api_key else {
            return Err(format!(
                "Error: {provider} api key not configured \
                 (set tools.web.search.providers.{provider}.apiKey or {env_key})"
            ));
        };

        let base_url = provider_cfg
            .base_url
            .clone()
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| default_base.to_string());

        let result = match provider.as_str() {
            "brave" => self.search_brave(&base_url, &api_key, query, count).await,
            "tavily" => self.search_tavily(&base_url, &api_key, query, count).await,
            _ => self.search_serper(&base_url, &api_key, query, count).await,
        };
        result.map_err(|e| format!("Error: {provider} search failed: {e}"))
    }

    async fn search_brave(
        &self,
        base_url: &str,
        api_key: &str,
        query: &str,
        count: usize,
    ) -> anyhow::Result<Vec<SearchHit>> {
        let response = self
            .client
            .get(base_url)
            .query(&[("q", query), ("count", &count.to_string())])
            .header("Accept", "application/json")
            .header("X-Subscription-Token", api_key)
            .send()
            .await?
            .error_for_status()?;
        let payload: Value = response.json().await?;

        let results = payload["web"]["results"].as_array().cloned().unwrap_or_default();
        Ok(results
            .iter()
            .take(count)
            .map(|item| SearchHit {
                title: item["title"].as_str().unwrap_or_default().to_string(),
                url: item["url"].as_str().unwrap_or_default().to_string(),
                snippet: item["description"].as_str().unwrap_or_default().to_string(),
            })
            .collect())
    }

    async fn search_tavily(
        &self,
        base_url: &str,
        api_key: &str,
        query: &str,
        count: usize,
    ) -> anyhow::Result<Vec<SearchHit>> {
        let response = self
            .client
            .post(base_url)
            .json(&json!({"api_key": api_key, "query": query, "max_results": count}))
            .send()
            .await?
            .error_for_status()?;
        let payload: Value = response.json().await?;

        let results = payload["results"].as_array().cloned().unwrap_or_default();
        Ok(results
            .iter()
            .take(count)
            .map(|item| SearchHit {
                title: item["title"].as_str().unwrap_or_default().to_string(),
                url: item["url"].as_str().unwrap_or_default().to_string(),
                snippet: item["content"]
                    .as_str()
                    .or_else(|| item["snippet"].as_str())
                    .unwrap_or_default()
                    .to_string(),
            })
            .collect())
    }

    async fn search_serper(
        &self,
        base_url: &str,
        api_key: &str,
        query: &str,
        count: usize,
    ) -> anyhow::Result<Vec<SearchHit>> {
        let response = self
            .client
            .post(base_url)
            .json(&json!({"q": query, "num": count}))
            .header("X-API-KEY", api_key)
            .send()
            .await?
            .error_for_status()?;
        let payload: Value = response.json().await?;

        let results = payload["organic"].as_array().cloned().unwrap_or_default();
        Ok(results
            .iter()
            .take(count)
            .map(|item| SearchHit {
                title: item["title"].as_str().unwrap_or_default().to_string(),
                url: item["link"].as_str().unwrap_or_default().to_string(),
                snippet: item["snippet"].as_str().unwrap_or_default().to_string(),
            })
            .collect())
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for current information. count: 1-10 (default 5).\n\
         Cite sources after answering."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "Search query"},
                "count": {
                    "type": "integer",
                    "description": "Number of results (default 5, max 10)"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value) -> String {
        let query = args["query"].as_str().unwrap_or_default();
        if query.trim().is_empty() {
            return "Error: query must not be empty".to_string();
        }
        let count = args["count"].as_u64().unwrap_or(5).clamp(1, 10) as usize;

        debug!(query, count, provider = %self.config.provider, "web_search");

        match self.search(query, count).await {
            Ok(hits) if hits.is_empty() => "(no results)".to_string(),
            Ok(hits) => hits
                .iter()
                .enumerate()
                .map(|(i, hit)| {
                    format!("{}. **{}**\n   {}\n   {}", i + 1, hit.title, hit.url, hit.snippet)
                })
                .collect::<Vec<_>>()
                .join("\n\n"),
            Err(message) => message,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use freja_config::SearchProvidersConfig;

    use super::*;

    fn config(provider: &str) -> WebSearchConfig {
        WebSearchConfig {
            provider: provider.to_string(),
            providers: SearchProvidersConfig::default(),
        }
    }

    #[tokio::test]
    async fn unknown_provider_is_reported() {
        let tool = WebSearchTool::new(config("altavista"));
        let out = tool.execute(json!({"query": "rust"})).await;
        assert_eq!(out, "Error: unknown search provider: altavista");
    }

    #[tokio::test]
    async fn missing_api_key_is_reported_with_config_hint() {
        std::env::remove_var("TAVILY_API_KEY");
        let tool = WebSearchTool::new(config("tavily"));
        let out = tool.execute(json!({"query": "rust"})).await;
        assert!(out.contains("tavily api key not configured"), "{out}");
        assert!(out.contains("tools.web.search.providers.tavily.apiKey"), "{out}");
        assert!(out.contains("TAVILY_API_KEY"), "{out}");
    }

    #[tokio::test]
    async fn http_failure_is_wrapped() {
        let mut cfg = config("serper");
        cfg.providers.serper.api_key = Some("key".to_string());
        // Unroutable endpoint: the request itself fails.
        cfg.providers.serper.base_url = Some("http://127.0.0.1:1/search".to_string());
        let tool = WebSearchTool::new(cfg);
        let out = tool.execute(json!({"query": "rust"})).await;
        assert!(out.starts_with("Error: serper search failed:"), "{out}");
    }

    #[tokio::test]
    async fn empty_query_is_rejected() {
        let tool = WebSearchTool::new(config("brave"));
        let out = tool.execute(json!({"query": "  "})).await;
        assert!(out.starts_with("Error:"));
    }

    #[test]
    fn schema_requires_query() {
        let tool = WebSearchTool::new(config("brave"));
        let schema = tool.parameters();
        let required = schema["required"].as_array().unwrap();
        assert!(required.iter().any(|v| v.as_str() == Some("query")));
    }
}
