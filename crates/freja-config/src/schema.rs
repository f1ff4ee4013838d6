// Copyright (c) 2025-2026 The Freja Authors
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Serde default helper — returns `true`.
///
/// `#[serde(default)]` on a `bool` always falls back to `false`, so fields
/// that should be enabled unless explicitly disabled need a named function.
fn default_true() -> bool {
    true
}

fn default_max_iterations() -> usize {
    40
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_memory_window() -> usize {
    50
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Workspace root for sessions, memory, cron store, and artifacts.
    /// Defaults to `~/.freja/workspace` when unset.
    pub workspace_path: Option<String>,
    /// Model name forwarded to the provider on every chat call.
    pub model: Option<String>,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Number of session entries kept in the LLM context window; exceeding
    /// it triggers memory consolidation.
    #[serde(default = "default_memory_window")]
    pub memory_window: usize,
    pub provider: ProviderConfig,
    pub security: SecurityConfig,
    pub tools: ToolsConfig,
    pub channels: ChannelsConfig,
    pub heartbeat: HeartbeatConfig,
    /// External MCP servers whose tools are registered for the scoped
    /// lifetime of the runtime.
    pub mcp_servers: HashMap<String, McpServerConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace_path: None,
            model: None,
            max_iterations: default_max_iterations(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            memory_window: default_memory_window(),
            provider: ProviderConfig::default(),
            security: SecurityConfig::default(),
            tools: ToolsConfig::default(),
            channels: ChannelsConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            mcp_servers: HashMap::new(),
        }
    }
}

impl Config {
    /// Resolved workspace root (config value or `~/.freja/workspace`).
    pub fn workspace(&self) -> PathBuf {
        match &self.workspace_path {
            Some(p) if !p.trim().is_empty() => PathBuf::from(p),
            _ => dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".freja")
                .join("workspace"),
        }
    }
}

/// LLM endpoint credentials.  Both values are registered with the redactor
/// as literal secrets at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    pub api_base: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SecurityConfig {
    #[serde(default = "default_true")]
    pub redact_sensitive_output: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self { redact_sensitive_output: true }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolsConfig {
    /// When set, filesystem / shell / codex working dirs are confined to the
    /// workspace root.
    pub restrict_to_workspace: bool,
    pub exec: ExecToolConfig,
    pub codex: CodexToolConfig,
    pub web: WebToolsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecToolConfig {
    /// Shell command timeout in seconds.
    pub timeout: u64,
}

impl Default for ExecToolConfig {
    fn default() -> Self {
        Self { timeout: 60 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CodexToolConfig {
    pub enabled: bool,
    /// Codex CLI binary name or path.
    pub command: String,
    /// Sandbox used when the model does not ask for one.
    pub default_sandbox: String,
    /// Global gate for `danger-full-access`.  When on, every codex run is
    /// forced to full access and the sandbox flag is replaced by
    /// `--dangerously-bypass-approvals-and-sandbox`.
    pub allow_dangerous_full_access: bool,
    pub allow_workspace_write: bool,
    /// Subprocess timeout in seconds.
    pub timeout: u64,
    /// Truncation limit for codex output surfaced to the model.
    pub max_output_chars: usize,
}

impl Default for CodexToolConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            command: "codex".to_string(),
            default_sandbox: "read-only".to_string(),
            allow_dangerous_full_access: false,
            allow_workspace_write: false,
            timeout: 600,
            max_output_chars: 10_000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebToolsConfig {
    pub search: WebSearchConfig,
    pub browser: BrowserToolConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebSearchConfig {
    /// Active provider: "brave" | "tavily" | "serper".
    pub provider: String,
    pub providers: SearchProvidersConfig,
}

impl Default for WebSearchConfig {
    fn default() -> Self {
        Self { provider: "brave".to_string(), providers: SearchProvidersConfig::default() }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchProvidersConfig {
    pub brave: SearchProviderConfig,
    pub tavily: SearchProviderConfig,
    pub serper: SearchProviderConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchProviderConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BrowserToolConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// "chromium" | "firefox".
    pub default_browser: String,
    #[serde(default = "default_true")]
    pub headless: bool,
    /// Default per-action timeout in milliseconds.
    pub timeout_ms: u64,
    pub max_actions: usize,
    pub max_extract_chars: usize,
    /// Storage-state directory, relative to workspace.
    pub state_dir: String,
    /// Screenshot/artifact directory, relative to workspace.
    pub artifacts_dir: String,
    pub allow_private_network: bool,
    #[serde(default = "default_true")]
    pub block_file_scheme: bool,
    #[serde(default = "default_true")]
    pub auto_install_browsers: bool,
}

impl Default for BrowserToolConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_browser: "chromium".to_string(),
            headless: true,
            timeout_ms: 15_000,
            max_actions: 12,
            max_extract_chars: 20_000,
            state_dir: "browser_state".to_string(),
            artifacts_dir: "screenshots".to_string(),
            allow_private_network: false,
            block_file_scheme: true,
            auto_install_browsers: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChannelsConfig {
    /// Forward interim narration to the originating channel while a turn is
    /// still running.
    #[serde(default = "default_true")]
    pub send_progress: bool,
    /// Include compact tool hints such as `web_search("query")` in progress.
    #[serde(default = "default_true")]
    pub send_tool_hints: bool,
    /// Channel adapters keep their credentials here; the runtime itself only
    /// looks at `enabled`.
    pub telegram: ChannelCredentials,
    pub feishu: ChannelCredentials,
    pub slack: ChannelCredentials,
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            send_progress: true,
            send_tool_hints: true,
            telegram: ChannelCredentials::default(),
            feishu: ChannelCredentials::default(),
            slack: ChannelCredentials::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChannelCredentials {
    pub enabled: bool,
    pub token: Option<String>,
    pub app_id: Option<String>,
    pub app_secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HeartbeatConfig {
    pub enabled: bool,
    pub interval_minutes: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self { enabled: false, interval_minutes: 30 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct McpServerConfig {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn browser_defaults_match_documented_values() {
        let browser = Config::default().tools.web.browser;
        assert!(browser.enabled);
        assert_eq!(browser.default_browser, "chromium");
        assert!(browser.headless);
        assert_eq!(browser.timeout_ms, 15_000);
        assert_eq!(browser.max_actions, 12);
        assert_eq!(browser.max_extract_chars, 20_000);
    }

    #[test]
    fn redaction_is_on_by_default() {
        assert!(Config::default().security.redact_sensitive_output);
    }

    #[test]
    fn codex_is_disabled_by_default() {
        let codex = Config::default().tools.codex;
        assert!(!codex.enabled);
        assert!(!codex.allow_dangerous_full_access);
        assert!(!codex.allow_workspace_write);
        assert_eq!(codex.default_sandbox, "read-only");
    }

    #[test]
    fn camel_case_round_trip_preserves_nested_fields() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"restrictToWorkspace\""));
        assert!(json.contains("\"defaultBrowser\""));
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.tools.web.browser.state_dir, config.tools.web.browser.state_dir);
        assert_eq!(back.max_iterations, config.max_iterations);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let config: Config =
            serde_json::from_str(r#"{"model":"gpt-x","someFutureKey":{"a":1}}"#).unwrap();
        assert_eq!(config.model.as_deref(), Some("gpt-x"));
    }

    #[test]
    fn workspace_falls_back_to_home() {
        let config = Config::default();
        let ws = config.workspace();
        assert!(ws.ends_with("workspace"));
    }

    #[test]
    fn explicit_workspace_path_wins() {
        let config = Config {
            workspace_path: Some("/srv/agent".to_string()),
            ..Config::default()
        };
        assert_eq!(config.workspace(), PathBuf::from("/srv/agent"));
    }
}
