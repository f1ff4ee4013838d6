// Copyright (c) 2025-2026 The Freja Authors
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;
use std::sync::Arc;

use tracing::warn;

use freja_cron::CronService;

use crate::builtin::{
    BrowserRunTool, CodexMergeTool, CodexRunTool, CronTool, EditFileTool, ExecTool, ListDirTool,
    MessageTool, ReadFileTool, SpawnTool, TodoTool, WebFetchTool, WebSearchTool, WriteFileTool,
};
use crate::registry::ToolRegistry;
use crate::tool::{OutboundSink, SpawnHandler};

/// Everything the tool factories need, bundled so the main agent and
/// subagent registries are guaranteed to share one configuration.
#[derive(Clone)]
pub struct ToolFactoryDeps {
    pub workspace: PathBuf,
    pub restrict_to_workspace: bool,
    pub exec_config: freja_config::ExecToolConfig,
    pub codex_config: freja_config::CodexToolConfig,
    pub web_search_config: freja_config::WebSearchConfig,
    pub browser_config: freja_config::BrowserToolConfig,
}

impl ToolFactoryDeps {
    pub fn from_config(config: &freja_config::Config) -> Self {
        Self {
            workspace: config.workspace(),
            restrict_to_workspace: config.tools.restrict_to_workspace,
            exec_config: config.tools.exec.clone(),
            codex_config: config.tools.codex.clone(),
            web_search_config: config.tools.web.search.clone(),
            browser_config: config.tools.web.browser.clone(),
        }
    }
}

fn register_common_tools(registry: &ToolRegistry, deps: &ToolFactoryDeps) {
    let workspace = &deps.workspace;
    let restrict = deps.restrict_to_workspace;

    registry.register(ReadFileTool::new(workspace, restrict));
    registry.register(WriteFileTool::new(workspace, restrict));
    registry.register(EditFileTool::new(workspace, restrict));
    registry.register(ListDirTool::new(workspace, restrict));
    registry.register(ExecTool::new(workspace, deps.exec_config.timeout, restrict));

    if deps.codex_config.enabled {
        registry.register(CodexRunTool::new(workspace, deps.codex_config.clone(), restrict));
        registry.register(CodexMergeTool::new(workspace, deps.codex_config.clone(), restrict));
    }

    registry.register(WebSearchTool::new(deps.web_search_config.clone()));
    registry.register(WebFetchTool::new());

    if deps.browser_config.enabled {
        match BrowserRunTool::new(workspace, deps.browser_config.clone()) {
            Ok(tool) => registry.register(tool),
            Err(e) => warn!(error = %e, "browser tool unavailable"),
        }
    }

    registry.register(TodoTool::new(workspace));
}

/// The main-agent registry plus direct handles to the context-bound tools.
///
/// The agent loop injects `(channel, chat_id)` into these before every turn
/// and reads the message tool's sent-in-turn flag afterwards, so it needs
/// the concrete types, not just the trait objects in the registry.
pub struct MainAgentTools {
    pub registry: Arc<ToolRegistry>,
    pub message: Arc<MessageTool>,
    pub spawn: Arc<SpawnTool>,
    pub cron: Option<Arc<CronTool>>,
}

impl MainAgentTools {
    /// Point the context-bound tools at the conversation being processed.
    /// `message_id` (when the channel supplied one) threads replies.
    pub fn set_context(&self, channel: &str, chat_id: &str, message_id: Option<&str>) {
        self.message.set_context(channel, chat_id, message_id);
        self.spawn.set_context(channel, chat_id);
        if let Some(cron) = &self.cron {
            cron.set_context(channel, chat_id);
        }
    }
}

/// Registry for the main agent loop: the common set plus `message`,
/// `spawn`, and (when scheduling is available) `cron`.
pub fn build_main_agent_tools(
    deps: &ToolFactoryDeps,
    outbound: Arc<dyn OutboundSink>,
    spawner: Arc<dyn SpawnHandler>,
    cron: Option<Arc<CronService>>,
) -> MainAgentTools {
    let registry = Arc::new(ToolRegistry::new());
    register_common_tools(&registry, deps);

    let message = Arc::new(MessageTool::new(outbound));
    registry.register_arc(message.clone());
    let spawn = Arc::new(SpawnTool::new(spawner));
    registry.register_arc(spawn.clone());
    let cron = cron.map(|service| {
        let tool = Arc::new(CronTool::new(service));
        registry.register_arc(tool.clone());
        tool
    });

    MainAgentTools { registry, message, spawn, cron }
}

/// Registry for subagent runs: the common set only. No outbound messaging,
/// no further fan-out, no scheduling.
pub fn build_subagent_tools(deps: &ToolFactoryDeps) -> ToolRegistry {
    let registry = ToolRegistry::new();
    register_common_tools(&registry, deps);
    registry
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use freja_bus::OutboundMessage;

    use super::*;

    struct NullSink;

    #[async_trait]
    impl OutboundSink for NullSink {
        async fn send(&self, _msg: OutboundMessage) {}
    }

    struct NullSpawner;

    #[async_trait]
    impl SpawnHandler for NullSpawner {
        async fn spawn(&self, task_id: &str, _i: &str, _g: &str, _c: &str, _t: &str) -> String {
            format!("Subagent {task_id} started")
        }
    }

    fn deps(dir: &tempfile::TempDir) -> ToolFactoryDeps {
        ToolFactoryDeps {
            workspace: dir.path().to_path_buf(),
            restrict_to_workspace: true,
            exec_config: freja_config::ExecToolConfig::default(),
            codex_config: freja_config::CodexToolConfig::default(),
            web_search_config: freja_config::WebSearchConfig::default(),
            browser_config: freja_config::BrowserToolConfig::default(),
        }
    }

    #[test]
    fn main_registry_has_message_spawn_and_cron() {
        let dir = tempfile::tempdir().unwrap();
        let cron = Arc::new(CronService::new(dir.path().join("cron/jobs.json")));
        let tools = build_main_agent_tools(
            &deps(&dir),
            Arc::new(NullSink),
            Arc::new(NullSpawner),
            Some(cron),
        );
        let names = tools.registry.names();
        for name in ["message", "spawn", "cron", "read_file", "exec", "web_search", "todo"] {
            assert!(names.contains(&name.to_string()), "missing {name}: {names:?}");
        }
        assert!(tools.cron.is_some());
    }

    #[test]
    fn main_tools_without_cron_service_skip_cron_tool() {
        let dir = tempfile::tempdir().unwrap();
        let tools =
            build_main_agent_tools(&deps(&dir), Arc::new(NullSink), Arc::new(NullSpawner), None);
        assert!(!tools.registry.names().contains(&"cron".to_string()));
        assert!(tools.cron.is_none());
    }

    #[test]
    fn subagent_registry_omits_message_spawn_cron() {
        let dir = tempfile::tempdir().unwrap();
        let registry = build_subagent_tools(&deps(&dir));
        let names = registry.names();
        for name in ["message", "spawn", "cron"] {
            assert!(!names.contains(&name.to_string()), "{name} must be absent");
        }
        assert!(names.contains(&"read_file".to_string()));
        assert!(names.contains(&"browser_run".to_string()));
    }

    #[test]
    fn codex_tools_register_only_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let mut d = deps(&dir);
        assert!(!build_subagent_tools(&d).names().contains(&"codex_run".to_string()));

        d.codex_config.enabled = true;
        let names = build_subagent_tools(&d).names();
        assert!(names.contains(&"codex_run".to_string()));
        assert!(names.contains(&"codex_merge".to_string()));
    }

    #[test]
    fn browser_tool_respects_enabled_flag() {
        let dir = tempfile::tempdir().unwrap();
        let mut d = deps(&dir);
        d.browser_config.enabled = false;
        assert!(!build_subagent_tools(&d).names().contains(&"browser_run".to_string()));
    }
}
