// Copyright (c) 2025-2026 The Freja Authors
//
// SPDX-License-Identifier: MIT
//! MCP integration: connect to configured external servers, register their
//! tools into the shared registry for a scoped lifetime, and tear the
//! registrations down again on close.
//!
//! Registration discipline: tools exist in the registry only while the
//! [`McpScope`] is alive; `close()` unregisters every name and cancels the
//! client services with best-effort error suppression.  Connect failures
//! are logged and skipped; a dead MCP server never blocks startup.

use std::collections::HashMap;
use std::sync::Arc;

use std::borrow::Cow;

use async_trait::async_trait;
use rmcp::model::CallToolRequestParams;
use rmcp::service::{RoleClient, RunningService};
use rmcp::transport::TokioChildProcess;
use rmcp::ServiceExt;
use serde_json::Value;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{info, warn};

use freja_config::McpServerConfig;
use freja_tools::{Tool, ToolRegistry};

/// A tool proxied from an MCP server, registered as `{server}_{tool}`.
struct McpProxyTool {
    name: String,
    description: String,
    parameters: Value,
    remote_name: String,
    peer: rmcp::service::Peer<RoleClient>,
}

#[async_trait]
impl Tool for McpProxyTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Value {
        self.parameters.clone()
    }

    async fn execute(&self, args: Value) -> String {
        let arguments = args.as_object().cloned();
        let result = self
            .peer
            .call_tool(CallToolRequestParams {
                meta: None,
                name: Cow::Owned(self.remote_name.clone()),
                arguments,
                task: None,
            })
            .await;

        match result {
            Ok(outcome) => {
                let text: Vec<String> = outcome
                    .content
                    .iter()
                    .filter_map(|c| c.as_text().map(|t| t.text.clone()))
                    .collect();
                let joined = text.join("\n");
                if outcome.is_error.unwrap_or(false) {
                    format!("Error: {joined}")
                } else if joined.is_empty() {
                    "(no content)".to_string()
                } else {
                    joined
                }
            }
            Err(e) => format!("Error: MCP call failed: {e}"),
        }
    }
}

/// Holds the running client services and the registered tool names until
/// the scope is closed.
pub struct McpScope {
    registry: Arc<ToolRegistry>,
    registered: Vec<String>,
    services: Vec<RunningService<RoleClient, ()>>,
}

impl McpScope {
    pub fn registered_tools(&self) -> &[String] {
        &self.registered
    }

    /// Unregister every scoped tool and cancel the client services.
    /// Teardown errors are logged and swallowed.
    pub async fn close(self) {
        for name in &self.registered {
            self.registry.unregister(name);
        }
        for service in self.services {
            if let Err(e) = service.cancel().await {
                warn!(error = %e, "MCP service shutdown failed");
            }
        }
    }
}

/// Lazy, idempotent connector: the first `connect` call spawns the
/// configured servers and returns the scope; later calls are no-ops.
pub struct McpConnector {
    servers: HashMap<String, McpServerConfig>,
    connected: Mutex<bool>,
}

impl McpConnector {
    pub fn new(servers: HashMap<String, McpServerConfig>) -> Self {
        Self { servers, connected: Mutex::new(false) }
    }

    pub async fn connect(&self, registry: Arc<ToolRegistry>) -> Option<McpScope> {
        let mut connected = self.connected.lock().await;
        if *connected || self.servers.is_empty() {
            return None;
        }
        *connected = true;

        let mut scope = McpScope {
            registry: Arc::clone(&registry),
            registered: Vec::new(),
            services: Vec::new(),
        };

        for (server_name, config) in &self.servers {
            match connect_one(server_name, config, &registry).await {
                Ok((service, names)) => {
                    info!(server = %server_name, tools = names.len(), "MCP server connected");
                    scope.registered.extend(names);
                    scope.services.push(service);
                }
                Err(e) => {
                    warn!(server = %server_name, error = %e, "MCP connect failed; skipping");
                }
            }
        }
        Some(scope)
    }
}

async fn connect_one(
    server_name: &str,
    config: &McpServerConfig,
    registry: &Arc<ToolRegistry>,
) -> anyhow::Result<(RunningService<RoleClient, ()>, Vec<String>)> {
    let mut cmd = Command::new(&config.command);
    cmd.args(&config.args);
    for (key, value) in &config.env {
        cmd.env(key, value);
    }

    let transport = TokioChildProcess::new(cmd)?;
    let service = ().serve(transport).await?;
    let peer = service.peer().clone();

    let listed = service.list_all_tools().await?;
    let mut registered = Vec::new();
    for tool in listed {
        let remote_name = tool.name.to_string();
        let local_name = format!("{server_name}_{remote_name}");
        let proxy = McpProxyTool {
            name: local_name.clone(),
            description: tool
                .description
                .as_deref()
                .map(str::to_string)
                .unwrap_or_else(|| format!("MCP tool {remote_name} from {server_name}")),
            parameters: Value::Object((*tool.input_schema).clone()),
            remote_name,
            peer: peer.clone(),
        };
        registry.register(proxy);
        registered.push(local_name);
    }

    Ok((service, registered))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
