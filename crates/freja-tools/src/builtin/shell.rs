// Copyright (c) 2025-2026 The Freja Authors
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::debug;

use crate::builtin::fs::resolve_path;
use crate::tool::Tool;

/// Byte ceiling for combined stdout + stderr surfaced to the model.
const OUTPUT_LIMIT_BYTES: usize = 10_000;

/// Run a single shell command with a configured timeout and working
/// directory.  With workspace restriction on, the working directory must
/// stay inside the workspace.
pub struct ExecTool {
    workspace: PathBuf,
    timeout_secs: u64,
    restrict: bool,
}

impl ExecTool {
    pub fn new(workspace: impl Into<PathBuf>, timeout_secs: u64, restrict: bool) -> Self {
        Self { workspace: workspace.into(), timeout_secs, restrict }
    }
}

#[async_trait]
impl Tool for ExecTool {
    fn name(&self) -> &str {
        "exec"
    }

    fn description(&self) -> &str {
        "Execute a shell command and return stdout + stderr.\n\
         Runs non-interactively with a timeout; the working directory\n\
         defaults to the workspace root."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                },
                "working_dir": {
                    "type": "string",
                    "description": "Working directory (optional, defaults to workspace)"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, args: Value) -> String {
        let command = args["command"].as_str().unwrap_or_default();
        if command.trim().is_empty() {
            return "Error: command must not be empty".to_string();
        }

        let cwd = match args["working_dir"].as_str() {
            Some(dir) if !dir.trim().is_empty() => {
                match resolve_path(&self.workspace, dir, self.restrict) {
                    Ok(p) => p,
                    Err(e) => return e,
                }
            }
            _ => self.workspace.clone(),
        };

        debug!(cmd = command, cwd = %cwd.display(), "exec tool");

        let mut cmd = Command::new("bash");
        cmd.arg("-c")
            .arg(command)
            .current_dir(&cwd)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(self.timeout_secs),
            cmd.output(),
        )
        .await;

        match result {
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let stderr = String::from_utf8_lossy(&output.stderr);
                let mut content = String::new();
                if !stdout.is_empty() {
                    content.push_str(&stdout);
                }
                if !stderr.is_empty() {
                    if !content.is_empty() {
                        content.push('\n');
                    }
                    content.push_str("[stderr]\n");
                    content.push_str(&stderr);
                }

                let code = output.status.code().unwrap_or(-1);
                if content.is_empty() {
                    content = format!("[exit {code}]");
                } else if code != 0 {
                    content = format!("[exit {code}]\n{content}");
                }
                truncate_output(&content)
            }
            Ok(Err(e)) => format!("Error: failed to spawn command: {e}"),
            Err(_) => format!("Error: command timed out after {}s", self.timeout_secs),
        }
    }
}

fn truncate_output(s: &str) -> String {
    if s.len() <= OUTPUT_LIMIT_BYTES {
        return s.to_string();
    }
    let mut cut = OUTPUT_LIMIT_BYTES;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}\n... (truncated, {} more bytes)", &s[..cut], s.len() - cut)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
