// Copyright (c) 2025-2026 The Freja Authors
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::process::Command;
use tracing::debug;

use freja_config::CodexToolConfig;

pub const MODES: [&str; 2] = ["exec", "review"];
pub const SANDBOXES: [&str; 3] = ["read-only", "workspace-write", "danger-full-access"];

/// One non-interactive codex invocation.
#[derive(Debug, Clone, Default)]
pub struct CodexRequest {
    pub prompt: String,
    pub mode: String,
    pub working_dir: Option<String>,
    pub sandbox: Option<String>,
    pub model: Option<String>,
    pub timeout_sec: Option<u64>,
}

/// Seam used by the merge tool so tests can script codex outcomes.
#[async_trait]
pub trait CodexRunner: Send + Sync {
    /// Returns the normalized payload: `{ok: true, message, thread_id,
    /// usage, …}` or `{ok: false, error: {code, message}, …}`.
    async fn run(&self, request: CodexRequest) -> Value;
}

/// Executes the codex CLI in JSON-stream mode and normalizes its output.
pub struct CodexClient {
    workspace: PathBuf,
    config: CodexToolConfig,
    restrict_to_workspace: bool,
}

impl CodexClient {
    pub fn new(workspace: &Path, config: CodexToolConfig, restrict_to_workspace: bool) -> Self {
        Self { workspace: workspace.to_path_buf(), config, restrict_to_workspace }
    }

    fn resolve_working_dir(&self, working_dir: Option<&str>) -> Result<PathBuf, Value> {
        let Some(raw) = working_dir.map(str::trim).filter(|s| !s.is_empty()) else {
            return Ok(self.workspace.clone());
        };

        let candidate = PathBuf::from(raw);
        let path = if candidate.is_absolute() {
            candidate
        } else {
            self.workspace.join(candidate)
        };

        if self.restrict_to_workspace && path != self.workspace && !path.starts_with(&self.workspace)
        {
            return Err(error_payload(
                "invalid_working_dir",
                &format!(
                    "working_dir {} is outside workspace {}",
                    path.display(),
                    self.workspace.display()
                ),
            ));
        }
        if !path.is_dir() {
            return Err(error_payload(
                "invalid_working_dir",
                &format!("working_dir does not exist: {}", path.display()),
            ));
        }
        Ok(path)
    }

    fn resolve_command(&self) -> Option<String> {
        let command = self.config.command.trim();
        if command.is_empty() {
            return None;
        }
        // A bare name is resolved through PATH; an explicit path must exist.
        if command.contains(std::path::MAIN_SEPARATOR) {
            let path = PathBuf::from(command);
            return path.exists().then(|| command.to_string());
        }
        let path_var = std::env::var_os("PATH")?;
        std::env::split_paths(&path_var)
            .map(|dir| dir.join(command))
            .find(|candidate| candidate.is_file())
            .map(|p| p.to_string_lossy().into_owned())
    }

    fn build_args(
        &self,
        mode: &str,
        prompt: &str,
        sandbox: &str,
        full_access: bool,
        cwd: &Path,
        model: Option<&str>,
    ) -> Vec<String> {
        let mut args = vec!["exec".to_string()];
        if mode == "review" {
            args.push("review".to_string());
        }
        args.push("--json".to_string());
        args.push("-c".to_string());
        args.push("approval_policy=\"never\"".to_string());

        if full_access {
            args.push("--dangerously-bypass-approvals-and-sandbox".to_string());
        } else {
            args.push("--sandbox".to_string());
            args.push(sandbox.to_string());
        }

        args.push("-C".to_string());
        args.push(cwd.to_string_lossy().into_owned());
        if mode == "exec" {
            args.push("--skip-git-repo-check".to_string());
        }
        if let Some(model) = model {
            args.push("-m".to_string());
            args.push(model.to_string());
        }
        args.push(prompt.to_string());
        args
    }

    fn truncate(&self, text: &str) -> (String, bool) {
        let limit = self.config.max_output_chars.max(1);
        if text.chars().count() <= limit {
            return (text.to_string(), false);
        }
        (text.chars().take(limit).collect(), true)
    }
}

#[async_trait]
impl CodexRunner for CodexClient {
    async fn run(&self, request: CodexRequest) -> Value {
        let mode = request.mode.trim().to_lowercase();
        let mode = if mode.is_empty() { "exec".to_string() } else { mode };
        if !MODES.contains(&mode.as_str()) {
            return error_payload("invalid_mode", &format!("mode must be one of {MODES:?}"));
        }

        let prompt = request.prompt.trim();
        if prompt.is_empty() {
            return error_payload("invalid_prompt", "prompt must not be empty");
        }

        let cwd = match self.resolve_working_dir(request.working_dir.as_deref()) {
            Ok(p) => p,
            Err(payload) => return payload,
        };

        let requested_sandbox = request
            .sandbox
            .as_deref()
            .unwrap_or(&self.config.default_sandbox)
            .trim()
            .to_lowercase();
        if !SANDBOXES.contains(&requested_sandbox.as_str()) {
            return error_payload(
                "invalid_sandbox",
                &format!("sandbox must be one of {SANDBOXES:?}"),
            );
        }

        // When the global allow flag is on, every run is forced to full
        // access and the sandbox flag is replaced entirely.
        let full_access = self.config.allow_dangerous_full_access;
        let effective_sandbox = if full_access {
            "danger-full-access".to_string()
        } else {
            requested_sandbox.clone()
        };

        if requested_sandbox == "danger-full-access" && !full_access {
            return error_payload(
                "dangerous_full_access_not_allowed",
                "danger-full-access requires tools.codex.allowDangerousFullAccess=true",
            );
        }
        if effective_sandbox == "workspace-write" && !self.config.allow_workspace_write {
            return error_payload(
                "workspace_write_not_allowed",
                "workspace-write sandbox is disabled by tools.codex.allowWorkspaceWrite",
            );
        }

        let timeout = request.timeout_sec.unwrap_or(self.config.timeout);
        if timeout == 0 {
            return error_payload("invalid_timeout", "timeout_sec must be >= 1");
        }

        let Some(command) = self.resolve_command() else {
            return error_payload(
                "command_not_found",
                &format!("Codex command not found: {}", self.config.command),
            );
        };

        let args = self.build_args(
            &mode,
            prompt,
            &effective_sandbox,
            full_access,
            &cwd,
            request.model.as_deref(),
        );
        debug!(command = %command, mode = %mode, sandbox = %effective_sandbox, "codex run");

        let mut cmd = Command::new(&command);
        cmd.args(&args)
            .current_dir(&cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let spawned = match cmd.spawn() {
            Ok(child) => child,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return error_payload(
                    "command_not_found",
                    &format!("Codex command not found: {}", self.config.command),
                );
            }
            Err(e) => return error_payload("spawn_failed", &e.to_string()),
        };

        let output = match tokio::time::timeout(
            std::time::Duration::from_secs(timeout),
            spawned.wait_with_output(),
        )
        .await
        {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return error_payload("spawn_failed", &e.to_string()),
            Err(_) => {
                return error_payload(
                    "timeout",
                    &format!("codex run timed out after {timeout} seconds"),
                );
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let parsed = parse_jsonl(&stdout);

        let (message, message_truncated) = self.truncate(parsed.message.as_deref().unwrap_or(""));
        let (stderr_text, stderr_truncated) = self.truncate(&stderr);

        let exit_code = output.status.code().unwrap_or(-1);
        if exit_code != 0 {
            let detail = if !message.is_empty() {
                message
            } else if !stderr_text.is_empty() {
                stderr_text.clone()
            } else {
                format!("Codex exited with code {exit_code}")
            };
            let mut payload = error_payload("codex_failed", &detail);
            payload["exit_code"] = json!(exit_code);
            attach_parse_extras(&mut payload, &parsed, &stderr_text, stderr_truncated);
            return payload;
        }

        if message.is_empty() {
            let detail = if parsed.parse_errors > 0 {
                "Failed to parse Codex JSON output"
            } else {
                "No final agent_message found in Codex output"
            };
            let mut payload = error_payload("invalid_output", detail);
            attach_parse_extras(&mut payload, &parsed, &stderr_text, stderr_truncated);
            return payload;
        }

        let mut payload = json!({
            "ok": true,
            "mode": mode,
            "sandbox": effective_sandbox,
            "thread_id": parsed.thread_id,
            "message": message,
            "usage": parsed.usage.clone().unwrap_or_default(),
            "message_truncated": message_truncated,
        });
        if !stderr_text.is_empty() {
            payload["stderr"] = json!(stderr_text);
            payload["stderr_truncated"] = json!(stderr_truncated);
        }
        payload
    }
}

struct ParsedStream {
    thread_id: Option<String>,
    message: Option<String>,
    usage: Option<Map<String, Value>>,
    parse_errors: usize,
}

/// Parse the codex `--json` event stream: one JSON event per line.
///
/// Events of interest: `thread.started` (thread id), `item.completed` with
/// an `agent_message` item (final text; the last one wins), and
/// `turn.completed` (usage).
fn parse_jsonl(text: &str) -> ParsedStream {
    let mut parsed = ParsedStream {
        thread_id: None,
        message: None,
        usage: None,
        parse_errors: 0,
    };

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(event) = serde_json::from_str::<Value>(line) else {
            parsed.parse_errors += 1;
            continue;
        };

        match event["type"].as_str() {
            Some("thread.started") => {
                if let Some(id) = event["thread_id"].as_str() {
                    parsed.thread_id = Some(id.to_string());
                }
            }
            Some("item.completed") => {
                let item = &event["item"];
                if item["type"].as_str() == Some("agent_message") {
                    if let Some(text) = item["text"].as_str() {
                        parsed.message = Some(text.to_string());
                    }
                }
            }
            Some("turn.completed") => {
                if let Some(usage) = event["usage"].as_object() {
                    parsed.usage = Some(usage.clone());
                }
            }
            _ => {}
        }
    }
    parsed
}

fn attach_parse_extras(
    payload: &mut Value,
    parsed: &ParsedStream,
    stderr_text: &str,
    stderr_truncated: bool,
) {
    if let Some(thread_id) = &parsed.thread_id {
        payload["thread_id"] = json!(thread_id);
    }
    if let Some(usage) = &parsed.usage {
        payload["usage"] = json!(usage);
    }
    if !stderr_text.is_empty() {
        payload["stderr"] = json!(stderr_text);
        payload["stderr_truncated"] = json!(stderr_truncated);
    }
}

pub(crate) fn error_payload(code: &str, message: &str) -> Value {
    json!({
        "ok": false,
        "error": {"code": code, "message": message},
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn client(config: CodexToolConfig, dir: &tempfile::TempDir, restrict: bool) -> CodexClient {
        CodexClient::new(dir.path(), config, restrict)
    }

    fn base_config() -> CodexToolConfig {
        CodexToolConfig { enabled: true, ..CodexToolConfig::default() }
    }

    #[tokio::test]
    async fn rejects_invalid_mode() {
        let dir = tempfile::tempdir().unwrap();
        let c = client(base_config(), &dir, false);
        let out = c
            .run(CodexRequest { prompt: "x".into(), mode: "chat".into(), ..Default::default() })
            .await;
        assert_eq!(out["error"]["code"], "invalid_mode");
    }

    #[tokio::test]
    async fn rejects_empty_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let c = client(base_config(), &dir, false);
        let out = c
            .run(CodexRequest { prompt: "  ".into(), mode: "exec".into(), ..Default::default() })
            .await;
        assert_eq!(out["error"]["code"], "invalid_prompt");
    }

    #[tokio::test]
    async fn rejects_dangerous_sandbox_without_allow_flag() {
        let dir = tempfile::tempdir().unwrap();
        let c = client(base_config(), &dir, false);
        let out = c
            .run(CodexRequest {
                prompt: "x".into(),
                mode: "exec".into(),
                sandbox: Some("danger-full-access".into()),
                ..Default::default()
            })
            .await;
        assert_eq!(out["error"]["code"], "dangerous_full_access_not_allowed");
    }

    #[tokio::test]
    async fn rejects_workspace_write_without_allow_flag() {
        let dir = tempfile::tempdir().unwrap();
        let c = client(base_config(), &dir, false);
        let out = c
            .run(CodexRequest {
                prompt: "x".into(),
                mode: "exec".into(),
                sandbox: Some("workspace-write".into()),
                ..Default::default()
            })
            .await;
        assert_eq!(out["error"]["code"], "workspace_write_not_allowed");
    }

    #[tokio::test]
    async fn rejects_working_dir_outside_workspace_when_restricted() {
        let dir = tempfile::tempdir().unwrap();
        let c = client(base_config(), &dir, true);
        let out = c
            .run(CodexRequest {
                prompt: "x".into(),
                mode: "exec".into(),
                working_dir: Some("/tmp".into()),
                ..Default::default()
            })
            .await;
        assert_eq!(out["error"]["code"], "invalid_working_dir");
    }

    #[tokio::test]
    async fn missing_binary_is_command_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let config = CodexToolConfig {
            command: "definitely-not-a-real-codex-binary".into(),
            ..base_config()
        };
        let c = client(config, &dir, false);
        let out = c
            .run(CodexRequest { prompt: "x".into(), mode: "exec".into(), ..Default::default() })
            .await;
        assert_eq!(out["error"]["code"], "command_not_found");
    }

    #[test]
    fn full_access_replaces_sandbox_flag() {
        let dir = tempfile::tempdir().unwrap();
        let config = CodexToolConfig { allow_dangerous_full_access: true, ..base_config() };
        let c = client(config, &dir, false);
        let args = c.build_args("exec", "do it", "danger-full-access", true, dir.path(), None);
        assert!(args.contains(&"--dangerously-bypass-approvals-and-sandbox".to_string()));
        assert!(!args.contains(&"--sandbox".to_string()));
    }

    #[test]
    fn sandboxed_args_include_sandbox_and_skip_git_check() {
        let dir = tempfile::tempdir().unwrap();
        let c = client(base_config(), &dir, false);
        let args = c.build_args("exec", "task", "read-only", false, dir.path(), Some("o3"));
        assert_eq!(args[0], "exec");
        assert!(args.windows(2).any(|w| w[0] == "--sandbox" && w[1] == "read-only"));
        assert!(args.contains(&"--skip-git-repo-check".to_string()));
        assert!(args.windows(2).any(|w| w[0] == "-m" && w[1] == "o3"));
        assert_eq!(args.last().unwrap(), "task");
    }

    #[test]
    fn review_mode_adds_subcommand_and_skips_git_check_flag() {
        let dir = tempfile::tempdir().unwrap();
        let c = client(base_config(), &dir, false);
        let args = c.build_args("review", "look", "read-only", false, dir.path(), None);
        assert_eq!(&args[..2], &["exec".to_string(), "review".to_string()]);
        assert!(!args.contains(&"--skip-git-repo-check".to_string()));
    }

    #[test]
    fn parses_jsonl_stream() {
        let stream = concat!(
            "{\"type\":\"thread.started\",\"thread_id\":\"th_1\"}\n",
            "garbage line\n",
            "{\"type\":\"item.completed\",\"item\":{\"type\":\"agent_message\",\"text\":\"first\"}}\n",
            "{\"type\":\"item.completed\",\"item\":{\"type\":\"agent_message\",\"text\":\"final\"}}\n",
            "{\"type\":\"turn.completed\",\"usage\":{\"input_tokens\":10}}\n",
        );
        let parsed = parse_jsonl(stream);
        assert_eq!(parsed.thread_id.as_deref(), Some("th_1"));
        assert_eq!(parsed.message.as_deref(), Some("final"));
        assert_eq!(parsed.usage.unwrap()["input_tokens"], 10);
        assert_eq!(parsed.parse_errors, 1);
    }
}
