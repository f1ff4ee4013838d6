// Copyright (c) 2025-2026 The Freja Authors
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use freja_config::CodexToolConfig;

use super::client::{error_payload, CodexClient, CodexRequest, CodexRunner};
use super::models::{ExecutionResult, MergePlanRecord, MergePlanStatus};
use super::store::MergePlanStore;
use crate::tool::Tool;

const REPORT_PREFIX: &str = "upstream-main-conflict-report-";
const REPORT_SUFFIX: &str = ".md";
const EXCERPT_LIMIT: usize = 16_000;

/// Merge advisor and executor.
///
/// Planning runs codex read-only; execution requires the global
/// dangerous-full-access allow plus the one-time confirmation token minted
/// by the most recent plan/revision.  Only the token's SHA-256 is stored;
/// it is cleared after a successful execution (single use) and kept on
/// failure so the caller can retry.
pub struct CodexMergeTool {
    workspace: PathBuf,
    config: CodexToolConfig,
    store: MergePlanStore,
    plan_client: Arc<dyn CodexRunner>,
    exec_client: Arc<dyn CodexRunner>,
}

impl CodexMergeTool {
    pub fn new(workspace: &Path, config: CodexToolConfig, restrict_to_workspace: bool) -> Self {
        let plan_config =
            CodexToolConfig { allow_dangerous_full_access: false, ..config.clone() };
        Self {
            workspace: workspace.to_path_buf(),
            store: MergePlanStore::new(workspace),
            plan_client: Arc::new(CodexClient::new(workspace, plan_config, restrict_to_workspace)),
            exec_client: Arc::new(CodexClient::new(
                workspace,
                config.clone(),
                restrict_to_workspace,
            )),
            config,
        }
    }

    /// Test seam: scripted planners/executors.
    pub fn with_clients(
        workspace: &Path,
        config: CodexToolConfig,
        plan_client: Arc<dyn CodexRunner>,
        exec_client: Arc<dyn CodexRunner>,
    ) -> Self {
        Self {
            workspace: workspace.to_path_buf(),
            store: MergePlanStore::new(workspace),
            plan_client,
            exec_client,
            config,
        }
    }

    async fn plan_latest(&self, args: &Value) -> Value {
        if !self.config.enabled {
            return error_payload("codex_disabled", "tools.codex.enabled=false; codex_merge is unavailable");
        }

        let base_ref = str_arg(args, "base_ref", "origin/main");
        let upstream_ref = str_arg(args, "upstream_ref", "upstream/main");
        let target_branch = str_arg(args, "target_branch", "main");

        let Some(report_path) = self.find_latest_report() else {
            return error_payload(
                "report_not_found",
                &format!(
                    "No report found under {} matching {REPORT_PREFIX}*{REPORT_SUFFIX}",
                    self.workspace.join("reports").display()
                ),
            );
        };
        let report_excerpt = read_excerpt(&report_path);
        let working_dir = args["working_dir"]
            .as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| self.workspace.to_string_lossy().into_owned());

        let prompt = build_plan_prompt(
            &working_dir,
            &base_ref,
            &upstream_ref,
            &target_branch,
            &report_path,
            &report_excerpt,
        );
        let outcome = self
            .plan_client
            .run(CodexRequest {
                prompt,
                mode: "exec".into(),
                working_dir: Some(working_dir.clone()),
                sandbox: Some("read-only".into()),
                model: args["model"].as_str().map(str::to_string),
                timeout_sec: args["timeout_sec"].as_u64(),
            })
            .await;
        if !outcome["ok"].as_bool().unwrap_or(false) {
            let mut payload = outcome;
            payload["action"] = json!("plan_latest");
            return payload;
        }

        let now = now_ms();
        let plan_id = hex::encode(rand::random::<[u8; 4]>());
        let confirmation_token = hex::encode(rand::random::<[u8; 16]>());
        let record = MergePlanRecord {
            plan_id: plan_id.clone(),
            status: MergePlanStatus::Planned,
            created_at_ms: now,
            updated_at_ms: now,
            base_ref,
            upstream_ref,
            target_branch,
            working_dir,
            report_path: report_path.to_string_lossy().into_owned(),
            report_excerpt,
            recommendation: outcome["message"].as_str().unwrap_or_default().to_string(),
            confirmation_token_hash: hash_token(&confirmation_token),
            revision: 0,
            last_feedback: None,
            plan_thread_id: outcome["thread_id"].as_str().map(str::to_string),
            plan_usage: outcome["usage"].as_object().cloned().unwrap_or_default(),
            execution: None,
        };
        if let Err(e) = self.store.save(&record) {
            return error_payload("store_failed", &e);
        }

        json!({
            "ok": true,
            "action": "plan_latest",
            "plan_id": record.plan_id,
            "confirmation_token": confirmation_token,
            "status": record.status.as_str(),
            "report_path": record.report_path,
            "summary": summarize(&record.recommendation, 800),
            "message": "Merge plan prepared. Merge is not executed yet.",
        })
    }

    async fn revise_plan(&self, args: &Value) -> Value {
        if !self.config.enabled {
            return error_payload("codex_disabled", "tools.codex.enabled=false; codex_merge is unavailable");
        }
        let Some(plan_id) = trimmed(args, "plan_id") else {
            return error_payload("missing_plan_id", "plan_id is required for revise_plan");
        };
        let Some(feedback) = trimmed(args, "feedback") else {
            return error_payload("missing_feedback", "feedback is required for revise_plan");
        };
        let Some(mut record) = self.store.load(&plan_id) else {
            return error_payload("plan_not_found", &format!("plan_id not found: {plan_id}"));
        };

        let report_path = PathBuf::from(&record.report_path);
        if !report_path.is_file() {
            return error_payload(
                "report_not_found",
                &format!("report file not found: {}", record.report_path),
            );
        }
        let report_excerpt = read_excerpt(&report_path);
        let prompt = build_revise_prompt(&record, &feedback, &report_excerpt);
        let outcome = self
            .plan_client
            .run(CodexRequest {
                prompt,
                mode: "exec".into(),
                working_dir: Some(record.working_dir.clone()),
                sandbox: Some("read-only".into()),
                model: args["model"].as_str().map(str::to_string),
                timeout_sec: args["timeout_sec"].as_u64(),
            })
            .await;
        if !outcome["ok"].as_bool().unwrap_or(false) {
            let mut payload = outcome;
            payload["action"] = json!("revise_plan");
            payload["plan_id"] = json!(plan_id);
            return payload;
        }

        let confirmation_token = hex::encode(rand::random::<[u8; 16]>());
        record.recommendation = outcome["message"].as_str().unwrap_or_default().to_string();
        record.status = MergePlanStatus::Revised;
        record.revision += 1;
        record.last_feedback = Some(feedback);
        record.updated_at_ms = now_ms();
        record.plan_thread_id = outcome["thread_id"].as_str().map(str::to_string);
        record.plan_usage = outcome["usage"].as_object().cloned().unwrap_or_default();
        record.report_excerpt = report_excerpt;
        record.confirmation_token_hash = hash_token(&confirmation_token);
        if let Err(e) = self.store.save(&record) {
            return error_payload("store_failed", &e);
        }

        json!({
            "ok": true,
            "action": "revise_plan",
            "plan_id": record.plan_id,
            "confirmation_token": confirmation_token,
            "status": record.status.as_str(),
            "revision": record.revision,
            "summary": summarize(&record.recommendation, 800),
            "message": "Merge plan revised. Merge is not executed yet.",
        })
    }

    async fn execute_merge(&self, args: &Value) -> Value {
        if !self.config.enabled {
            return error_payload("codex_disabled", "tools.codex.enabled=false; codex_merge is unavailable");
        }
        if !self.config.allow_dangerous_full_access {
            return error_payload(
                "dangerous_full_access_not_allowed",
                "execute_merge requires tools.codex.allowDangerousFullAccess=true",
            );
        }
        let Some(plan_id) = trimmed(args, "plan_id") else {
            return error_payload("missing_plan_id", "plan_id is required for execute_merge");
        };
        let Some(token) = trimmed(args, "confirmation_token") else {
            return error_payload(
                "missing_confirmation_token",
                "confirmation_token is required for execute_merge",
            );
        };
        let Some(mut record) = self.store.load(&plan_id) else {
            return error_payload("plan_not_found", &format!("plan_id not found: {plan_id}"));
        };

        if !token_matches(&record.confirmation_token_hash, &token) {
            return error_payload("invalid_confirmation_token", "confirmation token mismatch");
        }

        let report_path = PathBuf::from(&record.report_path);
        if !report_path.is_file() {
            return error_payload(
                "report_not_found",
                &format!("report file not found: {}", record.report_path),
            );
        }

        let prompt = build_execute_prompt(&record);
        let outcome = self
            .exec_client
            .run(CodexRequest {
                prompt,
                mode: "exec".into(),
                working_dir: Some(record.working_dir.clone()),
                sandbox: Some("danger-full-access".into()),
                model: args["model"].as_str().map(str::to_string),
                timeout_sec: args["timeout_sec"].as_u64(),
            })
            .await;

        let now = now_ms();
        if outcome["ok"].as_bool().unwrap_or(false) {
            record.status = MergePlanStatus::Executed;
            record.updated_at_ms = now;
            // Single use: a successful execution consumes the token.
            record.confirmation_token_hash = String::new();
            record.execution = Some(ExecutionResult {
                ok: true,
                summary: summarize(outcome["message"].as_str().unwrap_or_default(), 1200),
                at_ms: now,
                thread_id: outcome["thread_id"].as_str().map(str::to_string),
                usage: outcome["usage"].as_object().cloned().unwrap_or_default(),
                error: None,
            });
            if let Err(e) = self.store.save(&record) {
                return error_payload("store_failed", &e);
            }
            return json!({
                "ok": true,
                "action": "execute_merge",
                "plan_id": record.plan_id,
                "status": record.status.as_str(),
                "summary": record.execution.as_ref().map(|e| e.summary.clone()),
                "message": "Merge execution completed by codex.",
            });
        }

        let error_message = extract_error_message(&outcome);
        record.status = MergePlanStatus::Failed;
        record.updated_at_ms = now;
        record.execution = Some(ExecutionResult {
            ok: false,
            summary: error_message.clone(),
            at_ms: now,
            thread_id: outcome["thread_id"].as_str().map(str::to_string),
            usage: outcome["usage"].as_object().cloned().unwrap_or_default(),
            error: Some(error_message),
        });
        if let Err(e) = self.store.save(&record) {
            return error_payload("store_failed", &e);
        }

        let mut payload = outcome;
        payload["action"] = json!("execute_merge");
        payload["plan_id"] = json!(record.plan_id);
        payload["status"] = json!("failed");
        payload
    }

    fn status(&self, args: &Value) -> Value {
        let Some(plan_id) = trimmed(args, "plan_id") else {
            return error_payload("missing_plan_id", "plan_id is required for status");
        };
        let Some(record) = self.store.load(&plan_id) else {
            return error_payload("plan_not_found", &format!("plan_id not found: {plan_id}"));
        };
        json!({
            "ok": true,
            "action": "status",
            "plan": record.to_public(true),
        })
    }

    fn list(&self, args: &Value) -> Value {
        let limit = args["limit"].as_u64().unwrap_or(20).clamp(1, 100) as usize;
        let plans: Vec<Value> = self
            .store
            .list(limit)
            .iter()
            .map(|r| r.to_public(false))
            .collect();
        json!({"ok": true, "action": "list", "plans": plans})
    }

    fn find_latest_report(&self) -> Option<PathBuf> {
        let reports_dir = self.workspace.join("reports");
        let entries = std::fs::read_dir(reports_dir).ok()?;
        let mut candidates: Vec<(u64, String, PathBuf)> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                name.starts_with(REPORT_PREFIX)
                    && name.ends_with(REPORT_SUFFIX)
                    && entry.path().is_file()
            })
            .map(|entry| {
                let mtime = entry
                    .metadata()
                    .and_then(|m| m.modified())
                    .ok()
                    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                    .map(|d| d.as_millis() as u64)
                    .unwrap_or(0);
                let name = entry.file_name().to_string_lossy().into_owned();
                (mtime, name, entry.path())
            })
            .collect();
        candidates.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));
        candidates.into_iter().next().map(|(_, _, path)| path)
    }
}

fn str_arg(args: &Value, key: &str, default: &str) -> String {
    args[key]
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(default)
        .to_string()
}

fn trimmed(args: &Value, key: &str) -> Option<String> {
    args[key]
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Constant-time comparison on the hex digests; an empty stored hash never
/// matches (the token was consumed or never issued).
fn token_matches(expected_hash: &str, provided_token: &str) -> bool {
    if expected_hash.is_empty() {
        return false;
    }
    let provided_hash = hash_token(provided_token);
    expected_hash
        .as_bytes()
        .ct_eq(provided_hash.as_bytes())
        .into()
}

fn read_excerpt(path: &Path) -> String {
    let text = std::fs::read_to_string(path).unwrap_or_default();
    if text.chars().count() <= EXCERPT_LIMIT {
        text
    } else {
        text.chars().take(EXCERPT_LIMIT).collect()
    }
}

fn summarize(text: &str, max_chars: usize) -> String {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .take(8)
        .collect();
    let compact = lines.join("\n");
    if compact.chars().count() <= max_chars {
        return compact;
    }
    let cut: String = compact.chars().take(max_chars).collect();
    format!("{}...", cut.trim_end())
}

fn extract_error_message(payload: &Value) -> String {
    if let Some(message) = payload["error"]["message"].as_str() {
        let message = message.trim();
        if !message.is_empty() {
            return message.to_string();
        }
    }
    if let Some(message) = payload["message"].as_str() {
        let message = message.trim();
        if !message.is_empty() {
            return message.to_string();
        }
    }
    "codex execution failed".to_string()
}

fn build_plan_prompt(
    working_dir: &str,
    base_ref: &str,
    upstream_ref: &str,
    target_branch: &str,
    report_path: &Path,
    report_excerpt: &str,
) -> String {
    format!(
        "You are a senior merge advisor. Planning phase only.\n\
         Do not execute git commands and do not modify files.\n\n\
         Repository working directory: {working_dir}\n\
         Base ref: {base_ref}\n\
         Upstream ref: {upstream_ref}\n\
         Target branch: {target_branch}\n\
         Report file: {}\n\n\
         Analyze the report and produce a merge recommendation.\n\
         Required sections:\n\
         1. Overall recommendation\n\
         2. Conflict hotspots and risks\n\
         3. Suggested merge strategy\n\
         4. Concrete execution checklist\n\
         5. Validation gates before push\n\
         6. Go/No-Go decision with rationale\n\n\
         Report content:\n{report_excerpt}",
        report_path.display()
    )
}

fn build_revise_prompt(record: &MergePlanRecord, feedback: &str, report_excerpt: &str) -> String {
    format!(
        "You are revising a merge recommendation. Planning phase only.\n\
         Do not execute git commands and do not modify files.\n\n\
         Plan ID: {}\n\
         Base ref: {}\n\
         Upstream ref: {}\n\
         Target branch: {}\n\
         Report path: {}\n\n\
         Previous recommendation:\n{}\n\n\
         User feedback:\n{feedback}\n\n\
         Generate a revised recommendation with the same required sections.\n\
         Include a short change log compared with the previous recommendation.\n\n\
         Report content:\n{report_excerpt}",
        record.plan_id,
        record.base_ref,
        record.upstream_ref,
        record.target_branch,
        record.report_path,
        record.recommendation,
    )
}

fn build_execute_prompt(record: &MergePlanRecord) -> String {
    format!(
        "You are responsible for executing a real merge workflow.\n\
         You must perform all steps yourself in the repository.\n\
         Tasks:\n\
         1. Analyze the report and previous recommendation.\n\
         2. Fetch remotes, prepare branch, and merge upstream into target branch.\n\
         3. Resolve conflicts by editing code directly when needed.\n\
         4. Run minimal relevant verification before push.\n\
         5. Push results to origin target branch if verification passes.\n\
         6. If not safe, stop and explain exactly why.\n\n\
         Working directory: {}\n\
         Base ref: {}\n\
         Upstream ref: {}\n\
         Target branch: {}\n\
         Report path: {}\n\n\
         Previous recommendation:\n{}\n\n\
         Return a final summary with:\n\
         - merged files/conflicts\n\
         - verification commands and outcomes\n\
         - push result\n\
         - follow-up risks",
        record.working_dir,
        record.base_ref,
        record.upstream_ref,
        record.target_branch,
        record.report_path,
        record.recommendation,
    )
}

#[async_trait]
impl Tool for CodexMergeTool {
    fn name(&self) -> &str {
        "codex_merge"
    }

    fn description(&self) -> &str {
        "Codex merge advisor and executor. Actions: plan_latest, revise_plan,\n\
         execute_merge, status, list. Planning is read-only; execute_merge\n\
         requires the confirmation token returned by the latest plan."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["plan_latest", "revise_plan", "execute_merge", "status", "list"],
                    "description": "Action to run"
                },
                "plan_id": {
                    "type": "string",
                    "description": "Merge plan ID for revise_plan/execute_merge/status"
                },
                "feedback": {"type": "string", "description": "User feedback for revise_plan"},
                "confirmation_token": {
                    "type": "string",
                    "description": "Token required by execute_merge"
                },
                "base_ref": {"type": "string", "description": "Merge base ref for planning"},
                "upstream_ref": {"type": "string", "description": "Upstream ref to merge from"},
                "target_branch": {"type": "string", "description": "Target branch to merge into"},
                "working_dir": {"type": "string", "description": "Repository root used by codex"},
                "model": {"type": "string", "description": "Optional codex model override"},
                "timeout_sec": {
                    "type": "integer",
                    "minimum": 1,
                    "maximum": 7200,
                    "description": "Optional timeout override"
                },
                "limit": {
                    "type": "integer",
                    "minimum": 1,
                    "maximum": 100,
                    "description": "List action result limit"
                }
            },
            "required": ["action"]
        })
    }

    async fn execute(&self, args: Value) -> String {
        let action = args["action"].as_str().unwrap_or_default().trim().to_lowercase();
        let payload = match action.as_str() {
            "plan_latest" => self.plan_latest(&args).await,
            "revise_plan" => self.revise_plan(&args).await,
            "execute_merge" => self.execute_merge(&args).await,
            "status" => self.status(&args),
            "list" => self.list(&args),
            _ => error_payload(
                "invalid_action",
                "action must be one of plan_latest|revise_plan|execute_merge|status|list",
            ),
        };
        serde_json::to_string(&payload).unwrap_or_else(|e| format!("Error: {e}"))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
