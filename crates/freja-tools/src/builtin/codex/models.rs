// Copyright (c) 2025-2026 The Freja Authors
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergePlanStatus {
    Planned,
    Revised,
    Executed,
    Failed,
}

impl MergePlanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergePlanStatus::Planned => "planned",
            MergePlanStatus::Revised => "revised",
            MergePlanStatus::Executed => "executed",
            MergePlanStatus::Failed => "failed",
        }
    }
}

/// Execution outcome recorded on a merge plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub ok: bool,
    pub summary: String,
    pub at_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub usage: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Persisted merge advisory plan.
///
/// `confirmation_token_hash` is the SHA-256 hex of the one-time token; the
/// token itself is returned to the caller exactly once and never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergePlanRecord {
    pub plan_id: String,
    pub status: MergePlanStatus,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
    pub base_ref: String,
    pub upstream_ref: String,
    pub target_branch: String,
    pub working_dir: String,
    pub report_path: String,
    pub report_excerpt: String,
    pub recommendation: String,
    pub confirmation_token_hash: String,
    #[serde(default)]
    pub revision: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_feedback: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_thread_id: Option<String>,
    #[serde(default)]
    pub plan_usage: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionResult>,
}

impl MergePlanRecord {
    /// Caller-facing projection; the recommendation body is large and only
    /// included on request.
    pub fn to_public(&self, include_recommendation: bool) -> Value {
        let mut payload = json!({
            "plan_id": self.plan_id,
            "status": self.status.as_str(),
            "revision": self.revision,
            "created_at_ms": self.created_at_ms,
            "updated_at_ms": self.updated_at_ms,
            "base_ref": self.base_ref,
            "upstream_ref": self.upstream_ref,
            "target_branch": self.target_branch,
            "working_dir": self.working_dir,
            "report_path": self.report_path,
            "has_execution": self.execution.is_some(),
        });
        if let Some(execution) = &self.execution {
            payload["execution"] = serde_json::to_value(execution).unwrap_or(Value::Null);
        }
        if include_recommendation {
            payload["recommendation"] = Value::String(self.recommendation.clone());
        }
        payload
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
