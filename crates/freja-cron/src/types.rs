// Copyright (c) 2025-2026 The Freja Authors
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// When a job fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CronSchedule {
    /// Fixed interval: next run = last run + `every_ms`.
    Every { every_ms: u64 },
    /// Five-field cron expression, evaluated in `tz` (local time when unset).
    Cron {
        expr: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tz: Option<String>,
    },
    /// One-shot absolute fire time (epoch milliseconds).
    At { at_ms: i64 },
}

impl CronSchedule {
    pub fn kind(&self) -> &'static str {
        match self {
            CronSchedule::Every { .. } => "every",
            CronSchedule::Cron { .. } => "cron",
            CronSchedule::At { .. } => "at",
        }
    }
}

/// What the dispatcher does when the job fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CronPayloadKind {
    /// Deliver `message` to the target channel as-is.
    SystemEvent,
    /// Run `message` as a full agent turn under a `cron:{id}` session.
    AgentTurn,
    /// Execute `tool_name(tool_args)` through the agent's tool registry.
    ToolCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronPayload {
    pub kind: CronPayloadKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_args: Option<Value>,
    /// Whether the fire result is delivered to `(channel, to)` via the bus.
    #[serde(default)]
    pub deliver: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
}

impl CronPayload {
    pub fn system_event(message: impl Into<String>) -> Self {
        Self {
            kind: CronPayloadKind::SystemEvent,
            message: Some(message.into()),
            tool_name: None,
            tool_args: None,
            deliver: false,
            channel: None,
            to: None,
        }
    }

    pub fn agent_turn(message: impl Into<String>) -> Self {
        Self {
            kind: CronPayloadKind::AgentTurn,
            ..Self::system_event(message)
        }
    }

    pub fn tool_call(tool_name: impl Into<String>, tool_args: Value) -> Self {
        Self {
            kind: CronPayloadKind::ToolCall,
            message: None,
            tool_name: Some(tool_name.into()),
            tool_args: Some(tool_args),
            deliver: false,
            channel: None,
            to: None,
        }
    }

    pub fn delivered_to(mut self, channel: impl Into<String>, to: impl Into<String>) -> Self {
        self.deliver = true;
        self.channel = Some(channel.into());
        self.to = Some(to.into());
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CronJobState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run_at_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_result: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronJob {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub schedule: CronSchedule,
    pub payload: CronPayload,
    #[serde(default)]
    pub state: CronJobState,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
    #[serde(default)]
    pub delete_after_run: bool,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn schedule_serializes_with_kind_tag() {
        let every = serde_json::to_value(CronSchedule::Every { every_ms: 5000 }).unwrap();
        assert_eq!(every, json!({"kind": "every", "every_ms": 5000}));

        let at = serde_json::to_value(CronSchedule::At { at_ms: 123 }).unwrap();
        assert_eq!(at, json!({"kind": "at", "at_ms": 123}));

        let cron = serde_json::to_value(CronSchedule::Cron {
            expr: "0 9 * * *".into(),
            tz: Some("Asia/Shanghai".into()),
        })
        .unwrap();
        assert_eq!(cron["kind"], "cron");
        assert_eq!(cron["tz"], "Asia/Shanghai");
    }

    #[test]
    fn schedule_round_trips() {
        let original = CronSchedule::Cron { expr: "*/5 * * * *".into(), tz: None };
        let json = serde_json::to_string(&original).unwrap();
        let back: CronSchedule = serde_json::from_str(&json).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn payload_kind_uses_snake_case() {
        let v = serde_json::to_value(CronPayloadKind::SystemEvent).unwrap();
        assert_eq!(v, json!("system_event"));
        let v = serde_json::to_value(CronPayloadKind::AgentTurn).unwrap();
        assert_eq!(v, json!("agent_turn"));
    }

    #[test]
    fn delivered_to_sets_target() {
        let p = CronPayload::system_event("drink water").delivered_to("telegram", "999");
        assert!(p.deliver);
        assert_eq!(p.channel.as_deref(), Some("telegram"));
        assert_eq!(p.to.as_deref(), Some("999"));
    }
}
