// Copyright (c) 2025-2026 The Freja Authors
//
// SPDX-License-Identifier: MIT
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde_json::{json, Value};

use freja_cron::{CronPayload, CronSchedule, CronService};

use crate::tool::Tool;

/// Schedule reminders and recurring tasks through the cron service.
///
/// Exactly one of `every_seconds | cron_expr | in_seconds | at` picks the
/// schedule; `in_seconds` and `at` make a one-shot job that is deleted
/// after it fires.  `reminder` mode delivers the message directly; `task`
/// mode runs it as a full agent turn.
pub struct CronTool {
    cron: Arc<CronService>,
    context: Mutex<(String, String)>,
}

impl CronTool {
    pub fn new(cron: Arc<CronService>) -> Self {
        Self { cron, context: Mutex::new((String::new(), String::new())) }
    }

    pub fn set_context(&self, channel: &str, chat_id: &str) {
        *self.context.lock().unwrap() = (channel.to_string(), chat_id.to_string());
    }

    fn add_job(
        &self,
        message: &str,
        mode: &str,
        every_seconds: Option<i64>,
        cron_expr: Option<&str>,
        in_seconds: Option<i64>,
        at: Option<&str>,
    ) -> String {
        if message.is_empty() {
            return "Error: message is required for add".to_string();
        }
        let (channel, chat_id) = self.context.lock().unwrap().clone();
        if channel.is_empty() || chat_id.is_empty() {
            return "Error: no session context (channel/chat_id)".to_string();
        }
        if !matches!(mode, "reminder" | "task") {
            return "Error: mode must be 'reminder' or 'task'".to_string();
        }

        let timing_inputs = every_seconds.is_some() as u8
            + cron_expr.is_some() as u8
            + in_seconds.is_some() as u8
            + at.is_some() as u8;
        if timing_inputs != 1 {
            return "Error: provide exactly one of every_seconds, cron_expr, in_seconds, or at"
                .to_string();
        }

        let now_ms = Local::now().timestamp_millis();
        let mut delete_after_run = false;
        let schedule = if let Some(seconds) = every_seconds {
            if seconds <= 0 {
                return "Error: every_seconds must be > 0".to_string();
            }
            CronSchedule::Every { every_ms: (seconds * 1000) as u64 }
        } else if let Some(expr) = cron_expr {
            CronSchedule::Cron { expr: expr.to_string(), tz: None }
        } else if let Some(seconds) = in_seconds {
            if seconds <= 0 {
                return "Error: in_seconds must be > 0".to_string();
            }
            delete_after_run = true;
            CronSchedule::At { at_ms: now_ms + seconds * 1000 }
        } else {
            match parse_at(at.unwrap_or_default()) {
                Ok(at_ms) if at_ms > now_ms => {
                    delete_after_run = true;
                    CronSchedule::At { at_ms }
                }
                Ok(_) => return "Error: at must be in the future".to_string(),
                Err(e) => return e,
            }
        };

        let payload = if mode == "task" {
            CronPayload::agent_turn(message)
        } else {
            CronPayload::system_event(message)
        }
        .delivered_to(channel, chat_id);

        let name: String = message.chars().take(30).collect();
        match self.cron.add_job(&name, schedule, payload, delete_after_run) {
            Ok(job) => {
                let label = if delete_after_run { "one-time" } else { "recurring" };
                format!("Created {label} job '{}' (id: {}, mode: {mode})", job.name, job.id)
            }
            Err(e) => format!("Error: {e}"),
        }
    }

    fn list_jobs(&self) -> String {
        let jobs = self.cron.list_jobs(false);
        if jobs.is_empty() {
            return "No scheduled jobs.".to_string();
        }
        let lines: Vec<String> = jobs
            .iter()
            .map(|j| format!("- {} (id: {}, {})", j.name, j.id, j.schedule.kind()))
            .collect();
        format!("Scheduled jobs:\n{}", lines.join("\n"))
    }

    fn remove_job(&self, job_id: Option<&str>) -> String {
        let Some(job_id) = job_id.filter(|id| !id.is_empty()) else {
            return "Error: job_id is required for remove".to_string();
        };
        if self.cron.remove_job(job_id) {
            format!("Removed job {job_id}")
        } else {
            format!("Job {job_id} not found")
        }
    }
}

/// Parse an ISO datetime, assuming local time when no offset is given.
fn parse_at(text: &str) -> Result<i64, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.timestamp_millis());
    }
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S") {
        if let Some(local) = naive.and_local_timezone(Local).single() {
            return Ok(local.timestamp_millis());
        }
    }
    Err("Error: at must be an ISO datetime like 2026-02-11T09:00:00".to_string())
}

#[async_trait]
impl Tool for CronTool {
    fn name(&self) -> &str {
        "cron"
    }

    fn description(&self) -> &str {
        "Schedule reminders and recurring tasks. Actions: add, list, remove.\n\
         Modes: reminder (deliver the message), task (run a full agent turn).\n\
         Timing: every_seconds or cron_expr for recurring; in_seconds or at\n\
         for one-shot."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["add", "list", "remove"],
                    "description": "Action to perform"
                },
                "message": {"type": "string", "description": "Reminder message (for add)"},
                "mode": {
                    "type": "string",
                    "enum": ["reminder", "task"],
                    "description": "reminder: deliver the message directly; task: run an agent turn"
                },
                "every_seconds": {
                    "type": "integer",
                    "description": "Interval in seconds (recurring)"
                },
                "cron_expr": {
                    "type": "string",
                    "description": "Cron expression like '0 9 * * *' (recurring)"
                },
                "in_seconds": {
                    "type": "integer",
                    "description": "Run once after N seconds (one-shot)"
                },
                "at": {
                    "type": "string",
                    "description": "Run once at ISO datetime, e.g. '2026-02-11T09:00:00' (one-shot)"
                },
                "job_id": {"type": "string", "description": "Job ID (for remove)"}
            },
            "required": ["action"]
        })
    }

    async fn execute(&self, args: Value) -> String {
        let action = args["action"].as_str().unwrap_or_default();
        match action {
            "add" => self.add_job(
                args["message"].as_str().unwrap_or_default(),
                args["mode"].as_str().unwrap_or("reminder"),
                args["every_seconds"].as_i64(),
                args["cron_expr"].as_str().filter(|s| !s.is_empty()),
                args["in_seconds"].as_i64(),
                args["at"].as_str().filter(|s| !s.is_empty()),
            ),
            "list" => self.list_jobs(),
            "remove" => self.remove_job(args["job_id"].as_str()),
            other => format!("Unknown action: {other}"),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
