// Copyright (c) 2025-2026 The Freja Authors
//
// SPDX-License-Identifier: MIT
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use freja_bus::OutboundMessage;
use freja_cron::{CronJob, CronPayloadKind, CronService};

use crate::agent::AgentLoop;

/// Execute one fired cron job according to its payload kind and return the
/// produced text (delivered to the target chat when the payload asks for
/// delivery).
pub async fn dispatch_cron_job(job: &CronJob, agent: &AgentLoop) -> Result<String, String> {
    let deliver = |content: String| async {
        if job.payload.deliver {
            if let Some(to) = job.payload.to.as_deref().filter(|to| !to.is_empty()) {
                let channel = job.payload.channel.as_deref().unwrap_or("cli");
                if !content.is_empty() {
                    agent
                        .publish_outbound_safe(OutboundMessage::new(channel, to, content))
                        .await;
                }
            }
        }
    };

    match job.payload.kind {
        CronPayloadKind::SystemEvent => {
            let message = job.payload.message.clone().unwrap_or_default();
            deliver(message.clone()).await;
            Ok(message)
        }
        CronPayloadKind::ToolCall => {
            let tool_name = job
                .payload
                .tool_name
                .as_deref()
                .map(str::trim)
                .unwrap_or_default();
            if tool_name.is_empty() {
                return Err("tool_name is required for tool_call payload".to_string());
            }
            let args = job
                .payload
                .tool_args
                .clone()
                .unwrap_or_else(|| serde_json::json!({}));
            let result = agent.registry().execute(tool_name, args).await;
            deliver(result.clone()).await;
            Ok(result)
        }
        CronPayloadKind::AgentTurn => {
            let message = job.payload.message.clone().unwrap_or_default();
            let response = agent
                .process_direct(
                    &message,
                    Some(&format!("cron:{}", job.id)),
                    job.payload.channel.as_deref().unwrap_or("cli"),
                    job.payload.to.as_deref().unwrap_or("direct"),
                    None,
                )
                .await;
            deliver(response.clone()).await;
            Ok(response)
        }
    }
}

/// Ticker task: fires due jobs roughly once per second, sequentially in
/// ascending fire order, and records each outcome.  Failures never remove a
/// job; only `delete_after_run` does.
pub async fn run_cron_loop(service: Arc<CronService>, agent: Arc<AgentLoop>, stop: Arc<AtomicBool>) {
    info!("cron loop started");
    while !stop.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let due = service.tick(Utc::now().timestamp_millis());
        for job in due {
            info!(job_id = %job.id, name = %job.name, "cron job fired");
            match dispatch_cron_job(&job, &agent).await {
                Ok(result) => service.record_result(&job.id, true, &result),
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "cron job failed");
                    service.record_result(&job.id, false, &e);
                }
            }
        }
    }
    info!("cron loop stopped");
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
