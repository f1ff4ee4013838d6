// Copyright (c) 2025-2026 The Freja Authors
//
// SPDX-License-Identifier: MIT
//! Persistent time-based job scheduling.
//!
//! The store (`cron/jobs.json`) is single-writer per workspace: the service
//! owns the file and every mutation is persisted with an atomic replace.
//! Schedules are a tagged union (`every` / `cron` / `at`); payloads carry a
//! `kind` discriminator that tells the dispatcher whether to deliver a
//! static message, invoke a tool, or run a full agent turn.

mod service;
mod types;

pub use service::{compute_next_run, CronService};
pub use types::{CronJob, CronJobState, CronPayload, CronPayloadKind, CronSchedule};
