// Copyright (c) 2025-2026 The Freja Authors
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Mutex;

use anyhow::{anyhow, Context};
use chrono::{TimeZone, Utc};
use tracing::{info, warn};

use crate::{CronJob, CronJobState, CronPayload, CronSchedule};

const LAST_RESULT_MAX_CHARS: usize = 500;

/// Compute the next fire time in epoch milliseconds.
///
/// `every` schedules anchor on the last run when one exists; `cron`
/// schedules are evaluated in their own timezone (local time when unset);
/// `at` schedules always return their absolute fire time.
pub fn compute_next_run(
    schedule: &CronSchedule,
    now_ms: i64,
    last_run_ms: Option<i64>,
) -> anyhow::Result<Option<i64>> {
    match schedule {
        CronSchedule::Every { every_ms } => {
            Ok(Some(last_run_ms.unwrap_or(now_ms) + *every_ms as i64))
        }
        CronSchedule::At { at_ms } => Ok(Some(*at_ms)),
        CronSchedule::Cron { expr, tz } => {
            let parsed = cron::Schedule::from_str(&normalize_cron_expr(expr))
                .map_err(|e| anyhow!("invalid cron expression '{expr}': {e}"))?;
            let now = Utc
                .timestamp_millis_opt(now_ms)
                .single()
                .context("timestamp out of range")?;
            let next = match tz {
                Some(name) => {
                    let zone: chrono_tz::Tz = name
                        .parse()
                        .map_err(|_| anyhow!("unknown timezone '{name}'"))?;
                    parsed
                        .after(&now.with_timezone(&zone))
                        .next()
                        .map(|dt| dt.timestamp_millis())
                }
                None => parsed
                    .after(&now.with_timezone(&chrono::Local))
                    .next()
                    .map(|dt| dt.timestamp_millis()),
            };
            Ok(next)
        }
    }
}

/// The `cron` crate wants six or seven fields (leading seconds); user-facing
/// expressions are standard five-field.
fn normalize_cron_expr(expr: &str) -> String {
    let fields = expr.split_whitespace().count();
    if fields == 5 {
        format!("0 {}", expr.trim())
    } else {
        expr.trim().to_string()
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn new_job_id() -> String {
    format!("{:08x}", rand::random::<u32>())
}

/// Persistent job store and scheduler.  Single writer: this service owns the
/// store file and persists after every mutation with an atomic replace.
pub struct CronService {
    store_path: PathBuf,
    jobs: Mutex<Option<Vec<CronJob>>>,
}

impl CronService {
    pub fn new(store_path: impl Into<PathBuf>) -> Self {
        Self { store_path: store_path.into(), jobs: Mutex::new(None) }
    }

    pub fn add_job(
        &self,
        name: &str,
        schedule: CronSchedule,
        payload: CronPayload,
        delete_after_run: bool,
    ) -> anyhow::Result<CronJob> {
        let now = now_ms();
        if let CronSchedule::At { at_ms } = &schedule {
            if *at_ms <= now {
                anyhow::bail!("at must be in the future");
            }
        }
        let next_run_at_ms = compute_next_run(&schedule, now, None)?;

        let job = CronJob {
            id: new_job_id(),
            name: name.to_string(),
            enabled: true,
            schedule,
            payload,
            state: CronJobState { next_run_at_ms, last_run_at_ms: None, last_result: None },
            created_at_ms: now,
            updated_at_ms: now,
            delete_after_run,
        };

        let mut guard = self.jobs.lock().unwrap();
        let jobs = self.loaded(&mut guard);
        jobs.push(job.clone());
        self.save(jobs)?;
        info!(job_id = %job.id, name = %job.name, "cron job added");
        Ok(job)
    }

    pub fn list_jobs(&self, include_disabled: bool) -> Vec<CronJob> {
        let mut guard = self.jobs.lock().unwrap();
        self.loaded(&mut guard)
            .iter()
            .filter(|j| include_disabled || j.enabled)
            .cloned()
            .collect()
    }

    pub fn remove_job(&self, id: &str) -> bool {
        let mut guard = self.jobs.lock().unwrap();
        let jobs = self.loaded(&mut guard);
        let before = jobs.len();
        jobs.retain(|j| j.id != id);
        let removed = jobs.len() != before;
        if removed {
            let _ = self.save(jobs);
            info!(job_id = %id, "cron job removed");
        }
        removed
    }

    pub fn enable_job(&self, id: &str, enabled: bool) -> bool {
        let mut guard = self.jobs.lock().unwrap();
        let jobs = self.loaded(&mut guard);
        let now = now_ms();
        let mut found = false;
        for job in jobs.iter_mut() {
            if job.id == id {
                job.enabled = enabled;
                job.updated_at_ms = now;
                if enabled && job.state.next_run_at_ms.is_none() {
                    job.state.next_run_at_ms =
                        compute_next_run(&job.schedule, now, job.state.last_run_at_ms)
                            .ok()
                            .flatten();
                }
                found = true;
                break;
            }
        }
        if found {
            let _ = self.save(jobs);
        }
        found
    }

    /// Return all due jobs (ascending fire order) and persist their
    /// recomputed next runs.  One-shot `at` jobs get no next run; a
    /// non-deleting one is disabled so it cannot refire.
    pub fn tick(&self, now: i64) -> Vec<CronJob> {
        let mut guard = self.jobs.lock().unwrap();
        let jobs = self.loaded(&mut guard);

        let mut due: Vec<CronJob> = jobs
            .iter()
            .filter(|j| {
                j.enabled && j.state.next_run_at_ms.map(|n| n <= now).unwrap_or(false)
            })
            .cloned()
            .collect();
        due.sort_by_key(|j| j.state.next_run_at_ms.unwrap_or(i64::MAX));

        if due.is_empty() {
            return due;
        }

        for fired in &due {
            if let Some(job) = jobs.iter_mut().find(|j| j.id == fired.id) {
                job.state.last_run_at_ms = Some(now);
                job.updated_at_ms = now;
                match &job.schedule {
                    CronSchedule::At { .. } => {
                        job.state.next_run_at_ms = None;
                        if !job.delete_after_run {
                            job.enabled = false;
                        }
                    }
                    schedule => {
                        job.state.next_run_at_ms =
                            match compute_next_run(schedule, now, Some(now)) {
                                Ok(next) => next,
                                Err(e) => {
                                    warn!(job_id = %job.id, error = %e, "next-run computation failed; disabling job");
                                    job.enabled = false;
                                    None
                                }
                            };
                    }
                }
            }
        }
        let _ = self.save(jobs);
        due
    }

    /// Record a fire outcome in `state.last_result`; drop the job when it is
    /// a one-shot marked `delete_after_run`.
    pub fn record_result(&self, id: &str, ok: bool, detail: &str) {
        let mut guard = self.jobs.lock().unwrap();
        let jobs = self.loaded(&mut guard);
        let mut dirty = false;
        let mut delete = false;
        if let Some(job) = jobs.iter_mut().find(|j| j.id == id) {
            let prefix = if ok { "ok" } else { "error" };
            let mut result = format!("{prefix}: {detail}");
            if result.chars().count() > LAST_RESULT_MAX_CHARS {
                result = result.chars().take(LAST_RESULT_MAX_CHARS).collect();
            }
            job.state.last_result = Some(result);
            job.updated_at_ms = now_ms();
            dirty = true;
            delete = job.delete_after_run;
        }
        if delete {
            jobs.retain(|j| j.id != id);
        }
        if dirty {
            let _ = self.save(jobs);
        }
    }

    fn loaded<'a>(&self, guard: &'a mut Option<Vec<CronJob>>) -> &'a mut Vec<CronJob> {
        if guard.is_none() {
            let mut jobs = self.load_from_disk();
            self.recover_missed(&mut jobs);
            *guard = Some(jobs);
        }
        guard.as_mut().unwrap()
    }

    fn load_from_disk(&self) -> Vec<CronJob> {
        let Ok(text) = std::fs::read_to_string(&self.store_path) else {
            return Vec::new();
        };
        match serde_json::from_str::<serde_json::Value>(&text) {
            Ok(root) => root
                .get("jobs")
                .and_then(|jobs| serde_json::from_value(jobs.clone()).ok())
                .unwrap_or_default(),
            Err(e) => {
                warn!(path = %self.store_path.display(), error = %e, "unreadable cron store; starting empty");
                Vec::new()
            }
        }
    }

    /// Startup recovery: periodic jobs whose fire time passed while the
    /// process was down fire immediately; `at` jobs keep their stored time
    /// so the next tick fires them once.
    fn recover_missed(&self, jobs: &mut [CronJob]) {
        let now = now_ms();
        for job in jobs.iter_mut() {
            if !job.enabled {
                continue;
            }
            match &job.schedule {
                CronSchedule::At { at_ms } => {
                    if job.state.next_run_at_ms.is_none() {
                        job.state.next_run_at_ms = Some(*at_ms);
                    }
                }
                schedule => match job.state.next_run_at_ms {
                    Some(next) if next < now => {
                        info!(job_id = %job.id, "missed cron run; firing immediately");
                        job.state.next_run_at_ms = Some(now);
                    }
                    Some(_) => {}
                    None => {
                        job.state.next_run_at_ms =
                            compute_next_run(schedule, now, job.state.last_run_at_ms)
                                .ok()
                                .flatten();
                    }
                },
            }
        }
    }

    fn save(&self, jobs: &[CronJob]) -> anyhow::Result<()> {
        if let Some(parent) = self.store_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let payload = serde_json::json!({ "jobs": jobs });
        let text = serde_json::to_string_pretty(&payload)?;
        let tmp = self.store_path.with_extension("json.tmp");
        std::fs::write(&tmp, text).with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.store_path)
            .with_context(|| format!("replacing {}", self.store_path.display()))?;
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn service(dir: &tempfile::TempDir) -> CronService {
        CronService::new(dir.path().join("cron").join("jobs.json"))
    }

    fn ms(dt: chrono::DateTime<chrono_tz::Tz>) -> i64 {
        dt.timestamp_millis()
    }

    #[test]
    fn compute_next_run_cron_respects_schedule_timezone() {
        let zone: chrono_tz::Tz = "Asia/Shanghai".parse().unwrap();
        let now = zone.with_ymd_and_hms(2026, 2, 11, 12, 43, 0).unwrap();
        let schedule = CronSchedule::Cron {
            expr: "0 13 * * *".into(),
            tz: Some("Asia/Shanghai".into()),
        };

        let next = compute_next_run(&schedule, ms(now), None).unwrap().unwrap();

        let expected = zone.with_ymd_and_hms(2026, 2, 11, 13, 0, 0).unwrap();
        assert_eq!(next, ms(expected));
    }

    #[test]
    fn compute_next_run_every_anchors_on_last_run() {
        let schedule = CronSchedule::Every { every_ms: 60_000 };
        assert_eq!(compute_next_run(&schedule, 1_000, None).unwrap(), Some(61_000));
        assert_eq!(compute_next_run(&schedule, 9_999, Some(5_000)).unwrap(), Some(65_000));
    }

    #[test]
    fn add_job_rejects_unknown_timezone() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir);
        let err = svc
            .add_job(
                "tz typo",
                CronSchedule::Cron {
                    expr: "0 9 * * *".into(),
                    tz: Some("America/Vancovuer".into()),
                },
                CronPayload::system_event("hello"),
                false,
            )
            .unwrap_err();
        assert!(err.to_string().contains("unknown timezone 'America/Vancovuer'"));
        assert!(svc.list_jobs(true).is_empty());
    }

    #[test]
    fn add_job_accepts_valid_timezone() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir);
        let job = svc
            .add_job(
                "tz ok",
                CronSchedule::Cron {
                    expr: "0 9 * * *".into(),
                    tz: Some("America/Vancouver".into()),
                },
                CronPayload::system_event("hello"),
                false,
            )
            .unwrap();
        assert!(job.state.next_run_at_ms.is_some());
    }

    #[test]
    fn add_job_rejects_past_at() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir);
        let err = svc
            .add_job(
                "too late",
                CronSchedule::At { at_ms: now_ms() - 1000 },
                CronPayload::system_event("hello"),
                true,
            )
            .unwrap_err();
        assert!(err.to_string().contains("future"));
    }

    #[test]
    fn tick_fires_due_every_job_and_reschedules() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir);
        let job = svc
            .add_job(
                "pulse",
                CronSchedule::Every { every_ms: 5_000 },
                CronPayload::system_event("beat"),
                false,
            )
            .unwrap();

        let fire_at = job.state.next_run_at_ms.unwrap();
        let due = svc.tick(fire_at);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, job.id);

        let rescheduled = &svc.list_jobs(true)[0];
        let next = rescheduled.state.next_run_at_ms.unwrap();
        assert!((next - (fire_at + 5_000)).abs() <= 5, "next run drifted: {next}");
        assert_eq!(rescheduled.state.last_run_at_ms, Some(fire_at));
    }

    #[test]
    fn tick_ignores_jobs_not_yet_due() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir);
        svc.add_job(
            "later",
            CronSchedule::Every { every_ms: 3_600_000 },
            CronPayload::system_event("x"),
            false,
        )
        .unwrap();
        assert!(svc.tick(now_ms()).is_empty());
    }

    #[test]
    fn one_shot_is_removed_after_result_when_delete_after_run() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir);
        let job = svc
            .add_job(
                "once",
                CronSchedule::At { at_ms: now_ms() + 50 },
                CronPayload::system_event("ping"),
                true,
            )
            .unwrap();

        let due = svc.tick(now_ms() + 60);
        assert_eq!(due.len(), 1);
        svc.record_result(&job.id, true, "done");
        assert!(svc.list_jobs(true).is_empty());
    }

    #[test]
    fn record_result_keeps_recurring_job_with_last_result() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir);
        let job = svc
            .add_job(
                "keeper",
                CronSchedule::Every { every_ms: 1_000 },
                CronPayload::system_event("x"),
                false,
            )
            .unwrap();
        svc.record_result(&job.id, false, "boom");
        let stored = &svc.list_jobs(true)[0];
        assert_eq!(stored.state.last_result.as_deref(), Some("error: boom"));
    }

    #[test]
    fn missed_periodic_run_fires_immediately_on_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cron").join("jobs.json");
        {
            let svc = CronService::new(&path);
            svc.add_job(
                "stale",
                CronSchedule::Every { every_ms: 1_000 },
                CronPayload::system_event("x"),
                false,
            )
            .unwrap();
        }

        // Rewrite the stored next run into the past, then reload.
        let text = std::fs::read_to_string(&path).unwrap();
        let mut root: serde_json::Value = serde_json::from_str(&text).unwrap();
        root["jobs"][0]["state"]["next_run_at_ms"] = serde_json::json!(1000);
        std::fs::write(&path, serde_json::to_string(&root).unwrap()).unwrap();

        let svc = CronService::new(&path);
        let due = svc.tick(now_ms());
        assert_eq!(due.len(), 1, "missed job should fire on the first tick");
    }

    #[test]
    fn store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cron").join("jobs.json");
        let id = {
            let svc = CronService::new(&path);
            svc.add_job(
                "durable",
                CronSchedule::Every { every_ms: 60_000 },
                CronPayload::agent_turn("check email").delivered_to("telegram", "42"),
                false,
            )
            .unwrap()
            .id
        };

        let svc = CronService::new(&path);
        let jobs = svc.list_jobs(true);
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, id);
        assert_eq!(jobs[0].payload.to.as_deref(), Some("42"));
    }
}
