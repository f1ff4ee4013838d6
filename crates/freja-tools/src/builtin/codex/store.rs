// Copyright (c) 2025-2026 The Freja Authors
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use super::models::MergePlanRecord;

/// Flat directory of merge-plan records, one JSON file per plan, written
/// atomically.  Records are never auto-deleted.
pub struct MergePlanStore {
    dir: PathBuf,
}

impl MergePlanStore {
    pub fn new(workspace: &Path) -> Self {
        Self { dir: workspace.join("memory").join("merge_plans") }
    }

    pub fn directory(&self) -> &Path {
        &self.dir
    }

    pub fn save(&self, record: &MergePlanRecord) -> Result<(), String> {
        std::fs::create_dir_all(&self.dir).map_err(|e| format!("cannot create plan dir: {e}"))?;
        let text = serde_json::to_string_pretty(record)
            .map_err(|e| format!("cannot serialize plan: {e}"))?;
        let path = self.path_for(&record.plan_id);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, text).map_err(|e| format!("cannot write plan: {e}"))?;
        std::fs::rename(&tmp, &path).map_err(|e| format!("cannot replace plan: {e}"))
    }

    pub fn load(&self, plan_id: &str) -> Option<MergePlanRecord> {
        let path = self.path_for(plan_id);
        let text = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&text).ok()
    }

    /// All readable plans, most recently updated first.
    pub fn list(&self, limit: usize) -> Vec<MergePlanRecord> {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        let mut records: Vec<MergePlanRecord> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().extension().map(|e| e == "json").unwrap_or(false))
            .filter_map(|entry| std::fs::read_to_string(entry.path()).ok())
            .filter_map(|text| serde_json::from_str(&text).ok())
            .collect();
        records.sort_by_key(|r: &MergePlanRecord| std::cmp::Reverse(r.updated_at_ms));
        records.truncate(limit.max(1));
        records
    }

    fn path_for(&self, plan_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", plan_id.trim()))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::Map;

    use super::super::models::MergePlanStatus;
    use super::*;

    fn record(id: &str, updated_at_ms: i64) -> MergePlanRecord {
        MergePlanRecord {
            plan_id: id.into(),
            status: MergePlanStatus::Planned,
            created_at_ms: 1,
            updated_at_ms,
            base_ref: "origin/main".into(),
            upstream_ref: "upstream/main".into(),
            target_branch: "main".into(),
            working_dir: "/repo".into(),
            report_path: "/ws/reports/r.md".into(),
            report_excerpt: String::new(),
            recommendation: String::new(),
            confirmation_token_hash: String::new(),
            revision: 0,
            last_feedback: None,
            plan_thread_id: None,
            plan_usage: Map::new(),
            execution: None,
        }
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = MergePlanStore::new(dir.path());
        store.save(&record("plan1", 10)).unwrap();
        let loaded = store.load("plan1").unwrap();
        assert_eq!(loaded.plan_id, "plan1");
    }

    #[test]
    fn load_unknown_plan_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = MergePlanStore::new(dir.path());
        assert!(store.load("nope").is_none());
    }

    #[test]
    fn list_orders_by_updated_desc_and_limits() {
        let dir = tempfile::tempdir().unwrap();
        let store = MergePlanStore::new(dir.path());
        store.save(&record("old", 10)).unwrap();
        store.save(&record("new", 20)).unwrap();
        store.save(&record("mid", 15)).unwrap();

        let all = store.list(10);
        let ids: Vec<&str> = all.iter().map(|r| r.plan_id.as_str()).collect();
        assert_eq!(ids, vec!["new", "mid", "old"]);

        assert_eq!(store.list(1).len(), 1);
    }

    #[test]
    fn unreadable_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = MergePlanStore::new(dir.path());
        store.save(&record("good", 10)).unwrap();
        std::fs::write(store.directory().join("bad.json"), "{nope").unwrap();
        assert_eq!(store.list(10).len(), 1);
    }
}
