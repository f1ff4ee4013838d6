// Copyright (c) 2025-2026 The Freja Authors
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

fn now_iso() -> String {
    Local::now().format("%Y-%m-%dT%H:%M:%S").to_string()
}

/// One entry in the append-only conversation log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEntry {
    pub role: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools_used: Option<Vec<String>>,
}

impl SessionEntry {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
            name: None,
            timestamp: now_iso(),
            tools_used: None,
        }
    }
}

/// Linearized conversation state keyed by `channel:chat_id`.
///
/// `last_consolidated` marks how much of the prefix has been archived into
/// long-term memory; it never exceeds the message count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub key: String,
    pub messages: Vec<SessionEntry>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub last_consolidated: usize,
}

impl Session {
    pub fn new(key: impl Into<String>) -> Self {
        let now = now_iso();
        Self {
            key: key.into(),
            messages: Vec::new(),
            metadata: Map::new(),
            created_at: now.clone(),
            updated_at: now,
            last_consolidated: 0,
        }
    }

    pub fn add_message(&mut self, role: &str, content: &str) {
        self.messages.push(SessionEntry::new(role, content));
        self.updated_at = now_iso();
    }

    pub fn push_entry(&mut self, entry: SessionEntry) {
        self.messages.push(entry);
        self.updated_at = now_iso();
    }

    /// (role, content) pairs for context building: the unarchived tail,
    /// capped at `window` entries.
    pub fn history(&self, window: usize) -> Vec<(String, String)> {
        let start = self
            .last_consolidated
            .max(self.messages.len().saturating_sub(window));
        self.messages[start.min(self.messages.len())..]
            .iter()
            .map(|m| (m.role.clone(), m.content.clone()))
            .collect()
    }

    /// Entries not yet archived into long-term memory.
    pub fn unconsolidated(&self) -> &[SessionEntry] {
        &self.messages[self.last_consolidated.min(self.messages.len())..]
    }
}

/// Per-key persistent session store: one JSON file per session under
/// `sessions/`, atomically replaced, with an in-process cache and per-key
/// async locks to serialize consolidation against normal turns.
pub struct SessionStore {
    dir: PathBuf,
    cache: Mutex<HashMap<String, Session>>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionStore {
    pub fn new(workspace: &std::path::Path) -> Self {
        Self {
            dir: workspace.join("sessions"),
            cache: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn get_or_create(&self, key: &str) -> Session {
        if let Some(session) = self.cache.lock().unwrap().get(key) {
            return session.clone();
        }
        let session = self.load(key).unwrap_or_else(|| Session::new(key));
        self.cache
            .lock()
            .unwrap()
            .insert(key.to_string(), session.clone());
        session
    }

    pub fn save(&self, session: &Session) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating {}", self.dir.display()))?;
        let path = self.path_for(&session.key);
        let text = serde_json::to_string_pretty(session)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, text).with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("replacing {}", path.display()))?;
        self.cache
            .lock()
            .unwrap()
            .insert(session.key.clone(), session.clone());
        Ok(())
    }

    pub fn invalidate(&self, key: &str) {
        self.cache.lock().unwrap().remove(key);
    }

    /// Per-key lock serializing consolidation against the turn that owns
    /// the session.
    pub fn lock_for(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn load(&self, key: &str) -> Option<Session> {
        let text = std::fs::read_to_string(self.path_for(key)).ok()?;
        serde_json::from_str(&text).ok()
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let safe: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
