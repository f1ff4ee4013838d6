// Copyright (c) 2025-2026 The Freja Authors
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use chrono::Local;
use serde_json::Value;
use tracing::{debug, warn};

use freja_model::{ChatMessage, LLMProvider};

use crate::session::Session;

/// Long-term memory on disk: `memory/MEMORY.md` holds the current summary
/// (overwritten on change), `memory/HISTORY.md` is an append-only log of
/// timestamped consolidation entries.
pub struct MemoryStore {
    memory_dir: PathBuf,
}

impl MemoryStore {
    pub fn new(workspace: &Path) -> Self {
        Self { memory_dir: workspace.join("memory") }
    }

    pub fn memory_path(&self) -> PathBuf {
        self.memory_dir.join("MEMORY.md")
    }

    pub fn history_path(&self) -> PathBuf {
        self.memory_dir.join("HISTORY.md")
    }

    /// Current long-term memory, if any has been written yet.
    pub fn read_long_term(&self) -> Option<String> {
        std::fs::read_to_string(self.memory_path())
            .ok()
            .filter(|text| !text.trim().is_empty())
    }

    /// Compress old session messages into long-term memory.
    ///
    /// With `archive_all` the whole unarchived tail is summarized (the
    /// `/new` path); otherwise the most recent `max(2, memory_window / 2)`
    /// entries stay live and only the prefix is archived.
    ///
    /// Never fatal: any model, parse, or IO failure returns `false` and
    /// leaves the session untouched.
    pub async fn consolidate(
        &self,
        session: &mut Session,
        provider: &dyn LLMProvider,
        model: &str,
        archive_all: bool,
        memory_window: usize,
    ) -> bool {
        let keep = if archive_all { 0 } else { (memory_window / 2).max(2) };
        let total = session.messages.len();
        let start = session.last_consolidated.min(total);
        let end = total.saturating_sub(keep);
        if start >= end {
            return true;
        }

        let slice = &session.messages[start..end];
        let transcript: Vec<String> = slice
            .iter()
            .map(|m| format!("{}: {}", m.role, m.content))
            .collect();
        let current_memory = self.read_long_term().unwrap_or_default();

        let prompt = format!(
            "You maintain the agent's long-term memory.\n\n\
             Current MEMORY.md:\n{current_memory}\n\n\
             Conversation to archive:\n{}\n\n\
             Respond with raw JSON only (no code fences, no commentary):\n\
             {{\"history_entry\": \"one-paragraph summary of the archived conversation\",\n \
             \"memory_update\": \"the full updated MEMORY.md content\"}}\n\
             Both values MUST be strings.",
            transcript.join("\n")
        );

        let response = match provider
            .chat(&[ChatMessage::user(prompt)], &[], model, 4096, 0.3)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "memory consolidation call failed");
                return false;
            }
        };
        let Some((history_entry, memory_update)) =
            parse_consolidation(response.content.as_deref().unwrap_or_default())
        else {
            warn!("memory consolidation returned unusable output; session left intact");
            return false;
        };

        if let Err(e) = std::fs::create_dir_all(&self.memory_dir) {
            warn!(error = %e, "cannot create memory dir");
            return false;
        }
        let stamp = Local::now().format("%Y-%m-%d %H:%M");
        let history_line = format!("- [{stamp}] {history_entry}\n");
        if let Err(e) = append_to_file(&self.history_path(), &history_line) {
            warn!(error = %e, "cannot append history entry");
            return false;
        }
        if memory_update != current_memory {
            if let Err(e) = std::fs::write(self.memory_path(), &memory_update) {
                warn!(error = %e, "cannot update long-term memory");
                return false;
            }
        }

        session.last_consolidated = if archive_all { 0 } else { end };
        if archive_all {
            debug!(archived = end - start, "session archived into long-term memory");
        } else {
            debug!(archived = end - start, keep, "session window consolidated");
        }
        true
    }
}

/// Parse the `{history_entry, memory_update}` object, tolerating a leading
/// code fence.  Both values must be strings.
fn parse_consolidation(raw: &str) -> Option<(String, String)> {
    let mut text = raw.trim();
    if text.starts_with("```") {
        text = text
            .trim_start_matches("```json")
            .trim_start_matches("```")
            .trim();
        if let Some(index) = text.rfind("```") {
            text = text[..index].trim();
        }
    }

    let value: Value = serde_json::from_str(text).ok()?;
    let history_entry = value.get("history_entry")?.as_str()?.to_string();
    let memory_update = value.get("memory_update")?.as_str()?.to_string();
    Some((history_entry, memory_update))
}

fn append_to_file(path: &Path, line: &str) -> std::io::Result<()> {
    use std::io::Write;
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    file.write_all(line.as_bytes())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
