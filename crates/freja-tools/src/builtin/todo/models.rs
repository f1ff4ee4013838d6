// Copyright (c) 2025-2026 The Freja Authors
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TodoStatus {
    Todo,
    Doing,
    Blocked,
    Done,
    Archived,
}

impl TodoStatus {
    pub const ALL: [TodoStatus; 5] = [
        TodoStatus::Todo,
        TodoStatus::Doing,
        TodoStatus::Blocked,
        TodoStatus::Done,
        TodoStatus::Archived,
    ];

    /// Open = counts toward active work and dependency checks.
    pub fn is_open(&self) -> bool {
        matches!(self, TodoStatus::Todo | TodoStatus::Doing | TodoStatus::Blocked)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TodoStatus::Todo => "todo",
            TodoStatus::Doing => "doing",
            TodoStatus::Blocked => "blocked",
            TodoStatus::Done => "done",
            TodoStatus::Archived => "archived",
        }
    }

    pub fn parse(text: &str) -> Result<Self, String> {
        match text.trim().to_lowercase().as_str() {
            "todo" => Ok(TodoStatus::Todo),
            "doing" => Ok(TodoStatus::Doing),
            "blocked" => Ok(TodoStatus::Blocked),
            "done" => Ok(TodoStatus::Done),
            "archived" => Ok(TodoStatus::Archived),
            _ => Err("status must be one of [todo, doing, blocked, done, archived]".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoItem {
    /// `T####`; the numeric part derives from `meta.last_id`.
    pub id: String,
    pub title: String,
    pub status: TodoStatus,
    /// 1 (urgent) .. 4 (someday).
    pub priority: u8,
    #[serde(default)]
    pub note: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoStoreMeta {
    pub version: u32,
    pub last_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_review_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_review_summary: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoStore {
    pub meta: TodoStoreMeta,
    pub items: Vec<TodoItem>,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
