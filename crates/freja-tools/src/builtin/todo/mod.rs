// Copyright (c) 2025-2026 The Freja Authors
//
// SPDX-License-Identifier: MIT
//! TODO board: markdown file with an embedded JSON data block, a dependency
//! DAG over active items, and a daily review that is idempotent per
//! calendar day.

mod models;
mod service;
mod storage;
mod tool;

pub use models::{TodoItem, TodoStatus, TodoStore, TodoStoreMeta};
pub use service::TodoService;
pub use storage::TodoStorage;
pub use tool::TodoTool;
