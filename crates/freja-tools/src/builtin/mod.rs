// Copyright (c) 2025-2026 The Freja Authors
//
// SPDX-License-Identifier: MIT
//! Builtin tool implementations.

pub mod browser;
pub mod codex;
pub mod cron;
pub mod fs;
pub mod message;
pub mod shell;
pub mod spawn;
pub mod todo;
pub mod web_fetch;
pub mod web_search;

pub use browser::BrowserRunTool;
pub use codex::{CodexMergeTool, CodexRunTool};
pub use cron::CronTool;
pub use fs::{EditFileTool, ListDirTool, ReadFileTool, WriteFileTool};
pub use message::MessageTool;
pub use shell::ExecTool;
pub use spawn::SpawnTool;
pub use todo::TodoTool;
pub use web_fetch::WebFetchTool;
pub use web_search::WebSearchTool;
