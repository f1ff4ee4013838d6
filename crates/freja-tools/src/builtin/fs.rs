// Copyright (c) 2025-2026 The Freja Authors
//
// SPDX-License-Identifier: MIT
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::tool::Tool;

const READ_LIMIT_BYTES: usize = 100_000;

/// Resolve a user-supplied path against the workspace.
///
/// Relative paths are anchored at the workspace root (never the process
/// CWD); `~` expands to the home directory; the result is lexically
/// normalized so `..` cannot escape.  With `restrict` set, any resolved
/// path outside the workspace is rejected.
pub(crate) fn resolve_path(
    workspace: &Path,
    raw: &str,
    restrict: bool,
) -> Result<PathBuf, String> {
    let text = raw.trim();
    if text.is_empty() {
        return Err("Error: path must not be empty".to_string());
    }

    let expanded = if let Some(rest) = text.strip_prefix("~/") {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(rest)
    } else {
        PathBuf::from(text)
    };

    let joined = if expanded.is_absolute() {
        expanded
    } else {
        workspace.join(expanded)
    };
    let resolved = normalize(&joined);

    if restrict {
        let root = normalize(workspace);
        if resolved != root && !resolved.starts_with(&root) {
            return Err(format!(
                "Error: path is outside the workspace: {}",
                resolved.display()
            ));
        }
    }
    Ok(resolved)
}

/// Lexical normalization: resolves `.` and `..` without touching the disk.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

pub struct ReadFileTool {
    workspace: PathBuf,
    restrict: bool,
}

impl ReadFileTool {
    pub fn new(workspace: impl Into<PathBuf>, restrict: bool) -> Self {
        Self { workspace: workspace.into(), restrict }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a text file. Relative paths are resolved against the workspace."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "File path to read"}
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: Value) -> String {
        let raw = args["path"].as_str().unwrap_or_default();
        let path = match resolve_path(&self.workspace, raw, self.restrict) {
            Ok(p) => p,
            Err(e) => return e,
        };
        debug!(path = %path.display(), "read_file");
        match tokio::fs::read_to_string(&path).await {
            Ok(content) if content.len() > READ_LIMIT_BYTES => {
                let mut cut = READ_LIMIT_BYTES;
                while !content.is_char_boundary(cut) {
                    cut -= 1;
                }
                format!(
                    "{}\n... (truncated, {} more bytes)",
                    &content[..cut],
                    content.len() - cut
                )
            }
            Ok(content) => content,
            Err(e) => format!("Error: cannot read {}: {e}", path.display()),
        }
    }
}

pub struct WriteFileTool {
    workspace: PathBuf,
    restrict: bool,
}

impl WriteFileTool {
    pub fn new(workspace: impl Into<PathBuf>, restrict: bool) -> Self {
        Self { workspace: workspace.into(), restrict }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file, creating parent directories as needed."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "File path to write"},
                "content": {"type": "string", "description": "Full file content"}
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, args: Value) -> String {
        let raw = args["path"].as_str().unwrap_or_default();
        let content = args["content"].as_str().unwrap_or_default();
        let path = match resolve_path(&self.workspace, raw, self.restrict) {
            Ok(p) => p,
            Err(e) => return e,
        };
        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return format!("Error: cannot create {}: {e}", parent.display());
            }
        }
        debug!(path = %path.display(), bytes = content.len(), "write_file");
        match tokio::fs::write(&path, content).await {
            Ok(()) => format!("Wrote {} bytes to {}", content.len(), path.display()),
            Err(e) => format!("Error: cannot write {}: {e}", path.display()),
        }
    }
}

pub struct EditFileTool {
    workspace: PathBuf,
    restrict: bool,
}

impl EditFileTool {
    pub fn new(workspace: impl Into<PathBuf>, restrict: bool) -> Self {
        Self { workspace: workspace.into(), restrict }
    }
}

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Replace the first exact occurrence of old_text with new_text in a file."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "File to edit"},
                "old_text": {"type": "string", "description": "Exact text to replace"},
                "new_text": {"type": "string", "description": "Replacement text"}
            },
            "required": ["path", "old_text", "new_text"]
        })
    }

    async fn execute(&self, args: Value) -> String {
        let raw = args["path"].as_str().unwrap_or_default();
        let old_text = args["old_text"].as_str().unwrap_or_default();
        let new_text = args["new_text"].as_str().unwrap_or_default();
        let path = match resolve_path(&self.workspace, raw, self.restrict) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) => return format!("Error: cannot read {}: {e}", path.display()),
        };
        let Some(index) = content.find(old_text) else {
            return format!("Error: old_text not found in {}", path.display());
        };
        let mut edited = String::with_capacity(content.len());
        edited.push_str(&content[..index]);
        edited.push_str(new_text);
        edited.push_str(&content[index + old_text.len()..]);

        match tokio::fs::write(&path, edited).await {
            Ok(()) => format!("Edited {}", path.display()),
            Err(e) => format!("Error: cannot write {}: {e}", path.display()),
        }
    }
}

pub struct ListDirTool {
    workspace: PathBuf,
    restrict: bool,
}

impl ListDirTool {
    pub fn new(workspace: impl Into<PathBuf>, restrict: bool) -> Self {
        Self { workspace: workspace.into(), restrict }
    }
}

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List directory entries. Directories carry a trailing slash."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Directory to list (default workspace root)"}
            },
            "required": []
        })
    }

    async fn execute(&self, args: Value) -> String {
        let raw = args["path"].as_str().unwrap_or(".");
        let path = match resolve_path(&self.workspace, raw, self.restrict) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let mut reader = match tokio::fs::read_dir(&path).await {
            Ok(r) => r,
            Err(e) => return format!("Error: cannot list {}: {e}", path.display()),
        };
        let mut entries = Vec::new();
        while let Ok(Some(entry)) = reader.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            entries.push(if is_dir { format!("{name}/") } else { name });
        }
        entries.sort();
        if entries.is_empty() {
            format!("(empty) {}", path.display())
        } else {
            entries.join("\n")
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let ws = dir.path().join("workspace");
        std::fs::create_dir_all(&ws).unwrap();
        (dir, ws)
    }

    #[test]
    fn relative_paths_resolve_against_workspace() {
        let (_dir, ws) = workspace();
        let resolved = resolve_path(&ws, "notes/today.md", false).unwrap();
        assert_eq!(resolved, normalize(&ws.join("notes/today.md")));
    }

    #[test]
    fn dotdot_cannot_escape_when_restricted() {
        let (_dir, ws) = workspace();
        let err = resolve_path(&ws, "../outside.txt", true).unwrap_err();
        assert!(err.contains("outside the workspace"));
    }

    #[test]
    fn absolute_path_outside_workspace_is_rejected_when_restricted() {
        let (_dir, ws) = workspace();
        let err = resolve_path(&ws, "/etc/passwd", true).unwrap_err();
        assert!(err.contains("outside the workspace"));
    }

    #[test]
    fn absolute_path_allowed_when_unrestricted() {
        let (_dir, ws) = workspace();
        let resolved = resolve_path(&ws, "/etc/hosts", false).unwrap();
        assert_eq!(resolved, PathBuf::from("/etc/hosts"));
    }

    #[tokio::test]
    async fn write_then_read_round_trip() {
        let (_dir, ws) = workspace();
        let write = WriteFileTool::new(&ws, true);
        let read = ReadFileTool::new(&ws, true);

        let out = write
            .execute(json!({"path": "a/b.txt", "content": "hello"}))
            .await;
        assert!(out.starts_with("Wrote 5 bytes"), "{out}");

        let content = read.execute(json!({"path": "a/b.txt"})).await;
        assert_eq!(content, "hello");
    }

    #[tokio::test]
    async fn edit_replaces_first_occurrence_only() {
        let (_dir, ws) = workspace();
        std::fs::write(ws.join("f.txt"), "one two one").unwrap();
        let edit = EditFileTool::new(&ws, true);
        let out = edit
            .execute(json!({"path": "f.txt", "old_text": "one", "new_text": "ONE"}))
            .await;
        assert!(out.starts_with("Edited"), "{out}");
        assert_eq!(std::fs::read_to_string(ws.join("f.txt")).unwrap(), "ONE two one");
    }

    #[tokio::test]
    async fn edit_reports_missing_old_text() {
        let (_dir, ws) = workspace();
        std::fs::write(ws.join("f.txt"), "abc").unwrap();
        let edit = EditFileTool::new(&ws, true);
        let out = edit
            .execute(json!({"path": "f.txt", "old_text": "zzz", "new_text": "x"}))
            .await;
        assert!(out.contains("old_text not found"));
    }

    #[tokio::test]
    async fn list_dir_marks_directories() {
        let (_dir, ws) = workspace();
        std::fs::create_dir(ws.join("sub")).unwrap();
        std::fs::write(ws.join("file.txt"), "x").unwrap();
        let list = ListDirTool::new(&ws, true);
        let out = list.execute(json!({})).await;
        assert_eq!(out, "file.txt\nsub/");
    }

    #[tokio::test]
    async fn read_missing_file_is_an_error_string() {
        let (_dir, ws) = workspace();
        let read = ReadFileTool::new(&ws, true);
        let out = read.execute(json!({"path": "missing.txt"})).await;
        assert!(out.starts_with("Error:"), "{out}");
    }
}
