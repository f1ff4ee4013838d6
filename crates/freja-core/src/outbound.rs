// Copyright (c) 2025-2026 The Freja Authors
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::warn;

use freja_bus::{MessageBus, OutboundMessage};
use freja_redact::Redactor;
use freja_tools::OutboundSink;

use crate::session::Session;

/// Session metadata key holding the image carry-over state.
pub const RECENT_IMAGE_META_KEY: &str = "_recent_image_context";

/// How many follow-up turns re-attach the most recent image.
const RECENT_IMAGE_FOLLOWUP_TURNS: i64 = 2;

/// Outbound safety: redaction, media path normalization, and the
/// recent-image carry-over state kept in session metadata.
pub struct OutboundPolicy {
    workspace: PathBuf,
    redactor: Redactor,
}

impl OutboundPolicy {
    pub fn new(workspace: &Path, redactor: Redactor) -> Self {
        Self { workspace: workspace.to_path_buf(), redactor }
    }

    pub fn redact_text(&self, content: &str) -> String {
        self.redactor.redact(content)
    }

    /// Normalize outbound media to absolute paths.
    ///
    /// Candidate order for relative paths: process CWD, then the workspace
    /// after stripping a literal `workspace/` prefix, then workspace-joined.
    /// The first existing file wins; otherwise the workspace-joined path is
    /// kept so the channel can report a meaningful missing-file error.
    pub fn normalize_media_paths(&self, media: &[String]) -> Vec<String> {
        let mut normalized = Vec::new();
        for raw in media {
            let text = raw.trim();
            if text.is_empty() {
                continue;
            }

            let path = PathBuf::from(text);
            let mut candidates: Vec<PathBuf> = Vec::new();
            if path.is_absolute() {
                candidates.push(path.clone());
            } else {
                if let Ok(cwd) = std::env::current_dir() {
                    candidates.push(cwd.join(&path));
                }
                let forward = text.replace('\\', "/");
                if let Some(rest) = forward.strip_prefix("workspace/") {
                    if !rest.is_empty() {
                        candidates.push(self.workspace.join(rest));
                    }
                }
                candidates.push(self.workspace.join(&path));
            }

            let chosen = candidates
                .iter()
                .find(|candidate| candidate.is_file())
                .cloned()
                .unwrap_or_else(|| {
                    if path.is_absolute() {
                        path.clone()
                    } else {
                        let forward = text.replace('\\', "/");
                        match forward.strip_prefix("workspace/") {
                            Some(rest) if !rest.is_empty() => self.workspace.join(rest),
                            _ => self.workspace.join(&path),
                        }
                    }
                });
            normalized.push(chosen.to_string_lossy().into_owned());
        }
        normalized
    }

    /// Redacted copy with normalized media; the only sanctioned way to put
    /// a message on the outbound queue.
    pub fn redact_outbound(&self, msg: OutboundMessage) -> OutboundMessage {
        OutboundMessage {
            channel: msg.channel,
            chat_id: msg.chat_id,
            content: self.redact_text(&msg.content),
            reply_to: msg.reply_to,
            media: self.normalize_media_paths(&msg.media),
            metadata: msg.metadata,
        }
    }

    /// Latest usable image in a media list (scanning from the end).
    pub fn extract_latest_image(&self, media: &[String]) -> Option<String> {
        media
            .iter()
            .rev()
            .map(|raw| raw.trim())
            .filter(|text| !text.is_empty())
            .find(|text| is_image_file(text))
            .map(str::to_string)
    }

    /// Remember the image for short follow-up reuse.
    pub fn remember_recent_image(&self, session: &mut Session, image_path: &str) {
        session.metadata.insert(
            RECENT_IMAGE_META_KEY.to_string(),
            json!({"path": image_path, "turns_left": RECENT_IMAGE_FOLLOWUP_TURNS}),
        );
    }

    /// Reuse the remembered image for one turn, decrementing the counter;
    /// expired or no-longer-readable entries are dropped.
    pub fn consume_recent_image(&self, session: &mut Session) -> Option<String> {
        let raw = session.metadata.get(RECENT_IMAGE_META_KEY)?.clone();
        let (path, turns_left) = match (raw["path"].as_str(), raw["turns_left"].as_i64()) {
            (Some(path), Some(turns)) if turns > 0 => (path.to_string(), turns),
            _ => {
                session.metadata.remove(RECENT_IMAGE_META_KEY);
                return None;
            }
        };
        if !is_image_file(&path) {
            session.metadata.remove(RECENT_IMAGE_META_KEY);
            return None;
        }

        let remaining = turns_left - 1;
        if remaining <= 0 {
            session.metadata.remove(RECENT_IMAGE_META_KEY);
        } else {
            session.metadata.insert(
                RECENT_IMAGE_META_KEY.to_string(),
                json!({"path": path, "turns_left": remaining}),
            );
        }
        Some(path)
    }

}

fn is_image_file(path: &str) -> bool {
    let p = Path::new(path);
    if !p.is_file() {
        return false;
    }
    mime_guess::from_path(p)
        .first()
        .map(|m| m.type_() == mime_guess::mime::IMAGE)
        .unwrap_or(false)
}

/// The sink handed to the message tool and the dispatcher: applies the
/// outbound policy, then publishes to the bus.
pub struct PolicyOutboundSink {
    bus: MessageBus,
    policy: Arc<OutboundPolicy>,
}

impl PolicyOutboundSink {
    pub fn new(bus: MessageBus, policy: Arc<OutboundPolicy>) -> Self {
        Self { bus, policy }
    }
}

#[async_trait]
impl OutboundSink for PolicyOutboundSink {
    async fn send(&self, msg: OutboundMessage) {
        let redacted = self.policy.redact_outbound(msg);
        if redacted.content.is_empty() && redacted.media.is_empty() {
            warn!(channel = %redacted.channel, "dropping empty outbound message");
            return;
        }
        self.bus.publish_outbound(redacted).await;
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(dir: &tempfile::TempDir) -> OutboundPolicy {
        OutboundPolicy::new(
            dir.path(),
            Redactor::new(true, Some(dir.path()), None, &["sk-policy-secret-123456".to_string()]),
        )
    }

    #[test]
    fn workspace_prefixed_media_resolves_to_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let shots = dir.path().join("screenshots");
        std::fs::create_dir_all(&shots).unwrap();
        let file = shots.join("shot.png");
        std::fs::write(&file, b"\x89PNG").unwrap();

        let p = policy(&dir);
        let normalized =
            p.normalize_media_paths(&["workspace/screenshots/shot.png".to_string()]);
        assert_eq!(normalized, vec![file.to_string_lossy().into_owned()]);
    }

    #[test]
    fn missing_relative_media_falls_back_to_workspace_join() {
        let dir = tempfile::tempdir().unwrap();
        let p = policy(&dir);
        let normalized = p.normalize_media_paths(&["notes/missing.png".to_string()]);
        assert_eq!(
            normalized,
            vec![dir.path().join("notes/missing.png").to_string_lossy().into_owned()]
        );
    }

    #[test]
    fn absolute_media_passes_through() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("direct.png");
        std::fs::write(&file, b"x").unwrap();
        let p = policy(&dir);
        let normalized = p.normalize_media_paths(&[file.to_string_lossy().into_owned()]);
        assert_eq!(normalized, vec![file.to_string_lossy().into_owned()]);
    }

    #[test]
    fn blank_entries_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let p = policy(&dir);
        assert!(p.normalize_media_paths(&["  ".to_string(), String::new()]).is_empty());
    }

    #[test]
    fn redact_outbound_masks_content() {
        let dir = tempfile::tempdir().unwrap();
        let p = policy(&dir);
        let msg = OutboundMessage::new("telegram", "1", "leak sk-policy-secret-123456 now");
        let out = p.redact_outbound(msg);
        assert!(!out.content.contains("sk-policy-secret-123456"));
        assert!(out.content.contains("[REDACTED_SECRET]"));
    }

    #[test]
    fn image_carry_over_lasts_two_turns() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("vision.png");
        std::fs::write(&image, b"\x89PNG").unwrap();
        let image_path = image.to_string_lossy().into_owned();

        let p = policy(&dir);
        let mut session = Session::new("k");
        p.remember_recent_image(&mut session, &image_path);

        assert_eq!(p.consume_recent_image(&mut session).as_deref(), Some(image_path.as_str()));
        assert_eq!(p.consume_recent_image(&mut session).as_deref(), Some(image_path.as_str()));
        assert!(p.consume_recent_image(&mut session).is_none());
        assert!(!session.metadata.contains_key(RECENT_IMAGE_META_KEY));
    }

    #[test]
    fn vanished_image_clears_carry_over() {
        let dir = tempfile::tempdir().unwrap();
        let p = policy(&dir);
        let mut session = Session::new("k");
        p.remember_recent_image(&mut session, "/nonexistent/vision.png");
        assert!(p.consume_recent_image(&mut session).is_none());
        assert!(!session.metadata.contains_key(RECENT_IMAGE_META_KEY));
    }

    #[test]
    fn extract_latest_image_scans_from_the_end() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a.png");
        let second = dir.path().join("b.png");
        std::fs::write(&first, b"x").unwrap();
        std::fs::write(&second, b"y").unwrap();

        let p = policy(&dir);
        let media = vec![
            first.to_string_lossy().into_owned(),
            "not-an-image.txt".to_string(),
            second.to_string_lossy().into_owned(),
        ];
        assert_eq!(
            p.extract_latest_image(&media).as_deref(),
            Some(second.to_string_lossy().as_ref())
        );
    }
}
