// Copyright (c) 2025-2026 The Freja Authors
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tracing::info;

/// Serializes concurrent install attempts within the process.
static INSTALL_LOCK: Mutex<()> = Mutex::const_new(());

/// Detect launch failures caused by a missing browser binary.
pub fn is_missing_browser_error(message: &str) -> bool {
    let text = message.to_lowercase();
    ["no such file", "not found", "could not auto detect", "executable doesn't exist"]
        .iter()
        .any(|pattern| text.contains(pattern))
}

/// Download a managed chromium build into `cache_dir` and return the
/// executable path.  Used once when launch fails and auto-install is on.
pub async fn install_browser(cache_dir: &Path) -> Result<PathBuf, String> {
    use chromiumoxide::fetcher::{BrowserFetcher, BrowserFetcherOptions};

    let _guard = INSTALL_LOCK.lock().await;

    tokio::fs::create_dir_all(cache_dir)
        .await
        .map_err(|e| format!("cannot create browser cache dir: {e}"))?;

    let options = BrowserFetcherOptions::builder()
        .with_path(cache_dir)
        .build()
        .map_err(|e| format!("fetcher options: {e}"))?;
    let fetcher = BrowserFetcher::new(options);
    let info = fetcher
        .fetch()
        .await
        .map_err(|e| format!("browser download failed: {e}"))?;

    info!(path = %info.executable_path.display(), "downloaded managed chromium");
    Ok(info.executable_path)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_browser_detection_matches_common_messages() {
        assert!(is_missing_browser_error("io error: No such file or directory"));
        assert!(is_missing_browser_error("Could not auto detect a chrome executable"));
        assert!(!is_missing_browser_error("net::ERR_CONNECTION_REFUSED"));
    }
}
