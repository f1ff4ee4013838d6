// Copyright (c) 2025-2026 The Freja Authors
//
// SPDX-License-Identifier: MIT
use std::net::IpAddr;
use std::path::{Component, Path, PathBuf};

use url::Url;

const LOCAL_HOSTNAMES: [&str; 3] = ["localhost", "localhost.localdomain", "host.docker.internal"];

const ALLOWED_REQUEST_SCHEMES: [&str; 5] = ["http", "https", "about", "blob", "data"];

/// Persisted-state keys are file-name material; keep them boring.
pub fn validate_state_key(state_key: &str) -> Result<(), String> {
    let ok = !state_key.is_empty()
        && state_key.len() <= 64
        && state_key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if ok {
        Ok(())
    } else {
        Err("stateKey must match [A-Za-z0-9_-]{1,64}".to_string())
    }
}

/// Resolve a path and require it to stay inside the workspace.
pub fn resolve_path_in_workspace(
    workspace: &Path,
    raw_path: &str,
    label: &str,
) -> Result<PathBuf, String> {
    if raw_path.trim().is_empty() {
        return Err(format!("{label} must not be empty"));
    }

    let candidate = PathBuf::from(raw_path);
    let joined = if candidate.is_absolute() {
        candidate
    } else {
        workspace.join(candidate)
    };
    let target = lexical_normalize(&joined);
    let root = lexical_normalize(workspace);

    if target != root && !target.starts_with(&root) {
        return Err(format!("{label} must stay within workspace"));
    }
    Ok(target)
}

fn lexical_normalize(path: &Path) -> PathBuf {
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

/// Validate a top-level navigation URL: http/https only, host present,
/// private/local hosts blocked unless explicitly allowed.
pub fn validate_navigation_url(
    url: &str,
    allow_private_network: bool,
    block_file_scheme: bool,
) -> Result<(), String> {
    let Ok(parsed) = Url::parse(url) else {
        return Err(format!("invalid URL: {url}"));
    };
    let scheme = parsed.scheme().to_lowercase();

    if scheme == "file" && block_file_scheme {
        return Err("file:// URLs are blocked".to_string());
    }
    if scheme != "http" && scheme != "https" {
        return Err(format!("Only http/https URLs are allowed, got '{scheme}'"));
    }

    let Some(host) = parsed.host_str().filter(|h| !h.is_empty()) else {
        return Err("URL host is required".to_string());
    };
    if !allow_private_network && is_private_or_local_host(host) {
        return Err(format!("Private/local host blocked: {host}"));
    }
    Ok(())
}

/// Per-request guard: returns the blocking reason, or `None` when allowed.
/// about/blob/data requests pass; anything outside the allow-list is
/// rejected; http(s) requests get the same private-host check as navigation.
pub fn request_url_block_reason(
    url: &str,
    allow_private_network: bool,
    block_file_scheme: bool,
) -> Option<String> {
    let Ok(parsed) = Url::parse(url) else {
        return Some(format!("Unparseable request URL: {url}"));
    };
    let scheme = parsed.scheme().to_lowercase();

    if scheme == "file" && block_file_scheme {
        return Some("file:// requests are blocked".to_string());
    }
    if !ALLOWED_REQUEST_SCHEMES.contains(&scheme.as_str()) {
        return Some(format!("Unsupported URL scheme: {scheme}"));
    }
    if scheme != "http" && scheme != "https" {
        return None;
    }

    let Some(host) = parsed.host_str().filter(|h| !h.is_empty()) else {
        return Some("Missing host".to_string());
    };
    if !allow_private_network && is_private_or_local_host(host) {
        return Some(format!("Private/local host blocked: {host}"));
    }
    None
}

/// Local/private detection by hostname or literal IP (loopback, RFC1918,
/// link-local, multicast, unspecified, `.local`).
pub fn is_private_or_local_host(host: &str) -> bool {
    let normalized = host.trim_end_matches('.').to_lowercase();

    if LOCAL_HOSTNAMES.contains(&normalized.as_str()) || normalized.ends_with(".local") {
        return true;
    }

    let bare = normalized.trim_start_matches('[').trim_end_matches(']');
    let Ok(ip) = bare.parse::<IpAddr>() else {
        return false;
    };
    match ip {
        IpAddr::V4(v4) => {
            v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_multicast()
                || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_multicast()
                || v6.is_unspecified()
                // fe80::/10 link-local and fc00::/7 unique-local
                || (v6.segments()[0] & 0xffc0) == 0xfe80
                || (v6.segments()[0] & 0xfe00) == 0xfc00
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_key_accepts_simple_names() {
        assert!(validate_state_key("session-1_A").is_ok());
        assert!(validate_state_key(&"a".repeat(64)).is_ok());
    }

    #[test]
    fn state_key_rejects_bad_input() {
        assert!(validate_state_key("").is_err());
        assert!(validate_state_key("has space").is_err());
        assert!(validate_state_key("dots.are.bad").is_err());
        assert!(validate_state_key(&"a".repeat(65)).is_err());
    }

    #[test]
    fn workspace_path_resolution_blocks_escape() {
        let ws = Path::new("/ws");
        assert!(resolve_path_in_workspace(ws, "shots/a.png", "path").is_ok());
        assert!(resolve_path_in_workspace(ws, "../etc/passwd", "path").is_err());
        assert!(resolve_path_in_workspace(ws, "/etc/passwd", "path").is_err());
        assert!(resolve_path_in_workspace(ws, "  ", "path").is_err());
    }

    #[test]
    fn navigation_rejects_file_and_exotic_schemes() {
        assert!(validate_navigation_url("file:///etc/passwd", false, true).is_err());
        assert!(validate_navigation_url("ftp://example.com", false, true).is_err());
        assert!(validate_navigation_url("https://example.com", false, true).is_ok());
    }

    #[test]
    fn navigation_blocks_private_hosts_unless_allowed() {
        assert!(validate_navigation_url("http://127.0.0.1:8000", false, true).is_err());
        assert!(validate_navigation_url("http://192.168.1.5", false, true).is_err());
        assert!(validate_navigation_url("http://printer.local", false, true).is_err());
        assert!(validate_navigation_url("http://127.0.0.1:8000", true, true).is_ok());
    }

    #[test]
    fn request_guard_allows_data_and_blob() {
        assert!(request_url_block_reason("data:text/plain,hi", false, true).is_none());
        assert!(request_url_block_reason("about:blank", false, true).is_none());
        assert!(request_url_block_reason("blob:https://x/1-2", false, true).is_none());
    }

    #[test]
    fn request_guard_blocks_file_and_private() {
        assert!(request_url_block_reason("file:///etc/passwd", false, true).is_some());
        assert!(request_url_block_reason("http://10.0.0.8/metrics", false, true).is_some());
        assert!(request_url_block_reason("ws://example.com", false, true).is_some());
        assert!(request_url_block_reason("https://example.com/app.js", false, true).is_none());
    }

    #[test]
    fn private_host_detection_covers_ranges() {
        for host in [
            "localhost",
            "host.docker.internal",
            "printer.local",
            "127.0.0.1",
            "10.1.2.3",
            "192.168.0.1",
            "172.16.0.9",
            "169.254.1.1",
            "0.0.0.0",
            "::1",
            "fe80::1",
        ] {
            assert!(is_private_or_local_host(host), "{host} should be private");
        }
        for host in ["example.com", "8.8.8.8", "172.32.0.1"] {
            assert!(!is_private_or_local_host(host), "{host} should be public");
        }
    }
}
