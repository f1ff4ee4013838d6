// Copyright (c) 2025-2026 The Freja Authors
//
// SPDX-License-Identifier: MIT
//! Browser automation over the Chrome DevTools Protocol: a bounded list of
//! actions runs in one session with a network guard, optional persisted
//! cookie state, and workspace-confined screenshots.

mod installer;
mod safety;
mod tool;

pub use installer::{install_browser, is_missing_browser_error};
pub use safety::{
    is_private_or_local_host, request_url_block_reason, resolve_path_in_workspace,
    validate_navigation_url, validate_state_key,
};
pub use tool::BrowserRunTool;
