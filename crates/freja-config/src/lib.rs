// Copyright (c) 2025-2026 The Freja Authors
//
// SPDX-License-Identifier: MIT
//! Configuration for the freja agent runtime.
//!
//! The on-disk format is a single JSON file with camelCase keys
//! (default location `~/.freja/config.json`).  Internally everything is
//! snake_case; serde's `rename_all` handles the translation at the
//! boundary.  [`loader`] applies legacy-key migrations before
//! deserializing so older config files keep working.

mod loader;
mod schema;

pub use loader::{config_path, load_config, migrate_config, save_config};
pub use schema::{
    BrowserToolConfig, ChannelsConfig, CodexToolConfig, Config, ExecToolConfig, HeartbeatConfig,
    McpServerConfig, ProviderConfig, SearchProviderConfig, SearchProvidersConfig, SecurityConfig,
    ToolsConfig, WebSearchConfig, WebToolsConfig,
};
