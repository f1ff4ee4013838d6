// Copyright (c) 2025-2026 The Freja Authors
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde_json::Value;
use tracing::warn;

use crate::Config;

/// Default configuration file location.
pub fn config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".freja")
        .join("config.json")
}

/// Load configuration from `path` (or the default location), applying legacy
/// migrations first.  A missing or unreadable file yields the defaults.
pub fn load_config(path: Option<&Path>) -> Config {
    let path = path.map(Path::to_path_buf).unwrap_or_else(config_path);
    if !path.is_file() {
        return Config::default();
    }

    let parsed = std::fs::read_to_string(&path)
        .map_err(anyhow::Error::from)
        .and_then(|text| serde_json::from_str::<Value>(&text).map_err(Into::into))
        .map(migrate_config)
        .and_then(|data| serde_json::from_value::<Config>(data).map_err(Into::into));

    match parsed {
        Ok(config) => config,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to load config; using defaults");
            Config::default()
        }
    }
}

/// Persist configuration as pretty-printed camelCase JSON.
pub fn save_config(config: &Config, path: Option<&Path>) -> anyhow::Result<()> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(config_path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let text = serde_json::to_string_pretty(config)?;
    std::fs::write(&path, text).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

/// Migrate legacy config layouts to the current schema.
///
/// Moves applied, in order:
/// - `tools.exec.restrictToWorkspace` → `tools.restrictToWorkspace`
/// - `tools.browser.*`                → `tools.web.browser.*`
/// - `tools.web.search.apiKey`        → `tools.web.search.providers.brave.apiKey`
/// - default search provider `baseUrl`s filled when missing or empty
/// - `tools.redactSensitiveOutput`    → `security.redactSensitiveOutput`
pub fn migrate_config(mut data: Value) -> Value {
    let Some(root) = data.as_object_mut() else {
        return data;
    };

    let tools = root
        .entry("tools")
        .or_insert_with(|| Value::Object(Default::default()));
    let Some(tools) = tools.as_object_mut() else {
        return data;
    };

    // tools.exec.restrictToWorkspace → tools.restrictToWorkspace
    let legacy_restrict = tools
        .get_mut("exec")
        .and_then(Value::as_object_mut)
        .and_then(|exec| exec.remove("restrictToWorkspace"));
    if let Some(value) = legacy_restrict {
        tools.entry("restrictToWorkspace").or_insert(value);
    }

    // tools.browser.* → tools.web.browser.*
    let legacy_browser = tools.remove("browser");
    let web = tools
        .entry("web")
        .or_insert_with(|| Value::Object(Default::default()));
    if let Some(web) = web.as_object_mut() {
        if let Some(browser) = legacy_browser {
            web.entry("browser").or_insert(browser);
        }

        let search = web
            .entry("search")
            .or_insert_with(|| Value::Object(Default::default()));
        if let Some(search) = search.as_object_mut() {
            // tools.web.search.apiKey → providers.brave.apiKey
            let legacy_key = search
                .get("apiKey")
                .and_then(Value::as_str)
                .filter(|k| !k.is_empty())
                .map(str::to_string);
            let providers = search
                .entry("providers")
                .or_insert_with(|| Value::Object(Default::default()));
            if let Some(providers) = providers.as_object_mut() {
                if let Some(key) = legacy_key {
                    let brave = providers
                        .entry("brave")
                        .or_insert_with(|| Value::Object(Default::default()));
                    if let Some(brave) = brave.as_object_mut() {
                        let missing = brave
                            .get("apiKey")
                            .and_then(Value::as_str)
                            .map(str::is_empty)
                            .unwrap_or(true);
                        if missing {
                            brave.insert("apiKey".to_string(), Value::String(key));
                        }
                    }
                }

                for (name, base_url) in [
                    ("brave", "https://api.search.brave.com/res/v1/web/search"),
                    ("tavily", "https://api.tavily.com/search"),
                    ("serper", "https://google.serper.dev/search"),
                ] {
                    let provider = providers
                        .entry(name)
                        .or_insert_with(|| Value::Object(Default::default()));
                    if let Some(provider) = provider.as_object_mut() {
                        let missing = provider
                            .get("baseUrl")
                            .and_then(Value::as_str)
                            .map(str::is_empty)
                            .unwrap_or(true);
                        if missing {
                            provider.insert(
                                "baseUrl".to_string(),
                                Value::String(base_url.to_string()),
                            );
                        }
                    }
                }
            }
        }
    }

    // tools.redactSensitiveOutput → security.redactSensitiveOutput
    let legacy_redact = tools
        .remove("redactSensitiveOutput")
        .or_else(|| tools.remove("redact_sensitive_output"));
    if let Some(value) = legacy_redact {
        let security = root
            .entry("security")
            .or_insert_with(|| Value::Object(Default::default()));
        if let Some(security) = security.as_object_mut() {
            security.entry("redactSensitiveOutput").or_insert(value);
        }
    }

    data
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn migrates_exec_restrict_to_tools_level() {
        let data = json!({"tools": {"exec": {"restrictToWorkspace": true, "timeout": 30}}});
        let migrated = migrate_config(data);
        assert_eq!(migrated["tools"]["restrictToWorkspace"], json!(true));
        assert!(migrated["tools"]["exec"].get("restrictToWorkspace").is_none());
        assert_eq!(migrated["tools"]["exec"]["timeout"], json!(30));
    }

    #[test]
    fn migrates_legacy_browser_section() {
        let data = json!({
            "tools": {
                "browser": {"enabled": false, "defaultBrowser": "firefox"},
                "web": {"search": {}}
            }
        });
        let migrated = migrate_config(data);
        assert!(migrated["tools"].get("browser").is_none());
        assert_eq!(migrated["tools"]["web"]["browser"]["enabled"], json!(false));
        assert_eq!(
            migrated["tools"]["web"]["browser"]["defaultBrowser"],
            json!("firefox")
        );
    }

    #[test]
    fn migrates_legacy_search_api_key_to_brave() {
        let data = json!({"tools": {"web": {"search": {"apiKey": "BSK-123"}}}});
        let migrated = migrate_config(data);
        assert_eq!(
            migrated["tools"]["web"]["search"]["providers"]["brave"]["apiKey"],
            json!("BSK-123")
        );
    }

    #[test]
    fn legacy_api_key_does_not_overwrite_existing_brave_key() {
        let data = json!({
            "tools": {"web": {"search": {
                "apiKey": "OLD",
                "providers": {"brave": {"apiKey": "NEW"}}
            }}}
        });
        let migrated = migrate_config(data);
        assert_eq!(
            migrated["tools"]["web"]["search"]["providers"]["brave"]["apiKey"],
            json!("NEW")
        );
    }

    #[test]
    fn fills_default_base_urls_when_empty() {
        let data = json!({"tools": {"web": {"search": {"providers": {"tavily": {"baseUrl": ""}}}}}});
        let migrated = migrate_config(data);
        let providers = &migrated["tools"]["web"]["search"]["providers"];
        assert_eq!(providers["tavily"]["baseUrl"], json!("https://api.tavily.com/search"));
        assert_eq!(
            providers["brave"]["baseUrl"],
            json!("https://api.search.brave.com/res/v1/web/search")
        );
        assert_eq!(providers["serper"]["baseUrl"], json!("https://google.serper.dev/search"));
    }

    #[test]
    fn migrates_legacy_redaction_flag() {
        let data = json!({"tools": {"redactSensitiveOutput": false}});
        let migrated = migrate_config(data);
        assert_eq!(migrated["security"]["redactSensitiveOutput"], json!(false));
        assert!(migrated["tools"].get("redactSensitiveOutput").is_none());
    }

    #[test]
    fn migrated_value_deserializes_into_config() {
        let data = json!({
            "model": "gpt-test",
            "tools": {
                "exec": {"restrictToWorkspace": true},
                "browser": {"enabled": false},
                "web": {"search": {"apiKey": "K"}},
                "redactSensitiveOutput": false
            }
        });
        let config: Config = serde_json::from_value(migrate_config(data)).unwrap();
        assert!(config.tools.restrict_to_workspace);
        assert!(!config.tools.web.browser.enabled);
        assert_eq!(
            config.tools.web.search.providers.brave.api_key.as_deref(),
            Some("K")
        );
        assert!(!config.security.redact_sensitive_output);
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(Some(&dir.path().join("nope.json")));
        assert_eq!(config.max_iterations, 40);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = Config {
            model: Some("test-model".to_string()),
            ..Config::default()
        };
        save_config(&config, Some(&path)).unwrap();
        let loaded = load_config(Some(&path));
        assert_eq!(loaded.model.as_deref(), Some("test-model"));
    }
}
