// Copyright (c) 2025-2026 The Freja Authors
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;
use std::time::Instant;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::fetch::{
    self, ContinueRequestParams, EventRequestPaused, FailRequestParams,
};
use chromiumoxide::cdp::browser_protocol::network::{CookieParam, ErrorReason};
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::{debug, warn};

use freja_config::BrowserToolConfig;

use super::installer::{install_browser, is_missing_browser_error};
use super::safety::{
    request_url_block_reason, resolve_path_in_workspace, validate_navigation_url,
    validate_state_key,
};
use crate::tool::Tool;

const SUPPORTED_BROWSERS: [&str; 2] = ["chromium", "firefox"];
const SUPPORTED_ACTIONS: [&str; 6] =
    ["goto", "click", "type", "wait_for", "extract_text", "screenshot"];
const LAUNCH_TIMEOUT_SECS: u64 = 30;

/// Run a bounded list of browser actions in a single CDP session.
pub struct BrowserRunTool {
    workspace: PathBuf,
    config: BrowserToolConfig,
    state_dir: PathBuf,
    artifacts_dir: PathBuf,
}

struct RunInputs {
    actions: Vec<Value>,
    browser: String,
    headless: bool,
    start_url: Option<String>,
    timeout_ms: u64,
    state_path: Option<PathBuf>,
    save_state: bool,
}

impl BrowserRunTool {
    pub fn new(workspace: &std::path::Path, config: BrowserToolConfig) -> anyhow::Result<Self> {
        let state_dir = resolve_path_in_workspace(
            workspace,
            &config.state_dir,
            "tools.web.browser.stateDir",
        )
        .map_err(anyhow::Error::msg)?;
        let artifacts_dir = resolve_path_in_workspace(
            workspace,
            &config.artifacts_dir,
            "tools.web.browser.artifactsDir",
        )
        .map_err(anyhow::Error::msg)?;
        std::fs::create_dir_all(&state_dir)?;
        std::fs::create_dir_all(&artifacts_dir)?;

        Ok(Self { workspace: workspace.to_path_buf(), config, state_dir, artifacts_dir })
    }

    fn parse_inputs(&self, args: &Value) -> Result<RunInputs, String> {
        let actions = args["actions"].as_array().cloned().unwrap_or_default();
        if actions.is_empty() {
            return Err("actions must not be empty".to_string());
        }
        if actions.len() > self.config.max_actions {
            return Err(format!("actions count exceeds maxActions={}", self.config.max_actions));
        }

        let browser = args["browser"]
            .as_str()
            .unwrap_or(&self.config.default_browser)
            .to_lowercase();
        if !SUPPORTED_BROWSERS.contains(&browser.as_str()) {
            return Err(format!("browser must be one of {SUPPORTED_BROWSERS:?}"));
        }

        let timeout_ms = args["timeoutMs"].as_u64().unwrap_or(self.config.timeout_ms);
        if !(1000..=120_000).contains(&timeout_ms) {
            return Err("timeoutMs must be in [1000, 120000]".to_string());
        }

        let headless = args["headless"].as_bool().unwrap_or(self.config.headless);
        let save_state = args["saveState"].as_bool().unwrap_or(false);

        let state_path = match args["stateKey"].as_str() {
            Some(key) => {
                validate_state_key(key)?;
                Some(self.state_dir.join(format!("{key}.json")))
            }
            None => None,
        };
        if save_state && state_path.is_none() {
            return Err("saveState=true requires stateKey".to_string());
        }

        let start_url = args["startUrl"].as_str().map(str::to_string);
        if let Some(url) = &start_url {
            validate_navigation_url(
                url,
                self.config.allow_private_network,
                self.config.block_file_scheme,
            )?;
        }

        self.validate_actions(&actions)?;

        let has_goto = actions.iter().any(|a| a["type"].as_str() == Some("goto"));
        if start_url.is_none() && !has_goto {
            return Err("either startUrl or at least one goto action is required".to_string());
        }

        Ok(RunInputs { actions, browser, headless, start_url, timeout_ms, state_path, save_state })
    }

    fn validate_actions(&self, actions: &[Value]) -> Result<(), String> {
        for (offset, action) in actions.iter().enumerate() {
            let index = offset + 1;
            if !action.is_object() {
                return Err(format!("action #{index} must be an object"));
            }
            let action_type = action["type"].as_str().unwrap_or_default();
            if !SUPPORTED_ACTIONS.contains(&action_type) {
                return Err(format!(
                    "action #{index}: unsupported type '{action_type}', expected {SUPPORTED_ACTIONS:?}"
                ));
            }

            if let Some(timeout_ms) = action["timeoutMs"].as_u64() {
                if !(100..=120_000).contains(&timeout_ms) {
                    return Err(format!("action #{index}: timeoutMs must be in [100, 120000]"));
                }
            }

            match action_type {
                "goto" => {
                    let Some(url) = action["url"].as_str().filter(|u| !u.is_empty()) else {
                        return Err(format!("action #{index}: goto requires non-empty url"));
                    };
                    validate_navigation_url(
                        url,
                        self.config.allow_private_network,
                        self.config.block_file_scheme,
                    )
                    .map_err(|e| format!("action #{index}: {e}"))?;
                }
                "click" | "type" => {
                    if action["selector"].as_str().filter(|s| !s.is_empty()).is_none() {
                        return Err(format!("action #{index}: {action_type} requires selector"));
                    }
                    if action_type == "type" && !action["text"].is_string() {
                        return Err(format!("action #{index}: type requires text"));
                    }
                }
                "wait_for" => {
                    let has_selector =
                        action["selector"].as_str().filter(|s| !s.is_empty()).is_some();
                    let has_text = action["text"].as_str().filter(|t| !t.is_empty()).is_some();
                    // sleep-only wait_for is fine when an explicit timeout is given
                    if !has_selector && !has_text && action["timeoutMs"].is_null() {
                        return Err(format!(
                            "action #{index}: wait_for requires selector/text or timeoutMs"
                        ));
                    }
                }
                "extract_text" => {
                    if let Some(max_chars) = action["maxChars"].as_u64() {
                        if !(100..=100_000).contains(&max_chars) {
                            return Err(format!(
                                "action #{index}: maxChars must be in [100, 100000]"
                            ));
                        }
                    }
                }
                "screenshot" => {
                    if let Some(path) = action["path"].as_str() {
                        resolve_path_in_workspace(
                            &self.workspace,
                            path,
                            &format!("action #{index} screenshot.path"),
                        )?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    async fn run_once(
        &self,
        inputs: &RunInputs,
        executable: Option<&PathBuf>,
    ) -> Result<Value, String> {
        let mut builder = BrowserConfig::builder();
        if !inputs.headless {
            builder = builder.with_head();
        }
        if let Some(path) = executable {
            builder = builder.chrome_executable(path);
        }
        let browser_config = builder.build().map_err(|e| e.to_string())?;

        let (mut browser, mut handler) = tokio::time::timeout(
            std::time::Duration::from_secs(LAUNCH_TIMEOUT_SECS),
            Browser::launch(browser_config),
        )
        .await
        .map_err(|_| "browser launch timed out".to_string())?
        .map_err(|e| e.to_string())?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let result = self.drive_session(&browser, inputs).await;

        if let Err(e) = browser.close().await {
            debug!(error = %e, "browser close failed");
        }
        handler_task.abort();
        result
    }

    async fn drive_session(&self, browser: &Browser, inputs: &RunInputs) -> Result<Value, String> {
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| e.to_string())?;

        // Network guard: every request is paused and either continued or
        // failed based on its URL.
        page.execute(fetch::EnableParams::default())
            .await
            .map_err(|e| e.to_string())?;
        let mut paused = page
            .event_listener::<EventRequestPaused>()
            .await
            .map_err(|e| e.to_string())?;
        let guard_page = page.clone();
        let allow_private = self.config.allow_private_network;
        let block_file = self.config.block_file_scheme;
        let guard_task = tokio::spawn(async move {
            while let Some(event) = paused.next().await {
                let request_id = event.request_id.clone();
                let reason =
                    request_url_block_reason(&event.request.url, allow_private, block_file);
                let outcome = match reason {
                    Some(reason) => {
                        debug!(url = %event.request.url, reason = %reason, "request blocked");
                        guard_page
                            .execute(FailRequestParams::new(
                                request_id,
                                ErrorReason::BlockedByClient,
                            ))
                            .await
                            .map(|_| ())
                    }
                    None => guard_page
                        .execute(ContinueRequestParams::new(request_id))
                        .await
                        .map(|_| ()),
                };
                if outcome.is_err() {
                    break;
                }
            }
        });

        if let Some(state_path) = &inputs.state_path {
            if state_path.exists() {
                self.restore_cookies(&page, state_path).await;
            }
        }

        let mut steps: Vec<Value> = Vec::new();
        let mut artifacts: Vec<String> = Vec::new();

        let run = async {
            if let Some(url) = &inputs.start_url {
                self.with_timeout(inputs.timeout_ms, page.goto(url.as_str()))
                    .await?;
                steps.push(json!({"index": 0, "type": "goto", "source": "startUrl", "url": url}));
            }

            for (offset, action) in inputs.actions.iter().enumerate() {
                let index = offset + 1;
                let step = self
                    .execute_action(&page, action, index, inputs.timeout_ms, &mut artifacts)
                    .await?;
                steps.push(step);
            }

            if inputs.save_state {
                if let Some(state_path) = &inputs.state_path {
                    self.persist_cookies(&page, state_path).await?;
                }
            }

            let final_url = page.url().await.map_err(|e| e.to_string())?.unwrap_or_default();
            let title = page
                .get_title()
                .await
                .map_err(|e| e.to_string())?
                .unwrap_or_default();
            Ok::<(String, String), String>((final_url, title))
        }
        .await;

        guard_task.abort();
        let (final_url, title) = run?;

        Ok(json!({
            "ok": true,
            "browser": inputs.browser,
            "headless": inputs.headless,
            "finalUrl": final_url,
            "title": title,
            "steps": steps,
            "artifacts": artifacts,
            "error": null,
        }))
    }

    async fn execute_action(
        &self,
        page: &Page,
        action: &Value,
        index: usize,
        default_timeout_ms: u64,
        artifacts: &mut Vec<String>,
    ) -> Result<Value, String> {
        let action_type = action["type"].as_str().unwrap_or_default();
        let timeout_ms = action["timeoutMs"].as_u64().unwrap_or(default_timeout_ms);

        match action_type {
            "goto" => {
                let url = action["url"].as_str().unwrap_or_default();
                self.with_timeout(timeout_ms, page.goto(url)).await?;
                Ok(json!({"index": index, "type": "goto", "url": url}))
            }
            "click" => {
                let selector = action["selector"].as_str().unwrap_or_default();
                let element = self
                    .with_timeout(timeout_ms, page.find_element(selector))
                    .await?;
                self.with_timeout(timeout_ms, element.click()).await?;
                Ok(json!({"index": index, "type": "click", "selector": selector}))
            }
            "type" => {
                let selector = action["selector"].as_str().unwrap_or_default();
                let text = action["text"].as_str().unwrap_or_default();
                let element = self
                    .with_timeout(timeout_ms, page.find_element(selector))
                    .await?;
                self.with_timeout(timeout_ms, element.click()).await?;
                self.with_timeout(timeout_ms, element.type_str(text)).await?;
                Ok(json!({
                    "index": index,
                    "type": "type",
                    "selector": selector,
                    "chars": text.chars().count(),
                }))
            }
            "wait_for" => {
                let selector = action["selector"].as_str().filter(|s| !s.is_empty());
                let text = action["text"].as_str().filter(|t| !t.is_empty());
                if let Some(selector) = selector {
                    self.poll_until(timeout_ms, || async move {
                        page.find_element(selector).await.is_ok()
                    })
                    .await
                    .map_err(|_| format!("wait_for '{selector}' timed out after {timeout_ms}ms"))?;
                    return Ok(json!({"index": index, "type": "wait_for", "selector": selector}));
                }
                if let Some(text) = text {
                    self.poll_until(timeout_ms, || async move {
                        page.content()
                            .await
                            .map(|html| html.contains(text))
                            .unwrap_or(false)
                    })
                    .await
                    .map_err(|_| format!("wait_for text timed out after {timeout_ms}ms"))?;
                    return Ok(json!({"index": index, "type": "wait_for", "text": text}));
                }
                tokio::time::sleep(std::time::Duration::from_millis(timeout_ms)).await;
                Ok(json!({"index": index, "type": "wait_for", "sleepMs": timeout_ms}))
            }
            "extract_text" => {
                let selector = action["selector"].as_str().unwrap_or("body");
                let element = self
                    .with_timeout(timeout_ms, page.find_element(selector))
                    .await?;
                let extracted = self
                    .with_timeout(timeout_ms, element.inner_text())
                    .await?
                    .unwrap_or_default();

                let requested = action["maxChars"]
                    .as_u64()
                    .unwrap_or(self.config.max_extract_chars as u64)
                    as usize;
                let max_chars = requested.min(self.config.max_extract_chars);
                let truncated = extracted.chars().count() > max_chars;
                let text: String = extracted.chars().take(max_chars).collect();
                Ok(json!({
                    "index": index,
                    "type": "extract_text",
                    "selector": selector,
                    "length": text.chars().count(),
                    "truncated": truncated,
                    "text": text,
                }))
            }
            "screenshot" => {
                let output = match action["path"].as_str() {
                    Some(raw) => resolve_path_in_workspace(
                        &self.workspace,
                        raw,
                        "screenshot path",
                    )?,
                    None => {
                        let stamp = chrono::Utc::now().timestamp_millis();
                        self.artifacts_dir.join(format!("screenshot-{stamp}-{index}.png"))
                    }
                };
                if let Some(parent) = output.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| e.to_string())?;
                }
                let full_page = action["fullPage"].as_bool().unwrap_or(false);
                let params = ScreenshotParams::builder().full_page(full_page).build();
                self.with_timeout(timeout_ms, page.save_screenshot(params, &output))
                    .await?;

                let relative = output
                    .strip_prefix(&self.workspace)
                    .map(|p| p.to_string_lossy().into_owned())
                    .unwrap_or_else(|_| output.to_string_lossy().into_owned());
                artifacts.push(relative.clone());
                Ok(json!({
                    "index": index,
                    "type": "screenshot",
                    "path": relative,
                    "fullPage": full_page,
                }))
            }
            other => Err(format!("Unsupported action type: {other}")),
        }
    }

    async fn with_timeout<T, E: std::fmt::Display>(
        &self,
        timeout_ms: u64,
        future: impl std::future::Future<Output = Result<T, E>>,
    ) -> Result<T, String> {
        match tokio::time::timeout(std::time::Duration::from_millis(timeout_ms), future).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("action timed out after {timeout_ms}ms")),
        }
    }

    async fn poll_until<F, Fut>(&self, timeout_ms: u64, mut probe: F) -> Result<(), ()>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let deadline = Instant::now() + std::time::Duration::from_millis(timeout_ms);
        loop {
            if probe().await {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(());
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
    }

    async fn restore_cookies(&self, page: &Page, state_path: &PathBuf) {
        let Ok(text) = tokio::fs::read_to_string(state_path).await else {
            return;
        };
        match serde_json::from_str::<Vec<CookieParam>>(&text) {
            Ok(cookies) if !cookies.is_empty() => {
                if let Err(e) = page.set_cookies(cookies).await {
                    warn!(error = %e, "restoring browser state failed");
                }
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "unreadable browser state file"),
        }
    }

    async fn persist_cookies(&self, page: &Page, state_path: &PathBuf) -> Result<(), String> {
        let cookies = page.get_cookies().await.map_err(|e| e.to_string())?;
        let text = serde_json::to_string_pretty(&cookies).map_err(|e| e.to_string())?;
        if let Some(parent) = state_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| e.to_string())?;
        }
        tokio::fs::write(state_path, text)
            .await
            .map_err(|e| e.to_string())
    }

    fn error_envelope(code: &str, message: &str, timing_ms: u128) -> Value {
        json!({
            "ok": false,
            "steps": [],
            "artifacts": [],
            "finalUrl": null,
            "title": null,
            "error": {"code": code, "message": message},
            "timingMs": timing_ms,
        })
    }
}

#[async_trait]
impl Tool for BrowserRunTool {
    fn name(&self) -> &str {
        "browser_run"
    }

    fn description(&self) -> &str {
        "Run browser actions (goto/click/type/wait_for/extract_text/screenshot)\n\
         in one browser session. Navigation is limited to public http/https\n\
         hosts unless private networking is enabled."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "browser": {
                    "type": "string",
                    "enum": SUPPORTED_BROWSERS,
                    "description": "Browser engine to use"
                },
                "headless": {"type": "boolean", "description": "Run browser in headless mode"},
                "startUrl": {"type": "string", "description": "Optional URL to open before actions"},
                "timeoutMs": {
                    "type": "integer",
                    "minimum": 1000,
                    "maximum": 120000,
                    "description": "Default timeout per action in milliseconds"
                },
                "stateKey": {
                    "type": "string",
                    "minLength": 1,
                    "description": "Session key for persisted storage state"
                },
                "saveState": {"type": "boolean", "description": "Whether to save state after run"},
                "actions": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "type": {"type": "string", "enum": SUPPORTED_ACTIONS},
                            "url": {"type": "string"},
                            "selector": {"type": "string"},
                            "text": {"type": "string"},
                            "timeoutMs": {"type": "integer", "minimum": 100, "maximum": 120000},
                            "maxChars": {"type": "integer", "minimum": 100, "maximum": 100000},
                            "path": {"type": "string"},
                            "fullPage": {"type": "boolean"}
                        },
                        "required": ["type"]
                    }
                }
            },
            "required": ["actions"]
        })
    }

    async fn execute(&self, args: Value) -> String {
        let started = Instant::now();

        let inputs = match self.parse_inputs(&args) {
            Ok(inputs) => inputs,
            Err(message) => {
                let payload = Self::error_envelope(
                    "invalid_input",
                    &message,
                    started.elapsed().as_millis(),
                );
                return payload.to_string();
            }
        };

        // The CDP backend drives chromium; a firefox request is valid input
        // but cannot be launched by this engine.
        if inputs.browser == "firefox" {
            let payload = Self::error_envelope(
                "browser_launch_failed",
                "the CDP backend drives chromium; firefox is not available in this build",
                started.elapsed().as_millis(),
            );
            return payload.to_string();
        }

        let first = self.run_once(&inputs, None).await;
        let outcome = match first {
            Ok(mut payload) => {
                payload["timingMs"] = json!(started.elapsed().as_millis() as u64);
                return payload.to_string();
            }
            Err(first_error) => {
                if self.config.auto_install_browsers && is_missing_browser_error(&first_error) {
                    let cache_dir = self.state_dir.join(".browser-cache");
                    match install_browser(&cache_dir).await {
                        Ok(executable) => match self.run_once(&inputs, Some(&executable)).await {
                            Ok(mut payload) => {
                                payload["timingMs"] =
                                    json!(started.elapsed().as_millis() as u64);
                                return payload.to_string();
                            }
                            Err(second_error) => Self::error_envelope(
                                "browser_run_failed",
                                &format!(
                                    "{second_error} (after install; initial error: {first_error})"
                                ),
                                started.elapsed().as_millis(),
                            ),
                        },
                        Err(install_error) => Self::error_envelope(
                            "browser_install_failed",
                            &format!("{install_error} (initial error: {first_error})"),
                            started.elapsed().as_millis(),
                        ),
                    }
                } else {
                    Self::error_envelope(
                        "browser_run_failed",
                        &first_error,
                        started.elapsed().as_millis(),
                    )
                }
            }
        };
        outcome.to_string()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
