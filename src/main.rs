// Copyright (c) 2025-2026 The Freja Authors
//
// SPDX-License-Identifier: MIT
mod cli;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};
use freja_bus::MessageBus;
use freja_config::Config;
use freja_core::{run_cron_loop, AgentLoop, ExecuteFn, HeartbeatService};
use freja_cron::CronService;
use freja_mcp::McpConnector;
use freja_model::{LLMProvider, OpenAiCompatProvider};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = freja_config::load_config(cli.config.as_deref());

    match cli.command {
        Some(Commands::Status) => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Some(Commands::Agent { message, session }) => run_once(config, &message, session).await,
        Some(Commands::Serve) | None => serve(config).await,
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env("FREJA_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_provider(config: &Config) -> anyhow::Result<Arc<dyn LLMProvider>> {
    let api_key = config
        .provider
        .api_key
        .clone()
        .or_else(|| std::env::var("FREJA_API_KEY").ok())
        .unwrap_or_default();
    let api_base = config
        .provider
        .api_base
        .clone()
        .filter(|base| !base.is_empty())
        .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
    let model = config
        .model
        .clone()
        .unwrap_or_else(|| "gpt-4o-mini".to_string());

    if api_key.is_empty() {
        anyhow::bail!("no API key configured: set provider.apiKey or FREJA_API_KEY");
    }
    Ok(Arc::new(OpenAiCompatProvider::new(api_key, api_base, model)))
}

async fn run_once(config: Config, message: &str, session: Option<String>) -> anyhow::Result<()> {
    let provider = build_provider(&config)?;
    let bus = MessageBus::new();
    let cron = Arc::new(CronService::new(config.workspace().join("cron").join("jobs.json")));
    let agent = AgentLoop::new(bus, provider, &config, Some(cron));

    let reply = agent
        .process_direct(message, session.as_deref(), "cli", "direct", None)
        .await;
    println!("{reply}");
    Ok(())
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let provider = build_provider(&config)?;
    let bus = MessageBus::new();
    let workspace = config.workspace();
    let model = config
        .model
        .clone()
        .unwrap_or_else(|| provider.default_model().to_string());

    let cron = Arc::new(CronService::new(workspace.join("cron").join("jobs.json")));
    let agent = AgentLoop::new(bus.clone(), provider.clone(), &config, Some(Arc::clone(&cron)));

    // MCP tools live for the lifetime of the serve command.
    let mcp = McpConnector::new(config.mcp_servers.clone());
    let mcp_scope = mcp.connect(Arc::clone(agent.registry())).await;
    if let Some(scope) = &mcp_scope {
        info!(tools = scope.registered_tools().len(), "MCP tools registered");
    }

    let stop = Arc::new(AtomicBool::new(false));
    let cron_task = tokio::spawn(run_cron_loop(
        Arc::clone(&cron),
        Arc::clone(&agent),
        Arc::clone(&stop),
    ));

    let heartbeat = {
        let agent = Arc::clone(&agent);
        let on_execute: ExecuteFn = Arc::new(move |tasks: String| {
            let agent = Arc::clone(&agent);
            Box::pin(async move {
                agent
                    .process_direct(&tasks, Some("heartbeat"), "cli", "heartbeat", None)
                    .await
            })
        });
        HeartbeatService::new(
            workspace.clone(),
            provider,
            model,
            Duration::from_secs(config.heartbeat.interval_minutes.max(1) * 60),
            config.heartbeat.enabled,
            on_execute,
        )
    };
    heartbeat.start();

    // Drain outbound messages; channel adapters attach here.  Without any
    // configured channel the replies are logged.
    let outbound_bus = bus.clone();
    let outbound_task = tokio::spawn(async move {
        while let Some(msg) = outbound_bus.consume_outbound().await {
            info!(channel = %msg.channel, chat_id = %msg.chat_id, "outbound: {}", msg.content);
        }
    });

    let loop_task = {
        let agent = Arc::clone(&agent);
        tokio::spawn(async move { agent.run().await })
    };

    info!(workspace = %workspace.display(), "freja is running; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    info!("shutting down");
    agent.stop();
    stop.store(true, Ordering::SeqCst);
    heartbeat.stop();
    if let Some(scope) = mcp_scope {
        scope.close().await;
    }
    if tokio::time::timeout(Duration::from_secs(3), loop_task).await.is_err() {
        warn!("agent loop did not stop in time");
    }
    cron_task.abort();
    outbound_task.abort();
    Ok(())
}
