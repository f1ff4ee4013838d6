// Copyright (c) 2025-2026 The Freja Authors
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "freja", version, about = "A multi-channel personal AI agent")]
pub struct Cli {
    /// Explicit config file (default ~/.freja/config.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose logging to stderr (or set FREJA_LOG)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the gateway: channels, cron, heartbeat, and the agent loop
    Serve,
    /// Process one message and print the reply
    Agent {
        /// The message to process
        #[arg(short, long)]
        message: String,
        /// Session key override (default cli:direct)
        #[arg(long)]
        session: Option<String>,
    },
    /// Show the effective configuration
    Status,
}
