// Copyright (c) 2025-2026 The Freja Authors
//
// SPDX-License-Identifier: MIT
//! The agent execution engine.
//!
//! One [`AgentLoop`] consumes inbound messages from the bus, drives the
//! model ↔ tool iteration per turn, persists the session, and replies
//! through the outbound policy.  Around it: the session store, the
//! long-term memory consolidation pipeline, the subagent manager, the
//! heartbeat service, and the cron dispatcher.

mod agent;
mod context;
mod dispatcher;
mod heartbeat;
mod memory;
mod outbound;
mod session;
mod subagent;

pub use agent::{AgentLoop, ProgressFn, MAX_ITERATIONS_NOTICE};
pub use context::ContextBuilder;
pub use dispatcher::{dispatch_cron_job, run_cron_loop};
pub use heartbeat::{ExecuteFn, HeartbeatService};
pub use memory::MemoryStore;
pub use outbound::{OutboundPolicy, PolicyOutboundSink, RECENT_IMAGE_META_KEY};
pub use session::{Session, SessionEntry, SessionStore};
pub use subagent::SubagentManager;
