// Copyright (c) 2025-2026 The Freja Authors
//
// SPDX-License-Identifier: MIT
//! The tool layer: everything the model is allowed to do.
//!
//! Each tool declares a JSON-schema-lite parameter shape and returns a plain
//! string envelope (often JSON).  The registry validates arguments before
//! dispatch and never lets a tool failure escape as an error; the loop
//! always receives a string it can hand back to the model.

pub mod builtin;
mod factory;
mod registry;
mod tool;

pub use factory::{build_main_agent_tools, build_subagent_tools, MainAgentTools, ToolFactoryDeps};
pub use registry::{ToolRegistry, ToolSchema};
pub use tool::{validate_params, OutboundSink, SpawnHandler, Tool};
