// Copyright (c) 2025-2026 The Freja Authors
//
// SPDX-License-Identifier: MIT
//! Model-facing types and the [`LLMProvider`] trait.
//!
//! The agent core only ever talks to the single-operation provider
//! interface: `chat(messages, tools, …) → response`, where the response
//! carries either final content or a list of tool-call requests.  The
//! OpenAI-compatible HTTP client lives here too; anything more exotic is
//! an external collaborator behind the same trait.

mod openai_compat;
mod provider;
mod scripted;
mod types;

pub use openai_compat::OpenAiCompatProvider;
pub use provider::LLMProvider;
pub use scripted::ScriptedProvider;
pub use types::{
    ChatMessage, ChatResponse, ContentPart, FunctionCallPayload, FunctionDefinition, ImageUrl,
    MessageContent, Role, ToolCallPayload, ToolCallRequest, ToolDefinition,
};
