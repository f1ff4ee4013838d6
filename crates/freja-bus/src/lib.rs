// Copyright (c) 2025-2026 The Freja Authors
//
// SPDX-License-Identifier: MIT
//! Channel envelopes and the in-process message bus.
//!
//! Channels publish [`InboundMessage`]s; the agent loop is the single
//! inbound consumer.  Replies travel back as [`OutboundMessage`]s which the
//! channel adapters consume.  Both directions are bounded FIFO queues with
//! no per-channel partitioning.

mod events;
mod queue;

pub use events::{InboundMessage, OutboundMessage};
pub use queue::MessageBus;
