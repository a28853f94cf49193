// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod context_store;
pub mod message_bus;
pub mod registry;

pub use context_store::ContextStore;
pub use message_bus::MessageBus;
pub use registry::AgentRegistry;
