// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # AgroMesh Swarm
//!
//! Coordination substrate for AgroMesh advisory agents: a broker-backed
//! message bus, a TTL-scoped agent registry, and a shared per-field
//! context store.
//!
//! | Module | Role |
//! |--------|------|
//! | [`domain::agent`] | Agent cards, capabilities, registry stats |
//! | [`domain::message`] | Wire envelope and subject layout |
//! | [`domain::context`] | Shared farm context record |
//! | [`domain::config`] | YAML-backed swarm configuration |
//! | [`application::message_bus`] | Request/response, broadcast, councils |
//! | [`application::registry`] | Liveness-scoped agent directory |
//! | [`application::context_store`] | Context and opinion storage |
//! | [`infrastructure::broker`] | Broker trait, bridge, in-process broker |
//! | [`infrastructure::kv`] | KV trait with TTL and set ops |

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::{AgentRegistry, ContextStore, MessageBus};
pub use domain::agent::{AgentCapability, AgentCard, AgentId, AgentStatus, RegistryStats};
pub use domain::config::SwarmConfig;
pub use domain::context::FarmContext;
pub use domain::errors::SwarmError;
pub use domain::message::{AgentMessage, MessageKind, MessagePriority, Subjects};
pub use infrastructure::broker::{Broker, BrokerBridge, BrokerHealth, InProcessBroker};
pub use infrastructure::kv::{InMemoryKvStore, KvStore};
