// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Swarm Configuration - coordination side of the AgroMesh config manifest.
//
// Covers the broker connection, registry and context TTLs, request
// defaults, and key/subject prefixes. Loaded from YAML alongside the
// field-service section in agromesh-core.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmConfig {
    #[serde(default = "default_broker_url")]
    pub broker_url: String,

    /// Cap on reconnect attempts after a broker drop.
    #[serde(default = "default_broker_reconnect_max")]
    pub broker_reconnect_max: u32,

    /// Base reconnect wait; doubled per attempt up to a cap, with jitter.
    #[serde(default = "default_broker_reconnect_wait_ms")]
    pub broker_reconnect_wait_ms: u64,

    /// Heartbeat TTL for registry cards.
    #[serde(default = "default_registry_ttl_seconds")]
    pub registry_ttl_seconds: u64,

    /// Per-entry expiry for the registry's local cache.
    #[serde(default = "default_registry_cache_ttl_seconds")]
    pub registry_cache_ttl_seconds: u64,

    /// Farm context TTL.
    #[serde(default = "default_context_ttl_seconds")]
    pub context_ttl_seconds: u64,

    #[serde(default = "default_request_timeout_ms")]
    pub request_default_timeout_ms: u64,

    #[serde(default = "default_request_max_retries")]
    pub request_max_retries: u32,

    #[serde(default = "default_kv_key_prefix")]
    pub kv_key_prefix: String,

    #[serde(default = "default_subject_prefix")]
    pub subject_prefix: String,
}

fn default_broker_url() -> String {
    "nats://127.0.0.1:4222".to_string()
}

fn default_broker_reconnect_max() -> u32 {
    10
}

fn default_broker_reconnect_wait_ms() -> u64 {
    250
}

fn default_registry_ttl_seconds() -> u64 {
    60
}

fn default_registry_cache_ttl_seconds() -> u64 {
    300
}

fn default_context_ttl_seconds() -> u64 {
    3_600
}

fn default_request_timeout_ms() -> u64 {
    5_000
}

fn default_request_max_retries() -> u32 {
    2
}

fn default_kv_key_prefix() -> String {
    "agromesh".to_string()
}

fn default_subject_prefix() -> String {
    "agromesh".to_string()
}

impl Default for SwarmConfig {
    fn default() -> Self {
        // serde defaults and Default must agree; build through an empty doc.
        serde_yaml::from_str("{}").expect("empty config is valid")
    }
}

impl SwarmConfig {
    pub fn from_yaml(doc: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(doc)
    }

    pub fn registry_ttl(&self) -> Duration {
        Duration::from_secs(self.registry_ttl_seconds)
    }

    pub fn registry_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.registry_cache_ttl_seconds)
    }

    pub fn context_ttl(&self) -> Duration {
        Duration::from_secs(self.context_ttl_seconds)
    }

    pub fn request_default_timeout(&self) -> Duration {
        Duration::from_millis(self.request_default_timeout_ms)
    }

    pub fn broker_reconnect_wait(&self) -> Duration {
        Duration::from_millis(self.broker_reconnect_wait_ms)
    }
}
