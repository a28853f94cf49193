// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # KV Store Abstraction
//!
//! String get/set/del with per-key TTL plus atomic set membership, the
//! minimal surface the registry and context store need from an external
//! store. The backend is a black box behind this trait; the in-memory
//! implementation below carries the full TTL semantics so both services
//! are testable without infrastructure.
//!
//! Uses `tokio::time::Instant` for expiry so paused-clock tests can drive
//! TTL behavior deterministically.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

#[derive(Debug, thiserror::Error)]
pub enum KvError {
    #[error("kv backend error: {0}")]
    Backend(String),

    #[error("kv store not connected")]
    NotConnected,
}

impl From<KvError> for crate::domain::errors::SwarmError {
    fn from(err: KvError) -> Self {
        match err {
            KvError::NotConnected => crate::domain::errors::SwarmError::NotConnected,
            other => crate::domain::errors::SwarmError::Backend(other.to_string()),
        }
    }
}

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    /// Set a value, optionally with a TTL. A `None` TTL persists until
    /// deleted.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), KvError>;

    async fn del(&self, key: &str) -> Result<(), KvError>;

    /// Remaining TTL, or `None` for missing keys and keys without expiry.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, KvError>;

    /// Reset a key's TTL. Returns `false` when the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, KvError>;

    async fn sadd(&self, key: &str, member: &str) -> Result<(), KvError>;

    async fn srem(&self, key: &str, member: &str) -> Result<(), KvError>;

    async fn smembers(&self, key: &str) -> Result<Vec<String>, KvError>;
}

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at.map(|at| Instant::now() >= at).unwrap_or(false)
    }
}

/// Process-local KV with lazy expiry, used in development and tests.
#[derive(Default)]
pub struct InMemoryKvStore {
    entries: DashMap<String, Entry>,
    sets: DashMap<String, HashSet<String>>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        if let Some(entry) = self.entries.get(key) {
            if entry.is_expired() {
                drop(entry);
                self.entries.remove(key);
                return Ok(None);
            }
            return Ok(Some(entry.value.clone()));
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), KvError> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), KvError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, KvError> {
        if let Some(entry) = self.entries.get(key) {
            if entry.is_expired() {
                return Ok(None);
            }
            return Ok(entry
                .expires_at
                .map(|at| at.saturating_duration_since(Instant::now())));
        }
        Ok(None)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, KvError> {
        if let Some(mut entry) = self.entries.get_mut(key) {
            if entry.is_expired() {
                return Ok(false);
            }
            entry.expires_at = Some(Instant::now() + ttl);
            return Ok(true);
        }
        Ok(false)
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), KvError> {
        self.sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> Result<(), KvError> {
        if let Some(mut set) = self.sets.get_mut(key) {
            set.remove(member);
        }
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, KvError> {
        Ok(self
            .sets
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn values_expire_after_ttl() {
        let kv = InMemoryKvStore::new();
        kv.set("k", "v", Some(Duration::from_secs(10))).await.unwrap();
        assert_eq!(kv.get("k").await.unwrap(), Some("v".to_string()));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(kv.get("k").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn expire_refreshes_ttl() {
        let kv = InMemoryKvStore::new();
        kv.set("k", "v", Some(Duration::from_secs(10))).await.unwrap();
        tokio::time::advance(Duration::from_secs(8)).await;
        assert!(kv.expire("k", Duration::from_secs(10)).await.unwrap());
        tokio::time::advance(Duration::from_secs(8)).await;
        assert_eq!(kv.get("k").await.unwrap(), Some("v".to_string()));
        // A missing key cannot be refreshed.
        assert!(!kv.expire("missing", Duration::from_secs(1)).await.unwrap());
    }

    #[tokio::test]
    async fn set_membership_is_idempotent() {
        let kv = InMemoryKvStore::new();
        kv.sadd("s", "a").await.unwrap();
        kv.sadd("s", "a").await.unwrap();
        kv.sadd("s", "b").await.unwrap();
        let mut members = kv.smembers("s").await.unwrap();
        members.sort();
        assert_eq!(members, vec!["a".to_string(), "b".to_string()]);
        kv.srem("s", "a").await.unwrap();
        assert_eq!(kv.smembers("s").await.unwrap(), vec!["b".to_string()]);
    }
}
