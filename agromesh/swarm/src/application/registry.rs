// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Agent Registry
//!
//! Liveness-scoped agent directory over the KV store. Key layout:
//!
//! ```text
//! {prefix}:agent:{id}         card JSON, TTL = registry_ttl
//! {prefix}:agents             set of known ids
//! {prefix}:capability:{cap}   set of ids advertising the capability
//! {prefix}:performance:{id}   score, survives card expiry
//! ```
//!
//! Index sets carry no TTL, so an expired card can leave a dangling id
//! behind; reads reconcile those lazily. A small LRU cache fronts card
//! reads and is invalidated write-through.

use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::domain::agent::{AgentCapability, AgentCard, AgentId, AgentStatus, RegistryStats};
use crate::domain::config::SwarmConfig;
use crate::domain::errors::SwarmError;
use crate::infrastructure::kv::KvStore;

const CACHE_CAPACITY: usize = 128;

struct CachedCard {
    card: AgentCard,
    inserted: Instant,
}

pub struct AgentRegistry {
    kv: Arc<dyn KvStore>,
    config: SwarmConfig,
    cache: Mutex<LruCache<String, CachedCard>>,
}

impl AgentRegistry {
    pub fn new(kv: Arc<dyn KvStore>, config: SwarmConfig) -> Self {
        let capacity = NonZeroUsize::new(CACHE_CAPACITY).expect("nonzero capacity");
        Self {
            kv,
            config,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn agent_key(&self, id: &AgentId) -> String {
        format!("{}:agent:{}", self.config.kv_key_prefix, id)
    }

    fn agents_key(&self) -> String {
        format!("{}:agents", self.config.kv_key_prefix)
    }

    fn capability_key(&self, capability: AgentCapability) -> String {
        format!("{}:capability:{}", self.config.kv_key_prefix, capability.as_str())
    }

    fn performance_key(&self, id: &AgentId) -> String {
        format!("{}:performance:{}", self.config.kv_key_prefix, id)
    }

    fn invalidate(&self, id: &AgentId) {
        self.cache.lock().pop(id.as_str());
    }

    /// Register or re-register an agent. Re-registration reconciles the
    /// capability indexes against the previous card.
    pub async fn register(&self, mut card: AgentCard) -> Result<(), SwarmError> {
        if card.id.as_str().is_empty() {
            return Err(SwarmError::Validation("agent id must not be empty".to_string()));
        }
        if card.capabilities.is_empty() {
            return Err(SwarmError::Validation(
                "agent card must declare at least one capability".to_string(),
            ));
        }
        validate_score(card.performance_score)?;

        let previous = self.load_card(&card.id).await?;
        card.last_heartbeat = chrono::Utc::now();
        card.updated_at = card.last_heartbeat;

        self.kv
            .set(
                &self.agent_key(&card.id),
                &serde_json::to_string(&card)?,
                Some(self.config.registry_ttl()),
            )
            .await?;
        self.kv.sadd(&self.agents_key(), card.id.as_str()).await?;

        let new_caps: HashSet<AgentCapability> = card.capabilities.iter().copied().collect();
        if let Some(prev) = previous {
            for stale in prev.capabilities.iter().filter(|c| !new_caps.contains(c)) {
                self.kv
                    .srem(&self.capability_key(*stale), card.id.as_str())
                    .await?;
            }
        }
        for capability in &new_caps {
            self.kv
                .sadd(&self.capability_key(*capability), card.id.as_str())
                .await?;
        }

        self.kv
            .set(
                &self.performance_key(&card.id),
                &card.performance_score.to_string(),
                None,
            )
            .await?;

        self.invalidate(&card.id);
        info!(agent_id = %card.id, capabilities = card.capabilities.len(), "agent registered");
        Ok(())
    }

    pub async fn deregister(&self, id: &AgentId) -> Result<(), SwarmError> {
        let card = self.load_card(id).await?;
        self.kv.del(&self.agent_key(id)).await?;
        self.kv.srem(&self.agents_key(), id.as_str()).await?;
        // Without the card we cannot know which capability sets hold the
        // id, so sweep all of them.
        let capabilities: Vec<AgentCapability> = match card {
            Some(card) => card.capabilities,
            None => AgentCapability::ALL.to_vec(),
        };
        for capability in capabilities {
            self.kv
                .srem(&self.capability_key(capability), id.as_str())
                .await?;
        }
        self.kv.del(&self.performance_key(id)).await?;
        self.invalidate(id);
        info!(agent_id = %id, "agent deregistered");
        Ok(())
    }

    /// Refresh the card's TTL and heartbeat timestamp. An expired card
    /// cannot be revived; the agent must re-register.
    pub async fn heartbeat(&self, id: &AgentId) -> Result<(), SwarmError> {
        let Some(mut card) = self.load_card(id).await? else {
            self.reconcile_dangling(id).await?;
            return Err(SwarmError::NotFound(format!("agent {id} not registered")));
        };
        card.last_heartbeat = chrono::Utc::now();
        card.updated_at = card.last_heartbeat;
        self.kv
            .set(
                &self.agent_key(id),
                &serde_json::to_string(&card)?,
                Some(self.config.registry_ttl()),
            )
            .await?;
        self.invalidate(id);
        Ok(())
    }

    pub async fn get(&self, id: &AgentId) -> Result<AgentCard, SwarmError> {
        let Some(card) = self.card_cached(id).await? else {
            self.reconcile_dangling(id).await?;
            return Err(SwarmError::NotFound(format!("agent {id} not registered")));
        };
        Ok(card)
    }

    /// Card read through the LRU cache; every non-mutating lookup funnels
    /// here. Misses fall through to the store and repopulate the cache.
    async fn card_cached(&self, id: &AgentId) -> Result<Option<AgentCard>, SwarmError> {
        // A cache hit must never outlive the card's own liveness window.
        let freshness = self
            .config
            .registry_cache_ttl()
            .min(self.config.registry_ttl());
        {
            let mut cache = self.cache.lock();
            if let Some(cached) = cache.get(id.as_str()) {
                if cached.inserted.elapsed() < freshness {
                    return Ok(Some(cached.card.clone()));
                }
                cache.pop(id.as_str());
            }
        }
        let Some(card) = self.load_card(id).await? else {
            return Ok(None);
        };
        self.cache.lock().put(
            id.as_str().to_string(),
            CachedCard {
                card: card.clone(),
                inserted: Instant::now(),
            },
        );
        Ok(Some(card))
    }

    pub async fn update_status(&self, id: &AgentId, status: AgentStatus) -> Result<(), SwarmError> {
        self.mutate_card(id, |card| {
            card.status = status;
            Ok(())
        })
        .await?;
        debug!(agent_id = %id, status = status.as_str(), "agent status updated");
        Ok(())
    }

    pub async fn update_performance(&self, id: &AgentId, score: f64) -> Result<(), SwarmError> {
        validate_score(score)?;
        self.mutate_card(id, |card| {
            card.performance_score = score;
            Ok(())
        })
        .await?;
        self.kv
            .set(&self.performance_key(id), &score.to_string(), None)
            .await?;
        Ok(())
    }

    /// Live agents advertising every requested capability, ranked by
    /// performance score descending, id ascending as tiebreak.
    pub async fn discover(
        &self,
        capabilities: &[AgentCapability],
    ) -> Result<Vec<AgentCard>, SwarmError> {
        let candidate_ids = self.candidate_ids(capabilities).await?;
        let mut cards = Vec::new();
        for id in candidate_ids {
            let agent_id = AgentId::new(id);
            match self.card_cached(&agent_id).await? {
                Some(card) => {
                    let wanted: HashSet<AgentCapability> = capabilities.iter().copied().collect();
                    let held: HashSet<AgentCapability> = card.capabilities.iter().copied().collect();
                    if wanted.is_subset(&held) {
                        cards.push(card);
                    }
                }
                None => {
                    // Card expired but the index still names it.
                    self.reconcile_dangling(&agent_id).await?;
                }
            }
        }
        cards.sort_by(|a, b| {
            b.performance_score
                .partial_cmp(&a.performance_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.as_str().cmp(b.id.as_str()))
        });
        Ok(cards)
    }

    /// Highest-ranked live agent for the capability set.
    pub async fn get_best(
        &self,
        capabilities: &[AgentCapability],
    ) -> Result<AgentCard, SwarmError> {
        self.discover(capabilities)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                SwarmError::NotFound(format!(
                    "no live agent with capabilities {capabilities:?}"
                ))
            })
    }

    pub async fn stats(&self) -> Result<RegistryStats, SwarmError> {
        let ids = self.kv.smembers(&self.agents_key()).await.map_err(SwarmError::from)?;
        let mut status_counts: HashMap<String, usize> = HashMap::new();
        let mut capability_counts: HashMap<String, usize> = HashMap::new();
        let mut total_agents = 0usize;
        let mut score_sum = 0.0f64;
        for id in ids {
            let agent_id = AgentId::new(id);
            match self.card_cached(&agent_id).await? {
                Some(card) => {
                    total_agents += 1;
                    score_sum += card.performance_score;
                    *status_counts.entry(card.status.as_str().to_string()).or_default() += 1;
                    for capability in &card.capabilities {
                        *capability_counts
                            .entry(capability.as_str().to_string())
                            .or_default() += 1;
                    }
                }
                None => self.reconcile_dangling(&agent_id).await?,
            }
        }
        let mean_performance = if total_agents > 0 {
            score_sum / total_agents as f64
        } else {
            0.0
        };
        Ok(RegistryStats {
            total_agents,
            status_counts,
            capability_counts,
            mean_performance,
        })
    }

    /// Ids to inspect for discovery: the intersection of the requested
    /// capability sets, or every known agent when no capability is asked.
    async fn candidate_ids(
        &self,
        capabilities: &[AgentCapability],
    ) -> Result<Vec<String>, SwarmError> {
        let Some((first, rest)) = capabilities.split_first() else {
            return Ok(self.kv.smembers(&self.agents_key()).await?);
        };
        let mut ids: HashSet<String> = self
            .kv
            .smembers(&self.capability_key(*first))
            .await?
            .into_iter()
            .collect();
        for capability in rest {
            let members: HashSet<String> = self
                .kv
                .smembers(&self.capability_key(*capability))
                .await?
                .into_iter()
                .collect();
            ids.retain(|id| members.contains(id));
            if ids.is_empty() {
                break;
            }
        }
        Ok(ids.into_iter().collect())
    }

    /// Read the stored card, updating it in place and writing back with
    /// the remaining TTL preserved.
    async fn mutate_card<F>(&self, id: &AgentId, apply: F) -> Result<(), SwarmError>
    where
        F: FnOnce(&mut AgentCard) -> Result<(), SwarmError>,
    {
        let Some(mut card) = self.load_card(id).await? else {
            return Err(SwarmError::NotFound(format!("agent {id} not registered")));
        };
        apply(&mut card)?;
        card.updated_at = chrono::Utc::now();
        let remaining = self.kv.ttl(&self.agent_key(id)).await?;
        self.kv
            .set(&self.agent_key(id), &serde_json::to_string(&card)?, remaining)
            .await?;
        self.invalidate(id);
        Ok(())
    }

    async fn load_card(&self, id: &AgentId) -> Result<Option<AgentCard>, SwarmError> {
        match self.kv.get(&self.agent_key(id)).await? {
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(card) => Ok(Some(card)),
                Err(err) => {
                    warn!(agent_id = %id, %err, "corrupt agent card dropped");
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    /// Drop an expired id out of the index sets.
    async fn reconcile_dangling(&self, id: &AgentId) -> Result<(), SwarmError> {
        self.kv.srem(&self.agents_key(), id.as_str()).await?;
        for capability in AgentCapability::ALL {
            self.kv
                .srem(&self.capability_key(capability), id.as_str())
                .await?;
        }
        self.invalidate(id);
        debug!(agent_id = %id, "expired agent reconciled out of indexes");
        Ok(())
    }
}

fn validate_score(score: f64) -> Result<(), SwarmError> {
    if !(0.0..=1.0).contains(&score) || score.is_nan() {
        return Err(SwarmError::Validation(format!(
            "performance score {score} outside [0, 1]"
        )));
    }
    Ok(())
}
