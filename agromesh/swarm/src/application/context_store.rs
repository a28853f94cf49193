// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Farm Context Store
//!
//! Shared per-field context over the KV store. Key layout:
//!
//! ```text
//! {prefix}:context:{field_id}              context JSON, TTL = context_ttl
//! {prefix}:opinions:{field_id}:{agent_id}  one opinion document, same TTL
//! {prefix}:opinion_agents:{field_id}       set of agent ids with opinions
//! ```
//!
//! Opinions live outside the context record so agents never race each
//! other's writes; reads stitch them back in.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use agromesh_core::field::FieldId;

use crate::domain::config::SwarmConfig;
use crate::domain::context::FarmContext;
use crate::domain::errors::SwarmError;
use crate::infrastructure::kv::KvStore;

pub struct ContextStore {
    kv: Arc<dyn KvStore>,
    config: SwarmConfig,
}

impl ContextStore {
    pub fn new(kv: Arc<dyn KvStore>, config: SwarmConfig) -> Self {
        Self { kv, config }
    }

    fn context_key(&self, field_id: &FieldId) -> String {
        format!("{}:context:{}", self.config.kv_key_prefix, field_id)
    }

    fn opinion_key(&self, field_id: &FieldId, agent_id: &str) -> String {
        format!("{}:opinions:{}:{}", self.config.kv_key_prefix, field_id, agent_id)
    }

    fn opinion_index_key(&self, field_id: &FieldId) -> String {
        format!("{}:opinion_agents:{}", self.config.kv_key_prefix, field_id)
    }

    /// Store a context, replacing any existing record and resetting its
    /// TTL. Opinions are stripped; they live under their own keys.
    pub async fn set_context(&self, mut context: FarmContext) -> Result<(), SwarmError> {
        context.opinions.clear();
        context.updated_at = chrono::Utc::now();
        self.kv
            .set(
                &self.context_key(&context.field_id),
                &serde_json::to_string(&context)?,
                Some(self.config.context_ttl()),
            )
            .await?;
        Ok(())
    }

    /// Fetch the context with opinions stitched in, or `None` when it is
    /// missing or expired.
    pub async fn get_context(&self, field_id: &FieldId) -> Result<Option<FarmContext>, SwarmError> {
        let Some(raw) = self.kv.get(&self.context_key(field_id)).await? else {
            return Ok(None);
        };
        let mut context: FarmContext = serde_json::from_str(&raw)?;
        context.opinions = self.get_opinions(field_id).await?;
        Ok(Some(context))
    }

    /// Shallow-merge `patch`'s top-level keys into the stored context and
    /// refresh the TTL. Unknown keys are rejected by deserialization.
    pub async fn update_context(
        &self,
        field_id: &FieldId,
        patch: serde_json::Value,
    ) -> Result<FarmContext, SwarmError> {
        let Some(raw) = self.kv.get(&self.context_key(field_id)).await? else {
            return Err(SwarmError::NotFound(format!("no context for field {field_id}")));
        };
        let mut doc: serde_json::Value = serde_json::from_str(&raw)?;
        let serde_json::Value::Object(updates) = patch else {
            return Err(SwarmError::Validation(
                "context patch must be a JSON object".to_string(),
            ));
        };
        for (key, value) in updates {
            if matches!(key.as_str(), "field_id" | "created_at" | "opinions") {
                return Err(SwarmError::Validation(format!(
                    "context field {key} is not patchable"
                )));
            }
            doc[key] = value;
        }
        let mut context: FarmContext = serde_json::from_value(doc)?;
        context.opinions.clear();
        context.updated_at = chrono::Utc::now();
        self.kv
            .set(
                &self.context_key(field_id),
                &serde_json::to_string(&context)?,
                Some(self.config.context_ttl()),
            )
            .await?;
        context.opinions = self.get_opinions(field_id).await?;
        Ok(context)
    }

    /// Record one agent's opinion for a field. Last write per agent wins.
    pub async fn add_opinion(
        &self,
        field_id: &FieldId,
        agent_id: &str,
        opinion: serde_json::Value,
    ) -> Result<(), SwarmError> {
        self.kv
            .set(
                &self.opinion_key(field_id, agent_id),
                &serde_json::to_string(&opinion)?,
                Some(self.config.context_ttl()),
            )
            .await?;
        self.kv
            .sadd(&self.opinion_index_key(field_id), agent_id)
            .await?;
        debug!(field_id = %field_id, agent_id, "opinion recorded");
        Ok(())
    }

    /// All live opinions for a field. Expired entries are pruned from the
    /// index as they are found.
    pub async fn get_opinions(
        &self,
        field_id: &FieldId,
    ) -> Result<HashMap<String, serde_json::Value>, SwarmError> {
        let mut opinions = HashMap::new();
        for agent_id in self.kv.smembers(&self.opinion_index_key(field_id)).await? {
            match self.kv.get(&self.opinion_key(field_id, &agent_id)).await? {
                Some(raw) => {
                    opinions.insert(agent_id, serde_json::from_str(&raw)?);
                }
                None => {
                    self.kv
                        .srem(&self.opinion_index_key(field_id), &agent_id)
                        .await?;
                }
            }
        }
        Ok(opinions)
    }

    pub async fn clear_opinions(&self, field_id: &FieldId) -> Result<(), SwarmError> {
        for agent_id in self.kv.smembers(&self.opinion_index_key(field_id)).await? {
            self.kv.del(&self.opinion_key(field_id, &agent_id)).await?;
            self.kv
                .srem(&self.opinion_index_key(field_id), &agent_id)
                .await?;
        }
        Ok(())
    }

    /// Remaining lifetime of the context record.
    pub async fn get_ttl(&self, field_id: &FieldId) -> Result<Option<Duration>, SwarmError> {
        Ok(self.kv.ttl(&self.context_key(field_id)).await?)
    }

    /// Push the context's expiry out by a full TTL, opinions included.
    /// Returns `false` when there is nothing to refresh.
    pub async fn refresh_ttl(&self, field_id: &FieldId) -> Result<bool, SwarmError> {
        let refreshed = self
            .kv
            .expire(&self.context_key(field_id), self.config.context_ttl())
            .await?;
        if refreshed {
            for agent_id in self.kv.smembers(&self.opinion_index_key(field_id)).await? {
                self.kv
                    .expire(&self.opinion_key(field_id, &agent_id), self.config.context_ttl())
                    .await?;
            }
        }
        Ok(refreshed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::kv::InMemoryKvStore;

    fn store() -> ContextStore {
        ContextStore::new(Arc::new(InMemoryKvStore::new()), SwarmConfig::default())
    }

    #[tokio::test]
    async fn context_roundtrips_with_opinions() {
        let store = store();
        let field_id = FieldId::new();
        let mut context = FarmContext::new(field_id);
        context.soil_analysis = serde_json::json!({"ph": 6.4});
        store.set_context(context).await.unwrap();

        store
            .add_opinion(&field_id, "agronomist", serde_json::json!({"verdict": "irrigate"}))
            .await
            .unwrap();
        store
            .add_opinion(&field_id, "ecologist", serde_json::json!({"verdict": "wait"}))
            .await
            .unwrap();

        let got = store.get_context(&field_id).await.unwrap().unwrap();
        assert_eq!(got.soil_analysis["ph"], 6.4);
        assert_eq!(got.opinions.len(), 2);
        assert_eq!(got.opinions["agronomist"]["verdict"], "irrigate");
    }

    #[tokio::test]
    async fn missing_context_reads_as_none() {
        let store = store();
        assert!(store.get_context(&FieldId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_merges_top_level_keys() {
        let store = store();
        let field_id = FieldId::new();
        let mut context = FarmContext::new(field_id);
        context.soil_analysis = serde_json::json!({"ph": 6.4});
        context.weather_data = serde_json::json!({"rain_mm": 3});
        store.set_context(context).await.unwrap();

        let updated = store
            .update_context(&field_id, serde_json::json!({"weather_data": {"rain_mm": 18}}))
            .await
            .unwrap();
        assert_eq!(updated.weather_data["rain_mm"], 18);
        assert_eq!(updated.soil_analysis["ph"], 6.4);

        let err = store
            .update_context(&field_id, serde_json::json!({"field_id": "nope"}))
            .await
            .unwrap_err();
        assert!(matches!(err, SwarmError::Validation(_)));
    }

    #[tokio::test]
    async fn update_of_missing_context_is_not_found() {
        let store = store();
        let err = store
            .update_context(&FieldId::new(), serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, SwarmError::NotFound(_)));
    }

    #[tokio::test]
    async fn opinions_overwrite_per_agent_and_clear() {
        let store = store();
        let field_id = FieldId::new();
        store.set_context(FarmContext::new(field_id)).await.unwrap();

        store
            .add_opinion(&field_id, "agronomist", serde_json::json!({"n": 1}))
            .await
            .unwrap();
        store
            .add_opinion(&field_id, "agronomist", serde_json::json!({"n": 2}))
            .await
            .unwrap();
        let opinions = store.get_opinions(&field_id).await.unwrap();
        assert_eq!(opinions.len(), 1);
        assert_eq!(opinions["agronomist"]["n"], 2);

        store.clear_opinions(&field_id).await.unwrap();
        assert!(store.get_opinions(&field_id).await.unwrap().is_empty());
        // Context itself survives an opinion sweep.
        assert!(store.get_context(&field_id).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn context_expires_and_refreshes() {
        let store = store();
        let field_id = FieldId::new();
        store.set_context(FarmContext::new(field_id)).await.unwrap();

        tokio::time::advance(Duration::from_secs(3_000)).await;
        assert!(store.refresh_ttl(&field_id).await.unwrap());
        tokio::time::advance(Duration::from_secs(3_000)).await;
        assert!(store.get_context(&field_id).await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(700)).await;
        assert!(store.get_context(&field_id).await.unwrap().is_none());
        assert!(!store.refresh_ttl(&field_id).await.unwrap());
        assert_eq!(store.get_ttl(&field_id).await.unwrap(), None);
    }
}
