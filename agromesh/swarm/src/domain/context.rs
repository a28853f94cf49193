// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Farm Context
//!
//! Composite record keyed by field id, shared between advisory agents.
//! Created on first write, expires after a configurable TTL, refreshable.
//! Opinions are independently addressable and can be cleared without
//! touching the rest of the context.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use agromesh_core::field::FieldId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FarmContext {
    pub field_id: FieldId,
    #[serde(default)]
    pub soil_analysis: serde_json::Value,
    #[serde(default)]
    pub weather_data: serde_json::Value,
    #[serde(default)]
    pub satellite_indices: serde_json::Value,
    #[serde(default)]
    pub recent_actions: Vec<serde_json::Value>,
    #[serde(default)]
    pub active_issues: Vec<serde_json::Value>,
    /// agent_id -> opinion document. Populated from the per-agent opinion
    /// keys on read; never stored inside the context record itself.
    #[serde(default)]
    pub opinions: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FarmContext {
    pub fn new(field_id: FieldId) -> Self {
        let now = Utc::now();
        Self {
            field_id,
            soil_analysis: serde_json::Value::Null,
            weather_data: serde_json::Value::Null,
            satellite_indices: serde_json::Value::Null,
            recent_actions: Vec::new(),
            active_issues: Vec::new(),
            opinions: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }
}
