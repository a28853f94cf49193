// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Agent Cards and Capabilities
//!
//! Identity and metadata for advisory agents. Capabilities form a closed
//! enum; multi-capability discovery requires every requested tag.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable agent identifier, unique across the registry at any instant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Closed capability vocabulary. Discovery intersects these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentCapability {
    Diagnosis,
    Treatment,
    Irrigation,
    Fertilization,
    PestManagement,
    YieldPrediction,
    MarketAnalysis,
    SoilScience,
    Ecological,
    WeatherAnalysis,
    ImageAnalysis,
    SatelliteAnalysis,
}

impl AgentCapability {
    pub const ALL: [AgentCapability; 12] = [
        AgentCapability::Diagnosis,
        AgentCapability::Treatment,
        AgentCapability::Irrigation,
        AgentCapability::Fertilization,
        AgentCapability::PestManagement,
        AgentCapability::YieldPrediction,
        AgentCapability::MarketAnalysis,
        AgentCapability::SoilScience,
        AgentCapability::Ecological,
        AgentCapability::WeatherAnalysis,
        AgentCapability::ImageAnalysis,
        AgentCapability::SatelliteAnalysis,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentCapability::Diagnosis => "diagnosis",
            AgentCapability::Treatment => "treatment",
            AgentCapability::Irrigation => "irrigation",
            AgentCapability::Fertilization => "fertilization",
            AgentCapability::PestManagement => "pest_management",
            AgentCapability::YieldPrediction => "yield_prediction",
            AgentCapability::MarketAnalysis => "market_analysis",
            AgentCapability::SoilScience => "soil_science",
            AgentCapability::Ecological => "ecological",
            AgentCapability::WeatherAnalysis => "weather_analysis",
            AgentCapability::ImageAnalysis => "image_analysis",
            AgentCapability::SatelliteAnalysis => "satellite_analysis",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Inactive,
    Busy,
    Maintenance,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Active => "active",
            AgentStatus::Inactive => "inactive",
            AgentStatus::Busy => "busy",
            AgentStatus::Maintenance => "maintenance",
        }
    }
}

/// Registry entry for one agent.
///
/// Presence in the registry requires a heartbeat within the configured
/// TTL; an expired card drops out of discovery until re-registered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCard {
    pub id: AgentId,
    pub name: String,
    pub capabilities: Vec<AgentCapability>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    pub status: AgentStatus,
    /// In [0, 1]; discovery ranks on it, descending.
    pub performance_score: f64,
    pub last_heartbeat: DateTime<Utc>,
    pub version: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AgentCard {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        capabilities: Vec<AgentCapability>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: AgentId::new(id),
            name: name.into(),
            capabilities,
            skills: Vec::new(),
            model: None,
            endpoint: None,
            status: AgentStatus::Active,
            performance_score: 0.5,
            last_heartbeat: now,
            version: "1.0".to_string(),
            tags: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.performance_score = score;
        self
    }
}

/// Aggregate registry statistics over currently-live cards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryStats {
    pub total_agents: usize,
    pub status_counts: std::collections::HashMap<String, usize>,
    pub capability_counts: std::collections::HashMap<String, usize>,
    pub mean_performance: f64,
}
