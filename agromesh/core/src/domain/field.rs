// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Field Aggregate and Satellite Entities
//!
//! The `Field` aggregate root plus the entities that orbit it: boundary
//! audit rows, NDVI readings, and sync-parity tasks.
//!
//! # Ownership
//!
//! The server exclusively owns `version`, `server_updated_at`, `etag`, and
//! history rows. Clients carry their own copies and dirty flags but can
//! never forge a version; every mutation funnels through the guarded
//! update path in `application::field_service`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::domain::geometry::{Point, Polygon};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldId(pub Uuid);

impl FieldId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for FieldId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for FieldId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Tenant scope for multi-farm deployments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantId(pub String);

impl TenantId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}

/// Opaque optimistic-concurrency token, a pure function of `(id, version)`.
///
/// Two reads at the same version always produce equal etags; any version
/// bump rewrites it, boundary-affecting or not.
pub fn compute_etag(entity_id: &str, version: i64) -> String {
    let digest = Sha256::digest(format!("{entity_id}:{version}").as_bytes());
    hex::encode(&digest[..16])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldStatus {
    Active,
    Fallow,
    Harvested,
    Preparing,
    Inactive,
}

impl FieldStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldStatus::Active => "active",
            FieldStatus::Fallow => "fallow",
            FieldStatus::Harvested => "harvested",
            FieldStatus::Preparing => "preparing",
            FieldStatus::Inactive => "inactive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(FieldStatus::Active),
            "fallow" => Some(FieldStatus::Fallow),
            "harvested" => Some(FieldStatus::Harvested),
            "preparing" => Some(FieldStatus::Preparing),
            "inactive" => Some(FieldStatus::Inactive),
            _ => None,
        }
    }
}

/// Where a boundary change originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeSource {
    Mobile,
    Web,
    Api,
    System,
}

impl Default for ChangeSource {
    fn default() -> Self {
        ChangeSource::Api
    }
}

impl ChangeSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeSource::Mobile => "mobile",
            ChangeSource::Web => "web",
            ChangeSource::Api => "api",
            ChangeSource::System => "system",
        }
    }
}

/// Aggregate root for a farmed area.
///
/// # Invariants
///
/// - `version` strictly increases on any mutation.
/// - `etag == compute_etag(id, version)` at all times.
/// - `server_updated_at` is non-decreasing across mutations.
/// - `area_hectares` equals the geodesic area of `boundary`.
/// - Soft-deleted fields keep their id and flow through sync as tombstones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Field {
    pub id: FieldId,
    pub version: i64,
    pub name: String,
    pub tenant_id: TenantId,
    pub crop_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    pub boundary: Polygon,
    pub centroid: Point,
    pub area_hectares: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ndvi_value: Option<f64>,
    pub status: FieldStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub planting_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub harvest_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub irrigation_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub soil_type: Option<String>,
    /// Opaque application bag; not part of the protocol contract.
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub is_deleted: bool,
    pub server_updated_at: DateTime<Utc>,
    pub etag: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for field creation. A device may supply its own id so that
/// replayed creates stay idempotent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateField {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<FieldId>,
    pub name: String,
    pub tenant_id: TenantId,
    pub crop_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    pub boundary: Polygon,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<FieldStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub planting_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub harvest_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub irrigation_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub soil_type: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Partial update applied through the etag-guarded path. `None` leaves the
/// attribute untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crop_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boundary: Option<Polygon>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<FieldStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ndvi_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub planting_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub harvest_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub irrigation_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub soil_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    /// Who made the change; lands in the history row when the boundary moves.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changed_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_reason: Option<String>,
    #[serde(default = "default_source")]
    pub source: ChangeSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
}

fn default_source() -> ChangeSource {
    ChangeSource::Api
}

/// Immutable audit row written on every boundary-affecting mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundaryChange {
    pub id: Uuid,
    pub field_id: FieldId,
    pub version_at_change: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_boundary: Option<Polygon>,
    pub new_boundary: Polygon,
    pub area_delta_hectares: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changed_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub source: ChangeSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    pub changed_at: DateTime<Utc>,
}

/// Append-only satellite time series keyed by `(field_id, captured_at)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NdviReading {
    pub id: Uuid,
    pub field_id: FieldId,
    pub captured_at: DateTime<Utc>,
    /// Normalized difference vegetation index, in [-1, 1].
    pub value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloud_cover: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub satellite: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Done,
    Cancelled,
}

/// Work item optionally attached to a field. Carries the same sync
/// bookkeeping columns as `Field` so both interleave in one pull stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub version: i64,
    pub tenant_id: TenantId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_id: Option<FieldId>,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    pub is_deleted: bool,
    pub server_updated_at: DateTime<Utc>,
    pub etag: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn etag_is_pure_function_of_id_and_version() {
        let id = FieldId::new();
        let a = compute_etag(&id.to_string(), 3);
        let b = compute_etag(&id.to_string(), 3);
        assert_eq!(a, b);
        assert_ne!(a, compute_etag(&id.to_string(), 4));
        assert_ne!(a, compute_etag(&FieldId::new().to_string(), 3));
    }

    #[test]
    fn field_status_round_trips() {
        for s in [
            FieldStatus::Active,
            FieldStatus::Fallow,
            FieldStatus::Harvested,
            FieldStatus::Preparing,
            FieldStatus::Inactive,
        ] {
            assert_eq!(FieldStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(FieldStatus::parse("bogus"), None);
    }
}
