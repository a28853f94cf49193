// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Field Entity Service
//!
//! CRUD over versioned fields with soft delete, etag guards, and a
//! boundary audit trail. This service is the ONLY path by which a field's
//! `version` advances; the sync engine and any future API surface both
//! funnel through it.
//!
//! Conflict handling is optimistic: reads carry no locks, and the write is
//! a conditional update keyed on the version the caller read. The later of
//! two concurrent writers loses and receives the current server state.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::application::version_clock::VersionClock;
use crate::domain::config::SyncConfig;
use crate::domain::errors::CoreError;
use crate::domain::field::{
    compute_etag, BoundaryChange, ChangeSource, CreateField, Field, FieldId, FieldPatch,
    FieldStatus, NdviReading,
};
use crate::domain::repository::{
    BoundaryHistoryRepository, FieldRepository, NdviRepository, RepositoryError,
};
use crate::domain::sync::{Cursor, SyncChange};

/// Bounded retries for clock/store races on the guarded write path.
const GUARDED_WRITE_RETRIES: usize = 3;

pub struct FieldService {
    fields: Arc<dyn FieldRepository>,
    history: Arc<dyn BoundaryHistoryRepository>,
    ndvi: Arc<dyn NdviRepository>,
    clock: Arc<VersionClock>,
    config: SyncConfig,
}

impl FieldService {
    pub fn new(
        fields: Arc<dyn FieldRepository>,
        history: Arc<dyn BoundaryHistoryRepository>,
        ndvi: Arc<dyn NdviRepository>,
        clock: Arc<VersionClock>,
        config: SyncConfig,
    ) -> Self {
        Self {
            fields,
            history,
            ndvi,
            clock,
            config,
        }
    }

    /// Create a field at version 1, deriving area and centroid, and write
    /// the opening history row (`previous = None`).
    pub async fn create(&self, input: CreateField) -> Result<Field, CoreError> {
        if input.name.trim().is_empty() {
            return Err(CoreError::Validation("field name must not be empty".to_string()));
        }
        if input.crop_type.trim().is_empty() {
            return Err(CoreError::Validation("crop_type must not be empty".to_string()));
        }
        input.boundary.validate(self.config.max_boundary_vertices)?;

        let id = input.id.unwrap_or_default();
        let (version, server_updated_at) = self.clock.next(&id.to_string())?;
        let area = input.boundary.area_hectares();
        let centroid = input.boundary.representative_point();
        let now = Utc::now();

        let field = Field {
            id,
            version,
            name: input.name,
            tenant_id: input.tenant_id,
            crop_type: input.crop_type,
            owner_id: input.owner_id,
            boundary: input.boundary,
            centroid,
            area_hectares: area,
            health_score: None,
            ndvi_value: None,
            status: input.status.unwrap_or(FieldStatus::Active),
            planting_date: input.planting_date,
            harvest_date: input.harvest_date,
            irrigation_type: input.irrigation_type,
            soil_type: input.soil_type,
            metadata: input.metadata,
            is_deleted: false,
            server_updated_at,
            etag: compute_etag(&id.to_string(), version),
            created_at: now,
            updated_at: now,
        };

        if !self.fields.insert(&field).await? {
            return Err(CoreError::IdConflict(id.to_string()));
        }

        self.history
            .append(&BoundaryChange {
                id: Uuid::new_v4(),
                field_id: id,
                version_at_change: version,
                previous_boundary: None,
                new_boundary: field.boundary.clone(),
                area_delta_hectares: area,
                changed_by: None,
                reason: Some("created".to_string()),
                source: ChangeSource::Api,
                device_id: None,
                changed_at: server_updated_at,
            })
            .await?;

        debug!(field_id = %id, version, "field created");
        Ok(field)
    }

    /// Read a field. Soft-deleted rows surface only when
    /// `include_tombstones` is set.
    pub async fn read(&self, id: FieldId, include_tombstones: bool) -> Result<Field, CoreError> {
        let field = self
            .fields
            .find_by_id(id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("field {id}")))?;
        if field.is_deleted && !include_tombstones {
            return Err(CoreError::NotFound(format!("field {id}")));
        }
        Ok(field)
    }

    /// Etag-guarded patch. Bumps the version, rewrites the etag, and — when
    /// the boundary moved — recomputes area/centroid and appends an audit
    /// row carrying the area delta and change source.
    pub async fn update(
        &self,
        id: FieldId,
        patch: FieldPatch,
        expected_etag: &str,
    ) -> Result<Field, CoreError> {
        if let Some(boundary) = &patch.boundary {
            boundary.validate(self.config.max_boundary_vertices)?;
        }
        if let Some(score) = patch.health_score {
            if !(0.0..=1.0).contains(&score) {
                return Err(CoreError::Validation(format!(
                    "health_score {score} outside [0, 1]"
                )));
            }
        }
        if let Some(ndvi) = patch.ndvi_value {
            if !(-1.0..=1.0).contains(&ndvi) {
                return Err(CoreError::Validation(format!(
                    "ndvi_value {ndvi} outside [-1, 1]"
                )));
            }
        }
        if let Some(name) = &patch.name {
            if name.trim().is_empty() {
                return Err(CoreError::Validation("field name must not be empty".to_string()));
            }
        }

        for _ in 0..GUARDED_WRITE_RETRIES {
            let current = self.read(id, false).await?;
            if current.etag != expected_etag {
                return Err(CoreError::Conflict {
                    current: Box::new(SyncChange::Field(current)),
                });
            }

            let (version, server_updated_at) = self.next_pair(&current)?;
            let boundary_changed = patch
                .boundary
                .as_ref()
                .map(|b| *b != current.boundary)
                .unwrap_or(false);

            let mut updated = current.clone();
            apply_patch(&mut updated, &patch);
            updated.version = version;
            updated.server_updated_at = server_updated_at;
            updated.etag = compute_etag(&id.to_string(), version);
            updated.updated_at = Utc::now();
            if boundary_changed {
                updated.area_hectares = updated.boundary.area_hectares();
                updated.centroid = updated.boundary.representative_point();
            }

            if !self.fields.update_guarded(&updated, current.version).await? {
                // Lost the race between read and write. If the winner kept
                // our etag invalid, that is a conflict; otherwise retry.
                let fresh = self.read(id, true).await?;
                if fresh.etag != expected_etag {
                    return Err(CoreError::Conflict {
                        current: Box::new(SyncChange::Field(fresh)),
                    });
                }
                warn!(field_id = %id, "guarded write raced; retrying");
                continue;
            }

            if boundary_changed {
                self.history
                    .append(&BoundaryChange {
                        id: Uuid::new_v4(),
                        field_id: id,
                        version_at_change: version,
                        previous_boundary: Some(current.boundary.clone()),
                        new_boundary: updated.boundary.clone(),
                        area_delta_hectares: updated.area_hectares - current.area_hectares,
                        changed_by: patch.changed_by.clone(),
                        reason: patch.change_reason.clone(),
                        source: patch.source,
                        device_id: patch.device_id.clone(),
                        changed_at: server_updated_at,
                    })
                    .await?;
            }

            debug!(field_id = %id, version, boundary_changed, "field updated");
            return Ok(updated);
        }

        Err(CoreError::StaleClock(id.to_string()))
    }

    /// Etag-guarded soft delete. The row stays put as a tombstone and keeps
    /// flowing through sync until pruned.
    pub async fn soft_delete(
        &self,
        id: FieldId,
        expected_etag: &str,
        source: ChangeSource,
        device_id: Option<String>,
    ) -> Result<Field, CoreError> {
        for _ in 0..GUARDED_WRITE_RETRIES {
            let current = self.read(id, false).await?;
            if current.etag != expected_etag {
                return Err(CoreError::Conflict {
                    current: Box::new(SyncChange::Field(current)),
                });
            }

            let (version, server_updated_at) = self.next_pair(&current)?;
            let mut deleted = current.clone();
            deleted.is_deleted = true;
            deleted.version = version;
            deleted.server_updated_at = server_updated_at;
            deleted.etag = compute_etag(&id.to_string(), version);
            deleted.updated_at = Utc::now();

            if !self.fields.update_guarded(&deleted, current.version).await? {
                let fresh = self.read(id, true).await?;
                if fresh.etag != expected_etag {
                    return Err(CoreError::Conflict {
                        current: Box::new(SyncChange::Field(fresh)),
                    });
                }
                continue;
            }

            self.history
                .append(&BoundaryChange {
                    id: Uuid::new_v4(),
                    field_id: id,
                    version_at_change: version,
                    previous_boundary: Some(current.boundary.clone()),
                    new_boundary: current.boundary.clone(),
                    area_delta_hectares: -current.area_hectares,
                    changed_by: None,
                    reason: Some("deleted".to_string()),
                    source,
                    device_id,
                    changed_at: server_updated_at,
                })
                .await?;

            debug!(field_id = %id, version, "field soft-deleted");
            return Ok(deleted);
        }

        Err(CoreError::StaleClock(id.to_string()))
    }

    /// Ordered page of fields (tombstones included) strictly after the
    /// cursor, plus the cursor for the next page.
    pub async fn list_changed_since(
        &self,
        tenant_id: &crate::domain::field::TenantId,
        cursor: &Cursor,
        limit: usize,
    ) -> Result<(Vec<Field>, Option<Cursor>), CoreError> {
        let page = self.fields.list_changed_since(tenant_id, cursor, limit).await?;
        let next = page.last().map(|f| Cursor {
            updated_at_micros: f.server_updated_at.timestamp_micros(),
            last_id: f.id.to_string(),
        });
        Ok((page, next))
    }

    /// Append an NDVI reading. Values outside [-1, 1] are user errors;
    /// duplicate `(field, captured_at)` keys are rejected.
    pub async fn record_ndvi(&self, reading: NdviReading) -> Result<(), CoreError> {
        if !(-1.0..=1.0).contains(&reading.value) {
            return Err(CoreError::Validation(format!(
                "ndvi value {} outside [-1, 1]",
                reading.value
            )));
        }
        if let Some(cloud) = reading.cloud_cover {
            if !(0.0..=1.0).contains(&cloud) {
                return Err(CoreError::Validation(format!(
                    "cloud_cover {cloud} outside [0, 1]"
                )));
            }
        }
        // The reading must reference a live field (tombstones still accept
        // readings; satellites do not know about deletions).
        self.fields
            .find_by_id(reading.field_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("field {}", reading.field_id)))?;

        match self.ndvi.append(&reading).await {
            Ok(()) => Ok(()),
            Err(RepositoryError::Duplicate(key)) => {
                Err(CoreError::Validation(format!("duplicate NDVI reading: {key}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn ndvi_readings(
        &self,
        field_id: FieldId,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<NdviReading>, CoreError> {
        Ok(self.ndvi.readings_for(field_id, since).await?)
    }

    /// Boundary audit rows, ordered by `version_at_change`.
    pub async fn boundary_history(&self, field_id: FieldId) -> Result<Vec<BoundaryChange>, CoreError> {
        Ok(self.history.for_field(field_id).await?)
    }

    fn next_pair(&self, current: &Field) -> Result<(i64, DateTime<Utc>), CoreError> {
        let id = current.id.to_string();
        self.clock.observe(&id, current.version);
        let (version, ts) = self.clock.next(&id)?;
        // server_updated_at must not regress relative to what storage holds
        // (a restarted process starts with a cold clock).
        let server_updated_at = if ts > current.server_updated_at {
            ts
        } else {
            current.server_updated_at + chrono::Duration::microseconds(1)
        };
        Ok((version, server_updated_at))
    }
}

fn apply_patch(field: &mut Field, patch: &FieldPatch) {
    if let Some(name) = &patch.name {
        field.name = name.clone();
    }
    if let Some(crop) = &patch.crop_type {
        field.crop_type = crop.clone();
    }
    if let Some(owner) = &patch.owner_id {
        field.owner_id = Some(owner.clone());
    }
    if let Some(boundary) = &patch.boundary {
        field.boundary = boundary.clone();
    }
    if let Some(status) = patch.status {
        field.status = status;
    }
    if let Some(score) = patch.health_score {
        field.health_score = Some(score);
    }
    if let Some(ndvi) = patch.ndvi_value {
        field.ndvi_value = Some(ndvi);
    }
    if let Some(date) = patch.planting_date {
        field.planting_date = Some(date);
    }
    if let Some(date) = patch.harvest_date {
        field.harvest_date = Some(date);
    }
    if let Some(irrigation) = &patch.irrigation_type {
        field.irrigation_type = Some(irrigation.clone());
    }
    if let Some(soil) = &patch.soil_type {
        field.soil_type = Some(soil.clone());
    }
    if let Some(metadata) = &patch.metadata {
        field.metadata = metadata.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::field::TenantId;
    use crate::domain::geometry::{Point, Polygon};
    use crate::infrastructure::repositories::{
        InMemoryBoundaryHistoryRepository, InMemoryFieldRepository, InMemoryNdviRepository,
    };

    fn service() -> FieldService {
        FieldService::new(
            Arc::new(InMemoryFieldRepository::new()),
            Arc::new(InMemoryBoundaryHistoryRepository::new()),
            Arc::new(InMemoryNdviRepository::new()),
            Arc::new(VersionClock::new()),
            SyncConfig::default(),
        )
    }

    fn boundary(offset: f64) -> Polygon {
        Polygon::new(vec![
            Point::new(offset, 0.0),
            Point::new(offset + 0.01, 0.0),
            Point::new(offset + 0.01, 0.01),
            Point::new(offset, 0.01),
        ])
    }

    fn create_input() -> CreateField {
        CreateField {
            id: None,
            name: "North paddock".to_string(),
            tenant_id: TenantId::new("farm-1"),
            crop_type: "maize".to_string(),
            owner_id: None,
            boundary: boundary(0.0),
            status: None,
            planting_date: None,
            harvest_date: None,
            irrigation_type: None,
            soil_type: None,
            metadata: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn create_sets_version_one_and_derives_geometry() {
        let svc = service();
        let field = svc.create(create_input()).await.unwrap();
        assert_eq!(field.version, 1);
        assert_eq!(field.etag, compute_etag(&field.id.to_string(), 1));
        assert!((field.area_hectares - field.boundary.area_hectares()).abs() < 1e-4);
        assert!(field.boundary.contains(&field.centroid));

        let history = svc.boundary_history(field.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].previous_boundary.is_none());
    }

    #[tokio::test]
    async fn update_with_stale_etag_conflicts_with_current_state() {
        let svc = service();
        let field = svc.create(create_input()).await.unwrap();
        let e1 = field.etag.clone();

        let patch = FieldPatch {
            boundary: Some(boundary(0.1)),
            ..Default::default()
        };
        let updated = svc.update(field.id, patch, &e1).await.unwrap();
        assert_eq!(updated.version, 2);

        let stale = FieldPatch {
            boundary: Some(boundary(0.2)),
            ..Default::default()
        };
        match svc.update(field.id, stale, &e1).await {
            Err(CoreError::Conflict { current }) => match *current {
                SyncChange::Field(f) => {
                    assert_eq!(f.version, 2);
                    assert_eq!(f.etag, updated.etag);
                }
                _ => panic!("conflict should carry a field"),
            },
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_boundary_update_still_rewrites_etag() {
        let svc = service();
        let field = svc.create(create_input()).await.unwrap();
        let patch = FieldPatch {
            name: Some("South paddock".to_string()),
            ..Default::default()
        };
        let updated = svc.update(field.id, patch, &field.etag).await.unwrap();
        assert_eq!(updated.version, 2);
        assert_ne!(updated.etag, field.etag);
        // Non-boundary updates do not append history.
        assert_eq!(svc.boundary_history(field.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn soft_delete_leaves_tombstone() {
        let svc = service();
        let field = svc.create(create_input()).await.unwrap();
        svc.soft_delete(field.id, &field.etag, ChangeSource::Mobile, None)
            .await
            .unwrap();

        assert!(matches!(
            svc.read(field.id, false).await,
            Err(CoreError::NotFound(_))
        ));
        let tombstone = svc.read(field.id, true).await.unwrap();
        assert!(tombstone.is_deleted);
        assert_eq!(tombstone.version, 2);
    }

    #[tokio::test]
    async fn server_updated_at_never_decreases() {
        let svc = service();
        let field = svc.create(create_input()).await.unwrap();
        let mut last = field.server_updated_at;
        let mut etag = field.etag.clone();
        for i in 0..5 {
            let patch = FieldPatch {
                name: Some(format!("rev {i}")),
                ..Default::default()
            };
            let updated = svc.update(field.id, patch, &etag).await.unwrap();
            assert!(updated.server_updated_at > last);
            last = updated.server_updated_at;
            etag = updated.etag;
        }
    }

    #[tokio::test]
    async fn ndvi_range_is_enforced() {
        let svc = service();
        let field = svc.create(create_input()).await.unwrap();
        let reading = NdviReading {
            id: Uuid::new_v4(),
            field_id: field.id,
            captured_at: Utc::now(),
            value: 1.5,
            cloud_cover: None,
            quality: None,
            satellite: None,
        };
        assert!(matches!(
            svc.record_ndvi(reading).await,
            Err(CoreError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn list_changed_since_pages_in_order() {
        let svc = service();
        let tenant = TenantId::new("farm-1");
        for i in 0..5 {
            let mut input = create_input();
            input.name = format!("field {i}");
            svc.create(input).await.unwrap();
        }
        let (page, next) = svc.list_changed_since(&tenant, &Cursor::origin(), 3).await.unwrap();
        assert_eq!(page.len(), 3);
        let (rest, _) = svc
            .list_changed_since(&tenant, &next.unwrap(), 10)
            .await
            .unwrap();
        assert_eq!(rest.len(), 2);
        let mut all: Vec<_> = page.iter().chain(rest.iter()).collect();
        let sorted = all.clone();
        all.sort_by_key(|f| (f.server_updated_at, f.id.to_string()));
        assert_eq!(
            all.iter().map(|f| f.id).collect::<Vec<_>>(),
            sorted.iter().map(|f| f.id).collect::<Vec<_>>()
        );
    }
}
