// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! Infrastructure implementations of the repository abstractions defined in
//! the domain layer, following the Repository pattern from DDD.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Persist and retrieve domain aggregates
//! - **Pattern:** Repository (DDD), Adapter (Hexagonal Architecture)
//!
//! # Available Implementations
//!
//! ## PostgreSQL Repositories
//!
//! Production implementations backed by PostgreSQL:
//! - **PostgresFieldRepository** - versioned fields, JSONB boundaries
//! - **PostgresTaskRepository** - sync-parity tasks
//! - **PostgresSyncStatusRepository** - per-device cursors
//! - **PostgresBoundaryHistoryRepository** - boundary audit rows
//! - **PostgresNdviRepository** - NDVI time series
//!
//! ## In-Memory Repositories
//!
//! Thread-safe HashMap-backed implementations for development and testing.
//! The conditional-update semantics (`update_guarded`) are identical to the
//! PostgreSQL versions, so optimistic-concurrency behavior can be tested
//! without a database.

pub mod postgres_field;
pub mod postgres_history;
pub mod postgres_ndvi;
pub mod postgres_sync_status;
pub mod postgres_task;

pub use postgres_field::PostgresFieldRepository;
pub use postgres_history::PostgresBoundaryHistoryRepository;
pub use postgres_ndvi::PostgresNdviRepository;
pub use postgres_sync_status::PostgresSyncStatusRepository;
pub use postgres_task::PostgresTaskRepository;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::domain::field::{BoundaryChange, Field, FieldId, NdviReading, Task, TaskId, TenantId};
use crate::domain::repository::{
    BoundaryHistoryRepository, FieldRepository, NdviRepository, RepositoryError,
    SyncStatusRepository, TaskRepository,
};
use crate::domain::sync::{Cursor, SyncStatus};

#[derive(Clone)]
pub struct InMemoryFieldRepository {
    fields: Arc<RwLock<HashMap<FieldId, Field>>>,
}

impl InMemoryFieldRepository {
    pub fn new() -> Self {
        Self {
            fields: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryFieldRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FieldRepository for InMemoryFieldRepository {
    async fn insert(&self, field: &Field) -> Result<bool, RepositoryError> {
        let mut fields = self.fields.write();
        if fields.contains_key(&field.id) {
            return Ok(false);
        }
        fields.insert(field.id, field.clone());
        Ok(true)
    }

    async fn find_by_id(&self, id: FieldId) -> Result<Option<Field>, RepositoryError> {
        let fields = self.fields.read();
        Ok(fields.get(&id).cloned())
    }

    async fn update_guarded(
        &self,
        field: &Field,
        expected_version: i64,
    ) -> Result<bool, RepositoryError> {
        let mut fields = self.fields.write();
        match fields.get(&field.id) {
            Some(stored) if stored.version == expected_version => {
                fields.insert(field.id, field.clone());
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(RepositoryError::NotFound(format!("field {}", field.id))),
        }
    }

    async fn list_changed_since(
        &self,
        tenant_id: &TenantId,
        cursor: &Cursor,
        limit: usize,
    ) -> Result<Vec<Field>, RepositoryError> {
        let fields = self.fields.read();
        let mut page: Vec<Field> = fields
            .values()
            .filter(|f| f.tenant_id == *tenant_id)
            .filter(|f| cursor.admits(f.server_updated_at, &f.id.to_string()))
            .cloned()
            .collect();
        page.sort_by(|a, b| {
            (a.server_updated_at, a.id.to_string()).cmp(&(b.server_updated_at, b.id.to_string()))
        });
        page.truncate(limit);
        Ok(page)
    }
}

#[derive(Clone)]
pub struct InMemoryTaskRepository {
    tasks: Arc<RwLock<HashMap<TaskId, Task>>>,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self {
            tasks: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryTaskRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn insert(&self, task: &Task) -> Result<bool, RepositoryError> {
        let mut tasks = self.tasks.write();
        if tasks.contains_key(&task.id) {
            return Ok(false);
        }
        tasks.insert(task.id, task.clone());
        Ok(true)
    }

    async fn find_by_id(&self, id: TaskId) -> Result<Option<Task>, RepositoryError> {
        let tasks = self.tasks.read();
        Ok(tasks.get(&id).cloned())
    }

    async fn update_guarded(
        &self,
        task: &Task,
        expected_version: i64,
    ) -> Result<bool, RepositoryError> {
        let mut tasks = self.tasks.write();
        match tasks.get(&task.id) {
            Some(stored) if stored.version == expected_version => {
                tasks.insert(task.id, task.clone());
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(RepositoryError::NotFound(format!("task {}", task.id))),
        }
    }

    async fn list_changed_since(
        &self,
        tenant_id: &TenantId,
        cursor: &Cursor,
        limit: usize,
    ) -> Result<Vec<Task>, RepositoryError> {
        let tasks = self.tasks.read();
        let mut page: Vec<Task> = tasks
            .values()
            .filter(|t| t.tenant_id == *tenant_id)
            .filter(|t| cursor.admits(t.server_updated_at, &t.id.to_string()))
            .cloned()
            .collect();
        page.sort_by(|a, b| {
            (a.server_updated_at, a.id.to_string()).cmp(&(b.server_updated_at, b.id.to_string()))
        });
        page.truncate(limit);
        Ok(page)
    }
}

#[derive(Clone)]
pub struct InMemorySyncStatusRepository {
    rows: Arc<RwLock<HashMap<(String, String), SyncStatus>>>,
}

impl InMemorySyncStatusRepository {
    pub fn new() -> Self {
        Self {
            rows: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemorySyncStatusRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SyncStatusRepository for InMemorySyncStatusRepository {
    async fn find(
        &self,
        device_id: &str,
        user_id: &str,
    ) -> Result<Option<SyncStatus>, RepositoryError> {
        let rows = self.rows.read();
        Ok(rows
            .get(&(device_id.to_string(), user_id.to_string()))
            .cloned())
    }

    async fn upsert(&self, status: &SyncStatus) -> Result<(), RepositoryError> {
        let mut rows = self.rows.write();
        rows.insert(
            (status.device_id.clone(), status.user_id.clone()),
            status.clone(),
        );
        Ok(())
    }
}

#[derive(Clone)]
pub struct InMemoryBoundaryHistoryRepository {
    rows: Arc<RwLock<HashMap<FieldId, Vec<BoundaryChange>>>>,
}

impl InMemoryBoundaryHistoryRepository {
    pub fn new() -> Self {
        Self {
            rows: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryBoundaryHistoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BoundaryHistoryRepository for InMemoryBoundaryHistoryRepository {
    async fn append(&self, change: &BoundaryChange) -> Result<(), RepositoryError> {
        let mut rows = self.rows.write();
        rows.entry(change.field_id).or_default().push(change.clone());
        Ok(())
    }

    async fn for_field(&self, field_id: FieldId) -> Result<Vec<BoundaryChange>, RepositoryError> {
        let rows = self.rows.read();
        let mut history = rows.get(&field_id).cloned().unwrap_or_default();
        history.sort_by_key(|c| c.version_at_change);
        Ok(history)
    }
}

#[derive(Clone)]
pub struct InMemoryNdviRepository {
    readings: Arc<RwLock<HashMap<(FieldId, DateTime<Utc>), NdviReading>>>,
}

impl InMemoryNdviRepository {
    pub fn new() -> Self {
        Self {
            readings: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryNdviRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NdviRepository for InMemoryNdviRepository {
    async fn append(&self, reading: &NdviReading) -> Result<(), RepositoryError> {
        let mut readings = self.readings.write();
        let key = (reading.field_id, reading.captured_at);
        if readings.contains_key(&key) {
            return Err(RepositoryError::Duplicate(format!(
                "({}, {})",
                reading.field_id, reading.captured_at
            )));
        }
        readings.insert(key, reading.clone());
        Ok(())
    }

    async fn readings_for(
        &self,
        field_id: FieldId,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<NdviReading>, RepositoryError> {
        let readings = self.readings.read();
        let mut result: Vec<NdviReading> = readings
            .values()
            .filter(|r| r.field_id == field_id)
            .filter(|r| since.map(|s| r.captured_at >= s).unwrap_or(true))
            .cloned()
            .collect();
        result.sort_by_key(|r| r.captured_at);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::field::{compute_etag, FieldStatus};
    use crate::domain::geometry::{Point, Polygon};

    fn sample_field(tenant: &str, version: i64) -> Field {
        let id = FieldId::new();
        let boundary = Polygon::new(vec![
            Point::new(0.0, 0.0),
            Point::new(0.01, 0.0),
            Point::new(0.01, 0.01),
            Point::new(0.0, 0.01),
        ]);
        let centroid = boundary.representative_point();
        let area = boundary.area_hectares();
        let now = Utc::now();
        Field {
            id,
            version,
            name: "test".to_string(),
            tenant_id: TenantId::new(tenant),
            crop_type: "wheat".to_string(),
            owner_id: None,
            boundary,
            centroid,
            area_hectares: area,
            health_score: None,
            ndvi_value: None,
            status: FieldStatus::Active,
            planting_date: None,
            harvest_date: None,
            irrigation_type: None,
            soil_type: None,
            metadata: serde_json::Value::Null,
            is_deleted: false,
            server_updated_at: now,
            etag: compute_etag(&id.to_string(), version),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn guarded_update_rejects_stale_version() {
        let repo = InMemoryFieldRepository::new();
        let field = sample_field("farm-1", 1);
        assert!(repo.insert(&field).await.unwrap());

        let mut bumped = field.clone();
        bumped.version = 2;
        assert!(repo.update_guarded(&bumped, 1).await.unwrap());
        // Second writer raced and lost.
        assert!(!repo.update_guarded(&bumped, 1).await.unwrap());
    }

    #[tokio::test]
    async fn insert_is_first_writer_wins() {
        let repo = InMemoryFieldRepository::new();
        let field = sample_field("farm-1", 1);
        assert!(repo.insert(&field).await.unwrap());
        assert!(!repo.insert(&field).await.unwrap());
    }

    #[tokio::test]
    async fn list_changed_since_filters_tenant_and_cursor() {
        let repo = InMemoryFieldRepository::new();
        let a = sample_field("farm-1", 1);
        let b = sample_field("farm-2", 1);
        repo.insert(&a).await.unwrap();
        repo.insert(&b).await.unwrap();

        let page = repo
            .list_changed_since(&TenantId::new("farm-1"), &Cursor::origin(), 10)
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, a.id);

        let after = Cursor {
            updated_at_micros: a.server_updated_at.timestamp_micros(),
            last_id: a.id.to_string(),
        };
        let page = repo
            .list_changed_since(&TenantId::new("farm-1"), &after, 10)
            .await
            .unwrap();
        assert!(page.is_empty());
    }

    #[tokio::test]
    async fn ndvi_duplicate_key_is_rejected() {
        let repo = InMemoryNdviRepository::new();
        let field_id = FieldId::new();
        let reading = NdviReading {
            id: uuid::Uuid::new_v4(),
            field_id,
            captured_at: Utc::now(),
            value: 0.6,
            cloud_cover: None,
            quality: None,
            satellite: Some("sentinel-2".to_string()),
        };
        repo.append(&reading).await.unwrap();
        assert!(matches!(
            repo.append(&reading).await,
            Err(RepositoryError::Duplicate(_))
        ));
    }
}
