// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Repository Interfaces
//!
//! Persistence contracts for each aggregate root, following the DDD
//! Repository pattern: one repository per aggregate, interface defined in
//! the domain layer, implemented in `crate::infrastructure::repositories`.
//!
//! | Trait | Aggregate | Implementations |
//! |-------|-----------|----------------|
//! | `FieldRepository` | `Field` | `InMemoryFieldRepository`, `PostgresFieldRepository` |
//! | `TaskRepository` | `Task` | `InMemoryTaskRepository`, `PostgresTaskRepository` |
//! | `SyncStatusRepository` | `SyncStatus` | `InMemorySyncStatusRepository`, `PostgresSyncStatusRepository` |
//! | `BoundaryHistoryRepository` | `BoundaryChange` | `InMemoryBoundaryHistoryRepository`, `PostgresBoundaryHistoryRepository` |
//! | `NdviRepository` | `NdviReading` | `InMemoryNdviRepository`, `PostgresNdviRepository` |
//!
//! ## Optimistic concurrency
//!
//! Versioned aggregates expose `update_guarded`, a conditional write keyed
//! on the version the caller read. A `false` return means a concurrent
//! writer won the race; the service re-reads and reports a conflict. No
//! explicit locks anywhere.

use async_trait::async_trait;

use crate::domain::field::{BoundaryChange, Field, FieldId, NdviReading, Task, TaskId, TenantId};
use crate::domain::sync::{Cursor, SyncStatus};

/// Storage backend selector, chosen at service startup.
#[derive(Debug, Clone)]
pub enum StorageBackend {
    InMemory,
    PostgreSQL(PostgresConfig),
}

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub connection_string: String,
}

#[async_trait]
pub trait FieldRepository: Send + Sync {
    /// Insert a new field. Returns `false` when the id already exists
    /// (idempotent-create detection happens in the service).
    async fn insert(&self, field: &Field) -> Result<bool, RepositoryError>;

    /// Find by id, tombstones included; callers filter.
    async fn find_by_id(&self, id: FieldId) -> Result<Option<Field>, RepositoryError>;

    /// Conditional overwrite: succeeds only if the stored version still
    /// equals `expected_version`. Returns `false` on a lost race.
    async fn update_guarded(
        &self,
        field: &Field,
        expected_version: i64,
    ) -> Result<bool, RepositoryError>;

    /// Page of fields (tombstones included) strictly after `cursor`,
    /// ordered by `(server_updated_at, id)` ascending.
    async fn list_changed_since(
        &self,
        tenant_id: &TenantId,
        cursor: &Cursor,
        limit: usize,
    ) -> Result<Vec<Field>, RepositoryError>;
}

#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn insert(&self, task: &Task) -> Result<bool, RepositoryError>;

    async fn find_by_id(&self, id: TaskId) -> Result<Option<Task>, RepositoryError>;

    async fn update_guarded(
        &self,
        task: &Task,
        expected_version: i64,
    ) -> Result<bool, RepositoryError>;

    async fn list_changed_since(
        &self,
        tenant_id: &TenantId,
        cursor: &Cursor,
        limit: usize,
    ) -> Result<Vec<Task>, RepositoryError>;
}

#[async_trait]
pub trait SyncStatusRepository: Send + Sync {
    async fn find(
        &self,
        device_id: &str,
        user_id: &str,
    ) -> Result<Option<SyncStatus>, RepositoryError>;

    /// Create or overwrite the `(device_id, user_id)` row.
    async fn upsert(&self, status: &SyncStatus) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait BoundaryHistoryRepository: Send + Sync {
    async fn append(&self, change: &BoundaryChange) -> Result<(), RepositoryError>;

    /// Audit rows for a field, ordered by `version_at_change` ascending.
    async fn for_field(&self, field_id: FieldId) -> Result<Vec<BoundaryChange>, RepositoryError>;
}

#[async_trait]
pub trait NdviRepository: Send + Sync {
    /// Append a reading. Duplicate `(field_id, captured_at)` keys are
    /// rejected with `RepositoryError::Duplicate`.
    async fn append(&self, reading: &NdviReading) -> Result<(), RepositoryError>;

    async fn readings_for(
        &self,
        field_id: FieldId,
        since: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<Vec<NdviReading>, RepositoryError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Duplicate key: {0}")]
    Duplicate(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("Row not found".to_string()),
            _ => RepositoryError::Database(err.to_string()),
        }
    }
}
