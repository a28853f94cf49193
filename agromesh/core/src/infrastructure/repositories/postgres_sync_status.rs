// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! PostgreSQL `SyncStatusRepository` over the `sync_status` table with a
//! unique key on `(device_id, user_id)`.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;

use crate::domain::repository::{RepositoryError, SyncStatusRepository};
use crate::domain::sync::{SyncState, SyncStatus};

pub struct PostgresSyncStatusRepository {
    pool: PgPool,
}

impl PostgresSyncStatusRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn status_from_row(row: &PgRow) -> Result<SyncStatus, RepositoryError> {
    let state_str: String = row.get("state");
    let state = SyncState::parse(&state_str)
        .ok_or_else(|| RepositoryError::Serialization(format!("Unknown sync state: {state_str}")))?;

    Ok(SyncStatus {
        device_id: row.get("device_id"),
        user_id: row.get("user_id"),
        last_sync_at: row.get("last_sync_at"),
        last_sync_version: row.get("last_sync_version"),
        state,
        pending_uploads: row.get("pending_uploads"),
        pending_downloads: row.get("pending_downloads"),
        conflicts_count: row.get("conflicts_count"),
        last_error: row.get("last_error"),
        device_info: row.get("device_info"),
    })
}

#[async_trait]
impl SyncStatusRepository for PostgresSyncStatusRepository {
    async fn find(
        &self,
        device_id: &str,
        user_id: &str,
    ) -> Result<Option<SyncStatus>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT device_id, user_id, last_sync_at, last_sync_version, state,
                   pending_uploads, pending_downloads, conflicts_count,
                   last_error, device_info
            FROM sync_status
            WHERE device_id = $1 AND user_id = $2
            "#,
        )
        .bind(device_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        row.as_ref().map(status_from_row).transpose()
    }

    async fn upsert(&self, status: &SyncStatus) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO sync_status (
                device_id, user_id, last_sync_at, last_sync_version, state,
                pending_uploads, pending_downloads, conflicts_count,
                last_error, device_info
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (device_id, user_id) DO UPDATE SET
                last_sync_at = EXCLUDED.last_sync_at,
                last_sync_version = GREATEST(sync_status.last_sync_version, EXCLUDED.last_sync_version),
                state = EXCLUDED.state,
                pending_uploads = EXCLUDED.pending_uploads,
                pending_downloads = EXCLUDED.pending_downloads,
                conflicts_count = EXCLUDED.conflicts_count,
                last_error = EXCLUDED.last_error,
                device_info = EXCLUDED.device_info
            "#,
        )
        .bind(&status.device_id)
        .bind(&status.user_id)
        .bind(status.last_sync_at)
        .bind(status.last_sync_version)
        .bind(status.state.as_str())
        .bind(status.pending_uploads)
        .bind(status.pending_downloads)
        .bind(status.conflicts_count)
        .bind(&status.last_error)
        .bind(&status.device_info)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to upsert sync status: {e}")))?;

        Ok(())
    }
}
