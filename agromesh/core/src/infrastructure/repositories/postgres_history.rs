// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! PostgreSQL `BoundaryHistoryRepository` over the append-only
//! `field_boundary_history` table.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;

use crate::domain::field::{BoundaryChange, ChangeSource, FieldId};
use crate::domain::geometry::Polygon;
use crate::domain::repository::{BoundaryHistoryRepository, RepositoryError};

pub struct PostgresBoundaryHistoryRepository {
    pool: PgPool,
}

impl PostgresBoundaryHistoryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn source_from_str(s: &str) -> Result<ChangeSource, RepositoryError> {
    match s {
        "mobile" => Ok(ChangeSource::Mobile),
        "web" => Ok(ChangeSource::Web),
        "api" => Ok(ChangeSource::Api),
        "system" => Ok(ChangeSource::System),
        other => Err(RepositoryError::Serialization(format!(
            "Unknown change source: {other}"
        ))),
    }
}

fn change_from_row(row: &PgRow) -> Result<BoundaryChange, RepositoryError> {
    let field_id: uuid::Uuid = row.get("field_id");
    let previous_val: Option<serde_json::Value> = row.get("previous_boundary");
    let previous_boundary = previous_val
        .map(serde_json::from_value::<Polygon>)
        .transpose()
        .map_err(|e| RepositoryError::Serialization(format!("Failed to decode boundary: {e}")))?;
    let new_val: serde_json::Value = row.get("new_boundary");
    let new_boundary: Polygon = serde_json::from_value(new_val)
        .map_err(|e| RepositoryError::Serialization(format!("Failed to decode boundary: {e}")))?;
    let source_str: String = row.get("source");

    Ok(BoundaryChange {
        id: row.get("id"),
        field_id: FieldId(field_id),
        version_at_change: row.get("version_at_change"),
        previous_boundary,
        new_boundary,
        area_delta_hectares: row.get("area_delta_hectares"),
        changed_by: row.get("changed_by"),
        reason: row.get("reason"),
        source: source_from_str(&source_str)?,
        device_id: row.get("device_id"),
        changed_at: row.get("changed_at"),
    })
}

#[async_trait]
impl BoundaryHistoryRepository for PostgresBoundaryHistoryRepository {
    async fn append(&self, change: &BoundaryChange) -> Result<(), RepositoryError> {
        let previous = change
            .previous_boundary
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| RepositoryError::Serialization(e.to_string()))?;
        let new_boundary = serde_json::to_value(&change.new_boundary)
            .map_err(|e| RepositoryError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO field_boundary_history (
                id, field_id, version_at_change, previous_boundary, new_boundary,
                area_delta_hectares, changed_by, reason, source, device_id, changed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(change.id)
        .bind(change.field_id.0)
        .bind(change.version_at_change)
        .bind(previous)
        .bind(new_boundary)
        .bind(change.area_delta_hectares)
        .bind(&change.changed_by)
        .bind(&change.reason)
        .bind(change.source.as_str())
        .bind(&change.device_id)
        .bind(change.changed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to append history row: {e}")))?;

        Ok(())
    }

    async fn for_field(&self, field_id: FieldId) -> Result<Vec<BoundaryChange>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT id, field_id, version_at_change, previous_boundary, new_boundary,
                   area_delta_hectares, changed_by, reason, source, device_id, changed_at
            FROM field_boundary_history
            WHERE field_id = $1
            ORDER BY version_at_change ASC
            "#,
        )
        .bind(field_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        rows.iter().map(change_from_row).collect()
    }
}
