// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # PostgreSQL Field Repository
//!
//! Production `FieldRepository` implementation backed by the `fields` table
//! via `sqlx`. Boundaries and centroids are stored as JSONB; the geometry
//! module owns validation so the columns stay opaque to SQL.
//!
//! Expected schema (indexes on `tenant_id`, `server_updated_at`, `status`,
//! `crop_type`):
//!
//! ```sql
//! CREATE TABLE fields (
//!     id                UUID PRIMARY KEY,
//!     version           BIGINT NOT NULL,
//!     name              TEXT NOT NULL,
//!     tenant_id         TEXT NOT NULL,
//!     crop_type         TEXT NOT NULL,
//!     owner_id          TEXT,
//!     boundary          JSONB NOT NULL,
//!     centroid          JSONB NOT NULL,
//!     area_hectares     DOUBLE PRECISION NOT NULL,
//!     health_score      DOUBLE PRECISION,
//!     ndvi_value        DOUBLE PRECISION,
//!     status            TEXT NOT NULL,
//!     planting_date     TIMESTAMPTZ,
//!     harvest_date      TIMESTAMPTZ,
//!     irrigation_type   TEXT,
//!     soil_type         TEXT,
//!     metadata          JSONB NOT NULL DEFAULT 'null',
//!     is_deleted        BOOLEAN NOT NULL DEFAULT FALSE,
//!     server_updated_at TIMESTAMPTZ NOT NULL,
//!     etag              TEXT NOT NULL,
//!     created_at        TIMESTAMPTZ NOT NULL,
//!     updated_at        TIMESTAMPTZ NOT NULL
//! );
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;

use crate::domain::field::{Field, FieldId, FieldStatus, TenantId};
use crate::domain::geometry::{Point, Polygon};
use crate::domain::repository::{FieldRepository, RepositoryError};
use crate::domain::sync::Cursor;

pub struct PostgresFieldRepository {
    pool: PgPool,
}

impl PostgresFieldRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn field_from_row(row: &PgRow) -> Result<Field, RepositoryError> {
    let id: uuid::Uuid = row.get("id");
    let boundary_val: serde_json::Value = row.get("boundary");
    let centroid_val: serde_json::Value = row.get("centroid");
    let boundary: Polygon = serde_json::from_value(boundary_val)
        .map_err(|e| RepositoryError::Serialization(format!("Failed to decode boundary: {e}")))?;
    let centroid: Point = serde_json::from_value(centroid_val)
        .map_err(|e| RepositoryError::Serialization(format!("Failed to decode centroid: {e}")))?;
    let status_str: String = row.get("status");
    let status = FieldStatus::parse(&status_str)
        .ok_or_else(|| RepositoryError::Serialization(format!("Unknown status: {status_str}")))?;

    Ok(Field {
        id: FieldId(id),
        version: row.get("version"),
        name: row.get("name"),
        tenant_id: TenantId(row.get("tenant_id")),
        crop_type: row.get("crop_type"),
        owner_id: row.get("owner_id"),
        boundary,
        centroid,
        area_hectares: row.get("area_hectares"),
        health_score: row.get("health_score"),
        ndvi_value: row.get("ndvi_value"),
        status,
        planting_date: row.get("planting_date"),
        harvest_date: row.get("harvest_date"),
        irrigation_type: row.get("irrigation_type"),
        soil_type: row.get("soil_type"),
        metadata: row.get("metadata"),
        is_deleted: row.get("is_deleted"),
        server_updated_at: row.get("server_updated_at"),
        etag: row.get("etag"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

const ALL_COLUMNS: &str = "id, version, name, tenant_id, crop_type, owner_id, boundary, centroid, \
     area_hectares, health_score, ndvi_value, status, planting_date, harvest_date, \
     irrigation_type, soil_type, metadata, is_deleted, server_updated_at, etag, \
     created_at, updated_at";

#[async_trait]
impl FieldRepository for PostgresFieldRepository {
    async fn insert(&self, field: &Field) -> Result<bool, RepositoryError> {
        let boundary = serde_json::to_value(&field.boundary)
            .map_err(|e| RepositoryError::Serialization(e.to_string()))?;
        let centroid = serde_json::to_value(field.centroid)
            .map_err(|e| RepositoryError::Serialization(e.to_string()))?;

        let result = sqlx::query(
            r#"
            INSERT INTO fields (
                id, version, name, tenant_id, crop_type, owner_id,
                boundary, centroid, area_hectares, health_score, ndvi_value,
                status, planting_date, harvest_date, irrigation_type, soil_type,
                metadata, is_deleted, server_updated_at, etag, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11,
                    $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, $22)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(field.id.0)
        .bind(field.version)
        .bind(&field.name)
        .bind(&field.tenant_id.0)
        .bind(&field.crop_type)
        .bind(&field.owner_id)
        .bind(boundary)
        .bind(centroid)
        .bind(field.area_hectares)
        .bind(field.health_score)
        .bind(field.ndvi_value)
        .bind(field.status.as_str())
        .bind(field.planting_date)
        .bind(field.harvest_date)
        .bind(&field.irrigation_type)
        .bind(&field.soil_type)
        .bind(&field.metadata)
        .bind(field.is_deleted)
        .bind(field.server_updated_at)
        .bind(&field.etag)
        .bind(field.created_at)
        .bind(field.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to insert field: {e}")))?;

        Ok(result.rows_affected() == 1)
    }

    async fn find_by_id(&self, id: FieldId) -> Result<Option<Field>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {ALL_COLUMNS} FROM fields WHERE id = $1"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;

        row.as_ref().map(field_from_row).transpose()
    }

    async fn update_guarded(
        &self,
        field: &Field,
        expected_version: i64,
    ) -> Result<bool, RepositoryError> {
        let boundary = serde_json::to_value(&field.boundary)
            .map_err(|e| RepositoryError::Serialization(e.to_string()))?;
        let centroid = serde_json::to_value(field.centroid)
            .map_err(|e| RepositoryError::Serialization(e.to_string()))?;

        let result = sqlx::query(
            r#"
            UPDATE fields SET
                version = $2, name = $3, crop_type = $4, owner_id = $5,
                boundary = $6, centroid = $7, area_hectares = $8,
                health_score = $9, ndvi_value = $10, status = $11,
                planting_date = $12, harvest_date = $13,
                irrigation_type = $14, soil_type = $15, metadata = $16,
                is_deleted = $17, server_updated_at = $18, etag = $19,
                updated_at = $20
            WHERE id = $1 AND version = $21
            "#,
        )
        .bind(field.id.0)
        .bind(field.version)
        .bind(&field.name)
        .bind(&field.crop_type)
        .bind(&field.owner_id)
        .bind(boundary)
        .bind(centroid)
        .bind(field.area_hectares)
        .bind(field.health_score)
        .bind(field.ndvi_value)
        .bind(field.status.as_str())
        .bind(field.planting_date)
        .bind(field.harvest_date)
        .bind(&field.irrigation_type)
        .bind(&field.soil_type)
        .bind(&field.metadata)
        .bind(field.is_deleted)
        .bind(field.server_updated_at)
        .bind(&field.etag)
        .bind(field.updated_at)
        .bind(expected_version)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to update field: {e}")))?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_changed_since(
        &self,
        tenant_id: &TenantId,
        cursor: &Cursor,
        limit: usize,
    ) -> Result<Vec<Field>, RepositoryError> {
        let after: DateTime<Utc> = DateTime::from_timestamp_micros(cursor.updated_at_micros)
            .ok_or_else(|| RepositoryError::Serialization("cursor timestamp overflow".to_string()))?;

        let rows = sqlx::query(&format!(
            r#"
            SELECT {ALL_COLUMNS} FROM fields
            WHERE tenant_id = $1
              AND (server_updated_at, id::text) > ($2, $3)
            ORDER BY server_updated_at ASC, id::text ASC
            LIMIT $4
            "#
        ))
        .bind(&tenant_id.0)
        .bind(after)
        .bind(&cursor.last_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        rows.iter().map(field_from_row).collect()
    }
}
