// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! PostgreSQL `NdviRepository` over the append-only `ndvi_readings` table
//! with a unique key on `(field_id, captured_at)`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;

use crate::domain::field::{FieldId, NdviReading};
use crate::domain::repository::{NdviRepository, RepositoryError};

pub struct PostgresNdviRepository {
    pool: PgPool,
}

impl PostgresNdviRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn reading_from_row(row: &PgRow) -> NdviReading {
    let field_id: uuid::Uuid = row.get("field_id");
    NdviReading {
        id: row.get("id"),
        field_id: FieldId(field_id),
        captured_at: row.get("captured_at"),
        value: row.get("value"),
        cloud_cover: row.get("cloud_cover"),
        quality: row.get("quality"),
        satellite: row.get("satellite"),
    }
}

#[async_trait]
impl NdviRepository for PostgresNdviRepository {
    async fn append(&self, reading: &NdviReading) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"
            INSERT INTO ndvi_readings (
                id, field_id, captured_at, value, cloud_cover, quality, satellite
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (field_id, captured_at) DO NOTHING
            "#,
        )
        .bind(reading.id)
        .bind(reading.field_id.0)
        .bind(reading.captured_at)
        .bind(reading.value)
        .bind(reading.cloud_cover)
        .bind(&reading.quality)
        .bind(&reading.satellite)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to append NDVI reading: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::Duplicate(format!(
                "({}, {})",
                reading.field_id, reading.captured_at
            )));
        }
        Ok(())
    }

    async fn readings_for(
        &self,
        field_id: FieldId,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<NdviReading>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT id, field_id, captured_at, value, cloud_cover, quality, satellite
            FROM ndvi_readings
            WHERE field_id = $1
              AND ($2::timestamptz IS NULL OR captured_at >= $2)
            ORDER BY captured_at ASC
            "#,
        )
        .bind(field_id.0)
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        Ok(rows.iter().map(reading_from_row).collect())
    }
}
