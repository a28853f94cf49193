// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! PostgreSQL `TaskRepository` over the `tasks` table. Same conditional
//! update discipline as the field repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;

use crate::domain::field::{FieldId, Task, TaskId, TaskStatus, TenantId};
use crate::domain::repository::{RepositoryError, TaskRepository};
use crate::domain::sync::Cursor;

pub struct PostgresTaskRepository {
    pool: PgPool,
}

impl PostgresTaskRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn task_status_str(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "pending",
        TaskStatus::InProgress => "in_progress",
        TaskStatus::Done => "done",
        TaskStatus::Cancelled => "cancelled",
    }
}

fn task_from_row(row: &PgRow) -> Result<Task, RepositoryError> {
    let status_str: String = row.get("status");
    let status = match status_str.as_str() {
        "pending" => TaskStatus::Pending,
        "in_progress" => TaskStatus::InProgress,
        "done" => TaskStatus::Done,
        "cancelled" => TaskStatus::Cancelled,
        other => {
            return Err(RepositoryError::Serialization(format!(
                "Unknown task status: {other}"
            )))
        }
    };
    let id: uuid::Uuid = row.get("id");
    let field_id: Option<uuid::Uuid> = row.get("field_id");

    Ok(Task {
        id: TaskId(id),
        version: row.get("version"),
        tenant_id: TenantId(row.get("tenant_id")),
        field_id: field_id.map(FieldId),
        title: row.get("title"),
        description: row.get("description"),
        status,
        due_date: row.get("due_date"),
        is_deleted: row.get("is_deleted"),
        server_updated_at: row.get("server_updated_at"),
        etag: row.get("etag"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

const ALL_COLUMNS: &str = "id, version, tenant_id, field_id, title, description, status, \
     due_date, is_deleted, server_updated_at, etag, created_at, updated_at";

#[async_trait]
impl TaskRepository for PostgresTaskRepository {
    async fn insert(&self, task: &Task) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r#"
            INSERT INTO tasks (
                id, version, tenant_id, field_id, title, description, status,
                due_date, is_deleted, server_updated_at, etag, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(task.id.0)
        .bind(task.version)
        .bind(&task.tenant_id.0)
        .bind(task.field_id.map(|f| f.0))
        .bind(&task.title)
        .bind(&task.description)
        .bind(task_status_str(task.status))
        .bind(task.due_date)
        .bind(task.is_deleted)
        .bind(task.server_updated_at)
        .bind(&task.etag)
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to insert task: {e}")))?;

        Ok(result.rows_affected() == 1)
    }

    async fn find_by_id(&self, id: TaskId) -> Result<Option<Task>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {ALL_COLUMNS} FROM tasks WHERE id = $1"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;

        row.as_ref().map(task_from_row).transpose()
    }

    async fn update_guarded(
        &self,
        task: &Task,
        expected_version: i64,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE tasks SET
                version = $2, field_id = $3, title = $4, description = $5,
                status = $6, due_date = $7, is_deleted = $8,
                server_updated_at = $9, etag = $10, updated_at = $11
            WHERE id = $1 AND version = $12
            "#,
        )
        .bind(task.id.0)
        .bind(task.version)
        .bind(task.field_id.map(|f| f.0))
        .bind(&task.title)
        .bind(&task.description)
        .bind(task_status_str(task.status))
        .bind(task.due_date)
        .bind(task.is_deleted)
        .bind(task.server_updated_at)
        .bind(&task.etag)
        .bind(task.updated_at)
        .bind(expected_version)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to update task: {e}")))?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_changed_since(
        &self,
        tenant_id: &TenantId,
        cursor: &Cursor,
        limit: usize,
    ) -> Result<Vec<Task>, RepositoryError> {
        let after: DateTime<Utc> = DateTime::from_timestamp_micros(cursor.updated_at_micros)
            .ok_or_else(|| RepositoryError::Serialization("cursor timestamp overflow".to_string()))?;

        let rows = sqlx::query(&format!(
            r#"
            SELECT {ALL_COLUMNS} FROM tasks
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

        rows.iter().map(task_from_row).collect()
    }
}
