// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Task service — sync parity for the optional `Task` collaborator entity.
//!
//! Tasks ride the same protocol as fields: etag-guarded writes, monotonic
//! versions, tombstones. There is no geometry or audit trail here, which
//! keeps this service a thin guard around the repository.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::application::version_clock::VersionClock;
use crate::domain::errors::CoreError;
use crate::domain::field::{compute_etag, FieldId, Task, TaskId, TaskStatus, TenantId};
use crate::domain::repository::TaskRepository;
use crate::domain::sync::{Cursor, SyncChange};

const GUARDED_WRITE_RETRIES: usize = 3;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CreateTask {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<TaskId>,
    pub tenant_id: TenantId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_id: Option<FieldId>,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct TaskPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_id: Option<FieldId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
}

pub struct TaskService {
    tasks: Arc<dyn TaskRepository>,
    clock: Arc<VersionClock>,
}

impl TaskService {
    pub fn new(tasks: Arc<dyn TaskRepository>, clock: Arc<VersionClock>) -> Self {
        Self { tasks, clock }
    }

    pub async fn create(&self, input: CreateTask) -> Result<Task, CoreError> {
        if input.title.trim().is_empty() {
            return Err(CoreError::Validation("task title must not be empty".to_string()));
        }
        let id = input.id.unwrap_or_default();
        let (version, server_updated_at) = self.clock.next(&id.to_string())?;
        let now = Utc::now();
        let task = Task {
            id,
            version,
            tenant_id: input.tenant_id,
            field_id: input.field_id,
            title: input.title,
            description: input.description,
            status: TaskStatus::Pending,
            due_date: input.due_date,
            is_deleted: false,
            server_updated_at,
            etag: compute_etag(&id.to_string(), version),
            created_at: now,
            updated_at: now,
        };
        if !self.tasks.insert(&task).await? {
            return Err(CoreError::IdConflict(id.to_string()));
        }
        debug!(task_id = %id, "task created");
        Ok(task)
    }

    pub async fn read(&self, id: TaskId, include_tombstones: bool) -> Result<Task, CoreError> {
        let task = self
            .tasks
            .find_by_id(id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("task {id}")))?;
        if task.is_deleted && !include_tombstones {
            return Err(CoreError::NotFound(format!("task {id}")));
        }
        Ok(task)
    }

    pub async fn update(
        &self,
        id: TaskId,
        patch: TaskPatch,
        expected_etag: &str,
    ) -> Result<Task, CoreError> {
        for _ in 0..GUARDED_WRITE_RETRIES {
            let current = self.read(id, false).await?;
            if current.etag != expected_etag {
                return Err(CoreError::Conflict {
                    current: Box::new(SyncChange::Task(current)),
                });
            }

            let (version, server_updated_at) = self.next_pair(&current)?;
            let mut updated = current.clone();
            if let Some(title) = &patch.title {
                updated.title = title.clone();
            }
            if let Some(desc) = &patch.description {
                updated.description = Some(desc.clone());
            }
            if let Some(status) = patch.status {
                updated.status = status;
            }
            if let Some(field_id) = patch.field_id {
                updated.field_id = Some(field_id);
            }
            if let Some(due) = patch.due_date {
                updated.due_date = Some(due);
            }
            updated.version = version;
            updated.server_updated_at = server_updated_at;
            updated.etag = compute_etag(&id.to_string(), version);
            updated.updated_at = Utc::now();

            if !self.tasks.update_guarded(&updated, current.version).await? {
                let fresh = self.read(id, true).await?;
                if fresh.etag != expected_etag {
                    return Err(CoreError::Conflict {
                        current: Box::new(SyncChange::Task(fresh)),
                    });
                }
                continue;
            }
            return Ok(updated);
        }
        Err(CoreError::StaleClock(id.to_string()))
    }

    pub async fn soft_delete(&self, id: TaskId, expected_etag: &str) -> Result<Task, CoreError> {
        for _ in 0..GUARDED_WRITE_RETRIES {
            let current = self.read(id, false).await?;
            if current.etag != expected_etag {
                return Err(CoreError::Conflict {
                    current: Box::new(SyncChange::Task(current)),
                });
            }
            let (version, server_updated_at) = self.next_pair(&current)?;
            let mut deleted = current.clone();
            deleted.is_deleted = true;
            deleted.version = version;
            deleted.server_updated_at = server_updated_at;
            deleted.etag = compute_etag(&id.to_string(), version);
            deleted.updated_at = Utc::now();

            if !self.tasks.update_guarded(&deleted, current.version).await? {
                let fresh = self.read(id, true).await?;
                if fresh.etag != expected_etag {
                    return Err(CoreError::Conflict {
                        current: Box::new(SyncChange::Task(fresh)),
                    });
                }
                continue;
            }
            return Ok(deleted);
        }
        Err(CoreError::StaleClock(id.to_string()))
    }

    pub async fn list_changed_since(
        &self,
        tenant_id: &TenantId,
        cursor: &Cursor,
        limit: usize,
    ) -> Result<Vec<Task>, CoreError> {
        Ok(self.tasks.list_changed_since(tenant_id, cursor, limit).await?)
    }

    fn next_pair(&self, current: &Task) -> Result<(i64, DateTime<Utc>), CoreError> {
        let id = current.id.to_string();
        self.clock.observe(&id, current.version);
        let (version, ts) = self.clock.next(&id)?;
        let server_updated_at = if ts > current.server_updated_at {
            ts
        } else {
            current.server_updated_at + chrono::Duration::microseconds(1)
        };
        Ok((version, server_updated_at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::repositories::InMemoryTaskRepository;

    fn service() -> TaskService {
        TaskService::new(Arc::new(InMemoryTaskRepository::new()), Arc::new(VersionClock::new()))
    }

    #[tokio::test]
    async fn task_versions_advance_under_guard() {
        let svc = service();
        let task = svc
            .create(CreateTask {
                id: None,
                tenant_id: TenantId::new("farm-1"),
                field_id: None,
                title: "Scout for aphids".to_string(),
                description: None,
                due_date: None,
            })
            .await
            .unwrap();
        assert_eq!(task.version, 1);

        let updated = svc
            .update(
                task.id,
                TaskPatch {
                    status: Some(TaskStatus::Done),
                    ..Default::default()
                },
                &task.etag,
            )
            .await
            .unwrap();
        assert_eq!(updated.version, 2);

        // Replaying with the consumed etag conflicts and carries the
        // current task.
        let err = svc
            .update(
                task.id,
                TaskPatch {
                    status: Some(TaskStatus::Cancelled),
                    ..Default::default()
                },
                &task.etag,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Conflict { .. }));
    }
}
