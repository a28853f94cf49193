// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Sync Engine
//!
//! Pull-then-push, server-authoritative delta sync with optimistic
//! concurrency and per-device cursors.
//!
//! ## Protocol shape
//!
//! - **Pull**: resolve the device's `SyncStatus` row, page every synced
//!   entity kind past the cursor, interleave by `(server_updated_at, id)`,
//!   and return up to `limit` items with full state including `version` and
//!   `etag`. A device supplying a cursor acknowledges everything at or
//!   before it; the stored watermark advances at that point, never on the
//!   pull that produced the cursor. Re-delivery of ties is at-least-once
//!   and idempotent on the client.
//! - **Push**: operations apply in submission order inside one batch.
//!   Conflicts never abort the batch — each produces a per-operation
//!   conflict record carrying the server's current state. The server never
//!   auto-merges boundaries.
//!
//! ## State machine
//!
//! `idle → syncing → (idle | error | conflict)`. `conflict` is sticky until
//! the device acknowledges resolution; `error` clears on the next
//! successful call. A canceled call makes no state change.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::field_service::FieldService;
use crate::application::task_service::{CreateTask, TaskPatch, TaskService};
use crate::domain::config::SyncConfig;
use crate::domain::errors::CoreError;
use crate::domain::field::{CreateField, Field, FieldId, FieldPatch, TaskId, TenantId};
use crate::domain::repository::SyncStatusRepository;
use crate::domain::sync::{
    Cursor, EntityKind, OperationKind, PullRequest, PullResponse, PushOperation, PushOutcome,
    PushRequest, PushResponse, PushResult, SyncChange, SyncState, SyncStatus,
};

pub struct SyncEngine {
    fields: Arc<FieldService>,
    tasks: Arc<TaskService>,
    sync_status: Arc<dyn SyncStatusRepository>,
    config: SyncConfig,
}

#[derive(Debug, Deserialize)]
struct UpdateFieldPayload {
    id: FieldId,
    #[serde(flatten)]
    patch: FieldPatch,
}

#[derive(Debug, Deserialize)]
struct UpdateTaskPayload {
    id: TaskId,
    #[serde(flatten)]
    patch: TaskPatch,
}

#[derive(Debug, Deserialize)]
struct DeleteFieldPayload {
    id: FieldId,
    #[serde(default)]
    device_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeleteTaskPayload {
    id: TaskId,
}

impl SyncEngine {
    pub fn new(
        fields: Arc<FieldService>,
        tasks: Arc<TaskService>,
        sync_status: Arc<dyn SyncStatusRepository>,
        config: SyncConfig,
    ) -> Self {
        Self {
            fields,
            tasks,
            sync_status,
            config,
        }
    }

    /// Delta pull. The cursor in the request wins over the stored
    /// watermark; its presence acknowledges the previous page.
    pub async fn pull(
        &self,
        req: PullRequest,
        cancel: &CancellationToken,
    ) -> Result<PullResponse, CoreError> {
        if cancel.is_cancelled() {
            return Err(CoreError::Canceled);
        }

        let before = self.load_or_create(&req.device_id, &req.user_id).await?;
        let mut status = before.clone();
        status.state = SyncState::Syncing;
        self.sync_status.upsert(&status).await?;

        let result = self.pull_inner(&req, &mut status, cancel).await;
        match result {
            Ok(response) => {
                status.state = if status.conflicts_count > 0 {
                    SyncState::Conflict
                } else {
                    SyncState::Idle
                };
                status.last_error = None;
                status.last_sync_at = Some(Utc::now());
                self.sync_status.upsert(&status).await?;
                Ok(response)
            }
            Err(CoreError::Canceled) => {
                // Undo the transient `syncing` marker; nothing else was
                // written on this path.
                self.sync_status.upsert(&before).await?;
                Err(CoreError::Canceled)
            }
            Err(e) => {
                status.state = SyncState::Error;
                status.last_error = Some(e.to_string());
                self.sync_status.upsert(&status).await?;
                Err(e)
            }
        }
    }

    async fn pull_inner(
        &self,
        req: &PullRequest,
        status: &mut SyncStatus,
        cancel: &CancellationToken,
    ) -> Result<PullResponse, CoreError> {
        let tenant = TenantId::new(req.tenant_id.clone());

        let cursor = match &req.cursor {
            Some(encoded) => {
                let cursor = Cursor::decode(encoded)?;
                // Supplying a cursor acknowledges everything at or before it.
                if cursor.updated_at_micros > status.last_sync_version {
                    status.last_sync_version = cursor.updated_at_micros;
                }
                cursor
            }
            None => Cursor::from_watermark(status.last_sync_version),
        };

        if cancel.is_cancelled() {
            return Err(CoreError::Canceled);
        }

        // The device proposes a page size; the server caps it.
        let limit = req.limit.min(self.config.sync_page_limit);

        // Fetch one past the limit from each kind: the interleave cannot
        // starve one kind behind the other, and a non-empty remainder is
        // detectable without a count query.
        let (fields, _) = self
            .fields
            .list_changed_since(&tenant, &cursor, limit + 1)
            .await?;
        let tasks = self
            .tasks
            .list_changed_since(&tenant, &cursor, limit + 1)
            .await?;

        if cancel.is_cancelled() {
            return Err(CoreError::Canceled);
        }

        let mut merged: Vec<SyncChange> = fields
            .into_iter()
            .map(SyncChange::Field)
            .chain(tasks.into_iter().map(SyncChange::Task))
            .collect();
        merged.sort_by(|a, b| {
            (a.server_updated_at(), a.entity_id()).cmp(&(b.server_updated_at(), b.entity_id()))
        });

        // Lower bound on what is still queued behind this page.
        let overflow = merged.len().saturating_sub(limit);
        merged.truncate(limit);
        status.pending_downloads = overflow as i64;

        let next_cursor = merged.last().map(|c| {
            Cursor {
                updated_at_micros: c.server_updated_at().timestamp_micros(),
                last_id: c.entity_id(),
            }
            .encode()
        });

        debug!(
            device_id = %req.device_id,
            returned = merged.len(),
            pending = overflow,
            "pull served"
        );

        Ok(PullResponse {
            changes: merged,
            next_cursor,
            server_time: Utc::now(),
        })
    }

    /// Batched push. Operations apply in submission order; each succeeds,
    /// conflicts, or is rejected independently.
    pub async fn push(
        &self,
        req: PushRequest,
        cancel: &CancellationToken,
    ) -> Result<PushResponse, CoreError> {
        if cancel.is_cancelled() {
            return Err(CoreError::Canceled);
        }

        let before = self.load_or_create(&req.device_id, &req.user_id).await?;
        let mut status = before.clone();
        status.state = SyncState::Syncing;
        status.pending_uploads = req.operations.len() as i64;
        self.sync_status.upsert(&status).await?;

        // Cancellation is honored up to the point the first operation is
        // applied; after that the batch runs to completion so devices never
        // observe a half-applied batch without outcomes.
        if cancel.is_cancelled() {
            self.sync_status.upsert(&before).await?;
            return Err(CoreError::Canceled);
        }

        let mut results = Vec::with_capacity(req.operations.len());
        let mut new_conflicts = 0i64;

        for op in &req.operations {
            let op_id = op.op_id;
            match self.apply_operation(op, &req.device_id).await {
                Ok(outcome) => {
                    if matches!(outcome, PushOutcome::Conflict { .. }) {
                        new_conflicts += 1;
                    }
                    results.push(PushResult { op_id, outcome });
                }
                Err(e) => {
                    // Storage-level failure: the batch cannot continue
                    // meaningfully; surface it and mark the session errored.
                    warn!(device_id = %req.device_id, %op_id, error = %e, "push aborted");
                    status.state = SyncState::Error;
                    status.last_error = Some(e.to_string());
                    self.sync_status.upsert(&status).await?;
                    return Err(e);
                }
            }
        }

        status.pending_uploads = 0;
        status.conflicts_count += new_conflicts;
        status.last_sync_at = Some(Utc::now());
        status.last_error = None;
        status.state = if status.conflicts_count > 0 {
            SyncState::Conflict
        } else {
            SyncState::Idle
        };
        self.sync_status.upsert(&status).await?;

        if new_conflicts > 0 {
            info!(
                device_id = %req.device_id,
                conflicts = new_conflicts,
                "push completed with conflicts"
            );
        }
        Ok(PushResponse { results })
    }

    /// Device-visible session row.
    pub async fn status(&self, device_id: &str, user_id: &str) -> Result<SyncStatus, CoreError> {
        self.sync_status
            .find(device_id, user_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("sync status for {device_id}/{user_id}")))
    }

    /// Clears the sticky `conflict` state once the device has resolved its
    /// local copies.
    pub async fn acknowledge_conflicts(
        &self,
        device_id: &str,
        user_id: &str,
    ) -> Result<SyncStatus, CoreError> {
        let mut status = self.status(device_id, user_id).await?;
        status.conflicts_count = 0;
        if status.state == SyncState::Conflict {
            status.state = SyncState::Idle;
        }
        self.sync_status.upsert(&status).await?;
        Ok(status)
    }

    async fn load_or_create(
        &self,
        device_id: &str,
        user_id: &str,
    ) -> Result<SyncStatus, CoreError> {
        match self.sync_status.find(device_id, user_id).await? {
            Some(status) => Ok(status),
            None => {
                let status = SyncStatus::new(device_id, user_id);
                self.sync_status.upsert(&status).await?;
                Ok(status)
            }
        }
    }

    /// Apply one operation. `Ok` covers applied/conflict/rejected; `Err` is
    /// reserved for storage failures that abort the batch.
    async fn apply_operation(
        &self,
        op: &PushOperation,
        device_id: &str,
    ) -> Result<PushOutcome, CoreError> {
        match (op.entity_kind, op.kind) {
            (EntityKind::Field, OperationKind::Create) => {
                let input: CreateField = match serde_json::from_value(op.payload.clone()) {
                    Ok(input) => input,
                    Err(e) => return Ok(rejected(format!("malformed create payload: {e}"))),
                };
                self.create_field_idempotent(input).await
            }
            (EntityKind::Field, OperationKind::Update) => {
                let payload: UpdateFieldPayload = match serde_json::from_value(op.payload.clone())
                {
                    Ok(p) => p,
                    Err(e) => return Ok(rejected(format!("malformed update payload: {e}"))),
                };
                let Some(etag) = &op.expected_etag else {
                    return Ok(rejected("update requires expected_etag".to_string()));
                };
                match self.fields.update(payload.id, payload.patch, etag).await {
                    Ok(field) => Ok(PushOutcome::Applied {
                        entity: SyncChange::Field(field),
                    }),
                    Err(e) => Ok(outcome_from_error(e)?),
                }
            }
            (EntityKind::Field, OperationKind::Delete) => {
                let payload: DeleteFieldPayload = match serde_json::from_value(op.payload.clone())
                {
                    Ok(p) => p,
                    Err(e) => return Ok(rejected(format!("malformed delete payload: {e}"))),
                };
                let Some(etag) = &op.expected_etag else {
                    return Ok(rejected("delete requires expected_etag".to_string()));
                };
                let device = payload.device_id.or_else(|| Some(device_id.to_string()));
                match self
                    .fields
                    .soft_delete(
                        payload.id,
                        etag,
                        crate::domain::field::ChangeSource::Mobile,
                        device,
                    )
                    .await
                {
                    Ok(field) => Ok(PushOutcome::Applied {
                        entity: SyncChange::Field(field),
                    }),
                    Err(e) => Ok(outcome_from_error(e)?),
                }
            }
            (EntityKind::Task, OperationKind::Create) => {
                let input: CreateTask = match serde_json::from_value(op.payload.clone()) {
                    Ok(input) => input,
                    Err(e) => return Ok(rejected(format!("malformed create payload: {e}"))),
                };
                match self.tasks.create(input).await {
                    Ok(task) => Ok(PushOutcome::Applied {
                        entity: SyncChange::Task(task),
                    }),
                    Err(CoreError::IdConflict(id)) => {
                        Ok(rejected(format!("id conflict: task {id} already exists")))
                    }
                    Err(e) => Ok(outcome_from_error(e)?),
                }
            }
            (EntityKind::Task, OperationKind::Update) => {
                let payload: UpdateTaskPayload = match serde_json::from_value(op.payload.clone()) {
                    Ok(p) => p,
                    Err(e) => return Ok(rejected(format!("malformed update payload: {e}"))),
                };
                let Some(etag) = &op.expected_etag else {
                    return Ok(rejected("update requires expected_etag".to_string()));
                };
                match self.tasks.update(payload.id, payload.patch, etag).await {
                    Ok(task) => Ok(PushOutcome::Applied {
                        entity: SyncChange::Task(task),
                    }),
                    Err(e) => Ok(outcome_from_error(e)?),
                }
            }
            (EntityKind::Task, OperationKind::Delete) => {
                let payload: DeleteTaskPayload = match serde_json::from_value(op.payload.clone()) {
                    Ok(p) => p,
                    Err(e) => return Ok(rejected(format!("malformed delete payload: {e}"))),
                };
                let Some(etag) = &op.expected_etag else {
                    return Ok(rejected("delete requires expected_etag".to_string()));
                };
                match self.tasks.soft_delete(payload.id, etag).await {
                    Ok(task) => Ok(PushOutcome::Applied {
                        entity: SyncChange::Task(task),
                    }),
                    Err(e) => Ok(outcome_from_error(e)?),
                }
            }
        }
    }

    /// Create with device-supplied-id idempotence: a replay with equal
    /// content succeeds with the existing row; same id with different
    /// content is rejected.
    async fn create_field_idempotent(&self, input: CreateField) -> Result<PushOutcome, CoreError> {
        if let Some(id) = input.id {
            if let Ok(existing) = self.fields.read(id, true).await {
                return if create_matches(&existing, &input) {
                    Ok(PushOutcome::Applied {
                        entity: SyncChange::Field(existing),
                    })
                } else {
                    Ok(rejected(format!(
                        "id conflict: field {id} exists with different content"
                    )))
                };
            }
        }
        match self.fields.create(input).await {
            Ok(field) => Ok(PushOutcome::Applied {
                entity: SyncChange::Field(field),
            }),
            Err(CoreError::IdConflict(id)) => {
                Ok(rejected(format!("id conflict: field {id} already exists")))
            }
            Err(e) => Ok(outcome_from_error(e)?),
        }
    }
}

fn rejected(reason: String) -> PushOutcome {
    PushOutcome::Rejected { reason }
}

/// Conflicts and user errors become per-operation outcomes; everything else
/// propagates and aborts the batch.
fn outcome_from_error(err: CoreError) -> Result<PushOutcome, CoreError> {
    match err {
        CoreError::Conflict { current } => Ok(PushOutcome::Conflict {
            entity: *current,
            reason: Some("etag mismatch; re-fetch and re-apply".to_string()),
        }),
        CoreError::Validation(reason) => Ok(PushOutcome::Rejected { reason }),
        CoreError::Geometry(e) => Ok(PushOutcome::Rejected { reason: e.to_string() }),
        CoreError::NotFound(what) => Ok(PushOutcome::Rejected {
            reason: format!("not found: {what}"),
        }),
        CoreError::IdConflict(id) => Ok(PushOutcome::Rejected {
            reason: format!("id conflict: {id}"),
        }),
        other => Err(other),
    }
}

/// Content equality for idempotent create detection. Server-owned columns
/// (version, etag, timestamps) are ignored.
fn create_matches(existing: &Field, input: &CreateField) -> bool {
    existing.name == input.name
        && existing.tenant_id == input.tenant_id
        && existing.crop_type == input.crop_type
        && existing.owner_id == input.owner_id
        && existing.boundary == input.boundary
        && input.status.map(|s| s == existing.status).unwrap_or(true)
        && existing.planting_date == input.planting_date
        && existing.harvest_date == input.harvest_date
        && existing.irrigation_type == input.irrigation_type
        && existing.soil_type == input.soil_type
        && existing.metadata == input.metadata
}
