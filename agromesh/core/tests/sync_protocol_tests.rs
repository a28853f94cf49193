// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! End-to-end sync protocol tests over the in-memory repositories:
//! conflicting two-device edits, paged delta pulls with cursor
//! acknowledgement, idempotent create replays, and batch semantics.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use agromesh_core::application::{FieldService, SyncEngine, TaskService, VersionClock};
use agromesh_core::config::SyncConfig;
use agromesh_core::errors::CoreError;
use agromesh_core::field::{CreateField, Field, FieldId, TenantId};
use agromesh_core::geometry::{Point, Polygon};
use agromesh_core::infrastructure::repositories::{
    InMemoryBoundaryHistoryRepository, InMemoryFieldRepository, InMemoryNdviRepository,
    InMemorySyncStatusRepository, InMemoryTaskRepository,
};
use agromesh_core::sync::{
    EntityKind, OperationKind, PullRequest, PushOperation, PushOutcome, PushRequest, SyncChange,
    SyncState,
};

const TENANT: &str = "vale-verde";

struct Fixture {
    fields: Arc<FieldService>,
    engine: SyncEngine,
}

fn fixture() -> Fixture {
    fixture_with(SyncConfig::default())
}

fn fixture_with(config: SyncConfig) -> Fixture {
    let clock = Arc::new(VersionClock::new());
    let fields = Arc::new(FieldService::new(
        Arc::new(InMemoryFieldRepository::new()),
        Arc::new(InMemoryBoundaryHistoryRepository::new()),
        Arc::new(InMemoryNdviRepository::new()),
        Arc::clone(&clock),
        config.clone(),
    ));
    let tasks = Arc::new(TaskService::new(
        Arc::new(InMemoryTaskRepository::new()),
        clock,
    ));
    let engine = SyncEngine::new(
        Arc::clone(&fields),
        tasks,
        Arc::new(InMemorySyncStatusRepository::new()),
        config,
    );
    Fixture { fields, engine }
}

fn square_boundary(offset: f64) -> Polygon {
    Polygon::new(vec![
        Point::new(-47.90 + offset, -15.80),
        Point::new(-47.89 + offset, -15.80),
        Point::new(-47.89 + offset, -15.79),
        Point::new(-47.90 + offset, -15.79),
    ])
}

fn create_input(name: &str, offset: f64) -> CreateField {
    CreateField {
        id: None,
        name: name.to_string(),
        tenant_id: TenantId::new(TENANT),
        crop_type: "soy".to_string(),
        owner_id: None,
        boundary: square_boundary(offset),
        status: None,
        planting_date: None,
        harvest_date: None,
        irrigation_type: None,
        soil_type: None,
        metadata: serde_json::Value::Null,
    }
}

async fn seed_field(fx: &Fixture, name: &str, offset: f64) -> Field {
    fx.fields.create(create_input(name, offset)).await.unwrap()
}

fn update_op(field: &Field, name: &str) -> PushOperation {
    PushOperation {
        op_id: Uuid::new_v4(),
        kind: OperationKind::Update,
        entity_kind: EntityKind::Field,
        payload: serde_json::json!({ "id": field.id, "name": name, "source": "mobile" }),
        expected_etag: Some(field.etag.clone()),
    }
}

fn push_req(device: &str, operations: Vec<PushOperation>) -> PushRequest {
    PushRequest {
        device_id: device.to_string(),
        user_id: "farmer-1".to_string(),
        operations,
    }
}

fn pull_req(device: &str, cursor: Option<String>, limit: usize) -> PullRequest {
    PullRequest {
        device_id: device.to_string(),
        user_id: "farmer-1".to_string(),
        tenant_id: TENANT.to_string(),
        cursor,
        limit,
    }
}

#[tokio::test]
async fn second_writer_conflicts_and_state_is_sticky_until_acknowledged() {
    let fx = fixture();
    let cancel = CancellationToken::new();
    let original = seed_field(&fx, "north paddock", 0.0).await;

    // Both devices read at version 1; device A lands first.
    let a = fx
        .engine
        .push(push_req("device-a", vec![update_op(&original, "north field")]), &cancel)
        .await
        .unwrap();
    assert!(matches!(a.results[0].outcome, PushOutcome::Applied { .. }));

    // Device B pushes against the etag it read before A's write.
    let b = fx
        .engine
        .push(push_req("device-b", vec![update_op(&original, "upper field")]), &cancel)
        .await
        .unwrap();
    match &b.results[0].outcome {
        PushOutcome::Conflict { entity, .. } => {
            // The conflict record carries A's state, version 2.
            let SyncChange::Field(current) = entity else {
                panic!("expected a field in the conflict record");
            };
            assert_eq!(current.name, "north field");
            assert_eq!(current.version, 2);
        }
        other => panic!("expected conflict, got {other:?}"),
    }

    // B's name never landed on the server.
    let server = fx.fields.read(original.id, false).await.unwrap();
    assert_eq!(server.name, "north field");

    // Conflict state sticks across later successful calls.
    let status = fx.engine.status("device-b", "farmer-1").await.unwrap();
    assert_eq!(status.state, SyncState::Conflict);
    assert_eq!(status.conflicts_count, 1);

    fx.engine
        .pull(pull_req("device-b", None, 10), &cancel)
        .await
        .unwrap();
    let status = fx.engine.status("device-b", "farmer-1").await.unwrap();
    assert_eq!(status.state, SyncState::Conflict);

    let status = fx
        .engine
        .acknowledge_conflicts("device-b", "farmer-1")
        .await
        .unwrap();
    assert_eq!(status.state, SyncState::Idle);
    assert_eq!(status.conflicts_count, 0);
}

#[tokio::test]
async fn pull_pages_in_order_and_cursor_acknowledges_progress() {
    let fx = fixture();
    let cancel = CancellationToken::new();
    for i in 0..5 {
        seed_field(&fx, &format!("field {i}"), i as f64 * 0.05).await;
    }

    let first = fx
        .engine
        .pull(pull_req("device-a", None, 2), &cancel)
        .await
        .unwrap();
    assert_eq!(first.changes.len(), 2);
    let cursor1 = first.next_cursor.clone().expect("page has a cursor");

    // The producing pull never advances the watermark by itself, and the
    // session row signals that more pages are queued.
    let status = fx.engine.status("device-a", "farmer-1").await.unwrap();
    assert_eq!(status.last_sync_version, 0);
    assert!(status.pending_downloads > 0);

    let second = fx
        .engine
        .pull(pull_req("device-a", Some(cursor1.clone()), 2), &cancel)
        .await
        .unwrap();
    assert_eq!(second.changes.len(), 2);

    // Supplying the cursor acknowledged page one.
    let status = fx.engine.status("device-a", "farmer-1").await.unwrap();
    assert!(status.last_sync_version > 0);

    // No overlap and strictly increasing (server_updated_at, id) ordering.
    let mut seen: Vec<(i64, String)> = Vec::new();
    for change in first.changes.iter().chain(second.changes.iter()) {
        seen.push((
            change.server_updated_at().timestamp_micros(),
            change.entity_id(),
        ));
    }
    let mut sorted = seen.clone();
    sorted.sort();
    sorted.dedup();
    assert_eq!(seen, sorted);

    let third = fx
        .engine
        .pull(pull_req("device-a", second.next_cursor.clone(), 2), &cancel)
        .await
        .unwrap();
    assert_eq!(third.changes.len(), 1);

    // Drained: replaying the final cursor yields an empty page.
    let done = fx
        .engine
        .pull(pull_req("device-a", third.next_cursor.clone(), 2), &cancel)
        .await
        .unwrap();
    assert!(done.changes.is_empty());
    assert!(done.next_cursor.is_none());
}

#[tokio::test]
async fn oversized_pull_limit_is_clamped_to_the_page_cap() {
    let fx = fixture_with(SyncConfig {
        sync_page_limit: 2,
        ..SyncConfig::default()
    });
    let cancel = CancellationToken::new();
    for i in 0..4 {
        seed_field(&fx, &format!("field {i}"), i as f64 * 0.05).await;
    }

    // The device asks for far more than the server allows per page.
    let page = fx
        .engine
        .pull(pull_req("device-a", None, 500), &cancel)
        .await
        .unwrap();
    assert_eq!(page.changes.len(), 2);
    assert!(page.next_cursor.is_some());
    let status = fx.engine.status("device-a", "farmer-1").await.unwrap();
    assert!(status.pending_downloads > 0);

    // The remainder is still reachable through the cursor.
    let rest = fx
        .engine
        .pull(pull_req("device-a", page.next_cursor.clone(), 500), &cancel)
        .await
        .unwrap();
    assert_eq!(rest.changes.len(), 2);
}

#[tokio::test]
async fn offline_edits_replay_and_land_in_other_devices_pull() {
    let fx = fixture();
    let cancel = CancellationToken::new();
    let field = seed_field(&fx, "east terrace", 0.0).await;

    fx.engine
        .push(push_req("device-a", vec![update_op(&field, "east terrace (replanted)")]), &cancel)
        .await
        .unwrap();

    let pulled = fx
        .engine
        .pull(pull_req("device-b", None, 10), &cancel)
        .await
        .unwrap();
    assert_eq!(pulled.changes.len(), 1);
    let SyncChange::Field(got) = &pulled.changes[0] else {
        panic!("expected a field change");
    };
    assert_eq!(got.name, "east terrace (replanted)");
    assert_eq!(got.version, 2);
    assert_eq!(got.etag, agromesh_core::field::compute_etag(&got.id.to_string(), 2));
}

#[tokio::test]
async fn create_replay_with_same_content_is_idempotent() {
    let fx = fixture();
    let cancel = CancellationToken::new();

    let id = FieldId::new();
    let mut input = create_input("west strip", 0.2);
    input.id = Some(id);
    let op = |op_id: Uuid| PushOperation {
        op_id,
        kind: OperationKind::Create,
        entity_kind: EntityKind::Field,
        payload: serde_json::to_value(&input).unwrap(),
        expected_etag: None,
    };

    let first = fx
        .engine
        .push(push_req("device-a", vec![op(Uuid::new_v4())]), &cancel)
        .await
        .unwrap();
    let second = fx
        .engine
        .push(push_req("device-a", vec![op(Uuid::new_v4())]), &cancel)
        .await
        .unwrap();

    let version_of = |outcome: &PushOutcome| match outcome {
        PushOutcome::Applied { entity: SyncChange::Field(f) } => f.version,
        other => panic!("expected applied field, got {other:?}"),
    };
    // The replay returns the existing row, not a second create.
    assert_eq!(version_of(&first.results[0].outcome), 1);
    assert_eq!(version_of(&second.results[0].outcome), 1);

    // Same id with different content is rejected, not merged.
    let mut altered = create_input("west strip RENAMED", 0.2);
    altered.id = Some(id);
    let res = fx
        .engine
        .push(
            push_req(
                "device-a",
                vec![PushOperation {
                    op_id: Uuid::new_v4(),
                    kind: OperationKind::Create,
                    entity_kind: EntityKind::Field,
                    payload: serde_json::to_value(&altered).unwrap(),
                    expected_etag: None,
                }],
            ),
            &cancel,
        )
        .await
        .unwrap();
    assert!(matches!(res.results[0].outcome, PushOutcome::Rejected { .. }));
}

#[tokio::test]
async fn conflict_does_not_abort_the_rest_of_the_batch() {
    let fx = fixture();
    let cancel = CancellationToken::new();
    let first = seed_field(&fx, "plot one", 0.0).await;
    let second = seed_field(&fx, "plot two", 0.1).await;

    // Invalidate the first op's etag with an out-of-band write.
    fx.engine
        .push(push_req("device-b", vec![update_op(&first, "plot one v2")]), &cancel)
        .await
        .unwrap();

    let res = fx
        .engine
        .push(
            push_req(
                "device-a",
                vec![update_op(&first, "stale write"), update_op(&second, "plot two v2")],
            ),
            &cancel,
        )
        .await
        .unwrap();

    assert!(matches!(res.results[0].outcome, PushOutcome::Conflict { .. }));
    assert!(matches!(res.results[1].outcome, PushOutcome::Applied { .. }));
    assert_eq!(
        fx.fields.read(second.id, false).await.unwrap().name,
        "plot two v2"
    );
}

#[tokio::test]
async fn soft_delete_flows_as_tombstone() {
    let fx = fixture();
    let cancel = CancellationToken::new();
    let field = seed_field(&fx, "retired plot", 0.0).await;

    let res = fx
        .engine
        .push(
            push_req(
                "device-a",
                vec![PushOperation {
                    op_id: Uuid::new_v4(),
                    kind: OperationKind::Delete,
                    entity_kind: EntityKind::Field,
                    payload: serde_json::json!({ "id": field.id }),
                    expected_etag: Some(field.etag.clone()),
                }],
            ),
            &cancel,
        )
        .await
        .unwrap();
    assert!(matches!(res.results[0].outcome, PushOutcome::Applied { .. }));

    // Direct reads hide the tombstone; the pull stream still carries it.
    assert!(matches!(
        fx.fields.read(field.id, false).await.unwrap_err(),
        CoreError::NotFound(_)
    ));
    let pulled = fx
        .engine
        .pull(pull_req("device-b", None, 10), &cancel)
        .await
        .unwrap();
    let SyncChange::Field(got) = &pulled.changes[0] else {
        panic!("expected a field change");
    };
    assert!(got.is_deleted);
    assert_eq!(got.version, 2);
}

#[tokio::test]
async fn canceled_pull_leaves_status_untouched() {
    let fx = fixture();
    let cancel = CancellationToken::new();
    seed_field(&fx, "any", 0.0).await;
    fx.engine
        .pull(pull_req("device-a", None, 10), &cancel)
        .await
        .unwrap();
    let before = fx.engine.status("device-a", "farmer-1").await.unwrap();

    let canceled = CancellationToken::new();
    canceled.cancel();
    let err = fx
        .engine
        .pull(pull_req("device-a", None, 10), &canceled)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Canceled));

    let after = fx.engine.status("device-a", "farmer-1").await.unwrap();
    assert_eq!(after.state, before.state);
    assert_eq!(after.last_sync_version, before.last_sync_version);
    assert_eq!(after.last_sync_at, before.last_sync_at);
}

#[tokio::test]
async fn fields_and_tasks_interleave_in_one_stream() {
    let fx = fixture();
    let cancel = CancellationToken::new();
    seed_field(&fx, "mixed a", 0.0).await;

    fx.engine
        .push(
            push_req(
                "device-a",
                vec![PushOperation {
                    op_id: Uuid::new_v4(),
                    kind: OperationKind::Create,
                    entity_kind: EntityKind::Task,
                    payload: serde_json::json!({
                        "tenant_id": TENANT,
                        "title": "scout for aphids",
                    }),
                    expected_etag: None,
                }],
            ),
            &cancel,
        )
        .await
        .unwrap();
    seed_field(&fx, "mixed b", 0.1).await;

    let pulled = fx
        .engine
        .pull(pull_req("device-b", None, 10), &cancel)
        .await
        .unwrap();
    assert_eq!(pulled.changes.len(), 3);
    let kinds: Vec<bool> = pulled
        .changes
        .iter()
        .map(|c| matches!(c, SyncChange::Task(_)))
        .collect();
    assert_eq!(kinds.iter().filter(|t| **t).count(), 1);
    // Ordered by (server_updated_at, id) across both kinds.
    let stamps: Vec<_> = pulled
        .changes
        .iter()
        .map(|c| (c.server_updated_at(), c.entity_id()))
        .collect();
    let mut sorted = stamps.clone();
    sorted.sort();
    assert_eq!(stamps, sorted);
}
