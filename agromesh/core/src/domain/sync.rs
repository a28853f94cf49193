// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Sync Protocol Types
//!
//! Wire envelopes and per-device bookkeeping for the pull-then-push,
//! server-authoritative delta-sync protocol.
//!
//! ## Cursor
//!
//! A [`Cursor`] is an opaque pointer into the global `server_updated_at`
//! stream: `(timestamp_micros, last_id)`, base64-encoded on the wire.
//! Devices persist it but never interpret it. Pull results are totally
//! ordered by `(server_updated_at, id)`; ties on the timestamp break on id,
//! which keeps pagination deterministic under concurrent inserts.

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::CoreError;
use crate::domain::field::{Field, Task};

/// Position in the `(server_updated_at, id)` stream, exclusive.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Cursor {
    pub updated_at_micros: i64,
    pub last_id: String,
}

impl Cursor {
    /// The cursor before all history.
    pub fn origin() -> Self {
        Self {
            updated_at_micros: 0,
            last_id: String::new(),
        }
    }

    pub fn from_watermark(micros: i64) -> Self {
        Self {
            updated_at_micros: micros,
            last_id: String::new(),
        }
    }

    /// Whether an entity stamped `(updated_at, id)` sorts strictly after
    /// this cursor.
    pub fn admits(&self, updated_at: DateTime<Utc>, id: &str) -> bool {
        let micros = updated_at.timestamp_micros();
        micros > self.updated_at_micros
            || (micros == self.updated_at_micros && *id > *self.last_id)
    }

    pub fn encode(&self) -> String {
        base64::engine::general_purpose::STANDARD
            .encode(format!("{}:{}", self.updated_at_micros, self.last_id))
    }

    pub fn decode(s: &str) -> Result<Self, CoreError> {
        let raw = base64::engine::general_purpose::STANDARD
            .decode(s)
            .map_err(|_| CoreError::Validation("malformed cursor".to_string()))?;
        let raw = String::from_utf8(raw)
            .map_err(|_| CoreError::Validation("malformed cursor".to_string()))?;
        let (micros, id) = raw
            .split_once(':')
            .ok_or_else(|| CoreError::Validation("malformed cursor".to_string()))?;
        let updated_at_micros = micros
            .parse::<i64>()
            .map_err(|_| CoreError::Validation("malformed cursor".to_string()))?;
        Ok(Self {
            updated_at_micros,
            last_id: id.to_string(),
        })
    }
}

/// Sync session state per `(device_id, user_id)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Idle,
    Syncing,
    Error,
    Conflict,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Idle => "idle",
            SyncState::Syncing => "syncing",
            SyncState::Error => "error",
            SyncState::Conflict => "conflict",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(SyncState::Idle),
            "syncing" => Some(SyncState::Syncing),
            "error" => Some(SyncState::Error),
            "conflict" => Some(SyncState::Conflict),
            _ => None,
        }
    }
}

/// One row per `(device_id, user_id)` pair.
///
/// `last_sync_version` is the acknowledged watermark in microseconds since
/// epoch; it is non-decreasing for the lifetime of the row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStatus {
    pub device_id: String,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_sync_version: i64,
    pub state: SyncState,
    pub pending_uploads: i64,
    pub pending_downloads: i64,
    pub conflicts_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default)]
    pub device_info: serde_json::Value,
}

impl SyncStatus {
    pub fn new(device_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            user_id: user_id.into(),
            last_sync_at: None,
            last_sync_version: 0,
            state: SyncState::Idle,
            pending_uploads: 0,
            pending_downloads: 0,
            conflicts_count: 0,
            last_error: None,
            device_info: serde_json::Value::Null,
        }
    }
}

/// Entity kinds that participate in sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Field,
    Task,
}

/// A synced entity with its kind tag, as carried in pull pages and
/// conflict records.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "entity", rename_all = "snake_case")]
pub enum SyncChange {
    Field(Field),
    Task(Task),
}

impl SyncChange {
    pub fn server_updated_at(&self) -> DateTime<Utc> {
        match self {
            SyncChange::Field(f) => f.server_updated_at,
            SyncChange::Task(t) => t.server_updated_at,
        }
    }

    pub fn entity_id(&self) -> String {
        match self {
            SyncChange::Field(f) => f.id.to_string(),
            SyncChange::Task(t) => t.id.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    pub device_id: String,
    pub user_id: String,
    pub tenant_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    pub limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullResponse {
    pub changes: Vec<SyncChange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
    pub server_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

/// One client-side mutation inside a push batch. Updates and deletes carry
/// the etag the device last observed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushOperation {
    pub op_id: Uuid,
    pub kind: OperationKind,
    pub entity_kind: EntityKind,
    pub payload: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_etag: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushRequest {
    pub device_id: String,
    pub user_id: String,
    pub operations: Vec<PushOperation>,
}

/// Per-operation outcome. Conflicts carry the server's current state so the
/// device can re-prompt; the server never auto-merges boundaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum PushOutcome {
    Applied {
        entity: SyncChange,
    },
    Conflict {
        entity: SyncChange,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Rejected {
        reason: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushResult {
    pub op_id: Uuid,
    #[serde(flatten)]
    pub outcome: PushOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushResponse {
    pub results: Vec<PushResult>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_round_trips() {
        let c = Cursor {
            updated_at_micros: 1_712_345_678_901_234,
            last_id: "abc-123".to_string(),
        };
        let decoded = Cursor::decode(&c.encode()).unwrap();
        assert_eq!(decoded, c);
    }

    #[test]
    fn cursor_rejects_garbage() {
        assert!(Cursor::decode("not base64 at all!!").is_err());
        let junk = base64::engine::general_purpose::STANDARD.encode("no-separator");
        assert!(Cursor::decode(&junk).is_err());
    }

    #[test]
    fn cursor_admits_strictly_later_entries() {
        let ts = Utc::now();
        let c = Cursor {
            updated_at_micros: ts.timestamp_micros(),
            last_id: "m".to_string(),
        };
        assert!(!c.admits(ts, "a"));
        assert!(!c.admits(ts, "m"));
        assert!(c.admits(ts, "z"));
        assert!(c.admits(ts + chrono::Duration::microseconds(1), "a"));
    }
}
