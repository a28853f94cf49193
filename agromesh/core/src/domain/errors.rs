// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Core Error Taxonomy
//!
//! One enum for everything the field service and sync engine can surface.
//! Conflicts are expected traffic, not failures: the sync engine converts
//! them into per-operation outcomes rather than failing a batch.

use std::time::Duration;

use crate::domain::geometry::GeometryError;
use crate::domain::repository::RepositoryError;
use crate::domain::sync::SyncChange;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Bad input; user-visible.
    #[error("validation error: {0}")]
    Validation(String),

    /// Topology or coordinate-range failure from the geometry module.
    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error("not found: {0}")]
    NotFound(String),

    /// Etag mismatch. Carries the server's current state so callers can
    /// surface it without a second read.
    #[error("etag mismatch; server holds version newer than the supplied etag")]
    Conflict { current: Box<SyncChange> },

    /// Idempotent create replayed with the same id but different content.
    #[error("id conflict: {0}")]
    IdConflict(String),

    /// The clock could not persist a strictly greater `(version, ts)` pair;
    /// retry immediately.
    #[error("stale clock for entity {0}")]
    StaleClock(String),

    #[error("not connected")]
    NotConnected,

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Canceled by the caller before any state change was committed.
    #[error("operation canceled")]
    Canceled,

    #[error("backend error: {0}")]
    Backend(String),
}

impl From<RepositoryError> for CoreError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(what) => CoreError::NotFound(what),
            other => CoreError::Backend(other.to_string()),
        }
    }
}
