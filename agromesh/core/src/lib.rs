// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # `agromesh-core` — Field Service Crate
//!
//! Server-authoritative storage and delta sync for agricultural field
//! boundaries.
//!
//! ## Crate Layout
//!
//! | Module | Layer | Contents |
//! |--------|-------|----------|
//! | [`domain`] | Domain | `Field` aggregate, geometry value objects, sync wire types, repository traits |
//! | [`application`] | Application | `FieldService`, `SyncEngine`, `VersionClock` |
//! | [`infrastructure`] | Infrastructure | In-memory and PostgreSQL repositories |
//!
//! ## Key Concepts
//!
//! - **Optimistic concurrency**: every mutation is guarded by an etag bound
//!   to `(id, version)`; the later of two concurrent writers always loses
//!   and receives the server's current state.
//! - **Delta sync**: devices pull pages ordered by `(server_updated_at, id)`
//!   behind an opaque cursor, then push batches whose operations succeed or
//!   conflict independently.
//! - **Tombstones**: soft-deleted rows keep flowing through sync so clients
//!   can reflect deletions offline.

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use domain::*;
