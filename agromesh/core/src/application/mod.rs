// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod field_service;
pub mod sync_engine;
pub mod task_service;
pub mod version_clock;

// Re-export the service entry points for convenience
pub use field_service::FieldService;
pub use sync_engine::SyncEngine;
pub use task_service::{CreateTask, TaskPatch, TaskService};
pub use version_clock::VersionClock;
