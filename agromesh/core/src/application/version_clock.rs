// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Version Clock
//!
//! Issues per-entity monotonic versions paired with a process-monotonic
//! `server_updated_at`. The wall clock can stall or step backwards under
//! NTP; issued timestamps never do — when the wall clock has not advanced
//! past the last issued value, the clock hands out `last + 1µs`.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::domain::errors::CoreError;

/// Process-wide clock shared by every service that stamps mutations.
pub struct VersionClock {
    versions: DashMap<String, i64>,
    last_issued: Mutex<DateTime<Utc>>,
}

impl VersionClock {
    pub fn new() -> Self {
        Self {
            versions: DashMap::new(),
            last_issued: Mutex::new(DateTime::<Utc>::MIN_UTC),
        }
    }

    /// Seed the per-entity counter from a stored aggregate. Keeps the
    /// maximum seen, so replays cannot move a counter backwards.
    pub fn observe(&self, entity_id: &str, version: i64) {
        let mut entry = self.versions.entry(entity_id.to_string()).or_insert(0);
        if version > *entry {
            *entry = version;
        }
    }

    /// Next `(version, server_updated_at)` pair for the entity.
    ///
    /// Fails with `StaleClock` when a strictly greater pair cannot be
    /// produced; callers retry immediately after re-observing storage.
    pub fn next(&self, entity_id: &str) -> Result<(i64, DateTime<Utc>), CoreError> {
        let ts = self.next_timestamp();
        let mut entry = self.versions.entry(entity_id.to_string()).or_insert(0);
        let next = entry
            .checked_add(1)
            .ok_or_else(|| CoreError::StaleClock(entity_id.to_string()))?;
        *entry = next;
        Ok((next, ts))
    }

    fn next_timestamp(&self) -> DateTime<Utc> {
        let mut last = self.last_issued.lock();
        let now = Utc::now();
        let issued = if now > *last {
            now
        } else {
            *last + Duration::microseconds(1)
        };
        *last = issued;
        issued
    }
}

impl Default for VersionClock {
    fn default() -> Self {
        Self::new()
    }
}
