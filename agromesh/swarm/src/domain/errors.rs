// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Swarm error taxonomy. Request timeouts carry the correlation id so
//! callers can line failures up with broker logs.

use std::time::Duration;

use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum SwarmError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("broker not connected")]
    NotConnected,

    #[error("request {correlation_id} timed out after {after:?}")]
    Timeout { after: Duration, correlation_id: Uuid },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("backend error: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for SwarmError {
    fn from(err: serde_json::Error) -> Self {
        SwarmError::Serialization(err.to_string())
    }
}
