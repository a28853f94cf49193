// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Message Envelope and Subject Layout
//!
//! The wire envelope carried over the broker, and the subject strings the
//! bus publishes on. Subjects are bit-exact:
//!
//! ```text
//! <prefix>.agents.<agent_id>.request
//! <prefix>.agents.<agent_id>.response
//! <prefix>.agents.broadcast
//! <prefix>.agents.council.<council_id>
//! ```
//!
//! Priorities ride in the envelope for consumer-side scheduling; the bus
//! never reorders.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::agent::AgentId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Request,
    Response,
    Broadcast,
    Council,
    Notification,
    Heartbeat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessagePriority {
    Low,
    Normal,
    High,
    Urgent,
}

/// Envelope transmitted over the broker.
///
/// Responses always carry the correlation id of the originating request;
/// that is the only ordering relationship the bus guarantees.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    pub message_id: Uuid,
    pub sender_id: AgentId,
    /// Target agent id, or a broadcast/council token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<String>,
    pub kind: MessageKind,
    pub priority: MessagePriority,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
    pub content: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl AgentMessage {
    pub fn new(
        sender_id: AgentId,
        recipient_id: Option<String>,
        kind: MessageKind,
        priority: MessagePriority,
        content: serde_json::Value,
    ) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            sender_id,
            recipient_id,
            kind,
            priority,
            correlation_id: None,
            content,
            timestamp: Utc::now(),
        }
    }

    pub fn with_correlation(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }
}

/// Subject string builder bound to a configured prefix.
#[derive(Debug, Clone)]
pub struct Subjects {
    prefix: String,
}

impl Subjects {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn request(&self, agent_id: &AgentId) -> String {
        format!("{}.agents.{}.request", self.prefix, agent_id)
    }

    pub fn response(&self, agent_id: &AgentId) -> String {
        format!("{}.agents.{}.response", self.prefix, agent_id)
    }

    pub fn broadcast(&self) -> String {
        format!("{}.agents.broadcast", self.prefix)
    }

    pub fn council(&self, council_id: &str) -> String {
        format!("{}.agents.council.{}", self.prefix, council_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_strings_are_bit_exact() {
        let subjects = Subjects::new("agromesh");
        let id = AgentId::new("crop-doctor");
        assert_eq!(subjects.request(&id), "agromesh.agents.crop-doctor.request");
        assert_eq!(subjects.response(&id), "agromesh.agents.crop-doctor.response");
        assert_eq!(subjects.broadcast(), "agromesh.agents.broadcast");
        assert_eq!(
            subjects.council("harvest-planning"),
            "agromesh.agents.council.harvest-planning"
        );
    }

    #[test]
    fn envelope_serializes_snake_case() {
        let msg = AgentMessage::new(
            AgentId::new("a"),
            Some("b".to_string()),
            MessageKind::Request,
            MessagePriority::High,
            serde_json::json!({"q": 1}),
        );
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["kind"], "request");
        assert_eq!(value["priority"], "high");
        assert!(value.get("correlation_id").is_none());
    }
}
