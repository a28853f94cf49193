// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Message Bus
//!
//! Request/response, broadcast, and council messaging over the broker
//! bridge. Correlation ids pair responses with their requests; each bus
//! instance listens on its own response subject and completes pending
//! requests as responses arrive. Responses with no pending request are
//! dropped at debug level.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::agent::AgentId;
use crate::domain::config::SwarmConfig;
use crate::domain::errors::SwarmError;
use crate::domain::message::{AgentMessage, MessageKind, MessagePriority, Subjects};
use crate::infrastructure::broker::{BrokerBridge, MessageHandler};

/// Pause between publish retries when the transport rejects a request.
const PUBLISH_RETRY_WAIT: Duration = Duration::from_millis(50);

pub struct MessageBus {
    bridge: Arc<BrokerBridge>,
    subjects: Subjects,
    agent_id: AgentId,
    config: SwarmConfig,
    pending: Arc<DashMap<Uuid, oneshot::Sender<AgentMessage>>>,
    /// Registration handle for the lazily-created response subscription.
    response_registration: Mutex<Option<u64>>,
}

impl MessageBus {
    pub fn new(bridge: Arc<BrokerBridge>, agent_id: AgentId, config: SwarmConfig) -> Self {
        let subjects = Subjects::new(config.subject_prefix.clone());
        Self {
            bridge,
            subjects,
            agent_id,
            config,
            pending: Arc::new(DashMap::new()),
            response_registration: Mutex::new(None),
        }
    }

    pub fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    /// Fire-and-forget send to another agent's request subject.
    pub async fn publish_to(
        &self,
        recipient: &AgentId,
        content: serde_json::Value,
        priority: MessagePriority,
    ) -> Result<(), SwarmError> {
        let message = AgentMessage::new(
            self.agent_id.clone(),
            Some(recipient.to_string()),
            MessageKind::Request,
            priority,
            content,
        );
        self.publish_message(&self.subjects.request(recipient), &message)
            .await
    }

    /// Send a request and wait for the correlated response.
    ///
    /// A fresh correlation id is minted per logical request and reused
    /// across publish retries, so the responder side stays idempotent.
    /// Times out after `timeout` (default from config) with the
    /// correlation id attached for log correlation.
    pub async fn request(
        &self,
        recipient: &AgentId,
        content: serde_json::Value,
        priority: MessagePriority,
        timeout: Option<Duration>,
    ) -> Result<AgentMessage, SwarmError> {
        self.ensure_response_subscription().await?;

        let correlation_id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(correlation_id, tx);

        let message = AgentMessage::new(
            self.agent_id.clone(),
            Some(recipient.to_string()),
            MessageKind::Request,
            priority,
            content,
        )
        .with_correlation(correlation_id);

        let subject = self.subjects.request(recipient);
        if let Err(err) = self.publish_with_retry(&subject, &message).await {
            self.pending.remove(&correlation_id);
            return Err(err);
        }

        let wait = timeout.unwrap_or_else(|| self.config.request_default_timeout());
        match tokio::time::timeout(wait, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => {
                self.pending.remove(&correlation_id);
                Err(SwarmError::Backend("response channel dropped".to_string()))
            }
            Err(_) => {
                self.pending.remove(&correlation_id);
                debug!(%correlation_id, recipient = %recipient, "request timed out");
                Err(SwarmError::Timeout {
                    after: wait,
                    correlation_id,
                })
            }
        }
    }

    /// Answer a received request on the requester's response subject,
    /// carrying its correlation id back.
    pub async fn send_response(
        &self,
        request: &AgentMessage,
        content: serde_json::Value,
    ) -> Result<(), SwarmError> {
        let correlation_id = request.correlation_id.unwrap_or(request.message_id);
        let message = AgentMessage::new(
            self.agent_id.clone(),
            Some(request.sender_id.to_string()),
            MessageKind::Response,
            request.priority,
            content,
        )
        .with_correlation(correlation_id);
        self.publish_message(&self.subjects.response(&request.sender_id), &message)
            .await
    }

    pub async fn broadcast(
        &self,
        content: serde_json::Value,
        priority: MessagePriority,
    ) -> Result<(), SwarmError> {
        let message = AgentMessage::new(
            self.agent_id.clone(),
            None,
            MessageKind::Broadcast,
            priority,
            content,
        );
        self.publish_message(&self.subjects.broadcast(), &message)
            .await
    }

    pub async fn publish_to_council(
        &self,
        council_id: &str,
        content: serde_json::Value,
        priority: MessagePriority,
    ) -> Result<(), SwarmError> {
        let message = AgentMessage::new(
            self.agent_id.clone(),
            Some(council_id.to_string()),
            MessageKind::Council,
            priority,
            content,
        );
        self.publish_message(&self.subjects.council(council_id), &message)
            .await
    }

    /// Listen on this agent's request subject.
    pub async fn subscribe_to_requests<F>(&self, handler: F) -> Result<u64, SwarmError>
    where
        F: Fn(AgentMessage) + Send + Sync + 'static,
    {
        self.subscribe_decoded(&self.subjects.request(&self.agent_id), handler)
            .await
    }

    pub async fn subscribe_to_broadcasts<F>(&self, handler: F) -> Result<u64, SwarmError>
    where
        F: Fn(AgentMessage) + Send + Sync + 'static,
    {
        self.subscribe_decoded(&self.subjects.broadcast(), handler)
            .await
    }

    pub async fn subscribe_to_council<F>(
        &self,
        council_id: &str,
        handler: F,
    ) -> Result<u64, SwarmError>
    where
        F: Fn(AgentMessage) + Send + Sync + 'static,
    {
        self.subscribe_decoded(&self.subjects.council(council_id), handler)
            .await
    }

    pub async fn unsubscribe(&self, registration: u64) -> Result<(), SwarmError> {
        self.bridge.unsubscribe(registration).await
    }

    async fn subscribe_decoded<F>(&self, subject: &str, handler: F) -> Result<u64, SwarmError>
    where
        F: Fn(AgentMessage) + Send + Sync + 'static,
    {
        let subject_owned = subject.to_string();
        let wrapped: MessageHandler = Arc::new(move |payload| {
            match serde_json::from_slice::<AgentMessage>(&payload) {
                Ok(message) => handler(message),
                Err(err) => warn!(subject = %subject_owned, %err, "undecodable message dropped"),
            }
        });
        self.bridge.subscribe(subject, wrapped).await
    }

    async fn publish_message(
        &self,
        subject: &str,
        message: &AgentMessage,
    ) -> Result<(), SwarmError> {
        let payload = Bytes::from(serde_json::to_vec(message)?);
        self.bridge.publish(subject, payload).await
    }

    async fn publish_with_retry(
        &self,
        subject: &str,
        message: &AgentMessage,
    ) -> Result<(), SwarmError> {
        let payload = Bytes::from(serde_json::to_vec(message)?);
        let mut attempt = 0u32;
        loop {
            match self.bridge.publish(subject, payload.clone()).await {
                Ok(()) => return Ok(()),
                Err(err) if attempt < self.config.request_max_retries => {
                    attempt += 1;
                    debug!(subject, attempt, %err, "publish retry");
                    tokio::time::sleep(PUBLISH_RETRY_WAIT).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Subscribe to our response subject once, on first request.
    async fn ensure_response_subscription(&self) -> Result<(), SwarmError> {
        let mut guard = self.response_registration.lock().await;
        if guard.is_some() {
            return Ok(());
        }
        let pending = Arc::clone(&self.pending);
        let handler: MessageHandler = Arc::new(move |payload| {
            let message = match serde_json::from_slice::<AgentMessage>(&payload) {
                Ok(m) => m,
                Err(err) => {
                    warn!(%err, "undecodable response dropped");
                    return;
                }
            };
            let Some(correlation_id) = message.correlation_id else {
                debug!(message_id = %message.message_id, "response without correlation id dropped");
                return;
            };
            // remove() is the atomic claim; a second response for the same
            // id finds nothing and falls through to the debug branch.
            match pending.remove(&correlation_id) {
                Some((_, tx)) => {
                    let _ = tx.send(message);
                }
                None => debug!(%correlation_id, "late response dropped"),
            }
        });
        let registration = self
            .bridge
            .subscribe(&self.subjects.response(&self.agent_id), handler)
            .await?;
        *guard = Some(registration);
        Ok(())
    }
}
