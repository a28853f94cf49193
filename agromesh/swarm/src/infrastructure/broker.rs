// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Broker Bridge
//!
//! Connection lifecycle around a subject-based message broker. The
//! [`Broker`] trait is the transport seam: the in-process implementation
//! here fans out over tokio broadcast channels and is what the tests run
//! against; a NATS-backed implementation plugs in behind the same trait.
//!
//! [`BrokerBridge`] owns the durable subscription registry so that every
//! handler survives a reconnect. Publishing while disconnected fails fast
//! with `NotConnected` rather than buffering.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use rand::Rng;
use tokio::sync::broadcast;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::domain::config::SwarmConfig;
use crate::domain::errors::SwarmError;

/// Fan-out capacity per subject; slow handlers beyond this lose messages,
/// matching at-most-once broker semantics.
const SUBJECT_CHANNEL_CAPACITY: usize = 256;

/// Backoff ceiling for reconnect waits.
const RECONNECT_WAIT_CAP: Duration = Duration::from_secs(10);

pub type MessageHandler = Arc<dyn Fn(Bytes) + Send + Sync>;

/// Broker-side handle for a single active subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("broker not connected")]
    NotConnected,

    #[error("broker transport error: {0}")]
    Transport(String),
}

impl From<BrokerError> for SwarmError {
    fn from(err: BrokerError) -> Self {
        match err {
            BrokerError::NotConnected => SwarmError::NotConnected,
            other => SwarmError::Backend(other.to_string()),
        }
    }
}

#[async_trait]
pub trait Broker: Send + Sync {
    async fn connect(&self) -> Result<(), BrokerError>;

    async fn disconnect(&self) -> Result<(), BrokerError>;

    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), BrokerError>;

    /// Deliver every message published to `subject` to `handler` until
    /// unsubscribed. Handlers run off the publisher's task.
    async fn subscribe(
        &self,
        subject: &str,
        handler: MessageHandler,
    ) -> Result<SubscriptionId, BrokerError>;

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), BrokerError>;

    fn is_connected(&self) -> bool;
}

/// Process-local broker over tokio broadcast channels.
pub struct InProcessBroker {
    subjects: DashMap<String, broadcast::Sender<Bytes>>,
    delivery_tasks: DashMap<u64, AbortHandle>,
    connected: AtomicBool,
    next_subscription: AtomicU64,
}

impl Default for InProcessBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InProcessBroker {
    pub fn new() -> Self {
        Self {
            subjects: DashMap::new(),
            delivery_tasks: DashMap::new(),
            connected: AtomicBool::new(false),
            next_subscription: AtomicU64::new(1),
        }
    }

    fn sender_for(&self, subject: &str) -> broadcast::Sender<Bytes> {
        self.subjects
            .entry(subject.to_string())
            .or_insert_with(|| broadcast::channel(SUBJECT_CHANNEL_CAPACITY).0)
            .clone()
    }
}

#[async_trait]
impl Broker for InProcessBroker {
    async fn connect(&self) -> Result<(), BrokerError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        self.connected.store(false, Ordering::SeqCst);
        for entry in self.delivery_tasks.iter() {
            entry.value().abort();
        }
        self.delivery_tasks.clear();
        Ok(())
    }

    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), BrokerError> {
        if !self.is_connected() {
            return Err(BrokerError::NotConnected);
        }
        // send errs only when nobody is subscribed, which is not a failure
        // for a pub/sub broker.
        let _ = self.sender_for(subject).send(payload);
        Ok(())
    }

    async fn subscribe(
        &self,
        subject: &str,
        handler: MessageHandler,
    ) -> Result<SubscriptionId, BrokerError> {
        if !self.is_connected() {
            return Err(BrokerError::NotConnected);
        }
        let mut rx = self.sender_for(subject).subscribe();
        let id = self.next_subscription.fetch_add(1, Ordering::SeqCst);
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(payload) => handler(payload),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "subscription lagged, messages dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        self.delivery_tasks.insert(id, task.abort_handle());
        Ok(SubscriptionId(id))
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), BrokerError> {
        if let Some((_, handle)) = self.delivery_tasks.remove(&id.0) {
            handle.abort();
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

struct RegisteredSubscription {
    subject: String,
    handler: MessageHandler,
    active: Option<SubscriptionId>,
}

/// Connection manager over a [`Broker`]: retrying connect, durable
/// subscriptions, and fail-fast publish.
pub struct BrokerBridge {
    broker: Arc<dyn Broker>,
    config: SwarmConfig,
    subscriptions: DashMap<u64, RegisteredSubscription>,
    next_registration: AtomicU64,
}

impl BrokerBridge {
    pub fn new(broker: Arc<dyn Broker>, config: SwarmConfig) -> Self {
        Self {
            broker,
            config,
            subscriptions: DashMap::new(),
            next_registration: AtomicU64::new(1),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.broker.is_connected()
    }

    /// Connect with bounded exponential backoff. Gives up after
    /// `broker_reconnect_max` attempts.
    pub async fn connect(&self) -> Result<(), SwarmError> {
        let mut wait = self.config.broker_reconnect_wait();
        let mut attempt = 0u32;
        loop {
            match self.broker.connect().await {
                Ok(()) => {
                    info!(url = %self.config.broker_url, "broker connected");
                    return Ok(());
                }
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.config.broker_reconnect_max {
                        warn!(attempt, %err, "broker connect gave up");
                        return Err(err.into());
                    }
                    let jitter = rand::thread_rng().gen_range(0..=wait.as_millis() as u64 / 4);
                    debug!(attempt, wait_ms = wait.as_millis() as u64, "broker connect retry");
                    tokio::time::sleep(wait + Duration::from_millis(jitter)).await;
                    wait = (wait * 2).min(RECONNECT_WAIT_CAP);
                }
            }
        }
    }

    pub async fn disconnect(&self) -> Result<(), SwarmError> {
        for mut entry in self.subscriptions.iter_mut() {
            entry.value_mut().active = None;
        }
        self.broker.disconnect().await?;
        info!("broker disconnected");
        Ok(())
    }

    /// Reconnect and replay every registered subscription.
    pub async fn reconnect(&self) -> Result<(), SwarmError> {
        self.connect().await?;
        for mut entry in self.subscriptions.iter_mut() {
            let sub = entry.value_mut();
            let id = self
                .broker
                .subscribe(&sub.subject, Arc::clone(&sub.handler))
                .await?;
            sub.active = Some(id);
        }
        info!(
            subscriptions = self.subscriptions.len(),
            "broker subscriptions restored"
        );
        Ok(())
    }

    /// Fails fast with `NotConnected` while the broker is down.
    pub async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), SwarmError> {
        if !self.broker.is_connected() {
            return Err(SwarmError::NotConnected);
        }
        self.broker.publish(subject, payload).await?;
        Ok(())
    }

    /// Register a durable subscription. It is subscribed immediately and
    /// re-subscribed after every [`reconnect`](Self::reconnect).
    pub async fn subscribe(
        &self,
        subject: &str,
        handler: MessageHandler,
    ) -> Result<u64, SwarmError> {
        let active = self
            .broker
            .subscribe(subject, Arc::clone(&handler))
            .await?;
        let registration = self.next_registration.fetch_add(1, Ordering::SeqCst);
        self.subscriptions.insert(
            registration,
            RegisteredSubscription {
                subject: subject.to_string(),
                handler,
                active: Some(active),
            },
        );
        debug!(subject, registration, "subscription registered");
        Ok(registration)
    }

    pub async fn unsubscribe(&self, registration: u64) -> Result<(), SwarmError> {
        if let Some((_, sub)) = self.subscriptions.remove(&registration) {
            if let Some(id) = sub.active {
                self.broker.unsubscribe(id).await?;
            }
        }
        Ok(())
    }

    /// Liveness check for supervisors.
    pub fn health(&self) -> BrokerHealth {
        BrokerHealth {
            connected: self.broker.is_connected(),
            subscriptions: self.subscriptions.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrokerHealth {
    pub connected: bool,
    pub subscriptions: usize,
}
