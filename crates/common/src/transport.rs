//! Publish/subscribe channel contract.
//!
//! The transport is a named-topic broadcast primitive with best-effort,
//! unordered, at-least-once delivery and no retention. Payloads are opaque
//! bytes; their shape is owned by the monitor protocol.
//!
//! Subscriptions hand back a receiver instead of taking a callback, so the
//! subscriber decides where and when messages are processed.

use crate::error::TransportResult;
use bytes::Bytes;
use std::fmt;
use tokio::sync::mpsc;

/// Opaque handle used to cancel a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// One delivered message.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub topic: String,
    pub event: String,
    pub payload: Bytes,
}

/// A live subscription to one (topic, event) pair.
///
/// `recv` returns `None` once the transport drops the subscription, which
/// subscribers treat as a transport failure.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    topic: String,
    event: String,
    receiver: mpsc::Receiver<Envelope>,
}

impl Subscription {
    /// Wrap a receiver created by a transport implementation.
    #[must_use]
    pub fn new(
        id: SubscriptionId,
        topic: impl Into<String>,
        event: impl Into<String>,
        receiver: mpsc::Receiver<Envelope>,
    ) -> Self {
        Self {
            id,
            topic: topic.into(),
            event: event.into(),
            receiver,
        }
    }

    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    #[must_use]
    pub fn event(&self) -> &str {
        &self.event
    }

    /// Wait for the next message.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.receiver.recv().await
    }
}

/// Named-topic publish/subscribe transport.
#[async_trait::async_trait]
pub trait ChannelTransport: Send + Sync {
    /// Broadcast a payload to every subscriber of (topic, event).
    async fn publish(&self, topic: &str, event: &str, payload: Bytes) -> TransportResult<()>;

    /// Subscribe to (topic, event).
    async fn subscribe(&self, topic: &str, event: &str) -> TransportResult<Subscription>;

    /// Cancel a subscription. Unknown ids are ignored.
    async fn unsubscribe(&self, id: SubscriptionId) -> TransportResult<()>;
}
