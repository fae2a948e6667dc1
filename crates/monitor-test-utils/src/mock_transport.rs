//! In-memory channel transport.
//!
//! Delivers every publish synchronously to the matching subscribers and
//! keeps a log of what was published so tests can assert on it. Topics can
//! be closed, made to fail, or made to hang to exercise the monitor's
//! failure paths.
//!
//! # Example
//!
//! ```rust,ignore
//! use monitor_test_utils::MockTransport;
//!
//! let transport = MockTransport::new();
//! transport.close_topic(&Topic::participant(session_id, participant_id));
//!
//! // Simulate a participant client publishing on its uplink
//! transport.deliver(&uplink, Event::Offer, offer_payload("v=0"));
//! let answers = transport.wait_for_published(&downlink, Event::Answer, 1).await;
//! ```

use bytes::Bytes;
use common::error::{TransportError, TransportResult};
use common::transport::{ChannelTransport, Envelope, Subscription, SubscriptionId};
use monitor_protocol::Event;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

const SUBSCRIPTION_BUFFER: usize = 256;

/// Iterations the wait helpers spin before failing the test.
const WAIT_ITERATIONS: usize = 10_000;

/// Mock transport for testing the monitor without a broker.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

#[derive(Debug, Default)]
struct MockTransportInner {
    next_id: u64,
    subscribers: HashMap<SubscriptionId, Subscriber>,
    published: Vec<Envelope>,
    /// Topics whose channel has been torn down
    closed_topics: HashSet<String>,
    /// Topics whose publishes fail
    failing_topics: HashSet<String>,
    fail_all_publishes: bool,
    /// Topics whose publishes never complete
    hanging_topics: HashSet<String>,
    fail_subscribe: bool,
    unsubscribed: Vec<SubscriptionId>,
}

#[derive(Debug)]
struct Subscriber {
    topic: String,
    event: String,
    sender: mpsc::Sender<Envelope>,
}

impl MockTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tear down a topic: publishes fail and its subscriptions end.
    pub fn close_topic(&self, topic: impl AsRef<str>) {
        let topic = topic.as_ref().to_string();
        let mut inner = self.inner.lock().unwrap();
        inner.subscribers.retain(|_, sub| sub.topic != topic);
        inner.closed_topics.insert(topic);
    }

    /// Undo `close_topic`.
    pub fn reopen_topic(&self, topic: impl AsRef<str>) {
        let mut inner = self.inner.lock().unwrap();
        inner.closed_topics.remove(topic.as_ref());
    }

    /// Make publishes to one topic fail with `PublishFailed`.
    pub fn fail_publish_to(&self, topic: impl AsRef<str>) {
        let mut inner = self.inner.lock().unwrap();
        inner.failing_topics.insert(topic.as_ref().to_string());
    }

    /// Make every publish fail.
    pub fn fail_all_publishes(&self, fail: bool) {
        self.inner.lock().unwrap().fail_all_publishes = fail;
    }

    /// Make publishes to one topic never complete.
    pub fn hang_publish_to(&self, topic: impl AsRef<str>) {
        let mut inner = self.inner.lock().unwrap();
        inner.hanging_topics.insert(topic.as_ref().to_string());
    }

    /// Make every new subscription fail.
    pub fn fail_subscribe(&self, fail: bool) {
        self.inner.lock().unwrap().fail_subscribe = fail;
    }

    /// Simulate a remote client publishing to (topic, event).
    ///
    /// Not recorded in the publish log. Returns how many subscribers
    /// received the payload.
    pub fn deliver(&self, topic: impl AsRef<str>, event: Event, payload: Bytes) -> usize {
        let inner = self.inner.lock().unwrap();
        fan_out(&inner, topic.as_ref(), event.as_str(), &payload)
    }

    /// Payloads published by the monitor to (topic, event), oldest first.
    #[must_use]
    pub fn published(&self, topic: impl AsRef<str>, event: Event) -> Vec<Bytes> {
        let topic = topic.as_ref();
        self.inner
            .lock()
            .unwrap()
            .published
            .iter()
            .filter(|e| e.topic == topic && e.event == event.as_str())
            .map(|e| e.payload.clone())
            .collect()
    }

    /// Total number of successful publishes.
    #[must_use]
    pub fn publish_count(&self) -> usize {
        self.inner.lock().unwrap().published.len()
    }

    /// Live subscriptions to (topic, event).
    #[must_use]
    pub fn subscriber_count(&self, topic: impl AsRef<str>, event: Event) -> usize {
        let topic = topic.as_ref();
        self.inner
            .lock()
            .unwrap()
            .subscribers
            .values()
            .filter(|sub| sub.topic == topic && sub.event == event.as_str())
            .count()
    }

    /// Subscriptions that were explicitly cancelled.
    #[must_use]
    pub fn unsubscribed(&self) -> Vec<SubscriptionId> {
        self.inner.lock().unwrap().unsubscribed.clone()
    }

    /// Wait until (topic, event) has at least one subscriber.
    ///
    /// # Panics
    ///
    /// Panics if no subscriber appears.
    pub async fn wait_for_subscriber(&self, topic: impl AsRef<str>, event: Event) {
        let topic = topic.as_ref();
        for _ in 0..WAIT_ITERATIONS {
            if self.subscriber_count(topic, event) > 0 {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("no subscriber appeared on {topic} ({event})");
    }

    /// Wait until (topic, event) has no subscribers.
    ///
    /// # Panics
    ///
    /// Panics if a subscriber remains.
    pub async fn wait_for_no_subscriber(&self, topic: impl AsRef<str>, event: Event) {
        let topic = topic.as_ref();
        for _ in 0..WAIT_ITERATIONS {
            if self.subscriber_count(topic, event) == 0 {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("subscriber still present on {topic} ({event})");
    }

    /// Wait until at least `count` payloads were published to (topic, event).
    ///
    /// # Panics
    ///
    /// Panics if fewer are published.
    pub async fn wait_for_published(
        &self,
        topic: impl AsRef<str>,
        event: Event,
        count: usize,
    ) -> Vec<Bytes> {
        let topic = topic.as_ref();
        for _ in 0..WAIT_ITERATIONS {
            let published = self.published(topic, event);
            if published.len() >= count {
                return published;
            }
            tokio::task::yield_now().await;
        }
        panic!("expected {count} publishes on {topic} ({event})");
    }
}

fn fan_out(inner: &MockTransportInner, topic: &str, event: &str, payload: &Bytes) -> usize {
    inner
        .subscribers
        .values()
        .filter(|sub| sub.topic == topic && sub.event == event)
        .filter(|sub| {
            sub.sender
                .try_send(Envelope {
                    topic: topic.to_string(),
                    event: event.to_string(),
                    payload: payload.clone(),
                })
                .is_ok()
        })
        .count()
}

#[async_trait::async_trait]
impl ChannelTransport for MockTransport {
    async fn publish(&self, topic: &str, event: &str, payload: Bytes) -> TransportResult<()> {
        let hang = {
            let mut inner = self.inner.lock().unwrap();
            if inner.closed_topics.contains(topic) {
                return Err(TransportError::ChannelClosed(topic.to_string()));
            }
            if inner.fail_all_publishes || inner.failing_topics.contains(topic) {
                return Err(TransportError::PublishFailed(format!("{topic}: injected")));
            }
            if inner.hanging_topics.contains(topic) {
                true
            } else {
                fan_out(&inner, topic, event, &payload);
                inner.published.push(Envelope {
                    topic: topic.to_string(),
                    event: event.to_string(),
                    payload,
                });
                false
            }
        };

        if hang {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str, event: &str) -> TransportResult<Subscription> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_subscribe {
            return Err(TransportError::SubscribeFailed(format!("{topic}: injected")));
        }
        if inner.closed_topics.contains(topic) {
            return Err(TransportError::ChannelClosed(topic.to_string()));
        }

        inner.next_id += 1;
        let id = SubscriptionId(inner.next_id);
        let (sender, receiver) = mpsc::channel(SUBSCRIPTION_BUFFER);
        inner.subscribers.insert(
            id,
            Subscriber {
                topic: topic.to_string(),
                event: event.to_string(),
                sender,
            },
        );

        Ok(Subscription::new(id, topic, event, receiver))
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> TransportResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.subscribers.remove(&id).is_some() {
            inner.unsubscribed.push(id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_matching_subscribers_only() {
        let transport = MockTransport::new();
        let mut offers = transport.subscribe("t", "offer").await.unwrap();
        let _closes = transport.subscribe("t", "close").await.unwrap();

        transport
            .publish("t", "offer", Bytes::from_static(b"{}"))
            .await
            .unwrap();

        assert_eq!(offers.recv().await.unwrap().payload, Bytes::from_static(b"{}"));
        assert_eq!(transport.published("t", Event::Offer).len(), 1);
        assert!(transport.published("t", Event::Close).is_empty());
    }

    #[tokio::test]
    async fn test_closed_topic_ends_subscriptions_and_rejects_publish() {
        let transport = MockTransport::new();
        let mut sub = transport.subscribe("t", "frame").await.unwrap();

        transport.close_topic("t");

        assert!(sub.recv().await.is_none());
        assert_eq!(
            transport.publish("t", "frame", Bytes::new()).await,
            Err(TransportError::ChannelClosed("t".to_string()))
        );
        assert!(transport.subscribe("t", "frame").await.is_err());
    }

    #[tokio::test]
    async fn test_unsubscribe_is_recorded_once() {
        let transport = MockTransport::new();
        let sub = transport.subscribe("t", "frame").await.unwrap();

        transport.unsubscribe(sub.id()).await.unwrap();
        transport.unsubscribe(sub.id()).await.unwrap();

        assert_eq!(transport.unsubscribed(), vec![sub.id()]);
        assert_eq!(transport.subscriber_count("t", Event::Frame), 0);
    }
}
