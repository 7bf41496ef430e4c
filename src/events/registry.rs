//! EventRegistry - Topic-keyed publish/subscribe
//!
//! The registry maps a [`Topic`] to the set of live subscriber channels.
//! Subscriber sets are copy-on-write: `publish` clones the `Arc` of the
//! current set and releases the lock before fanning out, so concurrent
//! subscribe/unsubscribe never disturb a publish in progress.
//!
//! Delivery is best effort and self-healing. A subscriber whose queue is
//! full or whose receiver is gone is removed on the spot; the publish call
//! itself never fails and never waits.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::Value;
use tokio::sync::mpsc;

use crate::core::{Event, LifecycleStatus, LogLevel, SupervisorResult, Topic};

use super::subscription::{SubscriberId, SubscriberSlot, Subscription};

/// Default capacity of each subscriber queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

type SubscriberSet = Arc<Vec<SubscriberSlot>>;

pub(crate) struct RegistryInner {
    topics: RwLock<HashMap<Topic, SubscriberSet>>,
    capacity: usize,
    closed: AtomicBool,
}

impl RegistryInner {
    fn read_topics(&self) -> RwLockReadGuard<'_, HashMap<Topic, SubscriberSet>> {
        self.topics.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_topics(&self) -> RwLockWriteGuard<'_, HashMap<Topic, SubscriberSet>> {
        self.topics.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remove the given subscribers from a topic, returning how many were found
    pub(crate) fn remove(&self, topic: &Topic, ids: &[SubscriberId]) -> usize {
        let mut topics = self.write_topics();
        let Some(current) = topics.get(topic) else {
            return 0;
        };

        let remaining: Vec<SubscriberSlot> = current
            .iter()
            .filter(|slot| !ids.contains(&slot.id))
            .cloned()
            .collect();
        let removed = current.len() - remaining.len();

        if remaining.is_empty() {
            topics.remove(topic);
        } else if removed > 0 {
            topics.insert(topic.clone(), Arc::new(remaining));
        }

        removed
    }
}

/// In-memory pub/sub directory shared by publishers and subscribers
///
/// Cloning is cheap; all clones share the same topics.
#[derive(Clone)]
pub struct EventRegistry {
    inner: Arc<RegistryInner>,
}

impl EventRegistry {
    /// Create a registry with the default queue capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    /// Create a registry whose subscriber queues hold `capacity` events
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                topics: RwLock::new(HashMap::new()),
                capacity: capacity.max(1),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Register a new subscriber for `topic`
    ///
    /// After [`shutdown`](Self::shutdown) the returned subscription is already
    /// closed and yields `None` immediately.
    pub fn subscribe(&self, topic: Topic) -> Subscription {
        let id = SubscriberId::new();
        let (tx, rx) = mpsc::channel(self.inner.capacity);

        let mut topics = self.inner.write_topics();
        if self.inner.closed.load(Ordering::Acquire) {
            drop(topics);
            drop(tx);
            return Subscription::new(id, topic, rx, std::sync::Weak::new());
        }

        let mut slots: Vec<SubscriberSlot> = topics
            .get(&topic)
            .map(|current| current.as_ref().clone())
            .unwrap_or_default();
        slots.push(SubscriberSlot::new(id, tx));
        topics.insert(topic.clone(), Arc::new(slots));
        drop(topics);

        tracing::debug!(topic = %topic, subscriber = %id, "Subscriber registered");
        Subscription::new(id, topic, rx, Arc::downgrade(&self.inner))
    }

    /// Subscribe using the textual topic form (`agent:<id>`)
    pub fn subscribe_str(&self, topic: &str) -> SupervisorResult<Subscription> {
        Ok(self.subscribe(topic.parse()?))
    }

    /// Remove a subscriber
    ///
    /// Idempotent: returns `false` if the subscriber was already gone.
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        let removed = self.inner.remove(subscription.topic(), &[subscription.id()]) > 0;
        if removed {
            tracing::debug!(
                topic = %subscription.topic(),
                subscriber = %subscription.id(),
                "Subscriber removed"
            );
        }
        removed
    }

    /// Deliver `event` to every current subscriber of `event.topic`
    ///
    /// Returns the number of subscribers that accepted the event. Subscribers
    /// that fail delivery are removed.
    pub fn publish(&self, event: Event) -> usize {
        let subscribers = {
            let topics = self.inner.read_topics();
            match topics.get(&event.topic) {
                Some(set) => Arc::clone(set),
                None => return 0,
            }
        };

        let event = Arc::new(event);
        let mut delivered = 0;
        let mut failed = Vec::new();

        for slot in subscribers.iter() {
            match slot.deliver(&event) {
                Ok(()) => delivered += 1,
                Err(failure) => {
                    tracing::warn!(
                        topic = %event.topic,
                        subscriber = %slot.id,
                        reason = %failure,
                        "Dropping subscriber after failed delivery"
                    );
                    failed.push(slot.id);
                }
            }
        }

        if !failed.is_empty() {
            self.inner.remove(&event.topic, &failed);
        }

        delivered
    }

    /// Publish a log event to `agent:<agent_id>`
    pub fn broadcast_log(
        &self,
        agent_id: &str,
        level: LogLevel,
        message: impl Into<String>,
    ) -> usize {
        self.publish(Event::log(Topic::agent(agent_id), level, message))
    }

    /// Publish a chat event to `agent:<agent_id>`
    pub fn broadcast_chat(&self, agent_id: &str, payload: Value) -> usize {
        self.publish(Event::chat(Topic::agent(agent_id), payload))
    }

    /// Publish a status event to `agent:<agent_id>`
    pub fn broadcast_status(
        &self,
        agent_id: &str,
        status: LifecycleStatus,
        details: Value,
    ) -> usize {
        self.publish(Event::status(Topic::agent(agent_id), status, details))
    }

    /// Number of live subscribers of a topic
    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.inner
            .read_topics()
            .get(topic)
            .map(|set| set.len())
            .unwrap_or(0)
    }

    /// Number of topics with at least one subscriber
    pub fn topic_count(&self) -> usize {
        self.inner.read_topics().len()
    }

    /// Close every subscriber channel and clear the registry
    ///
    /// Subscribers drain what is already queued and then observe end of stream.
    pub fn shutdown(&self) {
        let drained = {
            let mut topics = self.inner.write_topics();
            self.inner.closed.store(true, Ordering::Release);
            std::mem::take(&mut *topics)
        };

        let subscribers: usize = drained.values().map(|set| set.len()).sum();
        tracing::info!(
            topics = drained.len(),
            subscribers,
            "Event registry shut down"
        );
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

impl Default for EventRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRegistry")
            .field("topics", &self.topic_count())
            .field("capacity", &self.inner.capacity)
            .finish()
    }
}
