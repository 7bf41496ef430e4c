//! Subscriber channel types
//!
//! Each subscriber owns a bounded queue. The registry keeps the sending half;
//! the [`Subscription`] returned to the caller keeps the receiving half and
//! removes itself from the registry when dropped.

use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use futures::Stream;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::core::{Event, Topic};

use super::registry::RegistryInner;

/// Sender half of a subscriber queue (held by the registry)
pub type EventSender = mpsc::Sender<Arc<Event>>;

/// Receiver half of a subscriber queue (held by the subscription)
pub type EventReceiver = mpsc::Receiver<Arc<Event>>;

/// Unique identifier of one subscriber channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Why a single delivery did not reach its subscriber
///
/// Either case removes the subscriber from its topic.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryFailure {
    /// The subscriber's queue is full (slow consumer)
    #[error("subscriber queue full")]
    QueueFull,

    /// The receiving half was dropped
    #[error("subscriber disconnected")]
    Disconnected,
}

/// Registry-side view of a subscriber
#[derive(Clone)]
pub(crate) struct SubscriberSlot {
    pub(crate) id: SubscriberId,
    sender: EventSender,
}

impl SubscriberSlot {
    pub(crate) fn new(id: SubscriberId, sender: EventSender) -> Self {
        Self { id, sender }
    }

    /// Hand an event to the subscriber without waiting
    pub(crate) fn deliver(&self, event: &Arc<Event>) -> Result<(), DeliveryFailure> {
        self.sender.try_send(Arc::clone(event)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryFailure::QueueFull,
            mpsc::error::TrySendError::Closed(_) => DeliveryFailure::Disconnected,
        })
    }
}

/// Handle for receiving the events of one topic
///
/// Events arrive in publish order. Once the registry drops the subscriber
/// (unsubscribe, slow consumer, shutdown) the buffered events are still
/// returned and then `recv` yields `None`.
pub struct Subscription {
    id: SubscriberId,
    topic: Topic,
    receiver: EventReceiver,
    registry: Weak<RegistryInner>,
}

impl Subscription {
    pub(crate) fn new(
        id: SubscriberId,
        topic: Topic,
        receiver: EventReceiver,
        registry: Weak<RegistryInner>,
    ) -> Self {
        Self {
            id,
            topic,
            receiver,
            registry,
        }
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Wait for the next event
    ///
    /// Returns `None` once the subscriber has been removed and its queue is empty.
    pub async fn recv(&mut self) -> Option<Arc<Event>> {
        self.receiver.recv().await
    }

    /// Take the next event if one is already queued
    pub fn try_recv(&mut self) -> Option<Arc<Event>> {
        self.receiver.try_recv().ok()
    }

    /// Remove this subscriber from the registry
    ///
    /// Equivalent to dropping the subscription.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(&self.topic, &[self.id]);
        }
    }
}

impl Stream for Subscription {
    type Item = Arc<Event>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .finish()
    }
}
