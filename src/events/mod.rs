//! Real-time event fan-out
//!
//! - `EventRegistry` - Topic-keyed directory of subscriber channels
//! - `Subscription` - Receiving end for one subscriber, unsubscribes on drop
//!
//! Publishers (the supervisor's monitor tasks, transport layers relaying chat)
//! never see subscribers directly; they publish an [`Event`](crate::core::Event)
//! and the registry delivers it to whoever is listening on its topic.

pub mod registry;
pub mod subscription;

pub use registry::{EventRegistry, DEFAULT_QUEUE_CAPACITY};
pub use subscription::{DeliveryFailure, SubscriberId, Subscription};
