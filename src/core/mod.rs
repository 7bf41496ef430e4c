//! Core types shared by the registry and the supervisor
//!
//! - `Topic` / `TopicKind` - Registry keys (`agent:<id>`, `user:<id>`, `broadcast:<id>`)
//! - `Event` - Structured record fanned out to subscribers
//! - `RuntimeState` / `LifecycleStatus` - Agent lifecycle values
//! - `SupervisorError` - Error types

pub mod error;
pub mod event;
pub mod state;
pub mod topic;

pub use error::{SupervisorError, SupervisorResult};
pub use event::{Event, EventKind, LogLevel};
pub use state::{LifecycleStatus, RuntimeState};
pub use topic::{Topic, TopicKind};
