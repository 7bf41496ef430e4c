//! Agent supervisor
//!
//! Runs agent programs as supervised child processes and fans everything they
//! emit out to topic subscribers in real time.
//!
//! ```ignore
//! let supervisor = Supervisor::new(SupervisorConfig::from_env());
//! let mut events = supervisor.subscribe("demo");
//! supervisor.start(&AgentDescriptor::new("demo", "Demo")).await?;
//! while let Some(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//! ```

pub mod config;
pub mod core;
pub mod events;
pub mod runtime;

// Optional components
pub mod cli;
pub mod logging;

pub use config::SupervisorConfig;
pub use crate::core::{
    Event, EventKind, LifecycleStatus, LogLevel, RuntimeState, SupervisorError, SupervisorResult,
    Topic, TopicKind,
};
pub use events::{EventRegistry, Subscription};
pub use runtime::{AgentDescriptor, AgentStatus, Supervisor};
