//! Agent process supervision
//!
//! This module provides the infrastructure for running agents as OS processes:
//! - `Supervisor` - Starts, stops, and tracks agent processes
//! - `AgentDescriptor` - Everything needed to launch one agent
//! - `AgentStatus` - Point-in-time view of a live agent
//! - `ProcessHandle` - Termination requests and exit observation
//!
//! Each running agent has one monitor task that owns the child process,
//! turns its output into events, and reports its exit.

pub mod descriptor;
pub mod environment;
mod monitor;
pub mod process;
pub mod publisher;
mod record;
pub mod supervisor;
pub mod usage;
pub mod workspace;

pub use descriptor::{AgentDescriptor, AgentPermissions, ApiKeys, MAX_AGENT_ID_LEN};
pub use environment::AgentEnvironment;
pub use process::{ExitOutcome, ProcessHandle};
pub use publisher::AgentPublisher;
pub use record::AgentStatus;
pub use supervisor::Supervisor;
pub use usage::ResourceUsage;
pub use workspace::{WorkspaceLayout, DEFAULT_RUNTIME_SCRIPT};
