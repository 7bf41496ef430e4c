//! Agent lifecycle state types

use serde::{Deserialize, Serialize};

/// State of an agent runtime record
///
/// Transitions: `Starting -> Running -> {Stopping -> Stopped | Crashed}`.
/// A record in a terminal state is about to be removed from the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeState {
    /// Record reserved, process not yet spawned
    Starting,

    /// Process spawned and monitored
    Running,

    /// Graceful termination in progress
    Stopping,

    /// Terminated through `Stop`
    Stopped,

    /// Process exited on its own
    Crashed,
}

impl RuntimeState {
    /// Check if the record is in a terminal state (Stopped or Crashed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, RuntimeState::Stopped | RuntimeState::Crashed)
    }

    /// Check if the process is alive from the supervisor's point of view
    pub fn is_active(&self) -> bool {
        matches!(self, RuntimeState::Running | RuntimeState::Stopping)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeState::Starting => "starting",
            RuntimeState::Running => "running",
            RuntimeState::Stopping => "stopping",
            RuntimeState::Stopped => "stopped",
            RuntimeState::Crashed => "crashed",
        }
    }
}

impl std::fmt::Display for RuntimeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle value carried by status events
///
/// A superset of [`RuntimeState`]: a process that exits on its own is reported
/// as `Completed` (exit code 0) or `Crashed` (anything else).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStatus {
    Starting,
    Running,
    Stopping,
    Stopped,
    Completed,
    Crashed,
}

impl LifecycleStatus {
    /// Status reported for a process exit with the given code
    ///
    /// `None` means the process was killed by a signal.
    pub fn from_exit_code(code: Option<i32>) -> Self {
        match code {
            Some(0) => LifecycleStatus::Completed,
            _ => LifecycleStatus::Crashed,
        }
    }

    /// Whether this status describes the end of a process
    pub fn is_exit(&self) -> bool {
        matches!(self, LifecycleStatus::Completed | LifecycleStatus::Crashed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleStatus::Starting => "starting",
            LifecycleStatus::Running => "running",
            LifecycleStatus::Stopping => "stopping",
            LifecycleStatus::Stopped => "stopped",
            LifecycleStatus::Completed => "completed",
            LifecycleStatus::Crashed => "crashed",
        }
    }
}

impl From<RuntimeState> for LifecycleStatus {
    fn from(state: RuntimeState) -> Self {
        match state {
            RuntimeState::Starting => LifecycleStatus::Starting,
            RuntimeState::Running => LifecycleStatus::Running,
            RuntimeState::Stopping => LifecycleStatus::Stopping,
            RuntimeState::Stopped => LifecycleStatus::Stopped,
            RuntimeState::Crashed => LifecycleStatus::Crashed,
        }
    }
}

impl std::fmt::Display for LifecycleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
