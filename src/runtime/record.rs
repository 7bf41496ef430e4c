//! Runtime records and status snapshots

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::RuntimeState;

use super::monitor::MonitorHandle;
use super::process::ProcessHandle;
use super::publisher::AgentPublisher;
use super::usage;

/// Process and monitor of one agent; both present or both absent
#[derive(Debug)]
pub(crate) struct RuntimeHandles {
    pub process: ProcessHandle,
    pub monitor: MonitorHandle,
}

#[derive(Debug, Clone, Copy)]
struct RecordSnapshot {
    state: RuntimeState,
    pid: Option<u32>,
    started_at: Option<DateTime<Utc>>,
}

/// Supervisor bookkeeping for one live agent
///
/// The `lifecycle` mutex serializes Start, Stop, and exit handling for the
/// agent; whoever takes the handles out of it owns the teardown.
#[derive(Debug)]
pub(crate) struct AgentRuntimeRecord {
    agent_id: String,
    publisher: AgentPublisher,
    snapshot: Mutex<RecordSnapshot>,
    lifecycle: tokio::sync::Mutex<Option<RuntimeHandles>>,
}

impl AgentRuntimeRecord {
    pub(crate) fn new(agent_id: impl Into<String>, publisher: AgentPublisher) -> Self {
        Self {
            agent_id: agent_id.into(),
            publisher,
            snapshot: Mutex::new(RecordSnapshot {
                state: RuntimeState::Starting,
                pid: None,
                started_at: None,
            }),
            lifecycle: tokio::sync::Mutex::new(None),
        }
    }

    pub(crate) fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub(crate) fn publisher(&self) -> &AgentPublisher {
        &self.publisher
    }

    pub(crate) fn lifecycle(&self) -> &tokio::sync::Mutex<Option<RuntimeHandles>> {
        &self.lifecycle
    }

    pub(crate) fn set_state(&self, state: RuntimeState) {
        self.lock_snapshot().state = state;
    }

    pub(crate) fn mark_running(&self, pid: Option<u32>, started_at: DateTime<Utc>) {
        let mut snapshot = self.lock_snapshot();
        snapshot.state = RuntimeState::Running;
        snapshot.pid = pid;
        snapshot.started_at = Some(started_at);
    }

    /// Current status, with resource usage for running processes
    pub(crate) async fn status(&self) -> AgentStatus {
        let snapshot = *self.lock_snapshot();
        let usage = match (snapshot.state, snapshot.pid, snapshot.started_at) {
            (RuntimeState::Running, Some(pid), Some(started_at)) => {
                usage::sample(pid, started_at).await
            }
            _ => None,
        };

        AgentStatus {
            agent_id: self.agent_id.clone(),
            state: snapshot.state,
            started_at: snapshot.started_at,
            uptime_seconds: snapshot
                .started_at
                .map(|started| (Utc::now() - started).num_seconds().max(0)),
            pid: snapshot.pid,
            memory_usage_mb: usage.map(|u| u.memory_mb),
            cpu_usage_percent: usage.map(|u| u.cpu_percent),
        }
    }

    fn lock_snapshot(&self) -> std::sync::MutexGuard<'_, RecordSnapshot> {
        self.snapshot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Status of a live agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStatus {
    pub agent_id: String,
    pub state: RuntimeState,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uptime_seconds: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_usage_mb: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_usage_percent: Option<f64>,
}
