//! Supervisor - Runs and tracks agent processes
//!
//! The `Supervisor` is responsible for:
//! - Enforcing one running process per agent identifier
//! - Spawning agents in their own workspace with a prepared environment
//! - Stopping agents gracefully, escalating to a kill after the grace period
//! - Publishing lifecycle and output events to the [`EventRegistry`]
//!
//! Each agent's record lives in a single lock-guarded map. Start inserts
//! into it atomically; the record is removed either by Stop or by the exit
//! handler the monitor triggers when the process ends on its own.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::config::SupervisorConfig;
use crate::core::{
    LifecycleStatus, LogLevel, RuntimeState, SupervisorError, SupervisorResult, Topic,
};
use crate::events::{EventRegistry, Subscription};

use super::descriptor::AgentDescriptor;
use super::environment::AgentEnvironment;
use super::monitor::{self, ExitCallback};
use super::process::{self, ExitOutcome};
use super::publisher::AgentPublisher;
use super::record::{AgentRuntimeRecord, AgentStatus, RuntimeHandles};
use super::workspace::WorkspaceLayout;

/// Upper bound on waiting for a process after SIGKILL
const KILL_WAIT: Duration = Duration::from_secs(5);

/// Slack on top of the drain timeout when joining a monitor
const MONITOR_JOIN_SLACK: Duration = Duration::from_millis(250);

/// Poll interval for [`Supervisor::wait_for`]
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

type AgentMap = HashMap<String, Arc<AgentRuntimeRecord>>;

struct SupervisorInner {
    /// Map of agent_id -> runtime record for live agents
    agents: RwLock<AgentMap>,
    registry: EventRegistry,
    config: SupervisorConfig,
    workspaces: WorkspaceLayout,
    shutdown: CancellationToken,
}

impl SupervisorInner {
    /// Remove `record` if it is still the one registered under its id
    async fn remove_record(&self, record: &Arc<AgentRuntimeRecord>) -> bool {
        let mut agents = self.agents.write().await;
        let current = agents
            .get(record.agent_id())
            .is_some_and(|existing| Arc::ptr_eq(existing, record));
        if current {
            agents.remove(record.agent_id());
        }
        current
    }

    async fn lookup(&self, agent_id: &str) -> SupervisorResult<Arc<AgentRuntimeRecord>> {
        let agents = self.agents.read().await;
        agents
            .get(agent_id)
            .cloned()
            .ok_or_else(|| SupervisorError::NotRunning(agent_id.to_string()))
    }

    /// Cleanup after a process exited on its own
    async fn reap(&self, record: Arc<AgentRuntimeRecord>, outcome: ExitOutcome) {
        let mut lifecycle = record.lifecycle().lock().await;
        // Stop already owns the teardown
        let Some(handles) = lifecycle.take() else {
            return;
        };

        record.set_state(RuntimeState::Crashed);
        self.remove_record(&record).await;
        drop(lifecycle);
        drop(handles);

        tracing::info!(
            agent_id = %record.agent_id(),
            exit_code = ?outcome.code,
            "Agent exited; record removed"
        );
    }
}

/// Supervisor for agent processes
///
/// Cheap to clone; clones share the same agents and registry.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<SupervisorInner>,
}

impl Supervisor {
    /// Create a supervisor with its own event registry
    pub fn new(config: SupervisorConfig) -> Self {
        let registry = EventRegistry::with_capacity(config.subscriber_queue_capacity);
        Self::with_registry(config, registry)
    }

    /// Create a supervisor publishing to an existing registry
    pub fn with_registry(config: SupervisorConfig, registry: EventRegistry) -> Self {
        let workspaces = WorkspaceLayout::new(config.workspaces_dir());
        Self {
            inner: Arc::new(SupervisorInner {
                agents: RwLock::new(HashMap::new()),
                registry,
                config,
                workspaces,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &EventRegistry {
        &self.inner.registry
    }

    pub fn workspaces(&self) -> &WorkspaceLayout {
        &self.inner.workspaces
    }

    /// Subscribe to `agent:<agent_id>`
    pub fn subscribe(&self, agent_id: &str) -> Subscription {
        self.inner
            .registry
            .subscribe(Topic::agent(agent_id.to_ascii_lowercase()))
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Start an agent process
    ///
    /// Returns once the process is spawned and monitored.
    pub async fn start(&self, descriptor: &AgentDescriptor) -> SupervisorResult<AgentStatus> {
        let descriptor = descriptor.normalized()?;
        let agent_id = descriptor.agent_id.clone();

        let record = Arc::new(AgentRuntimeRecord::new(
            agent_id.clone(),
            self.publisher_for(&descriptor),
        ));

        // Held until the handles are in place, so Stop waits for a complete start
        let mut lifecycle = record.lifecycle().lock().await;

        {
            let mut agents = self.inner.agents.write().await;
            if self.inner.shutdown.is_cancelled() {
                return Err(SupervisorError::ShuttingDown);
            }
            if agents.contains_key(&agent_id) {
                return Err(SupervisorError::AlreadyRunning(agent_id));
            }
            if let Some(max) = self.inner.config.max_concurrent_agents {
                if agents.len() >= max {
                    return Err(SupervisorError::CapacityExceeded(max));
                }
            }
            agents.insert(agent_id.clone(), Arc::clone(&record));
        }

        record
            .publisher()
            .status(LifecycleStatus::Starting, json!({}));

        match self.launch(&descriptor, &record).await {
            Ok(handles) => {
                *lifecycle = Some(handles);
            }
            Err(e) => {
                record.set_state(RuntimeState::Crashed);
                self.inner.remove_record(&record).await;
                tracing::error!(agent_id = %agent_id, error = %e, "Failed to start agent");
                record
                    .publisher()
                    .log(LogLevel::Error, format!("Failed to start agent: {}", e));
                return Err(e);
            }
        }
        drop(lifecycle);

        let status = record.status().await;
        tracing::info!(agent_id = %agent_id, pid = ?status.pid, "Agent started");
        Ok(status)
    }

    /// Spawn the process and its monitor for a reserved record
    async fn launch(
        &self,
        descriptor: &AgentDescriptor,
        record: &Arc<AgentRuntimeRecord>,
    ) -> SupervisorResult<RuntimeHandles> {
        let agent_id = descriptor.agent_id.as_str();
        let config = &self.inner.config;

        let workspace = self
            .inner
            .workspaces
            .ensure(agent_id)
            .await
            .map_err(|e| match e {
                SupervisorError::Io(io) => SupervisorError::spawn_failure(agent_id, io),
                other => other,
            })?;
        let env = AgentEnvironment::build(descriptor, &workspace, config)?;
        let command = match descriptor.command.as_deref() {
            Some(command) => command,
            None => {
                self.inner
                    .workspaces
                    .install_runtime(&workspace)
                    .await
                    .map_err(|e| match e {
                        SupervisorError::Io(io) => SupervisorError::spawn_failure(agent_id, io),
                        other => other,
                    })?;
                config.agent_command.as_slice()
            }
        };

        let child = process::spawn_agent(agent_id, command, &workspace, &env)?;
        let pid = child.id();
        let started_at = chrono::Utc::now();
        record.mark_running(pid, started_at);
        record.publisher().status(
            LifecycleStatus::Running,
            json!({"pid": pid, "started_at": started_at}),
        );

        let (process, monitor) = monitor::spawn(
            agent_id.to_string(),
            child,
            record.publisher().clone(),
            config.drain_timeout(),
            self.exit_handler(record),
        );

        Ok(RuntimeHandles { process, monitor })
    }

    /// Callback the monitor runs once the process has exited
    fn exit_handler(&self, record: &Arc<AgentRuntimeRecord>) -> ExitCallback {
        let inner: Weak<SupervisorInner> = Arc::downgrade(&self.inner);
        let record = Arc::clone(record);
        Box::new(move |outcome| {
            // Runs on its own task: Stop may hold the lifecycle lock while joining the monitor
            tokio::spawn(async move {
                if let Some(inner) = inner.upgrade() {
                    inner.reap(record, outcome).await;
                }
            });
        })
    }

    /// Stop a running agent
    ///
    /// Sends SIGTERM, waits for the grace period, then kills. Never fails for
    /// a process that ignores termination.
    pub async fn stop(&self, agent_id: &str) -> SupervisorResult<()> {
        let agent_id = agent_id.to_ascii_lowercase();
        let record = self.inner.lookup(&agent_id).await?;

        let mut lifecycle = record.lifecycle().lock().await;
        let Some(handles) = lifecycle.take() else {
            return Err(SupervisorError::NotRunning(agent_id));
        };

        record.set_state(RuntimeState::Stopping);
        record
            .publisher()
            .status(LifecycleStatus::Stopping, json!({}));
        tracing::info!(agent_id = %agent_id, pid = ?handles.process.pid(), "Stopping agent");

        let config = &self.inner.config;
        let (outcome, forced) = match handles
            .process
            .terminate(&agent_id, config.grace_period())
            .await
        {
            Ok(outcome) => (outcome, false),
            Err(e) => {
                tracing::warn!(
                    agent_id = %agent_id,
                    error = %e,
                    "Grace period elapsed; killing agent"
                );
                (handles.process.kill(KILL_WAIT).await, true)
            }
        };

        handles
            .monitor
            .finish(config.drain_timeout() + MONITOR_JOIN_SLACK)
            .await;

        record.set_state(RuntimeState::Stopped);
        self.inner.remove_record(&record).await;
        drop(lifecycle);

        record.publisher().status(
            LifecycleStatus::Stopped,
            json!({
                "exit_code": outcome.and_then(|o| o.code),
                "forced": forced,
            }),
        );
        tracing::info!(agent_id = %agent_id, forced, "Agent stopped");
        Ok(())
    }

    /// Stop (if running), pause, then start again
    pub async fn restart(&self, descriptor: &AgentDescriptor) -> SupervisorResult<AgentStatus> {
        let agent_id = descriptor.agent_id.to_ascii_lowercase();
        match self.stop(&agent_id).await {
            Ok(()) => {}
            Err(e) if e.is_not_running() => {
                tracing::debug!(agent_id = %agent_id, "Restart of an agent that was not running");
            }
            Err(e) => return Err(e),
        }

        tokio::time::sleep(self.inner.config.restart_pause()).await;
        self.start(descriptor).await
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Status of a live agent
    pub async fn status(&self, agent_id: &str) -> SupervisorResult<AgentStatus> {
        let record = self.inner.lookup(&agent_id.to_ascii_lowercase()).await?;
        Ok(record.status().await)
    }

    /// Snapshot of the identifiers with a live record
    pub async fn list_running(&self) -> Vec<String> {
        let agents = self.inner.agents.read().await;
        let mut ids: Vec<String> = agents.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Check if an agent has a live record
    pub async fn is_running(&self, agent_id: &str) -> bool {
        let agents = self.inner.agents.read().await;
        agents.contains_key(&agent_id.to_ascii_lowercase())
    }

    /// Get the number of live agents
    pub async fn count(&self) -> usize {
        let agents = self.inner.agents.read().await;
        agents.len()
    }

    /// Wait until an agent no longer has a live record
    pub async fn wait_for(&self, agent_id: &str) {
        while self.is_running(agent_id).await {
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }
    }

    /// Publish a chat event on a running agent's topic
    pub async fn publish_chat(&self, agent_id: &str, payload: Value) -> SupervisorResult<usize> {
        let record = self.inner.lookup(&agent_id.to_ascii_lowercase()).await?;
        Ok(record.publisher().chat(payload))
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Stop every agent and close the registry
    ///
    /// Further `start` calls fail with `ShuttingDown`.
    pub async fn shutdown(&self) {
        let ids: Vec<String> = {
            let agents = self.inner.agents.write().await;
            self.inner.shutdown.cancel();
            agents.keys().cloned().collect()
        };
        tracing::info!(agents = ids.len(), "Shutting down supervisor");

        let results = futures::future::join_all(ids.iter().map(|id| self.stop(id))).await;
        for (id, result) in ids.iter().zip(results) {
            match result {
                Ok(()) => {}
                Err(e) if e.is_not_running() => {}
                Err(e) => tracing::warn!(
                    agent_id = %id,
                    error = %e,
                    "Failed to stop agent during shutdown"
                ),
            }
        }

        let leftovers: Vec<Arc<AgentRuntimeRecord>> = {
            let mut agents = self.inner.agents.write().await;
            agents.drain().map(|(_, record)| record).collect()
        };
        for record in leftovers {
            if let Some(handles) = record.lifecycle().lock().await.take() {
                tracing::warn!(agent_id = %record.agent_id(), "Cancelling leftover monitor");
                handles.monitor.cancel();
            }
        }

        self.inner.registry.shutdown();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    fn publisher_for(&self, descriptor: &AgentDescriptor) -> AgentPublisher {
        let publisher = AgentPublisher::new(self.inner.registry.clone(), &descriptor.agent_id);
        match (&descriptor.owner_id, self.inner.config.forward_to_owner) {
            (Some(owner), true) => publisher.with_owner(owner),
            _ => publisher,
        }
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new(SupervisorConfig::default())
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("workspaces", &self.inner.workspaces.base_dir())
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::core::{Event, EventKind};
    use std::time::Instant;
    use tempfile::TempDir;

    const RECV_TIMEOUT: Duration = Duration::from_secs(5);

    fn test_config(temp: &TempDir) -> SupervisorConfig {
        SupervisorConfig::new()
            .with_agents_dir(temp.path())
            .with_grace_period_ms(2_000)
            .with_restart_pause_ms(50)
            .with_drain_timeout_ms(200)
    }

    fn sh_agent(agent_id: &str, script: &str) -> AgentDescriptor {
        AgentDescriptor::new(agent_id, "Test Agent").with_command(["sh", "-c", script])
    }

    async fn next(sub: &mut Subscription) -> Arc<Event> {
        tokio::time::timeout(RECV_TIMEOUT, sub.recv())
            .await
            .expect("timed out waiting for event")
            .expect("subscription closed")
    }

    /// Receive events until a status event with `state`
    async fn until_status(sub: &mut Subscription, state: LifecycleStatus) -> Vec<Arc<Event>> {
        let mut events = Vec::new();
        loop {
            let event = next(sub).await;
            let done = event.state() == Some(state);
            events.push(event);
            if done {
                return events;
            }
        }
    }

    fn states(events: &[Arc<Event>]) -> Vec<LifecycleStatus> {
        events.iter().filter_map(|e| e.state()).collect()
    }

    async fn wait_absent(supervisor: &Supervisor, agent_id: &str) {
        tokio::time::timeout(RECV_TIMEOUT, supervisor.wait_for(agent_id))
            .await
            .expect("agent record was not removed");
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let temp = TempDir::new().unwrap();
        let supervisor = Supervisor::new(test_config(&temp));
        let mut sub = supervisor.subscribe("demo");

        let status = supervisor
            .start(&sh_agent("demo", "echo ready; exec sleep 30"))
            .await
            .unwrap();
        assert_eq!(status.state, RuntimeState::Running);
        assert!(status.pid.is_some());
        assert!(status.started_at.is_some());

        let started = until_status(&mut sub, LifecycleStatus::Running).await;
        assert_eq!(
            states(&started),
            vec![LifecycleStatus::Starting, LifecycleStatus::Running]
        );
        assert_eq!(started[1].payload["pid"], json!(status.pid));

        let ready = next(&mut sub).await;
        assert_eq!(ready.message.as_deref(), Some("ready"));

        assert_eq!(supervisor.list_running().await, vec!["demo"]);
        assert!(supervisor.is_running("demo").await);
        assert_eq!(supervisor.count().await, 1);

        supervisor.stop("demo").await.unwrap();
        let stopped = until_status(&mut sub, LifecycleStatus::Stopped).await;
        assert_eq!(
            states(&stopped),
            vec![
                LifecycleStatus::Stopping,
                LifecycleStatus::Crashed,
                LifecycleStatus::Stopped
            ]
        );

        assert!(!supervisor.is_running("demo").await);
        assert!(supervisor.list_running().await.is_empty());
        assert!(supervisor.status("demo").await.unwrap_err().is_not_running());
    }

    #[tokio::test]
    async fn test_hello_becomes_info_log() {
        let temp = TempDir::new().unwrap();
        let supervisor = Supervisor::new(test_config(&temp));
        let mut sub = supervisor.subscribe("demo");

        supervisor
            .start(&sh_agent("demo", "echo hello; echo failure >&2"))
            .await
            .unwrap();

        let events = until_status(&mut sub, LifecycleStatus::Completed).await;
        let logs: Vec<(LogLevel, &str)> = events
            .iter()
            .filter(|e| e.kind == EventKind::Log)
            .map(|e| (e.level.unwrap(), e.message.as_deref().unwrap()))
            .collect();

        assert!(logs.contains(&(LogLevel::Info, "hello")));
        assert!(logs.contains(&(LogLevel::Error, "failure")));
        assert_eq!(logs.iter().filter(|(_, m)| *m == "hello").count(), 1);
        wait_absent(&supervisor, "demo").await;
    }

    #[tokio::test]
    async fn test_crash_reports_and_cleans_up() {
        let temp = TempDir::new().unwrap();
        let supervisor = Supervisor::new(test_config(&temp));
        let mut sub = supervisor.subscribe("demo");

        supervisor.start(&sh_agent("demo", "exit 1")).await.unwrap();

        let events = until_status(&mut sub, LifecycleStatus::Crashed).await;
        let crashed = events.last().unwrap();
        assert_eq!(crashed.kind, EventKind::Status);
        assert_eq!(crashed.payload["exit_code"], 1);

        wait_absent(&supervisor, "demo").await;
        assert!(supervisor.status("demo").await.unwrap_err().is_not_running());
        assert!(supervisor.stop("demo").await.unwrap_err().is_not_running());
    }

    #[tokio::test]
    async fn test_start_twice_is_already_running() {
        let temp = TempDir::new().unwrap();
        let supervisor = Supervisor::new(test_config(&temp));
        let descriptor = sh_agent("demo", "exec sleep 30");

        supervisor.start(&descriptor).await.unwrap();
        let second = supervisor.start(&descriptor).await;
        assert!(matches!(second, Err(SupervisorError::AlreadyRunning(id)) if id == "demo"));

        // Identifiers are case-insensitive
        let upper = supervisor.start(&sh_agent("DEMO", "exec sleep 30")).await;
        assert!(matches!(upper, Err(SupervisorError::AlreadyRunning(_))));

        supervisor.stop("demo").await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_starts_exactly_one_wins() {
        let temp = TempDir::new().unwrap();
        let supervisor = Supervisor::new(test_config(&temp));
        let descriptor = sh_agent("race", "exec sleep 30");

        let attempts = (0..8).map(|_| {
            let supervisor = supervisor.clone();
            let descriptor = descriptor.clone();
            tokio::spawn(async move { supervisor.start(&descriptor).await })
        });
        let results = futures::future::join_all(attempts).await;

        let mut wins = 0;
        let mut rejected = 0;
        for result in results {
            match result.unwrap() {
                Ok(_) => wins += 1,
                Err(SupervisorError::AlreadyRunning(_)) => rejected += 1,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        assert_eq!(wins, 1);
        assert_eq!(rejected, 7);
        assert_eq!(supervisor.count().await, 1);

        supervisor.stop("race").await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_stops_single_cleanup() {
        let temp = TempDir::new().unwrap();
        let supervisor = Supervisor::new(test_config(&temp));
        let mut sub = supervisor.subscribe("demo");

        supervisor
            .start(&sh_agent("demo", "exec sleep 30"))
            .await
            .unwrap();
        until_status(&mut sub, LifecycleStatus::Running).await;

        let (first, second) = tokio::join!(supervisor.stop("demo"), supervisor.stop("demo"));
        let oks = [first.is_ok(), second.is_ok()].iter().filter(|ok| **ok).count();
        assert_eq!(oks, 1);
        assert!(first.err().or(second.err()).unwrap().is_not_running());

        let events = until_status(&mut sub, LifecycleStatus::Stopped).await;
        assert_eq!(
            states(&events)
                .iter()
                .filter(|s| **s == LifecycleStatus::Stopping)
                .count(),
            1
        );
        assert!(!supervisor.is_running("demo").await);
    }

    #[tokio::test]
    async fn test_stop_kills_process_ignoring_sigterm() {
        let temp = TempDir::new().unwrap();
        let config = test_config(&temp)
            .with_grace_period_ms(300)
            .with_drain_timeout_ms(100);
        let supervisor = Supervisor::new(config);
        let mut sub = supervisor.subscribe("stubborn");

        supervisor
            .start(&sh_agent(
                "stubborn",
                "trap '' TERM; echo trapped; while true; do sleep 0.1; done",
            ))
            .await
            .unwrap();
        assert_eq!(
            until_status(&mut sub, LifecycleStatus::Running).await.len(),
            2
        );
        assert_eq!(next(&mut sub).await.message.as_deref(), Some("trapped"));

        let begun = Instant::now();
        supervisor.stop("stubborn").await.unwrap();
        assert!(begun.elapsed() < Duration::from_secs(3));
        assert!(!supervisor.is_running("stubborn").await);

        let events = until_status(&mut sub, LifecycleStatus::Stopped).await;
        let stopped = events.last().unwrap();
        assert_eq!(stopped.payload["forced"], true);
        assert_eq!(
            states(&events)
                .iter()
                .filter(|s| s.is_exit())
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_stop_unknown_is_not_running() {
        let temp = TempDir::new().unwrap();
        let supervisor = Supervisor::new(test_config(&temp));
        let mut sub = supervisor.subscribe("demo");

        let result = supervisor.stop("demo").await;
        assert!(matches!(result, Err(SupervisorError::NotRunning(id)) if id == "demo"));

        assert!(sub.try_recv().is_none());
        assert_eq!(supervisor.registry().topic_count(), 1);
    }

    #[tokio::test]
    async fn test_restart_sequence() {
        let temp = TempDir::new().unwrap();
        let supervisor = Supervisor::new(test_config(&temp));
        let mut sub = supervisor.subscribe("demo");
        let descriptor = sh_agent("demo", "exec sleep 30");

        let first = supervisor.start(&descriptor).await.unwrap();
        until_status(&mut sub, LifecycleStatus::Running).await;

        let second = supervisor.restart(&descriptor).await.unwrap();
        assert_ne!(first.pid, second.pid);

        let events = until_status(&mut sub, LifecycleStatus::Running).await;
        assert_eq!(
            states(&events),
            vec![
                LifecycleStatus::Stopping,
                LifecycleStatus::Crashed,
                LifecycleStatus::Stopped,
                LifecycleStatus::Starting,
                LifecycleStatus::Running,
            ]
        );

        supervisor.stop("demo").await.unwrap();
    }

    #[tokio::test]
    async fn test_restart_when_not_running_starts() {
        let temp = TempDir::new().unwrap();
        let supervisor = Supervisor::new(test_config(&temp));

        let status = supervisor
            .restart(&sh_agent("fresh", "exec sleep 30"))
            .await
            .unwrap();
        assert_eq!(status.state, RuntimeState::Running);

        supervisor.stop("fresh").await.unwrap();
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let temp = TempDir::new().unwrap();
        let supervisor = Supervisor::new(test_config(&temp));
        let mut sub = supervisor.subscribe("broken");

        let result = supervisor
            .start(&AgentDescriptor::new("broken", "Broken").with_command(["/no/such/binary"]))
            .await;
        assert!(matches!(result, Err(SupervisorError::SpawnFailure { .. })));
        assert!(!supervisor.is_running("broken").await);

        let starting = next(&mut sub).await;
        assert_eq!(starting.state(), Some(LifecycleStatus::Starting));
        let error = next(&mut sub).await;
        assert_eq!(error.level, Some(LogLevel::Error));
        assert!(sub.try_recv().is_none());

        // The identifier is free again
        supervisor
            .start(&sh_agent("broken", "exec sleep 30"))
            .await
            .unwrap();
        supervisor.stop("broken").await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_descriptor() {
        let temp = TempDir::new().unwrap();
        let supervisor = Supervisor::new(test_config(&temp));

        let result = supervisor.start(&sh_agent("../escape", "true")).await;
        assert!(matches!(result, Err(SupervisorError::InvalidDescriptor(_))));
        assert_eq!(supervisor.count().await, 0);
    }

    #[tokio::test]
    async fn test_capacity_limit() {
        let temp = TempDir::new().unwrap();
        let supervisor = Supervisor::new(test_config(&temp).with_max_concurrent_agents(1));

        supervisor.start(&sh_agent("a", "exec sleep 30")).await.unwrap();
        let result = supervisor.start(&sh_agent("b", "exec sleep 30")).await;
        assert!(matches!(result, Err(SupervisorError::CapacityExceeded(1))));

        supervisor.stop("a").await.unwrap();
        supervisor.start(&sh_agent("b", "exec sleep 30")).await.unwrap();
        supervisor.stop("b").await.unwrap();
    }

    #[tokio::test]
    async fn test_environment_and_workspace() {
        let temp = TempDir::new().unwrap();
        let supervisor = Supervisor::new(test_config(&temp));
        let mut sub = supervisor.subscribe("envy");

        let descriptor = sh_agent("envy", "echo \"$AGENT_ID $AGENT_NAME\"; pwd")
            .with_api_key("openai", "sk-test");
        supervisor.start(&descriptor).await.unwrap();

        let events = until_status(&mut sub, LifecycleStatus::Completed).await;
        let lines: Vec<&str> = events
            .iter()
            .filter_map(|e| e.message.as_deref())
            .collect();

        assert_eq!(lines[0], "envy Test Agent");
        let workspace = supervisor.workspaces().workspace_dir("envy");
        let reported = std::fs::canonicalize(lines[1]).unwrap();
        assert_eq!(reported, std::fs::canonicalize(workspace).unwrap());
    }

    #[tokio::test]
    async fn test_status_of_running_agent() {
        let temp = TempDir::new().unwrap();
        let supervisor = Supervisor::new(test_config(&temp));
        supervisor
            .start(&sh_agent("demo", "exec sleep 30"))
            .await
            .unwrap();

        let status = supervisor.status("demo").await.unwrap();
        assert_eq!(status.agent_id, "demo");
        assert_eq!(status.state, RuntimeState::Running);
        assert!(status.uptime_seconds.unwrap() >= 0);
        #[cfg(target_os = "linux")]
        assert!(status.memory_usage_mb.is_some());

        supervisor.stop("demo").await.unwrap();
    }

    #[tokio::test]
    async fn test_owner_forwarding() {
        let temp = TempDir::new().unwrap();
        let supervisor = Supervisor::new(test_config(&temp).with_forward_to_owner(true));
        let mut owner = supervisor.registry().subscribe(Topic::user("u1"));

        supervisor
            .start(&sh_agent("owned", "echo hi").with_owner("u1"))
            .await
            .unwrap();

        let events = until_status(&mut owner, LifecycleStatus::Completed).await;
        assert!(events.iter().all(|e| e.topic == Topic::user("u1")));
        assert!(events.iter().any(|e| e.message.as_deref() == Some("hi")));
    }

    #[tokio::test]
    async fn test_no_forwarding_when_disabled() {
        let temp = TempDir::new().unwrap();
        let supervisor = Supervisor::new(test_config(&temp));
        let mut owner = supervisor.registry().subscribe(Topic::user("u1"));
        let mut agent = supervisor.subscribe("owned");

        supervisor
            .start(&sh_agent("owned", "echo hi").with_owner("u1"))
            .await
            .unwrap();
        until_status(&mut agent, LifecycleStatus::Completed).await;

        assert!(owner.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_publish_chat() {
        let temp = TempDir::new().unwrap();
        let supervisor = Supervisor::new(test_config(&temp));
        assert!(supervisor
            .publish_chat("demo", json!({"text": "hi"}))
            .await
            .unwrap_err()
            .is_not_running());

        supervisor
            .start(&sh_agent("demo", "exec sleep 30"))
            .await
            .unwrap();
        let mut sub = supervisor.subscribe("demo");
        assert_eq!(
            supervisor
                .publish_chat("demo", json!({"text": "hi"}))
                .await
                .unwrap(),
            1
        );
        let chat = next(&mut sub).await;
        assert_eq!(chat.kind, EventKind::Chat);
        assert_eq!(chat.payload["text"], "hi");

        supervisor.stop("demo").await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_shutdown_stops_everything() {
        let temp = TempDir::new().unwrap();
        let supervisor = Supervisor::new(test_config(&temp));
        let mut sub = supervisor.subscribe("one");

        for id in ["one", "two", "three"] {
            supervisor.start(&sh_agent(id, "exec sleep 30")).await.unwrap();
        }
        assert_eq!(supervisor.count().await, 3);

        supervisor.shutdown().await;

        assert_eq!(supervisor.count().await, 0);
        assert!(supervisor.is_shutting_down());
        assert!(supervisor.registry().is_shut_down());

        let result = supervisor.start(&sh_agent("late", "true")).await;
        assert!(matches!(result, Err(SupervisorError::ShuttingDown)));

        // Queued events drain, then the subscription ends
        let mut saw_stopped = false;
        while let Ok(Some(event)) = tokio::time::timeout(RECV_TIMEOUT, sub.recv()).await {
            saw_stopped |= event.state() == Some(LifecycleStatus::Stopped);
        }
        assert!(saw_stopped);
    }

    #[tokio::test]
    async fn test_default_command_runs_bundled_runtime() {
        let temp = TempDir::new().unwrap();
        let supervisor = Supervisor::new(test_config(&temp));
        let mut sub = supervisor.subscribe("plain");

        let descriptor = AgentDescriptor::new("plain", "Plain");
        assert!(descriptor.command.is_none());
        supervisor.start(&descriptor).await.unwrap();

        until_status(&mut sub, LifecycleStatus::Running).await;
        let started = next(&mut sub).await;
        assert_eq!(started.message.as_deref(), Some("Agent plain started"));
        let script = supervisor
            .workspaces()
            .workspace_dir("plain")
            .join(crate::runtime::DEFAULT_RUNTIME_SCRIPT);
        assert!(script.is_file());

        supervisor.stop("plain").await.unwrap();
        let events = until_status(&mut sub, LifecycleStatus::Stopped).await;
        assert_eq!(
            states(&events),
            vec![
                LifecycleStatus::Stopping,
                LifecycleStatus::Completed,
                LifecycleStatus::Stopped
            ]
        );
        assert!(events
            .iter()
            .any(|e| e.message.as_deref() == Some("Agent plain stopping")));
        assert_eq!(events.last().unwrap().payload["forced"], false);
    }

    #[test]
    fn test_debug_format() {
        let temp = TempDir::new().unwrap();
        let supervisor = Supervisor::new(test_config(&temp));
        let debug = format!("{:?}", supervisor);
        assert!(debug.starts_with("Supervisor"));
        assert!(debug.contains("workspaces"));
        assert!(debug.contains("shutting_down: false"));
    }

    #[tokio::test]
    async fn test_start_after_natural_exit() {
        let temp = TempDir::new().unwrap();
        let supervisor = Supervisor::new(test_config(&temp));
        let mut sub = supervisor.subscribe("short");
        let descriptor = sh_agent("short", "exit 0");

        supervisor.start(&descriptor).await.unwrap();
        until_status(&mut sub, LifecycleStatus::Completed).await;
        wait_absent(&supervisor, "short").await;

        supervisor.start(&descriptor).await.unwrap();
        let events = until_status(&mut sub, LifecycleStatus::Completed).await;
        assert_eq!(
            states(&events),
            vec![
                LifecycleStatus::Starting,
                LifecycleStatus::Running,
                LifecycleStatus::Completed
            ]
        );
    }
}
