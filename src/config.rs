//! Supervisor Configuration
//!
//! Use the builder pattern or load from a JSON file, then apply environment
//! overrides:
//!
//! ```ignore
//! let config = SupervisorConfig::from_file("supervisor.json")?
//!     .apply_env()
//!     .with_grace_period_ms(5_000)
//!     .with_max_concurrent_agents(5);
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::SupervisorResult;
use crate::events::DEFAULT_QUEUE_CAPACITY;
use crate::runtime::DEFAULT_RUNTIME_SCRIPT;

/// Configuration for a [`Supervisor`](crate::runtime::Supervisor)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Root directory; agent workspaces live in `<agents_dir>/workspaces/<agent_id>`
    pub agents_dir: PathBuf,

    /// Program and arguments launched for descriptors without their own command
    ///
    /// The default runs the bundled runtime that the supervisor writes into
    /// each workspace as `agent_runtime.sh`.
    pub agent_command: Vec<String>,

    /// Time allowed between SIGTERM and force-kill
    pub grace_period_ms: u64,

    /// Pause between stop and start during a restart
    pub restart_pause_ms: u64,

    /// How long the monitor keeps draining output after the process exits
    pub drain_timeout_ms: u64,

    /// Capacity of each subscriber queue
    pub subscriber_queue_capacity: usize,

    /// Optional limit on simultaneously running agents
    pub max_concurrent_agents: Option<usize>,

    /// Base URL exported to agents as `API_BASE_URL`
    pub api_base_url: String,

    /// Also publish agent events to `user:<owner_id>`
    pub forward_to_owner: bool,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            agents_dir: PathBuf::from("./agents"),
            agent_command: vec!["sh".to_string(), DEFAULT_RUNTIME_SCRIPT.to_string()],
            grace_period_ms: 10_000,
            restart_pause_ms: 1_000,
            drain_timeout_ms: 500,
            subscriber_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_concurrent_agents: None,
            api_base_url: "http://localhost:5000/api".to_string(),
            forward_to_owner: false,
        }
    }
}

impl SupervisorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a JSON file; missing fields take their defaults
    pub fn from_file(path: impl AsRef<Path>) -> SupervisorResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Defaults overridden by the process environment
    pub fn from_env() -> Self {
        Self::default().apply_env()
    }

    /// Override fields from environment variables
    ///
    /// Recognised: `AGENTS_DIR`, `AGENT_COMMAND` (whitespace separated),
    /// `AGENT_GRACE_PERIOD_MS`, `AGENT_RESTART_PAUSE_MS`, `MAX_CONCURRENT_AGENTS`,
    /// `API_BASE_URL`, `AGENT_FORWARD_TO_OWNER`. Unparseable values are ignored.
    pub fn apply_env(self) -> Self {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    fn apply_vars(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(dir) = var("AGENTS_DIR") {
            self.agents_dir = PathBuf::from(dir);
        }
        if let Some(command) = var("AGENT_COMMAND") {
            let parts: Vec<String> = command.split_whitespace().map(String::from).collect();
            if !parts.is_empty() {
                self.agent_command = parts;
            }
        }
        if let Some(ms) = parse_var(&var, "AGENT_GRACE_PERIOD_MS") {
            self.grace_period_ms = ms;
        }
        if let Some(ms) = parse_var(&var, "AGENT_RESTART_PAUSE_MS") {
            self.restart_pause_ms = ms;
        }
        if let Some(max) = parse_var(&var, "MAX_CONCURRENT_AGENTS") {
            self.max_concurrent_agents = Some(max);
        }
        if let Some(url) = var("API_BASE_URL") {
            self.api_base_url = url;
        }
        if let Some(forward) = parse_var(&var, "AGENT_FORWARD_TO_OWNER") {
            self.forward_to_owner = forward;
        }
        self
    }

    pub fn with_agents_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.agents_dir = dir.into();
        self
    }

    pub fn with_agent_command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.agent_command = command.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_grace_period_ms(mut self, ms: u64) -> Self {
        self.grace_period_ms = ms;
        self
    }

    pub fn with_restart_pause_ms(mut self, ms: u64) -> Self {
        self.restart_pause_ms = ms;
        self
    }

    pub fn with_drain_timeout_ms(mut self, ms: u64) -> Self {
        self.drain_timeout_ms = ms;
        self
    }

    pub fn with_subscriber_queue_capacity(mut self, capacity: usize) -> Self {
        self.subscriber_queue_capacity = capacity;
        self
    }

    pub fn with_max_concurrent_agents(mut self, max: usize) -> Self {
        self.max_concurrent_agents = Some(max);
        self
    }

    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    pub fn with_forward_to_owner(mut self, forward: bool) -> Self {
        self.forward_to_owner = forward;
        self
    }

    /// Directory holding per-agent workspaces
    pub fn workspaces_dir(&self) -> PathBuf {
        self.agents_dir.join("workspaces")
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn restart_pause(&self) -> Duration {
        Duration::from_millis(self.restart_pause_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

fn parse_var<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = var(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring unparseable environment override");
            None
        }
    }
}
