//! Supervisor error types

use thiserror::Error;

/// Errors returned by supervisor and registry operations
#[derive(Error, Debug)]
pub enum SupervisorError {
    /// A runtime record already exists for this agent
    #[error("Agent already running: {0}")]
    AlreadyRunning(String),

    /// No runtime record exists for this agent
    #[error("Agent not running: {0}")]
    NotRunning(String),

    /// The agent process could not be created
    #[error("Failed to spawn agent {agent_id}: {source}")]
    SpawnFailure {
        /// Agent that failed to start
        agent_id: String,
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },

    /// The process did not exit within the grace period
    ///
    /// `Stop` handles this by force-killing; it is never returned from `Stop`.
    #[error("Agent {0} did not exit within the grace period")]
    TerminationTimeout(String),

    /// Descriptor failed validation
    #[error("Invalid agent descriptor: {0}")]
    InvalidDescriptor(String),

    /// The configured concurrent agent limit is reached
    #[error("Concurrent agent limit reached ({0})")]
    CapacityExceeded(usize),

    /// The supervisor is shutting down and accepts no new agents
    #[error("Supervisor is shutting down")]
    ShuttingDown,

    /// Topic string could not be parsed
    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl SupervisorError {
    /// Wrap an OS error raised while spawning an agent
    pub fn spawn_failure(agent_id: impl Into<String>, source: std::io::Error) -> Self {
        SupervisorError::SpawnFailure {
            agent_id: agent_id.into(),
            source,
        }
    }

    /// Whether this error means the agent had no runtime record
    pub fn is_not_running(&self) -> bool {
        matches!(self, SupervisorError::NotRunning(_))
    }
}

/// Result type alias for supervisor operations
pub type SupervisorResult<T> = Result<T, SupervisorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SupervisorError::AlreadyRunning("demo".into());
        assert_eq!(err.to_string(), "Agent already running: demo");

        let err = SupervisorError::NotRunning("demo".into());
        assert_eq!(err.to_string(), "Agent not running: demo");

        let err = SupervisorError::ShuttingDown;
        assert_eq!(err.to_string(), "Supervisor is shutting down");
    }

    #[test]
    fn test_spawn_failure_keeps_source() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "no such program");
        let err = SupervisorError::spawn_failure("demo", io_err);
        assert!(err.to_string().contains("no such program"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: SupervisorError = io_err.into();
        assert!(matches!(err, SupervisorError::Io(_)));
        assert!(!err.is_not_running());
    }
}
