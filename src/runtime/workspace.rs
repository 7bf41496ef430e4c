//! Agent workspace layout
//!
//! Each agent runs in its own directory under `<agents_dir>/workspaces/`.
//! Descriptors without their own command run the bundled shell runtime,
//! which is written into the workspace on every launch.

use std::path::{Path, PathBuf};

use crate::core::SupervisorResult;

/// File name of the bundled runtime inside a workspace
pub const DEFAULT_RUNTIME_SCRIPT: &str = "agent_runtime.sh";

const DEFAULT_RUNTIME_SOURCE: &str = include_str!("agent_runtime.sh");

/// Locates and creates per-agent working directories
#[derive(Debug, Clone)]
pub struct WorkspaceLayout {
    base_dir: PathBuf,
}

impl WorkspaceLayout {
    /// Layout rooted at `base_dir` (the `workspaces` directory itself)
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Directory for an agent
    ///
    /// Callers pass validated identifiers, so the id is a single path segment.
    pub fn workspace_dir(&self, agent_id: &str) -> PathBuf {
        self.base_dir.join(agent_id)
    }

    /// Create the agent's directory if it doesn't exist
    pub async fn ensure(&self, agent_id: &str) -> SupervisorResult<PathBuf> {
        let dir = self.workspace_dir(agent_id);
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// Write the bundled runtime into `workspace`, replacing any older copy
    pub async fn install_runtime(&self, workspace: &Path) -> SupervisorResult<PathBuf> {
        let script = workspace.join(DEFAULT_RUNTIME_SCRIPT);
        tokio::fs::write(&script, DEFAULT_RUNTIME_SOURCE).await?;
        tracing::debug!(path = %script.display(), "Installed default agent runtime");
        Ok(script)
    }
}
