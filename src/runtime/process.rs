//! Agent child processes
//!
//! `spawn_agent` creates the OS process. The `Child` itself is owned by the
//! monitor task; the supervisor keeps a [`ProcessHandle`] that can request
//! termination and observe the exit without touching the `Child`.

use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;

use crate::core::{LifecycleStatus, SupervisorError, SupervisorResult};

use super::environment::AgentEnvironment;

/// Capacity of the control channel between handle and monitor
const CONTROL_CHANNEL_SIZE: usize = 4;

/// Termination requests forwarded to the monitor, which owns the `Child`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProcessSignal {
    /// Graceful termination (SIGTERM on unix)
    Terminate,
    /// Immediate kill (SIGKILL on unix)
    Kill,
}

/// How a process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitOutcome {
    /// Exit code, if the process exited normally
    pub code: Option<i32>,
    /// Terminating signal, if the process was killed by one
    pub signal: Option<i32>,
}

impl ExitOutcome {
    pub(crate) fn from_status(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }

    /// Exit that could not be observed (wait failed)
    pub(crate) fn unknown() -> Self {
        Self {
            code: None,
            signal: None,
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// `completed` for exit code zero, `crashed` otherwise
    pub fn status(&self) -> LifecycleStatus {
        LifecycleStatus::from_exit_code(self.code)
    }
}

/// Spawn an agent process with piped output
pub(crate) fn spawn_agent(
    agent_id: &str,
    command: &[String],
    workspace: &Path,
    env: &AgentEnvironment,
) -> SupervisorResult<Child> {
    let (program, args) = command.split_first().ok_or_else(|| {
        SupervisorError::spawn_failure(
            agent_id,
            io::Error::new(io::ErrorKind::InvalidInput, "empty agent command"),
        )
    })?;

    tracing::info!(
        agent_id,
        program = %program,
        workspace = %workspace.display(),
        "Spawning agent process"
    );

    Command::new(program)
        .args(args)
        .current_dir(workspace)
        .envs(env.iter())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| SupervisorError::spawn_failure(agent_id, e))
}

/// Deliver a termination request to a child the caller owns
pub(crate) fn signal_child(child: &mut Child, signal: ProcessSignal) -> io::Result<()> {
    match signal {
        ProcessSignal::Kill => child.start_kill(),
        ProcessSignal::Terminate => terminate_child(child),
    }
}

#[cfg(unix)]
fn terminate_child(child: &mut Child) -> io::Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    // `id()` is None once the child has been reaped, so a recycled pid is never signalled
    let Some(pid) = child.id() else {
        return Ok(());
    };
    let pid = i32::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    kill(Pid::from_raw(pid), Signal::SIGTERM).map_err(io::Error::from)
}

#[cfg(not(unix))]
fn terminate_child(child: &mut Child) -> io::Result<()> {
    child.start_kill()
}

/// Supervisor-side handle on a running agent process
pub struct ProcessHandle {
    pid: Option<u32>,
    control: mpsc::Sender<ProcessSignal>,
    exit: watch::Receiver<Option<ExitOutcome>>,
}

impl ProcessHandle {
    /// Create a handle plus the monitor's halves of its channels
    pub(crate) fn channel(
        pid: Option<u32>,
    ) -> (
        Self,
        mpsc::Receiver<ProcessSignal>,
        watch::Sender<Option<ExitOutcome>>,
    ) {
        let (control, control_rx) = mpsc::channel(CONTROL_CHANNEL_SIZE);
        let (exit_tx, exit) = watch::channel(None);
        (Self { pid, control, exit }, control_rx, exit_tx)
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Exit outcome, if the process has already exited
    pub fn exit_outcome(&self) -> Option<ExitOutcome> {
        *self.exit.borrow()
    }

    /// Wait until the process exits
    ///
    /// Returns `None` if the monitor went away without observing an exit.
    pub async fn wait_exit(&self) -> Option<ExitOutcome> {
        let mut exit = self.exit.clone();
        let outcome = exit.wait_for(|outcome| outcome.is_some()).await.ok()?;
        *outcome
    }

    /// Request graceful termination and wait up to `grace` for the exit
    pub(crate) async fn terminate(
        &self,
        agent_id: &str,
        grace: Duration,
    ) -> SupervisorResult<Option<ExitOutcome>> {
        if let Some(outcome) = self.exit_outcome() {
            return Ok(Some(outcome));
        }
        if self.control.send(ProcessSignal::Terminate).await.is_err() {
            return Ok(self.exit_outcome());
        }
        timeout(grace, self.wait_exit())
            .await
            .map_err(|_| SupervisorError::TerminationTimeout(agent_id.to_string()))
    }

    /// Force-kill and wait up to `limit` for the exit
    pub(crate) async fn kill(&self, limit: Duration) -> Option<ExitOutcome> {
        if let Some(outcome) = self.exit_outcome() {
            return Some(outcome);
        }
        if self.control.send(ProcessSignal::Kill).await.is_err() {
            return self.exit_outcome();
        }
        timeout(limit, self.wait_exit()).await.ok().flatten()
    }
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.pid)
            .field("exit", &self.exit_outcome())
            .finish()
    }
}
