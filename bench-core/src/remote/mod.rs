//! Remote process abstraction.
//!
//! Orchestration talks to the two remote machines only through the
//! [`RemoteExecutor`] seam, so the transport (ssh, vagrant, a test double)
//! can be swapped without touching the runner.
//!
//! # Design
//!
//! - `launch()` starts a long-running command and returns a [`RemoteProcess`] handle
//! - `poll()` is non-blocking and never fails
//! - `wait_with_timeout()` blocks up to a deadline and yields captured output
//! - `terminate()` is idempotent and only stops the local supervising connection
//! - `run()` executes a short command to completion (reaping, connection checks)
//!
//! A handle moves from `Running` to a terminal state exactly once and is never
//! reused for another attempt.

mod mock;
mod ssh;

pub use mock::{LaunchRecord, MockBehavior, MockExecutor};
pub use ssh::SshExecutor;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::LaunchError;

/// Exit code reported when the target cannot be reached or the local wait fails.
///
/// Matches the status the `ssh` client itself uses for connection failures.
pub const UNREACHABLE_EXIT_CODE: i32 = 255;

/// Exit code reported for a handle we terminated ourselves.
pub const KILLED_EXIT_CODE: i32 = -1;

/// A named remote machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTarget {
    /// Logical name; also the vagrant machine name.
    pub name: String,
    /// Host name or IP for ssh (default: `name`, resolved through ssh config).
    #[serde(default)]
    pub host: Option<String>,
    /// SSH user name.
    #[serde(default)]
    pub user: Option<String>,
}

impl RemoteTarget {
    /// Target reached by its name alone.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: None,
            user: None,
        }
    }

    /// `user@host`, `host` or `name`, in that order of preference.
    pub fn ssh_destination(&self) -> String {
        let host = self.host.as_deref().unwrap_or(&self.name);
        match &self.user {
            Some(user) => format!("{}@{}", user, host),
            None => host.to_string(),
        }
    }
}

impl fmt::Display for RemoteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Non-blocking status of a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Still running.
    Running,
    /// Exited with the given code.
    Exited(i32),
}

/// Local lifecycle state of a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Supervising connection alive.
    Running,
    /// Exited on its own with the given code.
    Exited(i32),
    /// Terminated by us.
    Killed,
}

impl ProcessState {
    /// True for `Exited` and `Killed`.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProcessState::Running)
    }

    /// The status `poll()` reports for this state.
    pub fn status(&self) -> ProcessStatus {
        match self {
            ProcessState::Running => ProcessStatus::Running,
            ProcessState::Exited(code) => ProcessStatus::Exited(*code),
            ProcessState::Killed => ProcessStatus::Exited(KILLED_EXIT_CODE),
        }
    }
}

/// Terminal status and captured streams of a handle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code.
    pub exit_code: i32,
    /// Captured standard output.
    pub stdout: Vec<u8>,
    /// Captured standard error.
    pub stderr: Vec<u8>,
}

/// Result of [`RemoteProcess::wait_with_timeout`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The handle had not exited when the timeout elapsed.
    TimedOut,
    /// The handle reached a terminal state.
    Exited(ProcessOutput),
}

/// Result of a command run to completion with [`RemoteExecutor::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
    /// Exit code (0 = success).
    pub exit_code: i32,
}

impl CommandOutput {
    /// Returns true if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Handle to one command running on a remote target.
#[async_trait]
pub trait RemoteProcess: Send {
    /// Name of the target the command runs on.
    fn target(&self) -> &str;

    /// The command as launched.
    fn command(&self) -> &str;

    /// Current local state.
    fn state(&self) -> ProcessState;

    /// Non-blocking status check.
    ///
    /// An unreachable target is reported as `Exited(UNREACHABLE_EXIT_CODE)`.
    fn poll(&mut self) -> ProcessStatus;

    /// Stop the local supervising connection. Idempotent.
    ///
    /// The remote-side process may survive; see [`crate::reaper`].
    async fn terminate(&mut self);

    /// Block up to `timeout` for the handle to exit.
    async fn wait_with_timeout(&mut self, timeout: Duration) -> WaitOutcome;
}

/// Transport that starts commands on remote targets.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Start `command` on `target` and return a live handle.
    async fn launch(
        &self,
        target: &RemoteTarget,
        command: &str,
    ) -> Result<Box<dyn RemoteProcess>, LaunchError>;

    /// Run `command` on `target` to completion.
    ///
    /// Does NOT fail on non-zero exit; inspect [`CommandOutput::exit_code`].
    async fn run(&self, target: &RemoteTarget, command: &str)
        -> Result<CommandOutput, LaunchError>;
}
