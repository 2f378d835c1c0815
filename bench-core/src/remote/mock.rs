//! Mock executor for testing.
//!
//! Scripts per-target process behaviour and captures every launch and every
//! short command for verification. Remote processes are modelled separately
//! from local handles: terminating a handle leaves its remote process alive
//! until it exits on its own or is reaped, which is exactly the orphan case
//! the reaper exists for.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::{
    CommandOutput, ProcessOutput, ProcessState, ProcessStatus, RemoteExecutor, RemoteProcess,
    RemoteTarget, WaitOutcome, KILLED_EXIT_CODE,
};
use crate::error::LaunchError;
use crate::reaper;

/// Exit code a handle reports when its remote process was reaped under it.
const REAPED_EXIT_CODE: i32 = 143;

/// Scripted behaviour of one launched process.
#[derive(Debug, Clone)]
pub struct MockBehavior {
    /// Fail the launch with this message.
    pub launch_error: Option<String>,
    /// Exit code once the process exits.
    pub exit_code: i32,
    /// Time from launch to exit; `None` runs until terminated or reaped.
    pub exit_after: Option<Duration>,
    /// Captured standard output.
    pub stdout: Vec<u8>,
    /// Captured standard error.
    pub stderr: Vec<u8>,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            launch_error: None,
            exit_code: 0,
            exit_after: Some(Duration::ZERO),
            stdout: Vec::new(),
            stderr: Vec::new(),
        }
    }
}

impl MockBehavior {
    /// Exit with `code` after `after`.
    pub fn exits(code: i32, after: Duration) -> Self {
        Self {
            exit_code: code,
            exit_after: Some(after),
            ..Default::default()
        }
    }

    /// Exit 0 after `after`.
    pub fn succeeds_after(after: Duration) -> Self {
        Self::exits(0, after)
    }

    /// Never exit on its own.
    pub fn hangs() -> Self {
        Self {
            exit_after: None,
            ..Default::default()
        }
    }

    /// Fail at launch with the given message.
    pub fn fails_to_launch(error: &str) -> Self {
        Self {
            launch_error: Some(error.to_string()),
            ..Default::default()
        }
    }

    /// Set the captured standard output.
    pub fn with_stdout(mut self, stdout: &[u8]) -> Self {
        self.stdout = stdout.to_vec();
        self
    }
}

/// One call to [`RemoteExecutor::launch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRecord {
    /// Target name.
    pub target: String,
    /// Command as launched.
    pub command: String,
    /// Whether the launch succeeded.
    pub launched: bool,
}

#[derive(Debug)]
struct MockRemote {
    target: String,
    command: String,
    started: Instant,
    behavior: MockBehavior,
    reaped: bool,
}

impl MockRemote {
    fn exited(&self) -> bool {
        self.behavior
            .exit_after
            .is_some_and(|after| self.started.elapsed() >= after)
    }

    fn alive(&self) -> bool {
        !self.reaped && !self.exited()
    }
}

#[derive(Debug, Default)]
struct MockExecutorInner {
    scripts: HashMap<String, VecDeque<MockBehavior>>,
    defaults: HashMap<String, MockBehavior>,
    remotes: Vec<MockRemote>,
    launches: Vec<LaunchRecord>,
    runs: Vec<(String, String)>,
    fail_next_run: HashMap<String, String>,
    terminations: usize,
}

/// Mock executor for testing.
///
/// Clones share state, so a test can keep one clone for assertions while the
/// runner owns another.
#[derive(Debug, Default, Clone)]
pub struct MockExecutor {
    inner: Arc<Mutex<MockExecutorInner>>,
}

impl MockExecutor {
    /// Create a new mock executor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue behaviours for successive launches on `target`.
    pub fn script(&self, target: &str, behaviors: Vec<MockBehavior>) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .scripts
            .entry(target.to_string())
            .or_default()
            .extend(behaviors);
    }

    /// Behaviour for launches on `target` once its script is exhausted.
    pub fn set_default(&self, target: &str, behavior: MockBehavior) {
        let mut inner = self.inner.lock().unwrap();
        inner.defaults.insert(target.to_string(), behavior);
    }

    /// Cause the next `run()` on `target` to fail with the given error.
    pub fn fail_next_run(&self, target: &str, error: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .fail_next_run
            .insert(target.to_string(), error.to_string());
    }

    /// Every launch, in call order.
    pub fn launches(&self) -> Vec<LaunchRecord> {
        let inner = self.inner.lock().unwrap();
        inner.launches.clone()
    }

    /// Launches on one target, in call order.
    pub fn launches_on(&self, target: &str) -> Vec<LaunchRecord> {
        self.launches()
            .into_iter()
            .filter(|l| l.target == target)
            .collect()
    }

    /// Every `run()` command as `(target, command)`, in call order.
    pub fn run_commands(&self) -> Vec<(String, String)> {
        let inner = self.inner.lock().unwrap();
        inner.runs.clone()
    }

    /// Number of reap commands issued for `identifier` on `target`.
    pub fn reap_count(&self, target: &str, identifier: &str) -> usize {
        self.run_commands()
            .iter()
            .filter(|(t, cmd)| {
                t == target && reaper::identifier_in(cmd).as_deref() == Some(identifier)
            })
            .count()
    }

    /// Commands whose remote process is still running on `target`.
    pub fn alive_on(&self, target: &str) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner
            .remotes
            .iter()
            .filter(|r| r.target == target && r.alive())
            .map(|r| r.command.clone())
            .collect()
    }

    /// Number of handles terminated while still running.
    pub fn terminations(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.terminations
    }
}

#[async_trait]
impl RemoteExecutor for MockExecutor {
    async fn launch(
        &self,
        target: &RemoteTarget,
        command: &str,
    ) -> Result<Box<dyn RemoteProcess>, LaunchError> {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;

        let behavior = inner
            .scripts
            .get_mut(&target.name)
            .and_then(|queue| queue.pop_front())
            .or_else(|| inner.defaults.get(&target.name).cloned())
            .unwrap_or_default();

        if let Some(error) = behavior.launch_error.clone() {
            inner.launches.push(LaunchRecord {
                target: target.name.clone(),
                command: command.to_string(),
                launched: false,
            });
            return Err(LaunchError::Rejected {
                target: target.name.clone(),
                reason: error,
            });
        }

        inner.launches.push(LaunchRecord {
            target: target.name.clone(),
            command: command.to_string(),
            launched: true,
        });
        inner.remotes.push(MockRemote {
            target: target.name.clone(),
            command: command.to_string(),
            started: Instant::now(),
            behavior,
            reaped: false,
        });
        let index = inner.remotes.len() - 1;

        Ok(Box::new(MockProcess {
            inner: Arc::clone(&self.inner),
            index,
            target: target.name.clone(),
            command: command.to_string(),
            state: ProcessState::Running,
        }))
    }

    async fn run(
        &self,
        target: &RemoteTarget,
        command: &str,
    ) -> Result<CommandOutput, LaunchError> {
        let mut inner = self.inner.lock().unwrap();
        inner.runs.push((target.name.clone(), command.to_string()));

        if let Some(error) = inner.fail_next_run.remove(&target.name) {
            return Err(LaunchError::Rejected {
                target: target.name.clone(),
                reason: error,
            });
        }

        if let Some(identifier) = reaper::identifier_in(command) {
            for remote in inner
                .remotes
                .iter_mut()
                .filter(|r| r.target == target.name && r.alive())
            {
                if remote.command.contains(&identifier) {
                    remote.reaped = true;
                }
            }
        }

        Ok(CommandOutput {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: 0,
        })
    }
}

struct MockProcess {
    inner: Arc<Mutex<MockExecutorInner>>,
    index: usize,
    target: String,
    command: String,
    state: ProcessState,
}

impl MockProcess {
    /// Time until the scripted exit, `None` if it never exits on its own.
    fn remaining(&self) -> Option<Duration> {
        let inner = self.inner.lock().unwrap();
        let remote = &inner.remotes[self.index];
        remote
            .behavior
            .exit_after
            .map(|after| after.saturating_sub(remote.started.elapsed()))
    }

    fn output(&self) -> ProcessOutput {
        let inner = self.inner.lock().unwrap();
        let remote = &inner.remotes[self.index];
        match self.state {
            ProcessState::Exited(code) if code == remote.behavior.exit_code && remote.exited() => {
                ProcessOutput {
                    exit_code: code,
                    stdout: remote.behavior.stdout.clone(),
                    stderr: remote.behavior.stderr.clone(),
                }
            }
            ProcessState::Exited(code) => ProcessOutput {
                exit_code: code,
                ..Default::default()
            },
            ProcessState::Killed | ProcessState::Running => ProcessOutput {
                exit_code: KILLED_EXIT_CODE,
                ..Default::default()
            },
        }
    }
}

#[async_trait]
impl RemoteProcess for MockProcess {
    fn target(&self) -> &str {
        &self.target
    }

    fn command(&self) -> &str {
        &self.command
    }

    fn state(&self) -> ProcessState {
        self.state
    }

    fn poll(&mut self) -> ProcessStatus {
        if self.state.is_terminal() {
            return self.state.status();
        }
        let inner = self.inner.lock().unwrap();
        let remote = &inner.remotes[self.index];
        if remote.exited() {
            self.state = ProcessState::Exited(remote.behavior.exit_code);
        } else if remote.reaped {
            self.state = ProcessState::Exited(REAPED_EXIT_CODE);
        }
        self.state.status()
    }

    async fn terminate(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        self.state = ProcessState::Killed;
        let mut inner = self.inner.lock().unwrap();
        inner.terminations += 1;
    }

    async fn wait_with_timeout(&mut self, timeout: Duration) -> WaitOutcome {
        if self.poll() == ProcessStatus::Running {
            match self.remaining() {
                Some(remaining) if remaining <= timeout => tokio::time::sleep(remaining).await,
                _ => tokio::time::sleep(timeout).await,
            }
            if self.poll() == ProcessStatus::Running {
                return WaitOutcome::TimedOut;
            }
        }
        WaitOutcome::Exited(self.output())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_scripted_exit() {
        let mock = MockExecutor::new();
        mock.script(
            "server",
            vec![MockBehavior::exits(3, Duration::from_millis(20)).with_stdout(b"done\n")],
        );
        let target = RemoteTarget::new("server");
        let mut handle = mock.launch(&target, "bash s.sh").await.unwrap();

        assert_eq!(handle.poll(), ProcessStatus::Running);
        match handle.wait_with_timeout(Duration::from_secs(5)).await {
            WaitOutcome::Exited(out) => {
                assert_eq!(out.exit_code, 3);
                assert_eq!(out.stdout, b"done\n");
            }
            WaitOutcome::TimedOut => panic!("expected exit"),
        }
        assert_eq!(handle.state(), ProcessState::Exited(3));
    }

    #[tokio::test]
    async fn mock_hang_times_out() {
        let mock = MockExecutor::new();
        mock.script("client", vec![MockBehavior::hangs()]);
        let target = RemoteTarget::new("client");
        let mut handle = mock.launch(&target, "bash c.sh").await.unwrap();

        let outcome = handle.wait_with_timeout(Duration::from_millis(10)).await;
        assert_eq!(outcome, WaitOutcome::TimedOut);
        assert_eq!(handle.state(), ProcessState::Running);
    }

    #[tokio::test]
    async fn mock_terminate_is_idempotent() {
        let mock = MockExecutor::new();
        mock.script("client", vec![MockBehavior::hangs()]);
        let target = RemoteTarget::new("client");
        let mut handle = mock.launch(&target, "bash c.sh").await.unwrap();

        handle.terminate().await;
        handle.terminate().await;
        assert_eq!(handle.state(), ProcessState::Killed);
        assert_eq!(mock.terminations(), 1);
        assert_eq!(handle.poll(), ProcessStatus::Exited(KILLED_EXIT_CODE));
    }

    #[tokio::test]
    async fn mock_launch_failure_is_recorded() {
        let mock = MockExecutor::new();
        mock.script("server", vec![MockBehavior::fails_to_launch("no route to host")]);
        let target = RemoteTarget::new("server");

        let result = mock.launch(&target, "bash s.sh").await;
        assert!(matches!(result, Err(LaunchError::Rejected { .. })));
        assert_eq!(
            mock.launches(),
            vec![LaunchRecord {
                target: "server".into(),
                command: "bash s.sh".into(),
                launched: false,
            }]
        );
    }

    #[tokio::test]
    async fn mock_default_behavior_after_script() {
        let mock = MockExecutor::new();
        mock.set_default("server", MockBehavior::exits(9, Duration::ZERO));
        let target = RemoteTarget::new("server");
        let mut handle = mock.launch(&target, "bash s.sh").await.unwrap();
        assert_eq!(handle.poll(), ProcessStatus::Exited(9));
    }
}
