//! Test runner: the attempt loop for one parameter set.
//!
//! Each attempt walks
//!
//! ```text
//! Idle -> ServerLaunching -> BothLaunched -> Polling
//!      -> {Succeeded | Failed | TimedOut | Errored} -> CleanedUp
//! ```
//!
//! Cleanup runs exactly once per attempt on every path: running handles are
//! terminated, then the reaper runs for every role whose launch was attempted.
//! The next attempt starts only after cleanup, so attempts never overlap.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::{CampaignConfig, ServerExitPolicy};
use crate::error::RecorderResult;
use crate::reaper::Reaper;
use crate::recorder::ResultRecorder;
use crate::remote::{ProcessState, ProcessStatus, RemoteExecutor, RemoteProcess, WaitOutcome};
use crate::types::{
    unix_millis, Attempt, AttemptId, CampaignId, Outcome, ParameterSet, Role, RunnerState,
};
use crate::workload::Workloads;

/// Retry and timing knobs for a runner.
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    /// Successful attempts required.
    pub success_quota: u32,
    /// Attempt ceiling.
    pub max_attempts: u32,
    /// Polling deadline, measured from client launch.
    pub attempt_timeout: Duration,
    /// Wait between server launch and client launch.
    pub settle_delay: Duration,
    /// Interval between polls of both handles.
    pub poll_interval: Duration,
    /// Upper bound for collecting client output after success.
    pub output_drain_timeout: Duration,
    /// How the server's exit is judged.
    pub server_exit: ServerExitPolicy,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self::from(&CampaignConfig::default())
    }
}

impl From<&CampaignConfig> for RunnerSettings {
    fn from(config: &CampaignConfig) -> Self {
        Self {
            success_quota: config.success_quota,
            max_attempts: config.max_attempts,
            attempt_timeout: Duration::from_secs(config.attempt_timeout_secs),
            settle_delay: Duration::from_millis(config.settle_delay_ms),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            output_drain_timeout: Duration::from_secs(config.output_drain_timeout_secs),
            server_exit: config.server_exit,
        }
    }
}

/// Final result of one runner.
#[derive(Debug, Clone)]
pub struct RunnerReport {
    /// Name of the parameter set.
    pub parameter_set: String,
    /// Whether the quota was met.
    pub passed: bool,
    /// Final counters.
    pub state: RunnerState,
    /// Every recorded attempt, in order.
    pub attempts: Vec<Attempt>,
    /// Recorder error that stopped the runner before the quota or ceiling.
    pub aborted: Option<String>,
}

/// Attempt state-machine phases, for tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptPhase {
    /// Nothing launched yet.
    Idle,
    /// Server launch issued.
    ServerLaunching,
    /// Client launched after the settle delay.
    BothLaunched,
    /// Polling both handles.
    Polling,
    /// Both roles exited successfully.
    Succeeded,
    /// A role exited with a failure status.
    Failed,
    /// The deadline passed with a role still running.
    TimedOut,
    /// Orchestration failed.
    Errored,
    /// Handles terminated and workloads reaped.
    CleanedUp,
}

impl AttemptPhase {
    fn terminal(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Success => AttemptPhase::Succeeded,
            Outcome::Failure => AttemptPhase::Failed,
            Outcome::Timeout => AttemptPhase::TimedOut,
            Outcome::Error => AttemptPhase::Errored,
        }
    }
}

/// Handles and reap obligations of one attempt.
#[derive(Default)]
struct AttemptResources {
    server: Option<Box<dyn RemoteProcess>>,
    client: Option<Box<dyn RemoteProcess>>,
    server_assigned: bool,
    client_assigned: bool,
}

struct Verdict {
    outcome: Outcome,
    error: Option<String>,
}

impl Verdict {
    fn of(outcome: Outcome) -> Self {
        Self {
            outcome,
            error: None,
        }
    }

    fn errored(error: impl ToString) -> Self {
        Self {
            outcome: Outcome::Error,
            error: Some(error.to_string()),
        }
    }
}

/// Runs the paired workload for one parameter set until its quota is met or
/// its attempts are exhausted.
pub struct TestRunner {
    set: ParameterSet,
    settings: RunnerSettings,
    campaign: CampaignId,
    executor: Arc<dyn RemoteExecutor>,
    reaper: Reaper,
    workloads: Arc<Workloads>,
    recorder: Arc<ResultRecorder>,
}

impl TestRunner {
    /// Create a runner for `set`.
    pub fn new(
        set: ParameterSet,
        settings: RunnerSettings,
        campaign: CampaignId,
        executor: Arc<dyn RemoteExecutor>,
        workloads: Arc<Workloads>,
        recorder: Arc<ResultRecorder>,
    ) -> Self {
        let reaper = Reaper::new(Arc::clone(&executor));
        Self {
            set,
            settings,
            campaign,
            executor,
            reaper,
            workloads,
            recorder,
        }
    }

    /// Run attempts until the quota is met or the ceiling is reached.
    ///
    /// Exhausting the ceiling is not an error: the report has `passed = false`.
    /// If an attempt cannot be recorded the runner stops there; the report
    /// keeps the attempts recorded so far and names the error in `aborted`.
    pub async fn run(self) -> RunnerReport {
        let quota = self.settings.success_quota;
        let max = self.settings.max_attempts;
        let mut state = RunnerState::default();
        let mut attempts = Vec::new();
        let mut aborted = None;

        tracing::info!(
            parameter_set = %self.set.name,
            bandwidth = %self.set.bandwidth,
            delay = %self.set.delay,
            "runner started (quota {}, max {} attempts)",
            quota,
            max
        );

        while !state.is_finished(quota, max) {
            state.attempt_count += 1;
            let attempt = match self.run_attempt(state.attempt_count).await {
                Ok(attempt) => attempt,
                Err(e) => {
                    tracing::error!(
                        parameter_set = %self.set.name,
                        attempt = state.attempt_count,
                        "runner aborted: {}",
                        e
                    );
                    aborted = Some(e.to_string());
                    break;
                }
            };
            if attempt.outcome.is_success() {
                state.success_count += 1;
            }
            tracing::info!(
                parameter_set = %self.set.name,
                attempt = attempt.attempt,
                outcome = %attempt.outcome,
                "attempt {}/{} {} ({}/{} successes)",
                state.attempt_count,
                max,
                attempt.outcome,
                state.success_count,
                quota
            );
            attempts.push(attempt);
        }

        let passed = state.success_count >= quota;
        if passed {
            tracing::info!(parameter_set = %self.set.name, "quota met after {} attempts", state.attempt_count);
        } else if aborted.is_none() {
            tracing::warn!(
                parameter_set = %self.set.name,
                "attempts exhausted with {}/{} successes",
                state.success_count,
                quota
            );
        }

        RunnerReport {
            parameter_set: self.set.name.clone(),
            passed,
            state,
            attempts,
            aborted,
        }
    }

    async fn run_attempt(&self, index: u32) -> RecorderResult<Attempt> {
        let attempt_id = AttemptId::new(&self.campaign, &self.set.name, index);
        let started_at_ms = unix_millis();
        let started = Instant::now();
        self.trace_phase(index, AttemptPhase::Idle);

        let mut res = AttemptResources::default();
        let verdict = self.drive(index, &mut res).await;
        self.trace_phase(index, AttemptPhase::terminal(verdict.outcome));

        self.cleanup(&mut res).await;
        self.trace_phase(index, AttemptPhase::CleanedUp);

        let mut client_result = None;
        if verdict.outcome.is_success() {
            if let Some(client) = res.client.as_mut() {
                let stdout = match client
                    .wait_with_timeout(self.settings.output_drain_timeout)
                    .await
                {
                    WaitOutcome::Exited(out) => out.stdout,
                    WaitOutcome::TimedOut => {
                        tracing::warn!(attempt_id = %attempt_id, "client output not drained in time");
                        Vec::new()
                    }
                };
                client_result = last_line(&stdout);
                self.recorder.save_output(&attempt_id, &stdout).await?;
            }
        }

        let attempt = Attempt {
            campaign_id: self.campaign.clone(),
            attempt_id,
            parameter_set: self.set.name.clone(),
            attempt: index,
            started_at_ms,
            duration_ms: started.elapsed().as_millis() as u64,
            outcome: verdict.outcome,
            server_exit_code: exit_code(res.server.as_deref()),
            client_exit_code: exit_code(res.client.as_deref()),
            client_result,
            error: verdict.error,
        };
        self.recorder.record(&attempt).await?;
        Ok(attempt)
    }

    /// Launch both roles and poll them to a verdict.
    async fn drive(&self, index: u32, res: &mut AttemptResources) -> Verdict {
        let server = self.workloads.spec(Role::Server);
        let client = self.workloads.spec(Role::Client);

        self.trace_phase(index, AttemptPhase::ServerLaunching);
        let command = self.workloads.command(Role::Server, &self.set, index);
        res.server_assigned = true;
        match self.executor.launch(&server.target, &command).await {
            Ok(handle) => res.server = Some(handle),
            Err(e) => {
                tracing::warn!(parameter_set = %self.set.name, attempt = index, "server launch failed: {}", e);
                return Verdict::errored(e);
            }
        }

        tokio::time::sleep(self.settings.settle_delay).await;

        // A server that already failed has nothing for the client to talk to.
        if let Some(handle) = res.server.as_mut() {
            if let ProcessStatus::Exited(code) = handle.poll() {
                if code != 0 {
                    tracing::debug!(attempt = index, "server exited {} during settle delay", code);
                    return Verdict::of(Outcome::Failure);
                }
            }
        }

        let command = self.workloads.command(Role::Client, &self.set, index);
        res.client_assigned = true;
        match self.executor.launch(&client.target, &command).await {
            Ok(handle) => res.client = Some(handle),
            Err(e) => {
                tracing::warn!(parameter_set = %self.set.name, attempt = index, "client launch failed: {}", e);
                return Verdict::errored(e);
            }
        }
        self.trace_phase(index, AttemptPhase::BothLaunched);

        match (res.server.as_mut(), res.client.as_mut()) {
            (Some(server), Some(client)) => {
                self.trace_phase(index, AttemptPhase::Polling);
                Verdict::of(self.poll(&mut **server, &mut **client).await)
            }
            _ => Verdict::errored("handle missing after launch"),
        }
    }

    /// Poll both handles until they finish, one fails, or the deadline passes.
    async fn poll(&self, server: &mut dyn RemoteProcess, client: &mut dyn RemoteProcess) -> Outcome {
        let deadline = Instant::now() + self.settings.attempt_timeout;
        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let statuses = (server.poll(), client.poll());
            tracing::trace!(parameter_set = %self.set.name, ?statuses, "poll");

            match statuses {
                (ProcessStatus::Exited(s), ProcessStatus::Exited(c)) => {
                    return if s == 0 && c == 0 {
                        Outcome::Success
                    } else {
                        Outcome::Failure
                    };
                }
                (ProcessStatus::Exited(code), ProcessStatus::Running)
                | (ProcessStatus::Running, ProcessStatus::Exited(code))
                    if code != 0 =>
                {
                    return Outcome::Failure;
                }
                (ProcessStatus::Running, ProcessStatus::Exited(0))
                    if self.settings.server_exit == ServerExitPolicy::StopOnClientSuccess =>
                {
                    return Outcome::Success;
                }
                _ => {}
            }

            if Instant::now() >= deadline {
                return Outcome::Timeout;
            }
        }
    }

    /// Terminate running handles, then reap every role whose launch was attempted.
    async fn cleanup(&self, res: &mut AttemptResources) {
        for handle in [res.server.as_mut(), res.client.as_mut()].into_iter().flatten() {
            handle.terminate().await;
        }
        if res.server_assigned {
            let spec = self.workloads.spec(Role::Server);
            self.reaper.reap(&spec.target, &spec.identifier).await;
        }
        if res.client_assigned {
            let spec = self.workloads.spec(Role::Client);
            self.reaper.reap(&spec.target, &spec.identifier).await;
        }
    }

    fn trace_phase(&self, index: u32, phase: AttemptPhase) {
        tracing::debug!(parameter_set = %self.set.name, attempt = index, ?phase, "phase");
    }
}

/// Exit code of a handle that exited on its own.
fn exit_code(handle: Option<&dyn RemoteProcess>) -> Option<i32> {
    match handle.map(|h| h.state()) {
        Some(ProcessState::Exited(code)) => Some(code),
        _ => None,
    }
}

/// Last non-empty line of captured output.
fn last_line(stdout: &[u8]) -> Option<String> {
    String::from_utf8_lossy(stdout)
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}
