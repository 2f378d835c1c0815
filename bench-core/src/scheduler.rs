//! Campaign scheduler: one runner per parameter set behind a bounded pool.
//!
//! The pool defaults to one worker. Each runner already keeps its own attempts
//! strictly sequential; the pool bounds how many parameter sets share the two
//! targets at once. A runner that panics or cannot record its attempts marks
//! only its own parameter set as failed; attempts it did record are kept.

use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::error::RecorderResult;
use crate::reaper::Reaper;
use crate::recorder::ResultRecorder;
use crate::remote::RemoteExecutor;
use crate::runner::{RunnerReport, RunnerSettings, TestRunner};
use crate::types::{CampaignId, CampaignResult, ParameterOutcome, ParameterSet, Role, RunnerState};
use crate::workload::Workloads;

/// Runs every parameter set of a campaign and merges their results.
pub struct CampaignScheduler {
    campaign: CampaignId,
    parameters: Vec<ParameterSet>,
    settings: RunnerSettings,
    workers: usize,
    preflight_reap: bool,
    executor: Arc<dyn RemoteExecutor>,
    workloads: Arc<Workloads>,
    recorder: Arc<ResultRecorder>,
}

impl CampaignScheduler {
    /// Build a scheduler for `config` with a fresh random campaign id.
    pub fn new(
        config: &Config,
        executor: Arc<dyn RemoteExecutor>,
        recorder: Arc<ResultRecorder>,
    ) -> Self {
        Self {
            campaign: CampaignId::random(),
            parameters: config.parameters.clone(),
            settings: RunnerSettings::from(&config.campaign),
            workers: config.campaign.workers.max(1),
            preflight_reap: config.campaign.preflight_reap,
            executor,
            workloads: Arc::new(Workloads::from_config(config)),
            recorder,
        }
    }

    /// Use a fixed campaign id.
    pub fn with_campaign_id(mut self, campaign: CampaignId) -> Self {
        self.campaign = campaign;
        self
    }

    /// Override the pool size.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Override the runner settings.
    pub fn with_settings(mut self, settings: RunnerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// The campaign id attempts are recorded under.
    pub fn campaign_id(&self) -> &CampaignId {
        &self.campaign
    }

    /// Run the whole matrix, write the summary and return the merged result.
    ///
    /// Outcomes are listed in matrix order regardless of completion order.
    ///
    /// # Errors
    ///
    /// Returns an error only if the summary file cannot be written. Runner
    /// failures are folded into the result as failed parameter sets.
    pub async fn run(self) -> RecorderResult<CampaignResult> {
        tracing::info!(
            campaign = %self.campaign,
            parameter_sets = self.parameters.len(),
            workers = self.workers,
            "campaign started"
        );
        if self.workers > 1 {
            tracing::warn!(
                campaign = %self.campaign,
                "{} workers share the same server and client; attempts of different parameter sets may interfere",
                self.workers
            );
        }

        if self.preflight_reap {
            self.reap_leftovers().await;
        }

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut handles: Vec<(String, JoinHandle<RunnerReport>)> = Vec::new();

        for set in &self.parameters {
            // Sets start in matrix order as pool slots free up.
            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    tracing::error!(campaign = %self.campaign, "worker pool closed: {}", e);
                    break;
                }
            };
            let runner = TestRunner::new(
                set.clone(),
                self.settings.clone(),
                self.campaign.clone(),
                Arc::clone(&self.executor),
                Arc::clone(&self.workloads),
                Arc::clone(&self.recorder),
            );
            let handle = tokio::spawn(async move {
                let report = runner.run().await;
                drop(permit);
                report
            });
            handles.push((set.name.clone(), handle));
        }

        let mut outcomes = Vec::with_capacity(self.parameters.len());
        let mut attempts = Vec::new();
        for (name, handle) in handles {
            match handle.await {
                Ok(report) => {
                    if let Some(e) = &report.aborted {
                        tracing::error!(
                            parameter_set = %name,
                            attempts = report.attempts.len(),
                            "parameter set failed, runner aborted: {}",
                            e
                        );
                    }
                    outcomes.push(ParameterOutcome {
                        name,
                        passed: report.passed,
                        state: report.state,
                    });
                    attempts.extend(report.attempts);
                }
                Err(e) => {
                    tracing::error!(parameter_set = %name, "runner task failed: {}", e);
                    outcomes.push(failed(name));
                }
            }
        }

        // Sets never started because the pool closed still appear, as failed.
        for set in self.parameters.iter().skip(outcomes.len()) {
            outcomes.push(failed(set.name.clone()));
        }

        let result = CampaignResult {
            campaign_id: self.campaign.clone(),
            outcomes,
            attempts,
        };
        let path = self.recorder.write_summary(&result).await?;

        let passed = result.outcomes.iter().filter(|o| o.passed).count();
        tracing::info!(
            campaign = %self.campaign,
            summary = %path.display(),
            "campaign finished: {}/{} parameter sets passed",
            passed,
            result.outcomes.len()
        );
        Ok(result)
    }

    async fn reap_leftovers(&self) {
        let reaper = Reaper::new(Arc::clone(&self.executor));
        for role in [Role::Server, Role::Client] {
            let spec = self.workloads.spec(role);
            tracing::debug!(remote = %spec.target, identifier = %spec.identifier, "preflight reap");
            reaper.reap(&spec.target, &spec.identifier).await;
        }
    }
}

fn failed(name: String) -> ParameterOutcome {
    ParameterOutcome {
        name,
        passed: false,
        state: RunnerState::default(),
    }
}
