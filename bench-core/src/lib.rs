//! # pairbench-core
//!
//! Orchestration engine for paired server/client network test campaigns.
//!
//! A campaign runs a matrix of parameter sets (bandwidth, delay, file paths)
//! against two remote machines. Each parameter set is retried until it meets
//! a success quota or exhausts its attempt ceiling.
//!
//! ## Layout
//!
//! - [`remote`]: the [`RemoteExecutor`] seam, ssh/vagrant transport and a mock
//! - [`reaper`]: best-effort kill of orphaned workloads by name
//! - [`recorder`]: append-only attempt log and captured client output
//! - [`runner`]: the per-attempt state machine and retry loop
//! - [`scheduler`]: bounded pool of runners and result merging
//!
//! All remote interaction goes through [`RemoteExecutor`], so the runner and
//! scheduler are tested against [`MockExecutor`] with millisecond timings.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod reaper;
pub mod recorder;
pub mod remote;
pub mod runner;
pub mod scheduler;
pub mod shaping;
pub mod types;
pub mod workload;

pub use config::{Config, ConfigError, ServerExitPolicy, TransportKind};
pub use error::{LaunchError, ReapError, RecorderError, RecorderResult};
pub use reaper::Reaper;
pub use recorder::{read_attempts, ResultRecorder};
pub use remote::{MockExecutor, RemoteExecutor, RemoteProcess, RemoteTarget, SshExecutor};
pub use runner::{RunnerReport, RunnerSettings, TestRunner};
pub use scheduler::CampaignScheduler;
pub use shaping::{ShapingConfig, ShapingTool};
pub use types::{
    Attempt, AttemptId, CampaignId, CampaignResult, Outcome, ParameterOutcome, ParameterSet,
    Role, RunnerState,
};
pub use workload::Workloads;
