//! Campaign data model: parameter sets, attempts, runner state and results.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// One row of the test matrix.
///
/// Created once from the configuration and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSet {
    /// Unique name of this row (used in attempt ids and output file names).
    pub name: String,
    /// Bandwidth limit, passed through opaquely (e.g. `10Mbps`).
    pub bandwidth: String,
    /// Added latency, passed through opaquely (e.g. `1ms`).
    pub delay: String,
    /// Prefix of the server-side output path; the attempt index is appended.
    pub server_output_prefix: String,
    /// File the client sends.
    pub client_input_file: String,
}

impl ParameterSet {
    /// Server output path for a given attempt: `<prefix>_<attempt>.out`.
    pub fn server_output_path(&self, attempt: u32) -> String {
        format!("{}_{}.out", self.server_output_prefix, attempt)
    }
}

/// Which half of the paired workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The receiving side, launched first.
    Server,
    /// The sending side, launched after the settle delay.
    Client,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Server => f.pad("server"),
            Role::Client => f.pad("client"),
        }
    }
}

/// Terminal classification of one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Both roles exited with status 0.
    Success,
    /// A role exited with a non-zero status.
    Failure,
    /// The per-attempt timeout elapsed with a role still running.
    Timeout,
    /// Orchestration itself failed (e.g. a launch error).
    Error,
}

impl Outcome {
    /// Returns true for [`Outcome::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success => write!(f, "succeeded"),
            Outcome::Failure => write!(f, "failed"),
            Outcome::Timeout => write!(f, "timed out"),
            Outcome::Error => write!(f, "errored"),
        }
    }
}

/// Short random identifier for one campaign run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CampaignId(String);

impl CampaignId {
    /// Create a new random campaign id (12 hex chars of a v4 UUID).
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().as_simple().to_string()[..12].to_string())
    }

    /// Wrap an existing id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CampaignId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of one attempt: `<campaign>-<parameter set>-<attempt:03>`.
///
/// Also the file stem of the attempt's saved output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttemptId(String);

impl AttemptId {
    /// Build the id for an attempt.
    pub fn new(campaign: &CampaignId, parameter_set: &str, attempt: u32) -> Self {
        Self(format!("{}-{}-{:03}", campaign, parameter_set, attempt))
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Immutable record of one attempt, one line in the attempt log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attempt {
    /// Campaign this attempt belongs to.
    pub campaign_id: CampaignId,
    /// Unique attempt id.
    pub attempt_id: AttemptId,
    /// Name of the parameter set.
    pub parameter_set: String,
    /// 1-based attempt index within the parameter set.
    pub attempt: u32,
    /// Unix timestamp (milliseconds) when the attempt started.
    pub started_at_ms: u64,
    /// Wall-clock duration of the attempt including cleanup.
    pub duration_ms: u64,
    /// Terminal classification.
    pub outcome: Outcome,
    /// Server exit code, if the server exited on its own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_exit_code: Option<i32>,
    /// Client exit code, if the client exited on its own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_exit_code: Option<i32>,
    /// Last non-empty line of client stdout (successful attempts only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_result: Option<String>,
    /// Orchestration error message (errored attempts only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-parameter-set counters, owned exclusively by one runner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerState {
    /// Attempts that ended in [`Outcome::Success`].
    pub success_count: u32,
    /// Attempts started so far.
    pub attempt_count: u32,
}

impl RunnerState {
    /// True once the runner must stop: quota met or ceiling reached.
    pub fn is_finished(&self, success_quota: u32, max_attempts: u32) -> bool {
        self.success_count >= success_quota || self.attempt_count >= max_attempts
    }
}

/// Aggregate result for one parameter set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterOutcome {
    /// Name of the parameter set.
    pub name: String,
    /// Whether the success quota was met.
    pub passed: bool,
    /// Final runner counters.
    pub state: RunnerState,
}

/// Result of a whole campaign. Read-only once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignResult {
    /// Campaign id.
    pub campaign_id: CampaignId,
    /// One entry per parameter set, in matrix order.
    pub outcomes: Vec<ParameterOutcome>,
    /// Every attempt record, grouped by parameter set in matrix order.
    pub attempts: Vec<Attempt>,
}

impl CampaignResult {
    /// Whether a named parameter set met its quota.
    pub fn passed(&self, name: &str) -> Option<bool> {
        self.outcomes.iter().find(|o| o.name == name).map(|o| o.passed)
    }

    /// Names of parameter sets that did not meet their quota.
    pub fn failed(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| !o.passed)
            .map(|o| o.name.as_str())
            .collect()
    }

    /// True if every parameter set passed.
    pub fn all_passed(&self) -> bool {
        self.outcomes.iter().all(|o| o.passed)
    }
}

/// Current Unix time in milliseconds.
pub(crate) fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
