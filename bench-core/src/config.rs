//! Configuration loading for pairbench.
//!
//! A campaign is described by a single TOML file (default: `campaign.toml`).

use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::remote::RemoteTarget;
use crate::shaping::ShapingConfig;
use crate::types::ParameterSet;

/// Root configuration for a campaign.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Retry, timing and pool settings.
    #[serde(default)]
    pub campaign: CampaignConfig,
    /// Remote execution transport.
    #[serde(default)]
    pub transport: TransportConfig,
    /// The two remote machines.
    pub targets: TargetsConfig,
    /// Server workload.
    #[serde(default = "default_server_role")]
    pub server: RoleConfig,
    /// Client workload.
    #[serde(default = "default_client_role")]
    pub client: RoleConfig,
    /// Network-condition control.
    #[serde(default)]
    pub shaping: ShapingConfig,
    /// Where results are persisted.
    #[serde(default)]
    pub results: ResultsConfig,
    /// The parameter matrix, in execution order.
    #[serde(default)]
    pub parameters: Vec<ParameterSet>,
}

/// Retry, timing and pool settings.
#[derive(Debug, Clone, Deserialize)]
pub struct CampaignConfig {
    /// Successful attempts required per parameter set (default: 5).
    #[serde(default = "default_success_quota")]
    pub success_quota: u32,
    /// Attempt ceiling per parameter set (default: 20).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Per-attempt timeout in seconds (default: 60).
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,
    /// Wait between server launch and client launch in milliseconds (default: 10000).
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// Interval between handle polls in milliseconds (default: 500).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Upper bound for draining client output after success, in seconds (default: 5).
    #[serde(default = "default_output_drain_timeout_secs")]
    pub output_drain_timeout_secs: u64,
    /// Concurrent parameter sets (default: 1).
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// How the server's exit is judged.
    #[serde(default)]
    pub server_exit: ServerExitPolicy,
    /// Reap both workloads before the first parameter set (default: true).
    #[serde(default = "default_true")]
    pub preflight_reap: bool,
}

/// How the server's lifetime is tied to the client's.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerExitPolicy {
    /// Both roles must exit 0 on their own.
    #[default]
    Await,
    /// A client exit 0 stops the server and counts as success.
    StopOnClientSuccess,
}

/// Which command-line transport reaches the targets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// `ssh [user@]host <cmd>`.
    #[default]
    Ssh,
    /// `vagrant ssh <machine> -c <cmd>`.
    Vagrant,
}

/// Remote execution transport.
#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    /// Transport kind (default: ssh).
    #[serde(default)]
    pub kind: TransportKind,
    /// Transport executable to run instead of `ssh` or `vagrant`.
    #[serde(default)]
    pub program: Option<String>,
    /// SSH connect timeout in seconds (default: 30).
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Ceiling in seconds on one-shot commands such as reaps and connection checks (default: 30).
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
    /// Check the target accepts connections before each launch (default: true).
    #[serde(default = "default_true")]
    pub verify_connection: bool,
    /// Extra `-o` options passed to ssh.
    #[serde(default)]
    pub ssh_options: Vec<String>,
}

/// The two remote machines.
#[derive(Debug, Clone, Deserialize)]
pub struct TargetsConfig {
    /// Machine running the server workload.
    pub server: RemoteTarget,
    /// Machine running the client workload.
    pub client: RemoteTarget,
}

/// One workload role.
#[derive(Debug, Clone, Deserialize)]
pub struct RoleConfig {
    /// Directory the script is run from.
    pub workdir: String,
    /// Script invoked with `<bandwidth> <delay> <path>`.
    pub script: String,
    /// Process pattern for the reaper (default: the script name).
    #[serde(default)]
    pub reap_pattern: Option<String>,
}

impl RoleConfig {
    /// Identifier the reaper kills for this role.
    pub fn workload_identifier(&self) -> &str {
        self.reap_pattern.as_deref().unwrap_or(&self.script)
    }
}

/// Result persistence.
#[derive(Debug, Clone, Deserialize)]
pub struct ResultsConfig {
    /// Directory holding the attempt log and output files (default: `results`).
    #[serde(default = "default_results_dir")]
    pub directory: PathBuf,
}

// Default value functions
fn default_success_quota() -> u32 {
    5
}

fn default_max_attempts() -> u32 {
    20
}

fn default_attempt_timeout_secs() -> u64 {
    60
}

fn default_settle_delay_ms() -> u64 {
    10_000
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_output_drain_timeout_secs() -> u64 {
    5
}

fn default_workers() -> usize {
    1
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_command_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("results")
}

fn default_server_role() -> RoleConfig {
    RoleConfig {
        workdir: "/vagrant/foggytcp".to_string(),
        script: "ServerScript.sh".to_string(),
        reap_pattern: None,
    }
}

fn default_client_role() -> RoleConfig {
    RoleConfig {
        workdir: "/vagrant/foggytcp".to_string(),
        script: "ClientScript.sh".to_string(),
        reap_pattern: None,
    }
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            success_quota: default_success_quota(),
            max_attempts: default_max_attempts(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
            settle_delay_ms: default_settle_delay_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            output_drain_timeout_secs: default_output_drain_timeout_secs(),
            workers: default_workers(),
            server_exit: ServerExitPolicy::default(),
            preflight_reap: default_true(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::default(),
            program: None,
            connect_timeout_secs: default_connect_timeout_secs(),
            command_timeout_secs: default_command_timeout_secs(),
            verify_connection: default_true(),
            ssh_options: Vec::new(),
        }
    }
}

impl Default for ResultsConfig {
    fn default() -> Self {
        Self {
            directory: default_results_dir(),
        }
    }
}

impl Config {
    /// Load and validate configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or fails validation.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.campaign;
        if c.success_quota == 0 {
            return Err(ConfigError::invalid("campaign.success_quota must be at least 1"));
        }
        if c.max_attempts == 0 {
            return Err(ConfigError::invalid("campaign.max_attempts must be at least 1"));
        }
        if c.max_attempts < c.success_quota {
            return Err(ConfigError::invalid(format!(
                "campaign.max_attempts ({}) is below campaign.success_quota ({})",
                c.max_attempts, c.success_quota
            )));
        }
        if c.workers == 0 {
            return Err(ConfigError::invalid("campaign.workers must be at least 1"));
        }
        if c.poll_interval_ms == 0 {
            return Err(ConfigError::invalid("campaign.poll_interval_ms must be non-zero"));
        }
        if c.attempt_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "campaign.attempt_timeout_secs must be non-zero",
            ));
        }
        if self.transport.command_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "transport.command_timeout_secs must be non-zero",
            ));
        }
        if self.parameters.is_empty() {
            return Err(ConfigError::invalid("no [[parameters]] defined"));
        }

        let mut seen = HashSet::new();
        for set in &self.parameters {
            if set.name.is_empty() {
                return Err(ConfigError::invalid("parameter set with empty name"));
            }
            if !seen.insert(set.name.as_str()) {
                return Err(ConfigError::invalid(format!(
                    "duplicate parameter set name: {}",
                    set.name
                )));
            }
        }
        Ok(())
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// Configuration parsed but is not usable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    fn invalid(msg: impl Into<String>) -> Self {
        ConfigError::Invalid(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[targets.server]
name = "server"

[targets.client]
name = "client"

[[parameters]]
name = "t1"
bandwidth = "10Mbps"
delay = "1ms"
server_output_prefix = "/vagrant/foggytcp/server_output1"
client_input_file = "/vagrant/foggytcp/testfile/file_1.txt"
"#;

    #[test]
    fn minimal_config_uses_defaults() {
        let config: Config = toml::from_str(MINIMAL).unwrap();
        config.validate().unwrap();

        assert_eq!(config.campaign.success_quota, 5);
        assert_eq!(config.campaign.max_attempts, 20);
        assert_eq!(config.campaign.attempt_timeout_secs, 60);
        assert_eq!(config.campaign.workers, 1);
        assert_eq!(config.campaign.server_exit, ServerExitPolicy::Await);
        assert!(config.campaign.preflight_reap);
        assert_eq!(config.transport.kind, TransportKind::Ssh);
        assert_eq!(config.transport.command_timeout_secs, 30);
        assert!(config.transport.program.is_none());
        assert_eq!(config.server.script, "ServerScript.sh");
        assert_eq!(config.client.workload_identifier(), "ClientScript.sh");
        assert_eq!(config.results.directory, PathBuf::from("results"));
        assert_eq!(config.parameters.len(), 1);
    }

    #[test]
    fn config_from_toml_string() {
        let toml = r#"
[campaign]
success_quota = 2
max_attempts = 4
attempt_timeout_secs = 30
settle_delay_ms = 250
workers = 2
server_exit = "stop_on_client_success"

[transport]
kind = "vagrant"
verify_connection = false
command_timeout_secs = 15

[targets.server]
name = "server"
host = "10.0.0.2"
user = "vagrant"

[targets.client]
name = "client"

[server]
workdir = "/opt/bench"
script = "serve.sh"
reap_pattern = "server_test"

[results]
directory = "/tmp/bench-results"

[[parameters]]
name = "a"
bandwidth = "1Mbps"
delay = "10ms"
server_output_prefix = "/tmp/out_a"
client_input_file = "/tmp/in"

[[parameters]]
name = "b"
bandwidth = "5Mbps"
delay = "10ms"
server_output_prefix = "/tmp/out_b"
client_input_file = "/tmp/in"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        config.validate().unwrap();

        assert_eq!(config.campaign.success_quota, 2);
        assert_eq!(config.campaign.settle_delay_ms, 250);
        assert_eq!(
            config.campaign.server_exit,
            ServerExitPolicy::StopOnClientSuccess
        );
        assert_eq!(config.transport.kind, TransportKind::Vagrant);
        assert!(!config.transport.verify_connection);
        assert_eq!(config.transport.command_timeout_secs, 15);
        assert_eq!(config.targets.server.host.as_deref(), Some("10.0.0.2"));
        assert_eq!(config.server.workload_identifier(), "server_test");
        assert_eq!(config.client.script, "ClientScript.sh");
        assert_eq!(config.parameters[1].bandwidth, "5Mbps");
    }

    #[test]
    fn validate_rejects_unreachable_quota() {
        let mut config: Config = toml::from_str(MINIMAL).unwrap();
        config.campaign.success_quota = 5;
        config.campaign.max_attempts = 3;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn validate_rejects_duplicate_names() {
        let mut config: Config = toml::from_str(MINIMAL).unwrap();
        let dup = config.parameters[0].clone();
        config.parameters.push(dup);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate parameter set name: t1"));
    }

    #[test]
    fn validate_rejects_empty_matrix_and_zero_workers() {
        let mut config: Config = toml::from_str(MINIMAL).unwrap();
        config.campaign.workers = 0;
        assert!(config.validate().is_err());

        let mut config: Config = toml::from_str(MINIMAL).unwrap();
        config.parameters.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_unbounded_commands() {
        let mut config: Config = toml::from_str(MINIMAL).unwrap();
        config.transport.command_timeout_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("command_timeout_secs"));
    }

    #[test]
    fn from_file_reports_missing_file() {
        let err = Config::from_file(Path::new("/nonexistent/campaign.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadError { .. }));
    }

    #[test]
    fn from_file_reports_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("campaign.toml");
        std::fs::write(&path, "[campaign\nsuccess_quota = ").unwrap();
        let err = Config::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn shipped_campaign_file_is_valid() {
        let config: Config = toml::from_str(include_str!("../../campaign.toml")).unwrap();
        config.validate().unwrap();
        assert_eq!(config.transport.kind, TransportKind::Vagrant);
        assert_eq!(config.campaign.server_exit, ServerExitPolicy::StopOnClientSuccess);
        assert_eq!(config.parameters.len(), 5);
    }
}
