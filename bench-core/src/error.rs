//! Error types for pairbench-core.

use std::path::PathBuf;

/// A remote process could not be started.
///
/// Local to one attempt: the attempt is recorded as errored and retried.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    /// The local transport process (ssh, vagrant) could not be spawned.
    #[error("failed to spawn transport for {target}: {source}")]
    Spawn {
        /// Target name.
        target: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The connection check could not reach the target.
    #[error("target {target} unreachable: exit={exit_code}, stderr={stderr}")]
    Unreachable {
        /// Target name.
        target: String,
        /// Exit code of the check.
        exit_code: i32,
        /// Standard error of the check.
        stderr: String,
    },

    /// A one-shot command did not finish within the transport's command timeout.
    #[error("command on {target} timed out after {timeout_secs}s")]
    TimedOut {
        /// Target name.
        target: String,
        /// Timeout that expired, in seconds.
        timeout_secs: u64,
    },

    /// The transport refused the command.
    #[error("launch rejected on {target}: {reason}")]
    Rejected {
        /// Target name.
        target: String,
        /// Reason reported by the transport.
        reason: String,
    },
}

/// The result log or output directory could not be written.
#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    /// I/O error while appending.
    #[error("recorder I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Attempt record could not be serialized.
    #[error("record serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    /// An output file for this attempt already exists.
    #[error("output already recorded: {path}")]
    OutputExists {
        /// Path of the existing output file.
        path: PathBuf,
    },
}

/// The reaper's kill command failed. Always swallowed by the caller.
#[derive(Debug, thiserror::Error)]
pub enum ReapError {
    /// The kill command could not be delivered.
    #[error("reap on {target} could not be delivered: {source}")]
    Delivery {
        /// Target name.
        target: String,
        /// Underlying launch error.
        source: LaunchError,
    },

    /// The kill command ran but reported an error.
    #[error("reap on {target} exited with {exit_code}: {stderr}")]
    Command {
        /// Target name.
        target: String,
        /// Exit code.
        exit_code: i32,
        /// Standard error output.
        stderr: String,
    },
}

/// Result type alias for recorder operations.
pub type RecorderResult<T> = std::result::Result<T, RecorderError>;
