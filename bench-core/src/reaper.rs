//! Out-of-band cleanup of orphaned workload processes.
//!
//! Terminating a local ssh connection does not mean the remote child exited:
//! the remote shell may have detached it. The reaper kills workloads by name on
//! the target itself, independent of any local handle.
//!
//! Reaping is best effort. Failures are logged and swallowed; a second reap of
//! the same identifier is a no-op on an already-dead process.

use std::sync::Arc;

use crate::error::ReapError;
use crate::remote::{RemoteExecutor, RemoteTarget};

const REAP_PREFIX: &str = "pkill -f '";
const REAP_SUFFIX: &str = "'; rc=$?; [ $rc -le 1 ]";

/// Kills workload processes on remote targets by identifier.
#[derive(Clone)]
pub struct Reaper {
    executor: Arc<dyn RemoteExecutor>,
}

impl Reaper {
    /// Create a reaper that issues kill commands through `executor`.
    pub fn new(executor: Arc<dyn RemoteExecutor>) -> Self {
        Self { executor }
    }

    /// Kill every process matching `identifier` on `target`. Never fails.
    pub async fn reap(&self, target: &RemoteTarget, identifier: &str) {
        match self.try_reap(target, identifier).await {
            Ok(()) => {
                tracing::debug!(remote = %target, identifier, "reaped");
            }
            Err(e) => {
                tracing::warn!(remote = %target, identifier, "cleanup error (ignored): {}", e);
            }
        }
    }

    /// Kill every process matching `identifier` on `target`, reporting failures.
    pub async fn try_reap(&self, target: &RemoteTarget, identifier: &str) -> Result<(), ReapError> {
        let command = reap_command(identifier);
        let result = self
            .executor
            .run(target, &command)
            .await
            .map_err(|e| ReapError::Delivery {
                target: target.name.clone(),
                source: e,
            })?;

        if !result.success() {
            return Err(ReapError::Command {
                target: target.name.clone(),
                exit_code: result.exit_code,
                stderr: result.stderr.trim().to_string(),
            });
        }
        Ok(())
    }
}

/// Build the remote kill command for `identifier`.
///
/// The first plain alphanumeric character is bracketed (`[S]erver.sh`,
/// `./[r]un.sh`) so the pattern does not match the remote shell running the
/// kill command itself. pkill's exit 1 (nothing matched) counts as success.
pub fn reap_command(identifier: &str) -> String {
    let escaped = identifier.replace('\'', r"'\''");
    format!("{}{}{}", REAP_PREFIX, bracket_first_literal(&escaped), REAP_SUFFIX)
}

fn bracket_first_literal(pattern: &str) -> String {
    let mut prev = None;
    for (i, c) in pattern.char_indices() {
        if c.is_ascii_alphanumeric() && prev != Some('\\') {
            return format!("{}[{}]{}", &pattern[..i], c, &pattern[i + 1..]);
        }
        prev = Some(c);
    }
    // Nothing to bracket.
    pattern.to_string()
}

/// Recover the identifier from a command built by [`reap_command`].
pub(crate) fn identifier_in(command: &str) -> Option<String> {
    let pattern = command.strip_prefix(REAP_PREFIX)?.strip_suffix(REAP_SUFFIX)?;
    let bytes = pattern.as_bytes();
    let bracket = (0..bytes.len().saturating_sub(2)).find(|&i| {
        bytes[i] == b'[' && bytes[i + 1].is_ascii_alphanumeric() && bytes[i + 2] == b']'
    });
    let pattern = match bracket {
        Some(i) => format!("{}{}{}", &pattern[..i], &pattern[i + 1..i + 2], &pattern[i + 3..]),
        None => pattern.to_string(),
    };
    Some(pattern.replace(r"'\''", "'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{MockBehavior, MockExecutor};
    use std::time::Duration;

    #[test]
    fn reap_command_brackets_first_char() {
        assert_eq!(
            reap_command("ServerScript.sh"),
            "pkill -f '[S]erverScript.sh'; rc=$?; [ $rc -le 1 ]"
        );
    }

    #[test]
    fn reap_command_brackets_past_leading_symbols() {
        assert_eq!(
            reap_command("./run.sh"),
            "pkill -f './[r]un.sh'; rc=$?; [ $rc -le 1 ]"
        );
        assert_eq!(
            reap_command("/opt/bench/serve"),
            "pkill -f '/[o]pt/bench/serve'; rc=$?; [ $rc -le 1 ]"
        );
        assert_eq!(
            reap_command("\\d+_job"),
            "pkill -f '\\d+_[j]ob'; rc=$?; [ $rc -le 1 ]"
        );
        assert_eq!(reap_command("..."), "pkill -f '...'; rc=$?; [ $rc -le 1 ]");
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn reap_command_does_not_match_its_own_shell() {
        // An unbracketed pattern would make pkill kill the `sh -c` running it.
        let status = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(format!(
                "command -v pkill >/dev/null || exit 0; {}",
                reap_command("./no-such-workload.sh")
            ))
            .status()
            .await
            .unwrap();
        assert!(status.success(), "reap shell exited with {:?}", status);
    }

    #[test]
    fn identifier_round_trips_through_command() {
        for id in [
            "ServerScript.sh",
            "./run.sh",
            "it's.sh",
            "x",
            "/opt/[a]b",
            "\\d+_job",
            "...",
        ] {
            assert_eq!(identifier_in(&reap_command(id)).as_deref(), Some(id));
        }
        assert_eq!(identifier_in("ls -la"), None);
    }

    #[tokio::test]
    async fn reap_kills_orphaned_remote_process() {
        let mock = MockExecutor::new();
        mock.script("server", vec![MockBehavior::hangs()]);
        let target = RemoteTarget::new("server");

        let mut handle = mock
            .launch(&target, "bash ServerScript.sh 10Mbps 1ms /tmp/out_1.out")
            .await
            .unwrap();
        handle.terminate().await;
        // Local connection gone, remote side still alive.
        assert_eq!(mock.alive_on("server").len(), 1);

        let reaper = Reaper::new(Arc::new(mock.clone()));
        reaper.reap(&target, "ServerScript.sh").await;
        assert!(mock.alive_on("server").is_empty());
        assert_eq!(mock.reap_count("server", "ServerScript.sh"), 1);
    }

    #[tokio::test]
    async fn reap_twice_is_idempotent() {
        let mock = MockExecutor::new();
        mock.script(
            "client",
            vec![
                MockBehavior::hangs(),
                MockBehavior::exits(0, Duration::from_secs(3600)),
            ],
        );
        let target = RemoteTarget::new("client");
        let _a = mock.launch(&target, "bash ClientScript.sh a").await.unwrap();
        let _b = mock.launch(&target, "bash other.sh b").await.unwrap();

        let reaper = Reaper::new(Arc::new(mock.clone()));
        reaper.reap(&target, "ClientScript.sh").await;
        let after_once = mock.alive_on("client");
        reaper.reap(&target, "ClientScript.sh").await;
        let after_twice = mock.alive_on("client");

        assert_eq!(after_once, vec!["bash other.sh b".to_string()]);
        assert_eq!(after_once, after_twice);
        assert_eq!(mock.reap_count("client", "ClientScript.sh"), 2);
    }

    #[tokio::test]
    async fn reap_failure_is_swallowed() {
        let mock = MockExecutor::new();
        mock.fail_next_run("server", "connection reset");
        let reaper = Reaper::new(Arc::new(mock.clone()));
        let target = RemoteTarget::new("server");

        let err = reaper.try_reap(&target, "ServerScript.sh").await.unwrap_err();
        assert!(matches!(err, ReapError::Delivery { .. }));

        // The infallible entry point logs instead of returning an error.
        mock.fail_next_run("server", "connection reset");
        reaper.reap(&target, "ServerScript.sh").await;
    }
}
