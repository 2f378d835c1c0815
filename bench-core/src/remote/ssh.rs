//! Command-line transports: `ssh` and `vagrant ssh`.
//!
//! Uses `tokio::process::Command` to shell out; keys or vagrant machines must
//! be pre-configured. Child output is drained by background tasks so a chatty
//! workload never blocks on a full pipe.

use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::{
    CommandOutput, ProcessOutput, ProcessState, ProcessStatus, RemoteExecutor, RemoteProcess,
    RemoteTarget, WaitOutcome, UNREACHABLE_EXIT_CODE,
};
use crate::config::{TransportConfig, TransportKind};
use crate::error::LaunchError;

/// Upper bound for reaping the local transport after a kill signal.
const KILL_WAIT: Duration = Duration::from_secs(5);

/// Executor that reaches targets over `ssh` or `vagrant ssh`.
#[derive(Debug, Clone)]
pub struct SshExecutor {
    kind: TransportKind,
    program: Option<String>,
    connect_timeout_secs: u64,
    command_timeout_secs: u64,
    verify_connection: bool,
    ssh_options: Vec<String>,
}

impl SshExecutor {
    /// Build an executor from the `[transport]` section.
    pub fn from_config(config: &TransportConfig) -> Self {
        Self {
            kind: config.kind,
            program: config.program.clone(),
            connect_timeout_secs: config.connect_timeout_secs,
            command_timeout_secs: config.command_timeout_secs,
            verify_connection: config.verify_connection,
            ssh_options: config.ssh_options.clone(),
        }
    }

    /// Program and arguments that run `command` on `target`.
    pub fn transport_args(&self, target: &RemoteTarget, command: &str) -> (String, Vec<String>) {
        let (program, args) = match self.kind {
            TransportKind::Ssh => {
                let mut args = vec![
                    "-o".to_string(),
                    "StrictHostKeyChecking=no".to_string(),
                    "-o".to_string(),
                    format!("ConnectTimeout={}", self.connect_timeout_secs),
                    "-o".to_string(),
                    "BatchMode=yes".to_string(),
                ];
                for opt in &self.ssh_options {
                    args.push("-o".to_string());
                    args.push(opt.clone());
                }
                args.push(target.ssh_destination());
                args.push(command.to_string());
                ("ssh", args)
            }
            TransportKind::Vagrant => (
                "vagrant",
                vec![
                    "ssh".to_string(),
                    target.name.clone(),
                    "-c".to_string(),
                    command.to_string(),
                ],
            ),
        };
        let program = self.program.clone().unwrap_or_else(|| program.to_string());
        (program, args)
    }

    fn command_for(&self, target: &RemoteTarget, command: &str) -> Command {
        let (program, args) = self.transport_args(target, command);
        let mut cmd = Command::new(program);
        cmd.args(args).stdin(Stdio::null());
        cmd
    }

    /// Confirm the target accepts connections before launching a workload.
    async fn check_connection(&self, target: &RemoteTarget) -> Result<(), LaunchError> {
        let result = self.run(target, "true").await?;
        if !result.success() {
            return Err(LaunchError::Unreachable {
                target: target.name.clone(),
                exit_code: result.exit_code,
                stderr: result.stderr.trim().to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn launch(
        &self,
        target: &RemoteTarget,
        command: &str,
    ) -> Result<Box<dyn RemoteProcess>, LaunchError> {
        if self.verify_connection {
            self.check_connection(target).await?;
        }

        let mut child = self
            .command_for(target, command)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| LaunchError::Spawn {
                target: target.name.clone(),
                source: e,
            })?;

        let stdout = child.stdout.take().map(Drain::spawn);
        let stderr = child.stderr.take().map(Drain::spawn);
        tracing::debug!(remote = %target, pid = ?child.id(), "launched: {}", command);

        Ok(Box::new(SshProcess {
            target: target.name.clone(),
            command: command.to_string(),
            child,
            state: ProcessState::Running,
            stdout,
            stderr,
            output: None,
        }))
    }

    /// Run `command` to completion, bounded by `command_timeout_secs`.
    ///
    /// On expiry the local transport is killed and `LaunchError::TimedOut`
    /// is returned.
    async fn run(
        &self,
        target: &RemoteTarget,
        command: &str,
    ) -> Result<CommandOutput, LaunchError> {
        let limit = Duration::from_secs(self.command_timeout_secs);
        let output = tokio::time::timeout(
            limit,
            self.command_for(target, command).kill_on_drop(true).output(),
        )
        .await
        .map_err(|_| LaunchError::TimedOut {
            target: target.name.clone(),
            timeout_secs: self.command_timeout_secs,
        })?
        .map_err(|e| LaunchError::Spawn {
            target: target.name.clone(),
            source: e,
        })?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(UNREACHABLE_EXIT_CODE),
        })
    }
}

/// Background reader collecting one output stream of a child.
///
/// Bytes are appended as they arrive so a caller that stops waiting still
/// gets everything read so far.
struct Drain {
    buf: Arc<Mutex<Vec<u8>>>,
    task: JoinHandle<()>,
}

impl Drain {
    fn spawn<R>(mut reader: R) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buf);
        let task = tokio::spawn(async move {
            let mut chunk = [0u8; 8192];
            loop {
                match reader.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(n) => sink.lock().await.extend_from_slice(&chunk[..n]),
                    Err(e) => {
                        tracing::debug!("output stream closed early: {}", e);
                        break;
                    }
                }
            }
        });
        Self { buf, task }
    }

    /// Wait for end of stream until `deadline`, then return what was read.
    ///
    /// The second value is false if the stream was still open at the deadline.
    async fn finish(mut self, deadline: Instant) -> (Vec<u8>, bool) {
        let complete = tokio::time::timeout_at(deadline, &mut self.task).await.is_ok();
        if !complete {
            self.task.abort();
        }
        let bytes = std::mem::take(&mut *self.buf.lock().await);
        (bytes, complete)
    }
}

/// Handle to a local `ssh`/`vagrant` child supervising a remote command.
struct SshProcess {
    target: String,
    command: String,
    child: Child,
    state: ProcessState,
    stdout: Option<Drain>,
    stderr: Option<Drain>,
    output: Option<ProcessOutput>,
}

impl SshProcess {
    async fn collect(&mut self, deadline: Instant) -> ProcessOutput {
        if let Some(output) = &self.output {
            return output.clone();
        }
        let exit_code = match self.state.status() {
            ProcessStatus::Exited(code) => code,
            ProcessStatus::Running => UNREACHABLE_EXIT_CODE,
        };
        let (stdout, stderr) = (self.stdout.take(), self.stderr.take());
        let stdout = self.join_stream(stdout, deadline, "stdout").await;
        let stderr = self.join_stream(stderr, deadline, "stderr").await;
        let output = ProcessOutput {
            exit_code,
            stdout,
            stderr,
        };
        self.output = Some(output.clone());
        output
    }

    async fn join_stream(&self, stream: Option<Drain>, deadline: Instant, name: &str) -> Vec<u8> {
        let Some(drain) = stream else {
            return Vec::new();
        };
        let (bytes, complete) = drain.finish(deadline).await;
        if !complete {
            tracing::warn!(
                remote = %self.target,
                "{} still open at wait deadline, keeping {} bytes",
                name,
                bytes.len()
            );
        }
        bytes
    }
}

#[async_trait]
impl RemoteProcess for SshProcess {
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
        match self.child.try_wait() {
            Ok(Some(status)) => {
                self.state = ProcessState::Exited(status.code().unwrap_or(UNREACHABLE_EXIT_CODE));
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(remote = %self.target, "wait on transport failed: {}", e);
                self.state = ProcessState::Exited(UNREACHABLE_EXIT_CODE);
            }
        }
        self.state.status()
    }

    async fn terminate(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        if let Err(e) = self.child.start_kill() {
            tracing::debug!(remote = %self.target, "kill signal not delivered: {}", e);
        }
        if tokio::time::timeout(KILL_WAIT, self.child.wait()).await.is_err() {
            tracing::warn!(remote = %self.target, "transport did not exit after kill");
        }
        self.state = ProcessState::Killed;
    }

    async fn wait_with_timeout(&mut self, timeout: Duration) -> WaitOutcome {
        let deadline = Instant::now() + timeout;
        if !self.state.is_terminal() {
            match tokio::time::timeout_at(deadline, self.child.wait()).await {
                Err(_) => return WaitOutcome::TimedOut,
                Ok(Ok(status)) => {
                    self.state =
                        ProcessState::Exited(status.code().unwrap_or(UNREACHABLE_EXIT_CODE));
                }
                Ok(Err(e)) => {
                    tracing::warn!(remote = %self.target, "wait on transport failed: {}", e);
                    self.state = ProcessState::Exited(UNREACHABLE_EXIT_CODE);
                }
            }
        }
        WaitOutcome::Exited(self.collect(deadline).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reaper::Reaper;
    use crate::remote::KILLED_EXIT_CODE;
    use std::path::Path;
    use tempfile::TempDir;

    fn transport(kind: TransportKind) -> TransportConfig {
        TransportConfig {
            kind,
            program: None,
            connect_timeout_secs: 10,
            command_timeout_secs: 30,
            verify_connection: false,
            ssh_options: vec!["ServerAliveInterval=5".into()],
        }
    }

    fn executor(kind: TransportKind) -> SshExecutor {
        SshExecutor::from_config(&transport(kind))
    }

    /// A stand-in transport that runs its last argument with the local shell.
    fn local_transport(dir: &Path, command_timeout_secs: u64) -> SshExecutor {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("fake-ssh");
        std::fs::write(&path, "#!/bin/sh\nfor last; do :; done\nexec sh -c \"$last\"\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut config = transport(TransportKind::Ssh);
        config.program = Some(path.to_string_lossy().into_owned());
        config.command_timeout_secs = command_timeout_secs;
        SshExecutor::from_config(&config)
    }

    #[test]
    fn ssh_transport_args() {
        let mut target = RemoteTarget::new("server");
        target.host = Some("192.168.56.10".into());
        target.user = Some("vagrant".into());

        let (program, args) = executor(TransportKind::Ssh).transport_args(&target, "uptime");
        assert_eq!(program, "ssh");
        assert_eq!(
            args,
            vec![
                "-o",
                "StrictHostKeyChecking=no",
                "-o",
                "ConnectTimeout=10",
                "-o",
                "BatchMode=yes",
                "-o",
                "ServerAliveInterval=5",
                "vagrant@192.168.56.10",
                "uptime",
            ]
        );
    }

    #[test]
    fn vagrant_transport_args() {
        let target = RemoteTarget::new("client");
        let (program, args) =
            executor(TransportKind::Vagrant).transport_args(&target, "cd /vagrant && ls");
        assert_eq!(program, "vagrant");
        assert_eq!(args, vec!["ssh", "client", "-c", "cd /vagrant && ls"]);
    }

    #[test]
    fn program_override_keeps_arguments() {
        let mut config = transport(TransportKind::Vagrant);
        config.program = Some("/opt/vagrant/bin/vagrant".into());
        let target = RemoteTarget::new("client");

        let (program, args) = SshExecutor::from_config(&config).transport_args(&target, "ls");
        assert_eq!(program, "/opt/vagrant/bin/vagrant");
        assert_eq!(args, vec!["ssh", "client", "-c", "ls"]);
    }

    #[tokio::test]
    async fn exit_code_and_output_are_captured() {
        let dir = TempDir::new().unwrap();
        let exec = local_transport(dir.path(), 30);
        let target = RemoteTarget::new("server");

        let mut handle = exec
            .launch(&target, "echo Pass; echo oops >&2; exit 3")
            .await
            .unwrap();
        match handle.wait_with_timeout(Duration::from_secs(10)).await {
            WaitOutcome::Exited(out) => {
                assert_eq!(out.exit_code, 3);
                assert_eq!(String::from_utf8_lossy(&out.stdout), "Pass\n");
                assert_eq!(String::from_utf8_lossy(&out.stderr), "oops\n");
            }
            WaitOutcome::TimedOut => panic!("short command timed out"),
        }
        assert_eq!(handle.state(), ProcessState::Exited(3));
        assert_eq!(handle.poll(), ProcessStatus::Exited(3));
    }

    #[tokio::test]
    async fn terminate_marks_killed_and_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let exec = local_transport(dir.path(), 30);
        let target = RemoteTarget::new("server");

        let mut handle = exec.launch(&target, "sleep 30").await.unwrap();
        assert_eq!(handle.poll(), ProcessStatus::Running);

        handle.terminate().await;
        assert_eq!(handle.state(), ProcessState::Killed);
        handle.terminate().await;
        assert_eq!(handle.state(), ProcessState::Killed);
        assert_eq!(handle.poll(), ProcessStatus::Exited(KILLED_EXIT_CODE));
    }

    #[tokio::test]
    async fn wait_times_out_on_running_command() {
        let dir = TempDir::new().unwrap();
        let exec = local_transport(dir.path(), 30);
        let target = RemoteTarget::new("client");

        let mut handle = exec.launch(&target, "sleep 30").await.unwrap();
        let started = std::time::Instant::now();
        let outcome = handle.wait_with_timeout(Duration::from_millis(200)).await;
        assert!(matches!(outcome, WaitOutcome::TimedOut));
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(handle.state(), ProcessState::Running);
        handle.terminate().await;
    }

    #[tokio::test]
    async fn wait_is_bounded_when_a_grandchild_holds_stdout() {
        let dir = TempDir::new().unwrap();
        let exec = local_transport(dir.path(), 30);
        let target = RemoteTarget::new("client");

        let mut handle = exec
            .launch(&target, "echo Pass; sleep 6 & exit 0")
            .await
            .unwrap();
        let started = std::time::Instant::now();
        while handle.poll() == ProcessStatus::Running {
            assert!(started.elapsed() < Duration::from_secs(5));
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let waited = std::time::Instant::now();
        match handle.wait_with_timeout(Duration::from_millis(200)).await {
            WaitOutcome::Exited(out) => {
                assert_eq!(out.exit_code, 0);
                assert_eq!(String::from_utf8_lossy(&out.stdout), "Pass\n");
            }
            WaitOutcome::TimedOut => panic!("exited process reported as timed out"),
        }
        assert!(waited.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn run_is_bounded_by_command_timeout() {
        let dir = TempDir::new().unwrap();
        let exec = local_transport(dir.path(), 1);
        let target = RemoteTarget::new("server");

        let started = std::time::Instant::now();
        let err = exec.run(&target, "sleep 30").await.unwrap_err();
        assert!(matches!(
            err,
            LaunchError::TimedOut { timeout_secs: 1, .. }
        ));
        assert!(started.elapsed() < Duration::from_secs(5));

        let ok = exec.run(&target, "echo up").await.unwrap();
        assert!(ok.success());
        assert_eq!(ok.stdout, "up\n");
    }

    #[tokio::test]
    async fn hung_reap_is_abandoned() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let hang = dir.path().join("hung-ssh");
        std::fs::write(&hang, "#!/bin/sh\nexec sleep 30\n").unwrap();
        std::fs::set_permissions(&hang, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut config = transport(TransportKind::Ssh);
        config.program = Some(hang.to_string_lossy().into_owned());
        config.command_timeout_secs = 1;
        let reaper = Reaper::new(Arc::new(SshExecutor::from_config(&config)));
        let target = RemoteTarget::new("server");

        let started = std::time::Instant::now();
        let err = reaper.try_reap(&target, "ServerScript.sh").await.unwrap_err();
        assert!(matches!(
            err,
            crate::error::ReapError::Delivery {
                source: LaunchError::TimedOut { .. },
                ..
            }
        ));
        // Swallowed, and just as bounded.
        reaper.reap(&target, "ServerScript.sh").await;
        assert!(started.elapsed() < Duration::from_secs(8));
    }

    #[tokio::test]
    async fn missing_transport_is_a_spawn_error() {
        let mut config = transport(TransportKind::Ssh);
        config.program = Some("/nonexistent/pairbench-ssh".into());
        let exec = SshExecutor::from_config(&config);

        let err = exec
            .launch(&RemoteTarget::new("server"), "true")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, LaunchError::Spawn { .. }));
    }

    #[tokio::test]
    #[ignore = "requires remote hosts"]
    async fn ssh_localhost_echo() {
        let exec = executor(TransportKind::Ssh);
        let target = RemoteTarget::new("localhost");
        let mut handle = exec.launch(&target, "echo pairbench").await.unwrap();
        match handle.wait_with_timeout(Duration::from_secs(30)).await {
            WaitOutcome::Exited(out) => {
                assert_eq!(out.exit_code, 0);
                assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "pairbench");
            }
            WaitOutcome::TimedOut => panic!("ssh to localhost timed out"),
        }
    }
}
