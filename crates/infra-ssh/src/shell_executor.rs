// Shell executor - RemoteExecutor over ssh/scp or a local shell
//
// A tty-less ssh session does not hang up its remote command when the client
// dies, so stopping a background command over ssh kills the pid the remote
// shell announced, on the host, before the local client goes.

use crate::constants::{OUTPUT_DRAIN_TIMEOUT, REMOTE_PID_WAIT, REMOTE_STOP_TIMEOUT};
use crate::registry::{ProcessRegistry, TrackedProcess};
use crate::settings::SshSettings;
use crate::transport::{remote_stop_script, Transport};
use async_trait::async_trait;
use castcheck_core::domain::Host;
use castcheck_core::port::{
    CommandOutput, ExecutionError, LaunchMode, Launched, ProcessHandle, RemoteExecutor,
    Termination,
};
use std::path::Path;
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

pub struct ShellExecutor {
    transport: Transport,
    registry: ProcessRegistry,
}

impl ShellExecutor {
    /// Remote execution through the system `ssh`/`scp` clients
    pub fn ssh(settings: SshSettings) -> Self {
        Self {
            transport: Transport::Ssh(settings),
            registry: ProcessRegistry::default(),
        }
    }

    /// Every host is this machine (loopback runs and tests)
    pub fn local() -> Self {
        Self {
            transport: Transport::Local,
            registry: ProcessRegistry::default(),
        }
    }

    fn connection_error(&self, host: &Host, stderr: &str) -> ExecutionError {
        ExecutionError::Connection(format!("{}: {}", host.target(), stderr.trim()))
    }

    /// Run a prepared client command to completion
    async fn complete(&self, host: &Host, mut cmd: Command) -> Result<Output, ExecutionError> {
        let output = cmd
            .output()
            .await
            .map_err(|e| ExecutionError::SpawnFailed(e.to_string()))?;

        if self.transport.is_connection_failure(output.status.code()) {
            return Err(self.connection_error(host, &String::from_utf8_lossy(&output.stderr)));
        }
        Ok(output)
    }

    /// Kill the remote side of a background ssh command and wait until it
    /// is gone
    async fn stop_remote(&self, process: &TrackedProcess) -> Result<(), ExecutionError> {
        let host = &process.host;
        let Some(pid) = process.remote_pid(REMOTE_PID_WAIT).await else {
            warn!(host = %host.name, "Remote pid never announced, stopping the local client only");
            return Ok(());
        };

        debug!(host = %host.name, pid, "Stopping remote process");
        let cmd = self.transport.shell(host, &remote_stop_script(pid));
        let output = tokio::time::timeout(REMOTE_STOP_TIMEOUT, self.complete(host, cmd))
            .await
            .map_err(|_| {
                ExecutionError::Killed(format!("{}: remote stop of pid {} timed out", host.name, pid))
            })??;

        if !output.status.success() {
            return Err(ExecutionError::Killed(format!(
                "{}: remote pid {} survived SIGKILL",
                host.name, pid
            )));
        }
        Ok(())
    }
}

fn to_command_output(output: Output) -> CommandOutput {
    CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        exit_code: output.status.code(),
        finished: true,
    }
}

#[async_trait]
impl RemoteExecutor for ShellExecutor {
    async fn run(
        &self,
        host: &Host,
        command: &str,
        mode: LaunchMode,
    ) -> Result<Launched, ExecutionError> {
        match mode {
            LaunchMode::Foreground => {
                debug!(host = %host.name, command = %command, "Running command");
                let output = self
                    .complete(host, self.transport.shell(host, command))
                    .await?;
                Ok(Launched::Completed(to_command_output(output)))
            }
            LaunchMode::Background => {
                let child = self
                    .transport
                    .background(host, command)
                    .spawn()
                    .map_err(|e| ExecutionError::SpawnFailed(e.to_string()))?;
                let handle = self.registry.insert(host, child).await;
                debug!(host = %host.name, handle = %handle, command = %command, "Background command started");
                Ok(Launched::Running(handle))
            }
        }
    }

    async fn output(
        &self,
        handle: ProcessHandle,
        max_wait: Duration,
    ) -> Result<CommandOutput, ExecutionError> {
        let process = self
            .registry
            .get(handle)
            .await?
            .ok_or(ExecutionError::Released(handle))?;
        let status = process
            .wait_for_exit(max_wait)
            .await
            .map_err(|e| ExecutionError::Io(e.to_string()))?;
        if status.is_some() {
            process.drained(OUTPUT_DRAIN_TIMEOUT).await;
        }

        let (stdout, stderr) = process.captured().await;
        let exit_code = status.and_then(|s| s.code());
        if self.transport.is_connection_failure(exit_code) {
            return Err(ExecutionError::Connection(format!(
                "{}: {}",
                process.host.name,
                stderr.trim()
            )));
        }

        Ok(CommandOutput {
            stdout,
            stderr,
            exit_code,
            finished: status.is_some(),
        })
    }

    async fn kill(&self, handle: ProcessHandle) -> Result<Termination, ExecutionError> {
        let Some(process) = self.registry.get(handle).await? else {
            return Ok(Termination::AlreadyExited);
        };

        // A client that exited before any stop took its remote command with it
        let retry = process.request_stop();
        if !retry && process.has_exited().await? {
            self.registry.release(handle).await;
            return Ok(Termination::AlreadyExited);
        }

        let remote = if self.transport.is_local() {
            Ok(())
        } else {
            self.stop_remote(&process).await
        };
        let local = process.terminate().await;

        // Keep the entry on failure so a later stop retries the host
        remote?;
        let termination = match local? {
            Termination::AlreadyExited if !self.transport.is_local() => Termination::Terminated,
            termination => termination,
        };
        self.registry.release(handle).await;
        debug!(host = %process.host.name, handle = %handle, ?termination, "Background command stopped");
        Ok(termination)
    }

    async fn fetch(&self, host: &Host, remote_path: &str) -> Result<Vec<u8>, ExecutionError> {
        if self.transport.is_local() {
            return tokio::fs::read(remote_path)
                .await
                .map_err(|e| ExecutionError::Transfer(format!("{}: {}", remote_path, e)));
        }

        // Streamed over the ssh channel; avoids a local temp file for scp
        let command = format!("cat -- {}", shell_words::quote(remote_path));
        let output = self.complete(host, self.transport.shell(host, &command)).await?;
        if !output.status.success() {
            return Err(ExecutionError::Transfer(format!(
                "{}:{}: {}",
                host.name,
                remote_path,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(output.stdout)
    }

    async fn push(
        &self,
        host: &Host,
        local_path: &Path,
        remote_path: &str,
    ) -> Result<(), ExecutionError> {
        let Some(cmd) = self.transport.copy_to(host, local_path, remote_path) else {
            tokio::fs::copy(local_path, remote_path)
                .await
                .map_err(|e| ExecutionError::Transfer(format!("{}: {}", remote_path, e)))?;
            return Ok(());
        };

        let output = self.complete(host, cmd).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(host = %host.name, remote_path = %remote_path, stderr = %stderr.trim(), "scp failed");
            return Err(ExecutionError::Transfer(stderr.trim().to_string()));
        }

        info!(host = %host.name, remote_path = %remote_path, "File copied");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host() -> Host {
        Host::new("local")
    }

    #[tokio::test]
    async fn test_foreground_captures_output() {
        let executor = ShellExecutor::local();

        let launched = executor
            .run(&host(), "echo hello; echo oops >&2", LaunchMode::Foreground)
            .await
            .unwrap();

        let Launched::Completed(output) = launched else {
            panic!("expected completed output");
        };
        assert!(output.success());
        assert_eq!(output.stdout, "hello\n");
        assert_eq!(output.stderr, "oops\n");
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_not_an_error() {
        let executor = ShellExecutor::local();

        let launched = executor
            .run(&host(), "exit 3", LaunchMode::Foreground)
            .await
            .unwrap();

        assert!(matches!(
            launched,
            Launched::Completed(CommandOutput { exit_code: Some(3), .. })
        ));
    }

    #[tokio::test]
    async fn test_background_output_and_exit() {
        let executor = ShellExecutor::local();

        let Launched::Running(handle) = executor
            .run(&host(), "echo ready", LaunchMode::Background)
            .await
            .unwrap()
        else {
            panic!("expected a handle");
        };

        let output = executor.output(handle, Duration::from_secs(5)).await.unwrap();
        assert!(output.finished);
        assert_eq!(output.stdout, "ready\n");
        assert_eq!(executor.kill(handle).await.unwrap(), Termination::AlreadyExited);
    }

    #[tokio::test]
    async fn test_partial_output_then_kill_is_idempotent() {
        let executor = ShellExecutor::local();

        let Launched::Running(handle) = executor
            .run(&host(), "echo listening; exec sleep 30", LaunchMode::Background)
            .await
            .unwrap()
        else {
            panic!("expected a handle");
        };

        let output = executor
            .output(handle, Duration::from_millis(300))
            .await
            .unwrap();
        assert!(!output.finished);
        assert_eq!(output.stdout, "listening\n");

        assert_eq!(executor.kill(handle).await.unwrap(), Termination::Terminated);
        assert_eq!(executor.kill(handle).await.unwrap(), Termination::AlreadyExited);
    }

    #[tokio::test]
    async fn test_stopped_process_is_released() {
        let executor = ShellExecutor::local();

        let Launched::Running(handle) = executor
            .run(&host(), "exec sleep 30", LaunchMode::Background)
            .await
            .unwrap()
        else {
            panic!("expected a handle");
        };
        assert_eq!(executor.registry.live().await, 1);

        executor.kill(handle).await.unwrap();

        assert_eq!(executor.registry.live().await, 0);
        assert_eq!(
            executor.output(handle, Duration::from_millis(10)).await,
            Err(ExecutionError::Released(handle))
        );
    }

    #[tokio::test]
    async fn test_unknown_handle() {
        let executor = ShellExecutor::local();

        let result = executor.kill(ProcessHandle(42)).await;

        assert_eq!(result, Err(ExecutionError::UnknownHandle(ProcessHandle(42))));
    }

    #[tokio::test]
    async fn test_local_push_and_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("probe");
        std::fs::write(&source, b"#!/bin/sh\n").unwrap();
        let target = dir.path().join("deployed");
        let target = target.to_str().unwrap();

        let executor = ShellExecutor::local();
        executor.push(&host(), &source, target).await.unwrap();

        assert_eq!(executor.fetch(&host(), target).await.unwrap(), b"#!/bin/sh\n");
        assert!(matches!(
            executor.fetch(&host(), "/nonexistent/castcheck.log").await,
            Err(ExecutionError::Transfer(_))
        ));
    }
}
