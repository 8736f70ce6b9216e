// Remote Process Handle
//
// Explicit start / collect / stop lifecycle over a RemoteExecutor. The rest
// of the core never sees PID files or shell job control.

use crate::domain::Host;
use crate::port::{
    CommandOutput, ExecutionError, LaunchMode, Launched, ProcessHandle, RemoteExecutor,
    Termination,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Lifecycle of a background remote process as seen from this side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    /// Exit observed through `collect_output`
    Exited,
    /// `stop` has completed
    Stopped,
}

/// Outcome of `RemoteProcess::stop`: was termination attempted, did it succeed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopReport {
    pub attempted: bool,
    pub succeeded: bool,
    pub detail: Option<String>,
}

/// Result of `RemoteProcess::start`
pub enum Started {
    Foreground(CommandOutput),
    Background(RemoteProcess),
}

/// Handle to one background process on one host
pub struct RemoteProcess {
    executor: Arc<dyn RemoteExecutor>,
    host: Host,
    handle: ProcessHandle,
    state: ProcessState,
}

impl RemoteProcess {
    /// Start `command` on `host`
    ///
    /// # Errors
    /// - ExecutionError::Connection when the host cannot be reached (not retried)
    /// - ExecutionError::SpawnFailed when the executor does not honour `mode`
    pub async fn start(
        executor: Arc<dyn RemoteExecutor>,
        host: &Host,
        command: &str,
        mode: LaunchMode,
    ) -> Result<Started, ExecutionError> {
        debug!(host = %host.name, ?mode, command = %command, "Starting remote command");

        match (mode, executor.run(host, command, mode).await?) {
            (LaunchMode::Foreground, Launched::Completed(output)) => Ok(Started::Foreground(output)),
            (LaunchMode::Background, Launched::Running(handle)) => {
                Ok(Started::Background(Self {
                    executor,
                    host: host.clone(),
                    handle,
                    state: ProcessState::Running,
                }))
            }
            (LaunchMode::Background, Launched::Completed(_)) => Err(ExecutionError::SpawnFailed(
                "executor completed a background command synchronously".to_string(),
            )),
            (LaunchMode::Foreground, Launched::Running(handle)) => {
                // Never leave an untracked process behind
                let _ = executor.kill(handle).await;
                Err(ExecutionError::SpawnFailed(
                    "executor detached a foreground command".to_string(),
                ))
            }
        }
    }

    /// Run `command` to completion and capture its output
    pub async fn run_foreground(
        executor: Arc<dyn RemoteExecutor>,
        host: &Host,
        command: &str,
    ) -> Result<CommandOutput, ExecutionError> {
        match Self::start(executor, host, command, LaunchMode::Foreground).await? {
            Started::Foreground(output) => Ok(output),
            Started::Background(mut process) => {
                process.stop().await;
                Err(ExecutionError::SpawnFailed(
                    "foreground command detached".to_string(),
                ))
            }
        }
    }

    /// Launch `command` in the background and keep a handle to it
    pub async fn spawn(
        executor: Arc<dyn RemoteExecutor>,
        host: &Host,
        command: &str,
    ) -> Result<Self, ExecutionError> {
        match Self::start(executor, host, command, LaunchMode::Background).await? {
            Started::Background(process) => Ok(process),
            Started::Foreground(_) => Err(ExecutionError::SpawnFailed(
                "background command completed synchronously".to_string(),
            )),
        }
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    pub fn handle(&self) -> ProcessHandle {
        self.handle
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// Retrieve whatever output is available, waiting at most `max_wait`.
    /// Output is partial (`finished == false`) if the process is still running.
    pub async fn collect_output(&mut self, max_wait: Duration) -> Result<CommandOutput, ExecutionError> {
        let output = self.executor.output(self.handle, max_wait).await?;
        if output.finished && self.state == ProcessState::Running {
            self.state = ProcessState::Exited;
        }
        Ok(output)
    }

    /// Terminate the process. Idempotent: stopping an exited or already
    /// stopped process is not an error.
    pub async fn stop(&mut self) -> StopReport {
        if self.state == ProcessState::Stopped {
            return StopReport {
                attempted: false,
                succeeded: true,
                detail: None,
            };
        }

        match self.executor.kill(self.handle).await {
            Ok(termination) => {
                self.state = ProcessState::Stopped;
                StopReport {
                    attempted: termination == Termination::Terminated,
                    succeeded: true,
                    detail: None,
                }
            }
            Err(e) => {
                warn!(host = %self.host.name, handle = %self.handle, error = %e, "Failed to stop remote process");
                StopReport {
                    attempted: true,
                    succeeded: false,
                    detail: Some(e.to_string()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::remote_executor::mocks::{HostBehavior, SimulatedExecutor};

    const RECV: &str = "castcheck-probe recv --expect run-1/0 --log /tmp/castcheck/r.log";

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let executor: Arc<dyn RemoteExecutor> = Arc::new(SimulatedExecutor::new());
        let mut process = RemoteProcess::spawn(executor, &Host::new("b"), RECV)
            .await
            .unwrap();

        let first = process.stop().await;
        let second = process.stop().await;

        assert!(first.attempted && first.succeeded);
        assert!(!second.attempted && second.succeeded);
        assert_eq!(process.state(), ProcessState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_after_exit_is_not_an_error() {
        let executor: Arc<dyn RemoteExecutor> = Arc::new(SimulatedExecutor::new());
        let mut process = RemoteProcess::spawn(executor, &Host::new("b"), RECV)
            .await
            .unwrap();

        let output = process
            .collect_output(Duration::from_millis(10))
            .await
            .unwrap();
        assert!(output.finished);
        assert_eq!(process.state(), ProcessState::Exited);

        assert!(process.stop().await.succeeded);
    }

    #[tokio::test]
    async fn test_collect_output_is_bounded() {
        let executor: Arc<dyn RemoteExecutor> =
            Arc::new(SimulatedExecutor::new().with_behavior("b", HostBehavior::HungReceiver));
        let mut process = RemoteProcess::spawn(executor, &Host::new("b"), RECV)
            .await
            .unwrap();

        let output = process
            .collect_output(Duration::from_millis(20))
            .await
            .unwrap();

        assert!(!output.finished);
        assert_eq!(process.state(), ProcessState::Running);
    }

    #[tokio::test]
    async fn test_unreachable_host_surfaces_immediately() {
        let executor: Arc<dyn RemoteExecutor> =
            Arc::new(SimulatedExecutor::new().with_behavior("b", HostBehavior::Unreachable));

        let result = RemoteProcess::spawn(executor, &Host::new("b"), RECV).await;

        assert!(matches!(result, Err(ExecutionError::Connection(_))));
    }
}
