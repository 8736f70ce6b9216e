// Remote Executor Port
// Abstraction over running commands on inventory hosts (ssh, local shell, simulation)

use crate::domain::Host;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Opaque handle to a background process started through a `RemoteExecutor`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessHandle(pub u64);

impl std::fmt::Display for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How a command is launched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    /// Block until exit, capture stdout/stderr/exit code
    Foreground,
    /// Return immediately with a handle that can be polled, read or killed
    Background,
}

/// Captured output of a remote command (possibly partial)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    /// False when the process was still running at capture time
    pub finished: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.finished && self.exit_code == Some(0)
    }

    /// stdout followed by stderr, for audit records
    pub fn transcript(&self) -> String {
        if self.stderr.trim().is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n--- stderr ---\n{}", self.stdout, self.stderr)
        }
    }
}

/// Result of `RemoteExecutor::run`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Launched {
    Completed(CommandOutput),
    Running(ProcessHandle),
}

/// Result of `RemoteExecutor::kill`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Process had already exited (or was already killed)
    AlreadyExited,
    /// Termination was attempted and the process is gone
    Terminated,
}

/// Execution errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    /// Host unreachable or authentication refused. Never retried.
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Spawn failed: {0}")]
    SpawnFailed(String),

    #[error("Unknown process handle: {0}")]
    UnknownHandle(ProcessHandle),

    /// The process was stopped and its captured output released
    #[error("Process {0} was already stopped")]
    Released(ProcessHandle),

    #[error("Transfer failed: {0}")]
    Transfer(String),

    #[error("Process kill failed: {0}")]
    Killed(String),

    #[error("IO error: {0}")]
    Io(String),
}

/// Remote executor trait
///
/// Implementations:
/// - ShellExecutor (infra-ssh): `ssh`/`scp`, or a local `sh -c` for loopback runs
/// - SimulatedExecutor (mocks): scripted per-host behaviour for tests
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run `command` on `host`
    ///
    /// # Errors
    /// - ExecutionError::Connection if the host cannot be reached
    /// - ExecutionError::SpawnFailed if the local client cannot be started
    ///
    /// A command that runs and exits non-zero is NOT an error; its exit code
    /// is reported in `CommandOutput`.
    async fn run(
        &self,
        host: &Host,
        command: &str,
        mode: LaunchMode,
    ) -> Result<Launched, ExecutionError>;

    /// Retrieve whatever output a background process has produced, waiting at
    /// most `max_wait` for it to exit
    async fn output(
        &self,
        handle: ProcessHandle,
        max_wait: Duration,
    ) -> Result<CommandOutput, ExecutionError>;

    /// Terminate a background process. Idempotent. Success means the process
    /// is gone on the host, not only its local client.
    async fn kill(&self, handle: ProcessHandle) -> Result<Termination, ExecutionError>;

    /// Read a file from the host
    async fn fetch(&self, host: &Host, remote_path: &str) -> Result<Vec<u8>, ExecutionError>;

    /// Copy a local file to the host
    async fn push(
        &self,
        host: &Host,
        local_path: &Path,
        remote_path: &str,
    ) -> Result<(), ExecutionError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::domain::probe::{
        ProbePayload, ProbeReport, RecvReport, RecvStatus, SendReport, SendStatus,
    };
    use std::collections::{HashMap, HashSet};
    use std::sync::{Arc, Mutex};
    use std::time::Instant;

    /// Scripted behaviour of one simulated host
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum HostBehavior {
        /// Everything works
        Healthy,
        /// Every command fails with a connection error
        Unreachable,
        /// Receiver never observes anything
        SilentReceiver,
        /// Receiver prints text without a terminal line
        GarbledReceiver,
        /// Receiver only sees datagrams for another token
        CrosstalkReceiver,
        /// Receiver never exits; output stays partial
        HungReceiver,
        /// Receiver stdout is lost, its log file is still fetchable
        OutputLost,
        /// Receiver stdout is lost and so is its log file
        Vanished,
        /// Sender probe runs but the local transmit fails
        SendError,
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum SimEventKind {
        SendStarted,
        SendFinished,
        ReceiverStarted,
        ReceiverKilled,
        Cleanup,
        Pushed,
        Command,
    }

    #[derive(Debug, Clone)]
    pub struct SimEvent {
        pub host: String,
        pub kind: SimEventKind,
        pub detail: String,
        pub at: Instant,
    }

    #[derive(Clone)]
    struct SimProcess {
        host: String,
        token: Option<String>,
        log_path: Option<String>,
        killed: bool,
    }

    #[derive(Default)]
    struct SimState {
        next_handle: u64,
        processes: HashMap<ProcessHandle, SimProcess>,
        /// token -> sender host
        sent: HashMap<String, String>,
        events: Vec<SimEvent>,
        active_senders: usize,
        max_concurrent_senders: usize,
    }

    /// Simulated remote executor understanding the probe command lines
    pub struct SimulatedExecutor {
        behaviors: Arc<Mutex<HashMap<String, HostBehavior>>>,
        dropped: Arc<Mutex<HashSet<(String, String)>>>,
        state: Arc<Mutex<SimState>>,
        send_duration: Duration,
    }

    impl Default for SimulatedExecutor {
        fn default() -> Self {
            Self::new()
        }
    }

    impl SimulatedExecutor {
        pub fn new() -> Self {
            Self {
                behaviors: Arc::new(Mutex::new(HashMap::new())),
                dropped: Arc::new(Mutex::new(HashSet::new())),
                state: Arc::new(Mutex::new(SimState::default())),
                send_duration: Duration::from_millis(5),
            }
        }

        /// How long every simulated sender takes to return
        pub fn with_send_duration(mut self, duration: Duration) -> Self {
            self.send_duration = duration;
            self
        }

        pub fn with_behavior(self, host: impl Into<String>, behavior: HostBehavior) -> Self {
            self.behaviors.lock().unwrap().insert(host.into(), behavior);
            self
        }

        /// Datagrams from `sender` never reach `receiver`
        pub fn with_dropped_pair(self, sender: impl Into<String>, receiver: impl Into<String>) -> Self {
            self.dropped
                .lock()
                .unwrap()
                .insert((sender.into(), receiver.into()));
            self
        }

        pub fn events(&self) -> Vec<SimEvent> {
            self.state.lock().unwrap().events.clone()
        }

        pub fn events_of(&self, kind: SimEventKind) -> Vec<SimEvent> {
            self.events().into_iter().filter(|e| e.kind == kind).collect()
        }

        pub fn max_concurrent_senders(&self) -> usize {
            self.state.lock().unwrap().max_concurrent_senders
        }

        /// Receivers launched but never killed
        pub fn live_receivers(&self) -> usize {
            self.state
                .lock()
                .unwrap()
                .processes
                .values()
                .filter(|p| !p.killed)
                .count()
        }

        fn behavior(&self, host: &str) -> HostBehavior {
            self.behaviors
                .lock()
                .unwrap()
                .get(host)
                .copied()
                .unwrap_or(HostBehavior::Healthy)
        }

        fn record(&self, host: &str, kind: SimEventKind, detail: impl Into<String>) {
            self.state.lock().unwrap().events.push(SimEvent {
                host: host.to_string(),
                kind,
                detail: detail.into(),
                at: Instant::now(),
            });
        }

        fn flag(tokens: &[String], name: &str) -> Option<String> {
            tokens
                .iter()
                .position(|t| t == name)
                .and_then(|i| tokens.get(i + 1))
                .cloned()
        }

        fn recv_line(&self, process: &SimProcess, behavior: HostBehavior) -> Option<String> {
            let mut report = RecvReport {
                status: RecvStatus::NoReceipt,
                group: "239.1.1.1".to_string(),
                port: 5000,
                bind: Some("group".to_string()),
                from: None,
                payload: None,
                observed_at: None,
                foreign: 0,
                detail: None,
            };

            match behavior {
                HostBehavior::GarbledReceiver => {
                    return Some("Received multicast from somewhere\n".to_string())
                }
                HostBehavior::HungReceiver => return None,
                HostBehavior::SilentReceiver => {}
                HostBehavior::CrosstalkReceiver => {
                    report.status = RecvStatus::Foreign;
                    report.foreign = 1;
                }
                _ => {
                    let state = self.state.lock().unwrap();
                    let sender = process
                        .token
                        .as_ref()
                        .and_then(|token| state.sent.get(token).map(|s| (token, s)));
                    if let Some((token, sender)) = sender {
                        let dropped = self
                            .dropped
                            .lock()
                            .unwrap()
                            .contains(&(sender.clone(), process.host.clone()));
                        if !dropped {
                            let (run_id, round) = token.split_once('/').unwrap_or((token.as_str(), "0"));
                            let payload =
                                ProbePayload::new(run_id, round.parse().unwrap_or(0), sender.clone());
                            report.status = RecvStatus::Received;
                            report.from = Some(format!("{}:5000", sender));
                            report.payload = Some(payload.encode());
                            report.observed_at = Some(chrono::Utc::now().timestamp_millis());
                        }
                    }
                }
            }

            Some(format!("{}\n", ProbeReport::Recv(report).to_line()))
        }

        async fn run_sender(&self, host: &Host, tokens: &[String]) -> CommandOutput {
            {
                let mut state = self.state.lock().unwrap();
                state.active_senders += 1;
                state.max_concurrent_senders =
                    state.max_concurrent_senders.max(state.active_senders);
            }
            self.record(&host.name, SimEventKind::SendStarted, "");
            tokio::time::sleep(self.send_duration).await;

            let payload = Self::flag(tokens, "--payload").unwrap_or_default();
            let failed = self.behavior(&host.name) == HostBehavior::SendError;
            if !failed {
                if let Some(decoded) = ProbePayload::decode(&payload) {
                    self.state
                        .lock()
                        .unwrap()
                        .sent
                        .insert(decoded.token(), host.name.clone());
                }
            }

            let report = SendReport {
                status: if failed { SendStatus::Error } else { SendStatus::Sent },
                group: "239.1.1.1".to_string(),
                port: 5000,
                ttl: 1,
                interface: None,
                payload,
                sent_at: chrono::Utc::now().timestamp_millis(),
                detail: failed.then(|| "Network is unreachable (os error 101)".to_string()),
            };

            self.state.lock().unwrap().active_senders -= 1;
            self.record(&host.name, SimEventKind::SendFinished, "");

            CommandOutput {
                stdout: format!("{}\n", ProbeReport::Send(report).to_line()),
                stderr: String::new(),
                exit_code: Some(if failed { 2 } else { 0 }),
                finished: true,
            }
        }
    }

    #[async_trait]
    impl RemoteExecutor for SimulatedExecutor {
        async fn run(
            &self,
            host: &Host,
            command: &str,
            mode: LaunchMode,
        ) -> Result<Launched, ExecutionError> {
            if self.behavior(&host.name) == HostBehavior::Unreachable {
                return Err(ExecutionError::Connection(format!(
                    "ssh: connect to host {} port 22: No route to host",
                    host.address()
                )));
            }

            let tokens = shell_words::split(command)
                .map_err(|e| ExecutionError::SpawnFailed(e.to_string()))?;
            let has = |word: &str| tokens.iter().any(|t| t == word);

            if has("send") && mode == LaunchMode::Foreground {
                return Ok(Launched::Completed(self.run_sender(host, &tokens).await));
            }

            if has("recv") && mode == LaunchMode::Background {
                let handle = {
                    let mut state = self.state.lock().unwrap();
                    state.next_handle += 1;
                    let handle = ProcessHandle(state.next_handle);
                    state.processes.insert(
                        handle,
                        SimProcess {
                            host: host.name.clone(),
                            token: Self::flag(&tokens, "--expect"),
                            log_path: Self::flag(&tokens, "--log"),
                            killed: false,
                        },
                    );
                    handle
                };
                self.record(&host.name, SimEventKind::ReceiverStarted, handle.to_string());
                return Ok(Launched::Running(handle));
            }

            let kind = if has("rm") {
                SimEventKind::Cleanup
            } else {
                SimEventKind::Command
            };
            self.record(&host.name, kind, command);
            Ok(Launched::Completed(CommandOutput {
                finished: true,
                exit_code: Some(0),
                ..Default::default()
            }))
        }

        async fn output(
            &self,
            handle: ProcessHandle,
            max_wait: Duration,
        ) -> Result<CommandOutput, ExecutionError> {
            let process = self
                .state
                .lock()
                .unwrap()
                .processes
                .get(&handle)
                .cloned()
                .ok_or(ExecutionError::UnknownHandle(handle))?;

            let behavior = self.behavior(&process.host);
            match behavior {
                HostBehavior::OutputLost | HostBehavior::Vanished => {
                    Err(ExecutionError::Io("broken pipe".to_string()))
                }
                HostBehavior::HungReceiver => {
                    tokio::time::sleep(max_wait).await;
                    Ok(CommandOutput {
                        stdout: "listening on 239.1.1.1:5000\n".to_string(),
                        finished: false,
                        ..Default::default()
                    })
                }
                _ => Ok(CommandOutput {
                    stdout: self.recv_line(&process, behavior).unwrap_or_default(),
                    stderr: String::new(),
                    exit_code: Some(0),
                    finished: true,
                }),
            }
        }

        async fn kill(&self, handle: ProcessHandle) -> Result<Termination, ExecutionError> {
            let host = {
                let mut state = self.state.lock().unwrap();
                let process = state
                    .processes
                    .get_mut(&handle)
                    .ok_or(ExecutionError::UnknownHandle(handle))?;
                if process.killed {
                    return Ok(Termination::AlreadyExited);
                }
                process.killed = true;
                process.host.clone()
            };
            self.record(&host, SimEventKind::ReceiverKilled, handle.to_string());
            Ok(Termination::Terminated)
        }

        async fn fetch(&self, host: &Host, remote_path: &str) -> Result<Vec<u8>, ExecutionError> {
            let behavior = self.behavior(&host.name);
            if behavior == HostBehavior::Unreachable {
                return Err(ExecutionError::Connection(host.address().to_string()));
            }

            let process = self
                .state
                .lock()
                .unwrap()
                .processes
                .values()
                .find(|p| p.host == host.name && p.log_path.as_deref() == Some(remote_path))
                .cloned();

            match (behavior, process) {
                (HostBehavior::Vanished, _) | (_, None) => Err(ExecutionError::Transfer(format!(
                    "scp: {}: No such file or directory",
                    remote_path
                ))),
                // The log carries the terminal line stdout would have carried
                (_, Some(process)) => Ok(self
                    .recv_line(&process, HostBehavior::Healthy)
                    .unwrap_or_default()
                    .into_bytes()),
            }
        }

        async fn push(
            &self,
            host: &Host,
            local_path: &Path,
            remote_path: &str,
        ) -> Result<(), ExecutionError> {
            if self.behavior(&host.name) == HostBehavior::Unreachable {
                return Err(ExecutionError::Connection(host.address().to_string()));
            }
            self.record(
                &host.name,
                SimEventKind::Pushed,
                format!("{} -> {}", local_path.display(), remote_path),
            );
            Ok(())
        }
    }
}
