// Receiver task - owns one receiver's lifecycle within a round

use super::signal::{Directive, RoundSignal};
use crate::application::classify::classify_receiver;
use crate::application::constants::HOUSEKEEPING_TIMEOUT;
use crate::application::process::RemoteProcess;
use crate::domain::{Host, ProbePayload, ProbeReport, ReceiverOutcome};
use crate::port::{CommandOutput, ExecutionError, RemoteExecutor};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// What one receiver task hands back to the round executor
#[derive(Debug)]
pub struct ReceiverResult {
    pub outcome: ReceiverOutcome,
    /// Raw text the receiver produced, for audit
    pub transcript: String,
    pub cleanup_failed: bool,
}

pub struct ReceiverTask {
    pub executor: Arc<dyn RemoteExecutor>,
    pub host: Host,
    pub command: String,
    pub log_path: String,
    pub cleanup_command: String,
    pub expected: ProbePayload,
    pub collect_timeout: Duration,
    /// Notified once the launch attempt has returned, successful or not
    pub launched: mpsc::Sender<()>,
    pub signal: RoundSignal,
}

impl ReceiverTask {
    pub async fn run(mut self) -> ReceiverResult {
        let started =
            RemoteProcess::spawn(Arc::clone(&self.executor), &self.host, &self.command).await;
        let _ = self.launched.send(()).await;

        let mut process = match started {
            Ok(process) => process,
            Err(e) => {
                warn!(host = %self.host.name, error = %e, "Receiver launch failed");
                return ReceiverResult {
                    outcome: ReceiverOutcome::exec_error(
                        &self.host.name,
                        format!("receiver launch failed: {}", e),
                    ),
                    transcript: String::new(),
                    cleanup_failed: false,
                };
            }
        };
        debug!(host = %self.host.name, handle = %process.handle(), "Receiver listening");

        let directive = self.signal.wait().await;
        let (outcome, transcript) = match directive {
            Directive::Collect => self.collect(&mut process).await,
            Directive::Abort(reason) => {
                (ReceiverOutcome::exec_error(&self.host.name, reason), String::new())
            }
        };

        let cleanup_failed = self.cleanup(&mut process).await;

        ReceiverResult {
            outcome,
            transcript,
            cleanup_failed,
        }
    }

    async fn collect(&self, process: &mut RemoteProcess) -> (ReceiverOutcome, String) {
        match process.collect_output(self.collect_timeout).await {
            Ok(output) => {
                let outcome = classify_receiver(&self.host.name, &output, &self.expected);
                (outcome, output.transcript())
            }
            Err(e) => {
                warn!(host = %self.host.name, error = %e, "Receiver output unavailable, reading its log");
                self.collect_from_log(e).await
            }
        }
    }

    /// The probe appends its terminal line to a log on the host, so a lost
    /// output stream can still be classified
    async fn collect_from_log(&self, cause: ExecutionError) -> (ReceiverOutcome, String) {
        let fetched = tokio::time::timeout(
            self.collect_timeout,
            self.executor.fetch(&self.host, &self.log_path),
        )
        .await;

        match fetched {
            Ok(Ok(bytes)) => {
                let log = String::from_utf8_lossy(&bytes).into_owned();
                if ProbeReport::parse_output(&log).is_none() {
                    let outcome = ReceiverOutcome::exec_error(
                        &self.host.name,
                        format!("output retrieval failed ({}) and log has no report", cause),
                    );
                    return (outcome, log);
                }
                let output = CommandOutput {
                    stdout: log,
                    finished: true,
                    ..Default::default()
                };
                let outcome = classify_receiver(&self.host.name, &output, &self.expected);
                (outcome, output.stdout)
            }
            Ok(Err(e)) => (
                ReceiverOutcome::exec_error(
                    &self.host.name,
                    format!("output retrieval failed ({}); log fetch failed ({})", cause, e),
                ),
                String::new(),
            ),
            Err(_) => (
                ReceiverOutcome::exec_error(
                    &self.host.name,
                    format!("output retrieval failed ({}); log fetch timed out", cause),
                ),
                String::new(),
            ),
        }
    }

    /// Stop the listener, then remove its log. A successful stop means the
    /// listener is gone on the host, so the log cannot be rewritten after
    /// removal. Runs whatever the outcome was; failures are reported, never
    /// escalated.
    async fn cleanup(&self, process: &mut RemoteProcess) -> bool {
        let stop = process.stop().await;

        let removal = tokio::time::timeout(
            HOUSEKEEPING_TIMEOUT,
            RemoteProcess::run_foreground(
                Arc::clone(&self.executor),
                &self.host,
                &self.cleanup_command,
            ),
        )
        .await;
        let removal_error = match removal {
            Ok(Ok(output)) if output.success() => None,
            Ok(Ok(output)) => Some(format!("exit {:?}: {}", output.exit_code, output.stderr.trim())),
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some("timed out".to_string()),
        };

        if let Some(error) = &removal_error {
            warn!(host = %self.host.name, log = %self.log_path, error = %error, "Receiver log cleanup failed");
        }
        if !stop.succeeded {
            warn!(
                host = %self.host.name,
                detail = ?stop.detail,
                "Receiver stop failed"
            );
        }

        !stop.succeeded || removal_error.is_some()
    }
}
