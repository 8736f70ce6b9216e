// Round Executor - one sender, every other host listening

mod receiver;
mod signal;

use receiver::{ReceiverResult, ReceiverTask};
use signal::round_signal;

use super::classify::classify_sender;
use super::config::SweepConfig;
use super::probe_command::ProbeCommands;
use super::process::RemoteProcess;
use crate::domain::{OutcomeStatus, ProbePayload, ReceiverOutcome, Round, RoundResult};
use crate::port::{RemoteExecutor, TimeProvider};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Runs a single round to completion
///
/// Receivers are launched concurrently, one task each. After the grace
/// period the sender transmits once in the foreground; after the listen
/// window every receiver collects, classifies and cleans up independently.
/// A round always yields exactly one outcome per receiver.
///
/// If the sender only returns after the listen window has closed, the
/// datagram may have reached nobody still listening; silence in that round
/// is recorded as EXEC_ERROR instead of TIMEOUT.
pub struct RoundExecutor {
    executor: Arc<dyn RemoteExecutor>,
    config: Arc<SweepConfig>,
    time_provider: Arc<dyn TimeProvider>,
}

impl RoundExecutor {
    pub fn new(
        executor: Arc<dyn RemoteExecutor>,
        config: Arc<SweepConfig>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            executor,
            config,
            time_provider,
        }
    }

    pub async fn execute(&self, run_id: &str, round: &Round) -> RoundResult {
        let timing = &self.config.timing;
        let commands = ProbeCommands::new(&self.config);
        let payload = ProbePayload::new(run_id, round.index, round.sender.name.clone());

        info!(
            run_id = %run_id,
            round = round.index,
            sender = %round.sender.name,
            receivers = round.receivers.len(),
            "Starting round"
        );

        // 1. Launch every receiver concurrently
        let (signal_tx, signal) = round_signal();
        let (launched_tx, mut launched_rx) = mpsc::channel(round.receivers.len().max(1));
        let tasks: Vec<_> = round
            .receivers
            .iter()
            .map(|receiver| {
                let log_path = commands.receiver_log_path(&payload, receiver);
                let task = ReceiverTask {
                    executor: Arc::clone(&self.executor),
                    host: receiver.clone(),
                    command: commands.receiver(receiver, &payload),
                    cleanup_command: commands.cleanup(&log_path),
                    log_path,
                    expected: payload.clone(),
                    collect_timeout: timing.collect_timeout(),
                    launched: launched_tx.clone(),
                    signal: signal.clone(),
                };
                (receiver.name.clone(), tokio::spawn(task.run()))
            })
            .collect();
        drop(launched_tx);
        drop(signal);

        let launch_deadline = Instant::now() + timing.sender_timeout();
        let mut launched = 0;
        while launched < tasks.len() {
            match tokio::time::timeout_at(launch_deadline, launched_rx.recv()).await {
                Ok(Some(())) => launched += 1,
                Ok(None) | Err(_) => break,
            }
        }
        let receivers_launched_at = Instant::now();

        // 2. Grace period: heuristic, no acknowledgment from receivers
        tokio::time::sleep(timing.grace_period()).await;

        // 3. Sender, foreground, bounded
        let sender_command = commands.sender(&round.sender, &payload);
        let sent = tokio::time::timeout(
            timing.sender_timeout(),
            RemoteProcess::run_foreground(
                Arc::clone(&self.executor),
                &round.sender,
                &sender_command,
            ),
        )
        .await;
        let sender_finished = Instant::now();

        let (sender_output, sender_failure) = match sent {
            Ok(Ok(output)) => {
                let failure = classify_sender(&output, &payload).err();
                (Some(output.transcript()), failure)
            }
            Ok(Err(e)) => (None, Some(format!("sender launch failed: {}", e))),
            Err(_) => (
                None,
                Some(format!(
                    "sender did not finish within {}ms",
                    timing.sender_timeout_ms
                )),
            ),
        };

        let window_closed = receivers_launched_at + timing.listen_window();
        let late_by = (sender_failure.is_none() && sender_finished > window_closed)
            .then(|| sender_finished - window_closed);

        // 4. Listen window, then collection; or abort when nothing was sent
        match &sender_failure {
            None => {
                if let Some(late) = late_by {
                    warn!(
                        sender = %round.sender.name,
                        late_ms = late.as_millis() as u64,
                        "Sender finished after the listen window closed"
                    );
                }
                info!(sender = %round.sender.name, token = %payload.token(), "Probe transmitted");
                let collect_at =
                    receivers_launched_at + timing.listen_window() + timing.collection_margin();
                tokio::time::sleep_until(collect_at).await;
                signal_tx.collect();
            }
            Some(reason) => {
                warn!(sender = %round.sender.name, reason = %reason, "Sender step failed, aborting round");
                signal_tx.abort(format!("sender {} failed: {}", round.sender.name, reason));
            }
        }

        // 5-6. Per-receiver outcomes; tasks clean up before returning
        let mut outcomes = Vec::with_capacity(tasks.len());
        let mut receiver_outputs = BTreeMap::new();
        let mut cleanup_failures = 0;
        for (name, task) in tasks {
            match task.await {
                Ok(ReceiverResult {
                    outcome,
                    transcript,
                    cleanup_failed,
                }) => {
                    if cleanup_failed {
                        cleanup_failures += 1;
                    }
                    receiver_outputs.insert(name, transcript);
                    outcomes.push(match late_by {
                        Some(late) if outcome.status == OutcomeStatus::Timeout => {
                            ReceiverOutcome::exec_error(
                                outcome.host,
                                format!(
                                    "no receipt is inconclusive: sender finished {}ms after the listen window closed",
                                    late.as_millis()
                                ),
                            )
                        }
                        _ => outcome,
                    });
                }
                Err(e) => {
                    let message = join_error_message(e);
                    error!(host = %name, error = %message, "Receiver task died");
                    receiver_outputs.insert(name.clone(), String::new());
                    outcomes.push(ReceiverOutcome::exec_error(
                        name,
                        format!("receiver task failed: {}", message),
                    ));
                }
            }
        }

        let result = RoundResult {
            index: round.index,
            sender: round.sender.name.clone(),
            started_at: round.started_at,
            finished_at: self.time_provider.now_millis(),
            sender_ok: sender_failure.is_none(),
            sender_output,
            outcomes,
            receiver_outputs,
            cleanup_failures,
        };

        info!(
            round = result.index,
            sender = %result.sender,
            success = result.count(OutcomeStatus::Success),
            fail = result.count(OutcomeStatus::Fail),
            timeout = result.count(OutcomeStatus::Timeout),
            exec_error = result.count(OutcomeStatus::ExecError),
            "Round complete"
        );
        result
    }
}

fn join_error_message(e: JoinError) -> String {
    if e.is_cancelled() {
        return "cancelled".to_string();
    }
    let panic = e.into_panic();
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::config::TimingSettings;
    use crate::domain::{Host, Inventory};
    use crate::port::remote_executor::mocks::{HostBehavior, SimEventKind, SimulatedExecutor};
    use crate::port::time_provider::SystemTimeProvider;

    fn fast_config() -> Arc<SweepConfig> {
        Arc::new(SweepConfig {
            timing: TimingSettings {
                grace_period_ms: 10,
                listen_window_ms: 100,
                collection_margin_ms: 10,
                collect_timeout_ms: 30,
                sender_timeout_ms: 500,
                settle_delay_ms: 0,
            },
            ..Default::default()
        })
    }

    fn round(sender: usize) -> Round {
        let inventory =
            Inventory::new(vec![Host::new("a"), Host::new("b"), Host::new("c")]).unwrap();
        Round::for_sender(&inventory, sender, 0).unwrap()
    }

    async fn execute(sim: Arc<SimulatedExecutor>, round: &Round) -> RoundResult {
        let executor = RoundExecutor::new(sim, fast_config(), Arc::new(SystemTimeProvider));
        executor.execute("run-1", round).await
    }

    fn status(result: &RoundResult, host: &str) -> OutcomeStatus {
        result.outcome_for(host).unwrap().status
    }

    #[tokio::test]
    async fn test_healthy_round_succeeds_and_cleans_up() {
        let sim = Arc::new(SimulatedExecutor::new());

        let result = execute(Arc::clone(&sim), &round(0)).await;

        assert!(result.sender_ok);
        assert_eq!(result.outcomes.len(), 2);
        assert_eq!(result.count(OutcomeStatus::Success), 2);
        assert_eq!(result.cleanup_failures, 0);
        assert_eq!(sim.live_receivers(), 0);
        assert_eq!(sim.events_of(SimEventKind::Cleanup).len(), 2);
    }

    #[tokio::test]
    async fn test_receivers_started_before_sender() {
        let sim = Arc::new(SimulatedExecutor::new());

        execute(Arc::clone(&sim), &round(0)).await;

        let send = sim.events_of(SimEventKind::SendStarted)[0].at;
        for started in sim.events_of(SimEventKind::ReceiverStarted) {
            assert!(started.at < send);
        }
    }

    #[tokio::test]
    async fn test_unreachable_sender_marks_every_receiver() {
        let sim = Arc::new(SimulatedExecutor::new().with_behavior("a", HostBehavior::Unreachable));

        let result = execute(Arc::clone(&sim), &round(0)).await;

        assert!(!result.sender_ok);
        assert_eq!(result.count(OutcomeStatus::ExecError), 2);
        // Receivers were started, so they are still stopped and cleaned
        assert_eq!(sim.live_receivers(), 0);
        assert_eq!(sim.events_of(SimEventKind::Cleanup).len(), 2);
    }

    #[tokio::test]
    async fn test_send_error_marks_every_receiver() {
        let sim = Arc::new(SimulatedExecutor::new().with_behavior("a", HostBehavior::SendError));

        let result = execute(sim, &round(0)).await;

        assert!(!result.sender_ok);
        assert!(result.sender_output.is_some());
        assert_eq!(result.count(OutcomeStatus::ExecError), 2);
    }

    #[tokio::test]
    async fn test_receiver_failures_stay_independent() {
        let sim = Arc::new(
            SimulatedExecutor::new()
                .with_behavior("b", HostBehavior::Unreachable)
                .with_behavior("c", HostBehavior::SilentReceiver),
        );

        let result = execute(sim, &round(0)).await;

        assert_eq!(status(&result, "b"), OutcomeStatus::ExecError);
        assert_eq!(status(&result, "c"), OutcomeStatus::Timeout);
    }

    #[tokio::test]
    async fn test_garbled_and_crosstalk_are_fail() {
        let sim = Arc::new(
            SimulatedExecutor::new()
                .with_behavior("a", HostBehavior::GarbledReceiver)
                .with_behavior("c", HostBehavior::CrosstalkReceiver),
        );

        let result = execute(sim, &round(1)).await;

        assert_eq!(status(&result, "a"), OutcomeStatus::Fail);
        assert_eq!(status(&result, "c"), OutcomeStatus::Fail);
    }

    #[tokio::test]
    async fn test_hung_receiver_is_timeout_and_stopped() {
        let sim = Arc::new(SimulatedExecutor::new().with_behavior("b", HostBehavior::HungReceiver));

        let result = execute(Arc::clone(&sim), &round(0)).await;

        assert_eq!(status(&result, "b"), OutcomeStatus::Timeout);
        assert_eq!(status(&result, "c"), OutcomeStatus::Success);
        assert_eq!(sim.live_receivers(), 0);
    }

    #[tokio::test]
    async fn test_lost_output_falls_back_to_log() {
        let sim = Arc::new(
            SimulatedExecutor::new()
                .with_behavior("b", HostBehavior::OutputLost)
                .with_behavior("c", HostBehavior::Vanished),
        );

        let result = execute(sim, &round(0)).await;

        assert_eq!(status(&result, "b"), OutcomeStatus::Success);
        assert_eq!(status(&result, "c"), OutcomeStatus::ExecError);
    }

    #[tokio::test]
    async fn test_late_sender_makes_silence_inconclusive() {
        let sim = Arc::new(
            SimulatedExecutor::new()
                .with_send_duration(std::time::Duration::from_millis(200))
                .with_dropped_pair("a", "c"),
        );

        let result = execute(sim, &round(0)).await;

        assert!(result.sender_ok);
        // A datagram that did arrive is still evidence
        assert_eq!(status(&result, "b"), OutcomeStatus::Success);
        let c = result.outcome_for("c").unwrap();
        assert_eq!(c.status, OutcomeStatus::ExecError);
        assert!(c.detail.as_deref().unwrap().contains("after the listen window closed"));
    }

    #[tokio::test]
    async fn test_dropped_datagram_is_timeout() {
        let sim = Arc::new(SimulatedExecutor::new().with_dropped_pair("a", "c"));

        let result = execute(sim, &round(0)).await;

        assert_eq!(status(&result, "b"), OutcomeStatus::Success);
        assert_eq!(status(&result, "c"), OutcomeStatus::Timeout);
    }
}
