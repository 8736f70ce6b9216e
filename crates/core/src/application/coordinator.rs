// Coordinator - drives a full run
//
// One round per host, in inventory order, strictly sequential. The matrix
// is mutated only here, once per completed round, and every round is
// persisted before the next one starts.

use super::config::SweepConfig;
use super::deploy::Deployer;
use super::round_executor::RoundExecutor;
use super::snapshot::SnapshotCollector;
use crate::domain::{Inventory, OutcomeStatus, ReachabilityMatrix, Round, RunReport, RunSummary};
use crate::error::Result;
use crate::port::{IdProvider, RemoteExecutor, ReportStore, TimeProvider};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Per-invocation options that are not part of the sweep configuration
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Push this local probe binary to every host before round 1
    pub deploy_probe: Option<PathBuf>,
    /// Capture read-only network diagnostics from every host before round 1
    pub capture_snapshots: bool,
}

pub struct Coordinator {
    config: Arc<SweepConfig>,
    executor: Arc<dyn RemoteExecutor>,
    store: Arc<dyn ReportStore>,
    time_provider: Arc<dyn TimeProvider>,
    id_provider: Arc<dyn IdProvider>,
    rounds: RoundExecutor,
}

impl Coordinator {
    /// Validates `config` up front so a bad setting fails before any host
    /// is touched
    pub fn new(
        config: SweepConfig,
        executor: Arc<dyn RemoteExecutor>,
        store: Arc<dyn ReportStore>,
        time_provider: Arc<dyn TimeProvider>,
        id_provider: Arc<dyn IdProvider>,
    ) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let rounds = RoundExecutor::new(
            Arc::clone(&executor),
            Arc::clone(&config),
            Arc::clone(&time_provider),
        );

        Ok(Self {
            config,
            executor,
            store,
            time_provider,
            id_provider,
            rounds,
        })
    }

    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    /// Run every round and persist the report
    ///
    /// # Errors
    /// Persistence failures abort the run; rounds already appended stay in
    /// the store. Probe and host failures never do: they become outcomes.
    pub async fn run(&self, inventory: &Inventory, options: &RunOptions) -> Result<RunSummary> {
        let run_id = self.id_provider.generate_id();
        let mut report = RunReport::new(
            run_id.clone(),
            self.time_provider.now_millis(),
            inventory.hosts().to_vec(),
            serde_json::to_value(self.config.as_ref())?,
        );
        self.store.begin_run(&report).await?;

        info!(
            run_id = %run_id,
            hosts = inventory.len(),
            pairs = inventory.pair_count(),
            group = %self.config.probe.group,
            port = self.config.probe.port,
            "Run started"
        );

        if let Some(probe) = &options.deploy_probe {
            let deployer = Deployer::new(Arc::clone(&self.executor), Arc::clone(&self.config));
            let failed = deployer
                .deploy(inventory, probe)
                .await
                .iter()
                .filter(|r| !r.is_ok())
                .count();
            if failed > 0 {
                warn!(failed, "Probe missing on some hosts, their pairs will be EXEC_ERROR");
            }
        }

        if options.capture_snapshots {
            let collector = SnapshotCollector::new(
                Arc::clone(&self.executor),
                Arc::clone(&self.config),
                Arc::clone(&self.time_provider),
            );
            for snapshot in collector.collect(inventory).await {
                self.store.record_snapshot(&report, &snapshot).await?;
                report.snapshots.push(snapshot);
            }
        }

        let mut matrix = ReachabilityMatrix::new(inventory.names());
        let mut cleanup_failures = 0;

        for index in 0..inventory.len() {
            if index > 0 {
                tokio::time::sleep(self.config.timing.settle_delay()).await;
            }

            let round = Round::for_sender(inventory, index, self.time_provider.now_millis())?;
            let result = self.rounds.execute(&run_id, &round).await;

            if let Err(e) = matrix.fold_round(&result) {
                // Whatever did not fold is filled as EXEC_ERROR below
                error!(round = index, error = %e, "Round outcomes could not be folded");
            }
            cleanup_failures += result.cleanup_failures;

            self.store.append_round(&report, &result).await?;
            report.rounds.push(result);
        }

        let filled_pairs = matrix.fill_missing(OutcomeStatus::ExecError);
        if filled_pairs > 0 {
            warn!(filled_pairs, "Pairs without a round result recorded as EXEC_ERROR");
        }

        report.finished_at = Some(self.time_provider.now_millis());
        let location = self.store.finalize(&report).await?;

        let summary = RunSummary {
            run_id,
            exec_errors: matrix.operational_failures(),
            matrix,
            location,
            filled_pairs,
            cleanup_failures,
        };

        info!(
            run_id = %summary.run_id,
            success = summary.count(OutcomeStatus::Success),
            fail = summary.count(OutcomeStatus::Fail),
            timeout = summary.count(OutcomeStatus::Timeout),
            exec_error = summary.exec_errors,
            cleanup_failures = summary.cleanup_failures,
            location = %summary.location,
            "Run finished"
        );
        Ok(summary)
    }
}
