//! Runs persisted through the SQLite report store
//!
//! The stored rows must be enough to re-derive the exact matrix the run
//! produced.

use std::sync::Arc;

use castcheck_core::application::{Coordinator, RunOptions, SweepConfig, TimingSettings};
use castcheck_core::domain::{Host, Inventory, OutcomeStatus};
use castcheck_core::port::id_provider::mocks::SequentialIdProvider;
use castcheck_core::port::remote_executor::mocks::{HostBehavior, SimulatedExecutor};
use castcheck_core::port::time_provider::SystemTimeProvider;
use castcheck_core::port::ReportStore;
use castcheck_infra_sqlite::SqliteReportStore;

fn fast_config() -> SweepConfig {
    SweepConfig {
        timing: TimingSettings {
            grace_period_ms: 5,
            listen_window_ms: 100,
            collection_margin_ms: 10,
            collect_timeout_ms: 30,
            sender_timeout_ms: 500,
            settle_delay_ms: 5,
        },
        ..Default::default()
    }
}

fn inventory(names: &[&str]) -> Inventory {
    Inventory::new(names.iter().map(|n| Host::new(*n)).collect()).unwrap()
}

#[tokio::test]
async fn test_stored_report_rederives_matrix() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("reports.db");
    let db_path = db_path.to_str().unwrap();

    let sim = Arc::new(
        SimulatedExecutor::new()
            .with_behavior("c", HostBehavior::SilentReceiver)
            .with_behavior("d", HostBehavior::Unreachable),
    );
    let store = Arc::new(SqliteReportStore::open(db_path).await.unwrap());
    let coordinator = Coordinator::new(
        fast_config(),
        sim,
        store.clone(),
        Arc::new(SystemTimeProvider),
        Arc::new(SequentialIdProvider::default()),
    )
    .unwrap();

    let summary = coordinator
        .run(&inventory(&["a", "b", "c", "d"]), &RunOptions::default())
        .await
        .unwrap();

    assert_eq!(summary.location, format!("{}#run-1", db_path));

    let report = store.load_run(&summary.run_id).await.unwrap().unwrap();
    assert!(report.is_finalized());
    assert_eq!(report.rounds.len(), 4);
    assert_eq!(report.matrix().unwrap().entries(), summary.matrix.entries());
    assert_eq!(
        report.matrix().unwrap().get("a", "c"),
        Some(OutcomeStatus::Timeout)
    );

    // Raw receiver text is kept for audit
    let round_a = &report.rounds[0];
    assert!(round_a.receiver_outputs["b"].contains("CASTCHECK-RESULT"));
    assert!(round_a.sender_output.as_deref().unwrap().contains("\"role\":\"send\""));
}

/// Reopening the database sees the same runs
#[tokio::test]
async fn test_reports_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("reports.db");
    let db_path = db_path.to_str().unwrap();

    let run_id = {
        let store = Arc::new(SqliteReportStore::open(db_path).await.unwrap());
        let coordinator = Coordinator::new(
            fast_config(),
            Arc::new(SimulatedExecutor::new()),
            store,
            Arc::new(SystemTimeProvider),
            Arc::new(SequentialIdProvider::default()),
        )
        .unwrap();
        coordinator
            .run(&inventory(&["a", "b"]), &RunOptions::default())
            .await
            .unwrap()
            .run_id
    };

    let store = SqliteReportStore::open(db_path).await.unwrap();
    assert_eq!(store.latest_run_id().await.unwrap(), Some(run_id.clone()));

    let report = store.load_run(&run_id).await.unwrap().unwrap();
    assert_eq!(report.matrix().unwrap().count(OutcomeStatus::Success), 2);
    assert_eq!(report.settings["probe"]["port"], 5000);
}

/// Snapshots captured before round 1 are stored with the run
#[tokio::test]
async fn test_snapshots_are_persisted() {
    let store = Arc::new(SqliteReportStore::open("sqlite::memory:").await.unwrap());
    let coordinator = Coordinator::new(
        fast_config(),
        Arc::new(SimulatedExecutor::new()),
        store.clone(),
        Arc::new(SystemTimeProvider),
        Arc::new(SequentialIdProvider::default()),
    )
    .unwrap();
    let options = RunOptions {
        capture_snapshots: true,
        ..Default::default()
    };

    let summary = coordinator
        .run(&inventory(&["a", "b"]), &options)
        .await
        .unwrap();

    let report = store.load_run(&summary.run_id).await.unwrap().unwrap();
    let commands = coordinator.config().remote.snapshot_commands.len();
    assert_eq!(report.snapshots.len(), 2 * commands);
    assert!(report.snapshots.iter().all(|s| s.exit_code == Some(0)));
}
