// Report Store Port (Interface)

use crate::domain::{HostSnapshot, RoundResult, RunId, RunReport};
use crate::error::Result;
use async_trait::async_trait;

/// Persistence interface for run reports.
///
/// Reports are append-only: one `begin_run`, any number of `append_round`
/// calls (one per completed round, so a crash keeps finished rounds), one
/// `finalize`.
#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Create the report header for a new run
    async fn begin_run(&self, report: &RunReport) -> Result<()>;

    /// Persist one completed round and its outcomes
    async fn append_round(&self, report: &RunReport, round: &RoundResult) -> Result<()>;

    /// Persist a host network snapshot captured before the first round
    async fn record_snapshot(&self, report: &RunReport, snapshot: &HostSnapshot) -> Result<()>;

    /// Stamp the report as finished and return where it lives
    async fn finalize(&self, report: &RunReport) -> Result<String>;

    /// Re-derive a stored report
    async fn load_run(&self, run_id: &RunId) -> Result<Option<RunReport>>;

    /// Most recently started run
    async fn latest_run_id(&self) -> Result<Option<RunId>>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::sync::{Arc, Mutex};

    /// In-memory report store; `fail_appends` simulates a broken disk
    #[derive(Default)]
    pub struct InMemoryReportStore {
        reports: Arc<Mutex<Vec<RunReport>>>,
        fail_appends: bool,
    }

    impl InMemoryReportStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn failing() -> Self {
            Self {
                fail_appends: true,
                ..Self::default()
            }
        }

        pub fn reports(&self) -> Vec<RunReport> {
            self.reports.lock().unwrap().clone()
        }

        fn with_report<T>(&self, run_id: &str, f: impl FnOnce(&mut RunReport) -> T) -> Result<T> {
            let mut reports = self.reports.lock().unwrap();
            let report = reports
                .iter_mut()
                .find(|r| r.run_id == run_id)
                .ok_or_else(|| AppError::NotFound(format!("Run {} not found", run_id)))?;
            Ok(f(report))
        }
    }

    #[async_trait]
    impl ReportStore for InMemoryReportStore {
        async fn begin_run(&self, report: &RunReport) -> Result<()> {
            let mut header = report.clone();
            header.rounds.clear();
            header.snapshots.clear();
            self.reports.lock().unwrap().push(header);
            Ok(())
        }

        async fn append_round(&self, report: &RunReport, round: &RoundResult) -> Result<()> {
            if self.fail_appends {
                return Err(AppError::Database("disk I/O error".to_string()));
            }
            self.with_report(&report.run_id, |r| r.rounds.push(round.clone()))
        }

        async fn record_snapshot(&self, report: &RunReport, snapshot: &HostSnapshot) -> Result<()> {
            self.with_report(&report.run_id, |r| r.snapshots.push(snapshot.clone()))
        }

        async fn finalize(&self, report: &RunReport) -> Result<String> {
            self.with_report(&report.run_id, |r| r.finished_at = report.finished_at)?;
            Ok(format!("memory://{}", report.run_id))
        }

        async fn load_run(&self, run_id: &RunId) -> Result<Option<RunReport>> {
            Ok(self
                .reports
                .lock()
                .unwrap()
                .iter()
                .find(|r| &r.run_id == run_id)
                .cloned())
        }

        async fn latest_run_id(&self) -> Result<Option<RunId>> {
            Ok(self.reports.lock().unwrap().last().map(|r| r.run_id.clone()))
        }
    }
}
