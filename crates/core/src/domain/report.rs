// Run Report Domain Model

use super::error::Result;
use super::host::{Host, HostName};
use super::matrix::ReachabilityMatrix;
use super::outcome::{OutcomeStatus, RoundResult};
use serde::{Deserialize, Serialize};

/// Run ID (UUID v4)
pub type RunId = String;

/// Raw output of one read-only diagnostic command captured before round 1
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSnapshot {
    pub host: HostName,
    pub command: String,
    pub captured_at: i64, // epoch ms
    pub exit_code: Option<i32>,
    pub output: String,
}

/// Persisted form of one invocation. Append-only: rounds are added as they
/// complete, `finished_at` is stamped once at the end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub started_at: i64, // epoch ms
    pub finished_at: Option<i64>,
    pub hosts: Vec<Host>,
    /// Effective sweep settings, for audit
    pub settings: serde_json::Value,
    pub rounds: Vec<RoundResult>,
    pub snapshots: Vec<HostSnapshot>,
}

impl RunReport {
    pub fn new(
        run_id: impl Into<String>,
        started_at: i64,
        hosts: Vec<Host>,
        settings: serde_json::Value,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            started_at,
            finished_at: None,
            hosts,
            settings,
            rounds: Vec::new(),
            snapshots: Vec::new(),
        }
    }

    pub fn host_names(&self) -> Vec<HostName> {
        self.hosts.iter().map(|h| h.name.clone()).collect()
    }

    /// Re-derive the matrix from the recorded rounds. Pairs from rounds that
    /// never completed are absent; callers decide whether to fill them.
    pub fn matrix(&self) -> Result<ReachabilityMatrix> {
        let mut matrix = ReachabilityMatrix::new(self.host_names());
        for round in &self.rounds {
            matrix.fold_round(round)?;
        }
        Ok(matrix)
    }

    pub fn is_finalized(&self) -> bool {
        self.finished_at.is_some()
    }
}

/// What the coordinator hands back to the caller after a full run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: RunId,
    pub matrix: ReachabilityMatrix,
    /// Where the persisted report lives
    pub location: String,
    pub exec_errors: usize,
    /// Pairs that had no round result and were filled with EXEC_ERROR
    pub filled_pairs: usize,
    /// Receiver processes whose termination or cleanup failed (logged only)
    pub cleanup_failures: usize,
}

impl RunSummary {
    /// 0 only when the run completed with zero EXEC_ERROR entries.
    /// FAIL and TIMEOUT never affect it.
    pub fn exit_code(&self) -> i32 {
        if self.exec_errors == 0 {
            0
        } else {
            1
        }
    }

    pub fn count(&self, status: OutcomeStatus) -> usize {
        self.matrix.count(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(matrix: ReachabilityMatrix) -> RunSummary {
        RunSummary {
            run_id: "run".into(),
            exec_errors: matrix.count(OutcomeStatus::ExecError),
            matrix,
            location: "memory".into(),
            filled_pairs: 0,
            cleanup_failures: 0,
        }
    }

    #[test]
    fn test_exit_code_ignores_measurement_outcomes() {
        let mut matrix = ReachabilityMatrix::new(vec!["a".into(), "b".into()]);
        matrix.record("a", "b", OutcomeStatus::Timeout).unwrap();
        matrix.record("b", "a", OutcomeStatus::Fail).unwrap();

        assert_eq!(summary(matrix).exit_code(), 0);
    }

    #[test]
    fn test_exit_code_reflects_exec_error() {
        let mut matrix = ReachabilityMatrix::new(vec!["a".into(), "b".into()]);
        matrix.record("a", "b", OutcomeStatus::Success).unwrap();
        matrix.record("b", "a", OutcomeStatus::ExecError).unwrap();

        assert_eq!(summary(matrix).exit_code(), 1);
    }
}
