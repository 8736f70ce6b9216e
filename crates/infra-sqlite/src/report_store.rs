// SQLite ReportStore Implementation

use async_trait::async_trait;
use castcheck_core::domain::{
    HostSnapshot, OutcomeStatus, ReceiverOutcome, RoundResult, RunId, RunReport,
};
use castcheck_core::error::{AppError, Result};
use castcheck_core::port::ReportStore;
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Map sqlx failures onto report-store errors
///
/// Constraint codes get a report-level message: a unique violation means a
/// round or (sender, receiver) pair was written twice for the run, a foreign
/// key violation means rows for a run that was never begun.
pub(crate) fn map_sqlx_error(err: sqlx::Error) -> AppError {
    let sqlx::Error::Database(db_err) = &err else {
        return AppError::Database(err.to_string());
    };
    let code = db_err.code().map(|c| c.into_owned()).unwrap_or_default();

    // https://www.sqlite.org/rescode.html
    let message = match code.as_str() {
        "2067" | "1555" => format!(
            "Round or pair already recorded for this run: {}",
            db_err.message()
        ),
        "787" | "3850" => format!("Report rows reference an unknown run: {}", db_err.message()),
        "5" => format!("Report database locked by another writer: {}", db_err.message()),
        "" => format!("Report database error: {}", db_err.message()),
        _ => format!("Report database error [{}]: {}", code, db_err.message()),
    };
    AppError::Database(message)
}

pub struct SqliteReportStore {
    pool: SqlitePool,
    /// Database path or URL, used to build report locations
    location: String,
}

impl SqliteReportStore {
    pub fn new(pool: SqlitePool, location: impl Into<String>) -> Self {
        Self {
            pool,
            location: location.into(),
        }
    }

    /// Open (or create) a report database and bring its schema up to date
    pub async fn open(database_url: &str) -> Result<Self> {
        let pool = crate::create_pool(database_url).await?;
        crate::run_migrations(&pool).await?;
        Ok(Self::new(pool, database_url))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl ReportStore for SqliteReportStore {
    async fn begin_run(&self, report: &RunReport) -> Result<()> {
        let hosts = serde_json::to_string(&report.hosts)?;
        let settings = serde_json::to_string(&report.settings)?;

        sqlx::query(
            r#"
            INSERT INTO runs (run_id, started_at, finished_at, hosts, settings)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&report.run_id)
        .bind(report.started_at)
        .bind(report.finished_at)
        .bind(hosts)
        .bind(settings)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        info!(run_id = %report.run_id, hosts = report.hosts.len(), "Run report created");
        Ok(())
    }

    async fn append_round(&self, report: &RunReport, round: &RoundResult) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        sqlx::query(
            r#"
            INSERT INTO rounds (
                run_id, round_index, sender, started_at, finished_at,
                sender_ok, sender_output, cleanup_failures
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&report.run_id)
        .bind(round.index as i64)
        .bind(&round.sender)
        .bind(round.started_at)
        .bind(round.finished_at)
        .bind(round.sender_ok)
        .bind(&round.sender_output)
        .bind(round.cleanup_failures as i64)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        for (position, outcome) in round.outcomes.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO outcomes (
                    run_id, round_index, position, sender, receiver, status,
                    raw_payload, observed_at, detail, raw_output
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&report.run_id)
            .bind(round.index as i64)
            .bind(position as i64)
            .bind(&round.sender)
            .bind(&outcome.host)
            .bind(outcome.status.as_str())
            .bind(&outcome.raw_payload)
            .bind(outcome.observed_at)
            .bind(&outcome.detail)
            .bind(round.receiver_outputs.get(&outcome.host).cloned())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        }

        tx.commit().await.map_err(map_sqlx_error)?;

        debug!(
            run_id = %report.run_id,
            round = round.index,
            outcomes = round.outcomes.len(),
            "Round persisted"
        );
        Ok(())
    }

    async fn record_snapshot(&self, report: &RunReport, snapshot: &HostSnapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO snapshots (run_id, host, command, captured_at, exit_code, output)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&report.run_id)
        .bind(&snapshot.host)
        .bind(&snapshot.command)
        .bind(snapshot.captured_at)
        .bind(snapshot.exit_code)
        .bind(&snapshot.output)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn finalize(&self, report: &RunReport) -> Result<String> {
        let result = sqlx::query("UPDATE runs SET finished_at = ? WHERE run_id = ?")
            .bind(report.finished_at)
            .bind(&report.run_id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Run {} not found", report.run_id)));
        }

        let location = format!("{}#{}", self.location, report.run_id);
        info!(run_id = %report.run_id, location = %location, "Run report finalized");
        Ok(location)
    }

    async fn load_run(&self, run_id: &RunId) -> Result<Option<RunReport>> {
        let run = sqlx::query_as::<_, RunRow>(
            "SELECT run_id, started_at, finished_at, hosts, settings FROM runs WHERE run_id = ?",
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let Some(run) = run else {
            return Ok(None);
        };

        let rounds = sqlx::query_as::<_, RoundRow>(
            r#"
            SELECT round_index, sender, started_at, finished_at,
                   sender_ok, sender_output, cleanup_failures
            FROM rounds
            WHERE run_id = ?
            ORDER BY round_index
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let outcomes = sqlx::query_as::<_, OutcomeRow>(
            r#"
            SELECT round_index, receiver, status, raw_payload, observed_at, detail, raw_output
            FROM outcomes
            WHERE run_id = ?
            ORDER BY round_index, position
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let snapshots = sqlx::query_as::<_, SnapshotRow>(
            r#"
            SELECT host, command, captured_at, exit_code, output
            FROM snapshots
            WHERE run_id = ?
            ORDER BY id
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let mut report = run.into_report()?;
        for row in rounds {
            let index = row.round_index;
            let mut round = row.into_round();
            for outcome in outcomes.iter().filter(|o| o.round_index == index) {
                if let Some(raw) = &outcome.raw_output {
                    round
                        .receiver_outputs
                        .insert(outcome.receiver.clone(), raw.clone());
                }
                round.outcomes.push(outcome.to_outcome()?);
            }
            report.rounds.push(round);
        }
        report.snapshots = snapshots.into_iter().map(SnapshotRow::into_snapshot).collect();

        Ok(Some(report))
    }

    async fn latest_run_id(&self) -> Result<Option<RunId>> {
        sqlx::query_scalar("SELECT run_id FROM runs ORDER BY started_at DESC, rowid DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }
}

// Internal row types for database mapping
#[derive(sqlx::FromRow)]
struct RunRow {
    run_id: String,
    started_at: i64,
    finished_at: Option<i64>,
    hosts: String,
    settings: String,
}

impl RunRow {
    fn into_report(self) -> Result<RunReport> {
        let mut report = RunReport::new(
            self.run_id,
            self.started_at,
            serde_json::from_str(&self.hosts)?,
            serde_json::from_str(&self.settings)?,
        );
        report.finished_at = self.finished_at;
        Ok(report)
    }
}

#[derive(sqlx::FromRow)]
struct RoundRow {
    round_index: i64,
    sender: String,
    started_at: i64,
    finished_at: i64,
    sender_ok: bool,
    sender_output: Option<String>,
    cleanup_failures: i64,
}

impl RoundRow {
    fn into_round(self) -> RoundResult {
        RoundResult {
            index: self.round_index as usize,
            sender: self.sender,
            started_at: self.started_at,
            finished_at: self.finished_at,
            sender_ok: self.sender_ok,
            sender_output: self.sender_output,
            outcomes: Vec::new(),
            receiver_outputs: BTreeMap::new(),
            cleanup_failures: self.cleanup_failures as usize,
        }
    }
}

#[derive(sqlx::FromRow)]
struct OutcomeRow {
    round_index: i64,
    receiver: String,
    status: String,
    raw_payload: Option<String>,
    observed_at: Option<i64>,
    detail: Option<String>,
    raw_output: Option<String>,
}

impl OutcomeRow {
    fn to_outcome(&self) -> Result<ReceiverOutcome> {
        Ok(ReceiverOutcome {
            host: self.receiver.clone(),
            status: self.status.parse::<OutcomeStatus>()?,
            raw_payload: self.raw_payload.clone(),
            observed_at: self.observed_at,
            detail: self.detail.clone(),
        })
    }
}

#[derive(sqlx::FromRow)]
struct SnapshotRow {
    host: String,
    command: String,
    captured_at: i64,
    exit_code: Option<i32>,
    output: String,
}

impl SnapshotRow {
    fn into_snapshot(self) -> HostSnapshot {
        HostSnapshot {
            host: self.host,
            command: self.command,
            captured_at: self.captured_at,
            exit_code: self.exit_code,
            output: self.output,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use castcheck_core::domain::Host;

    async fn setup_store() -> (SqliteReportStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports.db");
        let store = SqliteReportStore::open(path.to_str().unwrap()).await.unwrap();
        (store, dir)
    }

    fn report() -> RunReport {
        RunReport::new(
            "run-1",
            1_000,
            vec![Host::new("a"), Host::new("b").with_user("ops")],
            serde_json::json!({ "port": 5000, "group": "239.1.1.1" }),
        )
    }

    fn round(index: usize, sender: &str, receiver: &str, status: OutcomeStatus) -> RoundResult {
        let mut outcome = ReceiverOutcome::new(receiver, status);
        if status == OutcomeStatus::Success {
            outcome = outcome.with_payload(format!("{{\"sender\":\"{}\"}}", sender), Some(1_500));
        } else {
            outcome = outcome.with_detail("no datagram within 8000 ms");
        }

        RoundResult {
            index,
            sender: sender.into(),
            started_at: 1_100 + index as i64,
            finished_at: 1_200 + index as i64,
            sender_ok: true,
            sender_output: Some("CASTCHECK-RESULT {}".into()),
            outcomes: vec![outcome],
            receiver_outputs: BTreeMap::from([(receiver.to_string(), "raw".to_string())]),
            cleanup_failures: index,
        }
    }

    #[tokio::test]
    async fn test_round_trip_full_report() {
        let (store, _dir) = setup_store().await;
        let mut report = report();

        store.begin_run(&report).await.unwrap();
        let snapshot = HostSnapshot {
            host: "a".into(),
            command: "ip maddr show".into(),
            captured_at: 1_050,
            exit_code: Some(0),
            output: "inet 224.0.0.1".into(),
        };
        store.record_snapshot(&report, &snapshot).await.unwrap();
        report.snapshots.push(snapshot);

        for r in [
            round(0, "a", "b", OutcomeStatus::Success),
            round(1, "b", "a", OutcomeStatus::Timeout),
        ] {
            store.append_round(&report, &r).await.unwrap();
            report.rounds.push(r);
        }

        report.finished_at = Some(2_000);
        let location = store.finalize(&report).await.unwrap();
        assert!(location.ends_with("reports.db#run-1"));

        let loaded = store.load_run(&report.run_id).await.unwrap().unwrap();
        assert_eq!(loaded, report);
        assert_eq!(
            loaded.matrix().unwrap().get("b", "a"),
            Some(OutcomeStatus::Timeout)
        );
    }

    #[tokio::test]
    async fn test_partial_report_keeps_completed_rounds() {
        let (store, _dir) = setup_store().await;
        let report = report();
        store.begin_run(&report).await.unwrap();
        store
            .append_round(&report, &round(0, "a", "b", OutcomeStatus::Success))
            .await
            .unwrap();

        let loaded = store.load_run(&report.run_id).await.unwrap().unwrap();

        assert!(!loaded.is_finalized());
        assert_eq!(loaded.rounds.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_pair_rejected_atomically() {
        let (store, _dir) = setup_store().await;
        let report = report();
        store.begin_run(&report).await.unwrap();
        store
            .append_round(&report, &round(0, "a", "b", OutcomeStatus::Success))
            .await
            .unwrap();

        // Same (sender, receiver) under a new round index
        let result = store
            .append_round(&report, &round(1, "a", "b", OutcomeStatus::Fail))
            .await;

        assert!(matches!(
            &result,
            Err(AppError::Database(message)) if message.contains("already recorded")
        ));
        let loaded = store.load_run(&report.run_id).await.unwrap().unwrap();
        assert_eq!(loaded.rounds.len(), 1);
    }

    #[tokio::test]
    async fn test_round_for_unknown_run_rejected() {
        let (store, _dir) = setup_store().await;

        let result = store
            .append_round(&report(), &round(0, "a", "b", OutcomeStatus::Success))
            .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_load_missing_run() {
        let (store, _dir) = setup_store().await;

        assert!(store.load_run(&"nope".to_string()).await.unwrap().is_none());
        assert!(store.latest_run_id().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_latest_run_id() {
        let (store, _dir) = setup_store().await;
        let first = report();
        let mut second = report();
        second.run_id = "run-2".into();
        second.started_at = 5_000;

        store.begin_run(&first).await.unwrap();
        store.begin_run(&second).await.unwrap();

        assert_eq!(store.latest_run_id().await.unwrap(), Some("run-2".to_string()));
    }

    #[tokio::test]
    async fn test_in_memory_database() {
        let store = SqliteReportStore::open("sqlite::memory:").await.unwrap();
        let report = report();

        store.begin_run(&report).await.unwrap();

        assert_eq!(store.latest_run_id().await.unwrap(), Some("run-1".to_string()));
    }
}
