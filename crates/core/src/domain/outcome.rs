// Receiver Outcome & Round Result Domain Model

use super::error::DomainError;
use super::host::HostName;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Terminal status of one receiver in one round
///
/// - `Success`: ran and observed the expected sender's datagram
/// - `Fail`: ran and disagreed (crosstalk, unparseable output, probe socket error)
/// - `Timeout`: ran and observed nothing within the listen window
/// - `ExecError`: did not complete execution at all
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeStatus {
    Success,
    Fail,
    Timeout,
    ExecError,
}

impl OutcomeStatus {
    pub const ALL: [OutcomeStatus; 4] = [
        OutcomeStatus::Success,
        OutcomeStatus::Fail,
        OutcomeStatus::Timeout,
        OutcomeStatus::ExecError,
    ];

    /// Operational failures count against the process exit status;
    /// FAIL and TIMEOUT are measurement results.
    pub fn is_operational(&self) -> bool {
        matches!(self, OutcomeStatus::ExecError)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeStatus::Success => "SUCCESS",
            OutcomeStatus::Fail => "FAIL",
            OutcomeStatus::Timeout => "TIMEOUT",
            OutcomeStatus::ExecError => "EXEC_ERROR",
        }
    }
}

impl std::fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OutcomeStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUCCESS" => Ok(OutcomeStatus::Success),
            "FAIL" => Ok(OutcomeStatus::Fail),
            "TIMEOUT" => Ok(OutcomeStatus::Timeout),
            "EXEC_ERROR" => Ok(OutcomeStatus::ExecError),
            other => Err(DomainError::UnknownStatus(other.to_string())),
        }
    }
}

/// Outcome for one receiver in one round. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiverOutcome {
    pub host: HostName,
    pub status: OutcomeStatus,
    /// Decoded datagram body, when one was received
    pub raw_payload: Option<String>,
    /// When the receiver observed the datagram (epoch ms, receiver clock)
    pub observed_at: Option<i64>,
    /// Human-readable reason for non-success outcomes
    pub detail: Option<String>,
}

impl ReceiverOutcome {
    pub fn new(host: impl Into<String>, status: OutcomeStatus) -> Self {
        Self {
            host: host.into(),
            status,
            raw_payload: None,
            observed_at: None,
            detail: None,
        }
    }

    pub fn exec_error(host: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(host, OutcomeStatus::ExecError).with_detail(detail)
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_payload(mut self, payload: impl Into<String>, observed_at: Option<i64>) -> Self {
        self.raw_payload = Some(payload.into());
        self.observed_at = observed_at;
        self
    }
}

/// Everything one round produced, ready to be folded and persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundResult {
    pub index: usize,
    pub sender: HostName,
    pub started_at: i64,  // epoch ms
    pub finished_at: i64, // epoch ms
    /// Whether the sender confirmed a local transmit
    pub sender_ok: bool,
    /// Sender probe output, verbatim, for audit
    pub sender_output: Option<String>,
    pub outcomes: Vec<ReceiverOutcome>,
    /// Raw text collected from each receiver, for audit
    pub receiver_outputs: BTreeMap<HostName, String>,
    /// Receivers whose stop or log cleanup failed
    #[serde(default)]
    pub cleanup_failures: usize,
}

impl RoundResult {
    pub fn count(&self, status: OutcomeStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    pub fn outcome_for(&self, receiver: &str) -> Option<&ReceiverOutcome> {
        self.outcomes.iter().find(|o| o.host == receiver)
    }
}
