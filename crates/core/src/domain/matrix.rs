// Reachability Matrix Domain Model

use super::error::{DomainError, Result};
use super::host::HostName;
use super::outcome::{OutcomeStatus, RoundResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One cell of the matrix: did `receiver` observe `sender`'s datagram
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixEntry {
    pub sender: HostName,
    pub receiver: HostName,
    pub status: OutcomeStatus,
}

/// Mapping from ordered (sender, receiver) pairs of distinct hosts to status.
///
/// Built one round at a time by the coordinator. A complete matrix holds
/// exactly `N x (N - 1)` entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "MatrixDocument", try_from = "MatrixDocument")]
pub struct ReachabilityMatrix {
    hosts: Vec<HostName>,
    index: HashMap<HostName, usize>,
    cells: HashMap<(usize, usize), OutcomeStatus>,
}

/// Persisted shape: host order plus row-per-outcome entries
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MatrixDocument {
    hosts: Vec<HostName>,
    entries: Vec<MatrixEntry>,
}

impl ReachabilityMatrix {
    pub fn new(hosts: Vec<HostName>) -> Self {
        let index = hosts
            .iter()
            .enumerate()
            .map(|(i, h)| (h.clone(), i))
            .collect();
        Self {
            hosts,
            index,
            cells: HashMap::new(),
        }
    }

    /// Re-derive a matrix from persisted rows
    pub fn from_entries(hosts: Vec<HostName>, entries: &[MatrixEntry]) -> Result<Self> {
        let mut matrix = Self::new(hosts);
        for entry in entries {
            matrix.record(&entry.sender, &entry.receiver, entry.status)?;
        }
        Ok(matrix)
    }

    fn position(&self, host: &str) -> Result<usize> {
        self.index
            .get(host)
            .copied()
            .ok_or_else(|| DomainError::UnknownHost(host.to_string()))
    }

    /// Record one pair. Rejects self-pairs, unknown hosts and duplicates.
    pub fn record(&mut self, sender: &str, receiver: &str, status: OutcomeStatus) -> Result<()> {
        if sender == receiver {
            return Err(DomainError::SelfPair(sender.to_string()));
        }
        let key = (self.position(sender)?, self.position(receiver)?);
        if self.cells.contains_key(&key) {
            return Err(DomainError::DuplicatePair {
                sender: sender.to_string(),
                receiver: receiver.to_string(),
            });
        }
        self.cells.insert(key, status);
        Ok(())
    }

    /// Fold every outcome of one round into the matrix
    pub fn fold_round(&mut self, round: &RoundResult) -> Result<()> {
        for outcome in &round.outcomes {
            self.record(&round.sender, &outcome.host, outcome.status)?;
        }
        Ok(())
    }

    /// Fill every absent pair with `status`; returns how many were filled
    pub fn fill_missing(&mut self, status: OutcomeStatus) -> usize {
        let n = self.hosts.len();
        let mut filled = 0;
        for s in 0..n {
            for r in 0..n {
                if s != r && !self.cells.contains_key(&(s, r)) {
                    self.cells.insert((s, r), status);
                    filled += 1;
                }
            }
        }
        filled
    }

    pub fn get(&self, sender: &str, receiver: &str) -> Option<OutcomeStatus> {
        let key = (self.index.get(sender)?, self.index.get(receiver)?);
        self.cells.get(&(*key.0, *key.1)).copied()
    }

    pub fn hosts(&self) -> &[HostName] {
        &self.hosts
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn expected_len(&self) -> usize {
        let n = self.hosts.len();
        n * n.saturating_sub(1)
    }

    pub fn is_complete(&self) -> bool {
        self.len() == self.expected_len()
    }

    pub fn count(&self, status: OutcomeStatus) -> usize {
        self.cells.values().filter(|s| **s == status).count()
    }

    /// Entries that count against the exit status
    pub fn operational_failures(&self) -> usize {
        self.cells.values().filter(|s| s.is_operational()).count()
    }

    /// Entries ordered by inventory position of sender, then receiver
    pub fn entries(&self) -> Vec<MatrixEntry> {
        let mut keys: Vec<_> = self.cells.keys().copied().collect();
        keys.sort_unstable();
        keys.into_iter()
            .map(|(s, r)| MatrixEntry {
                sender: self.hosts[s].clone(),
                receiver: self.hosts[r].clone(),
                status: self.cells[&(s, r)],
            })
            .collect()
    }
}

impl From<ReachabilityMatrix> for MatrixDocument {
    fn from(matrix: ReachabilityMatrix) -> Self {
        let entries = matrix.entries();
        Self {
            hosts: matrix.hosts,
            entries,
        }
    }
}

impl TryFrom<MatrixDocument> for ReachabilityMatrix {
    type Error = DomainError;

    fn try_from(doc: MatrixDocument) -> Result<Self> {
        Self::from_entries(doc.hosts, &doc.entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ReceiverOutcome;
    use std::collections::BTreeMap;

    fn abc() -> ReachabilityMatrix {
        ReachabilityMatrix::new(vec!["a".into(), "b".into(), "c".into()])
    }

    #[test]
    fn test_record_rejects_invalid_pairs() {
        let mut matrix = abc();
        assert_eq!(
            matrix.record("a", "a", OutcomeStatus::Success),
            Err(DomainError::SelfPair("a".into()))
        );
        assert_eq!(
            matrix.record("a", "z", OutcomeStatus::Success),
            Err(DomainError::UnknownHost("z".into()))
        );

        matrix.record("a", "b", OutcomeStatus::Success).unwrap();
        assert!(matches!(
            matrix.record("a", "b", OutcomeStatus::Fail),
            Err(DomainError::DuplicatePair { .. })
        ));
        assert_eq!(matrix.get("a", "b"), Some(OutcomeStatus::Success));
    }

    #[test]
    fn test_fill_missing_completes_matrix() {
        let mut matrix = abc();
        matrix.record("a", "b", OutcomeStatus::Success).unwrap();

        let filled = matrix.fill_missing(OutcomeStatus::ExecError);

        assert_eq!(filled, 5);
        assert!(matrix.is_complete());
        assert_eq!(matrix.len(), 6);
        assert_eq!(matrix.get("a", "b"), Some(OutcomeStatus::Success));
        assert_eq!(matrix.count(OutcomeStatus::ExecError), 5);
    }

    #[test]
    fn test_fold_round() {
        let mut matrix = abc();
        let round = RoundResult {
            index: 0,
            sender: "a".into(),
            started_at: 0,
            finished_at: 1,
            sender_ok: true,
            sender_output: None,
            outcomes: vec![
                ReceiverOutcome::new("b", OutcomeStatus::Success),
                ReceiverOutcome::new("c", OutcomeStatus::Timeout),
            ],
            receiver_outputs: BTreeMap::new(),
            cleanup_failures: 0,
        };

        matrix.fold_round(&round).unwrap();

        assert_eq!(matrix.get("a", "c"), Some(OutcomeStatus::Timeout));
        assert_eq!(matrix.len(), 2);
        assert!(!matrix.is_complete());
    }

    #[test]
    fn test_only_exec_errors_are_operational_failures() {
        let mut matrix = abc();
        matrix.record("a", "b", OutcomeStatus::Fail).unwrap();
        matrix.record("a", "c", OutcomeStatus::Timeout).unwrap();
        matrix.record("b", "a", OutcomeStatus::ExecError).unwrap();
        assert_eq!(matrix.operational_failures(), 1);

        matrix.fill_missing(OutcomeStatus::ExecError);
        assert_eq!(matrix.operational_failures(), 4);
    }

    #[test]
    fn test_entries_follow_inventory_order() {
        let mut matrix = ReachabilityMatrix::new(vec!["z".into(), "a".into()]);
        matrix.record("a", "z", OutcomeStatus::Fail).unwrap();
        matrix.record("z", "a", OutcomeStatus::Success).unwrap();

        let senders: Vec<_> = matrix.entries().into_iter().map(|e| e.sender).collect();
        assert_eq!(senders, vec!["z", "a"]);
    }

    #[test]
    fn test_document_rejects_duplicates() {
        let json = serde_json::json!({
            "hosts": ["a", "b"],
            "entries": [
                {"sender": "a", "receiver": "b", "status": "SUCCESS"},
                {"sender": "a", "receiver": "b", "status": "FAIL"}
            ]
        });
        assert!(serde_json::from_value::<ReachabilityMatrix>(json).is_err());
    }
}
