// Round Domain Model

use super::error::{DomainError, Result};
use super::host::{Host, Inventory};

/// One iteration of the sweep: a single sender, every other host listening.
///
/// Created by the coordinator at the start of an iteration and discarded
/// once its outcomes are folded into the matrix.
#[derive(Debug, Clone)]
pub struct Round {
    /// Zero-based position of the sender in the inventory
    pub index: usize,
    pub sender: Host,
    pub receivers: Vec<Host>,
    pub started_at: i64, // epoch ms
}

impl Round {
    /// Build the round whose sender is the `index`-th inventory host
    pub fn for_sender(inventory: &Inventory, index: usize, started_at: i64) -> Result<Self> {
        let sender = inventory
            .hosts()
            .get(index)
            .cloned()
            .ok_or(DomainError::RoundOutOfRange {
                index,
                hosts: inventory.len(),
            })?;

        let receivers = inventory
            .hosts()
            .iter()
            .filter(|h| h.name != sender.name)
            .cloned()
            .collect();

        Ok(Self {
            index,
            sender,
            receivers,
            started_at,
        })
    }

    pub fn receiver_names(&self) -> Vec<String> {
        self.receivers.iter().map(|h| h.name.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_excludes_sender() {
        let inventory =
            Inventory::new(vec![Host::new("a"), Host::new("b"), Host::new("c")]).unwrap();

        let round = Round::for_sender(&inventory, 1, 1000).unwrap();

        assert_eq!(round.sender.name, "b");
        assert_eq!(round.receiver_names(), vec!["a", "c"]);
        assert_eq!(round.started_at, 1000);
    }

    #[test]
    fn test_round_out_of_range() {
        let inventory = Inventory::new(vec![Host::new("a"), Host::new("b")]).unwrap();
        assert!(matches!(
            Round::for_sender(&inventory, 2, 0),
            Err(DomainError::RoundOutOfRange { index: 2, hosts: 2 })
        ));
    }
}
