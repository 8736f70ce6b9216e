// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DomainError {
    #[error("Inventory needs at least {min} hosts, got {got}")]
    InventoryTooSmall { min: usize, got: usize },

    #[error("Duplicate host in inventory: {0}")]
    DuplicateHost(String),

    #[error("Host name must not be empty")]
    EmptyHostName,

    #[error("Unknown host: {0}")]
    UnknownHost(String),

    #[error("Host cannot be its own receiver: {0}")]
    SelfPair(String),

    #[error("Pair already recorded: {sender} -> {receiver}")]
    DuplicatePair { sender: String, receiver: String },

    #[error("Round index {index} out of range for {hosts} hosts")]
    RoundOutOfRange { index: usize, hosts: usize },

    #[error("Unknown outcome status: {0}")]
    UnknownStatus(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;
