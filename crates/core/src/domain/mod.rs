// Domain Layer - Pure verification model

pub mod error;
pub mod host;
pub mod matrix;
pub mod outcome;
pub mod probe;
pub mod report;
pub mod round;

// Re-exports
pub use error::DomainError;
pub use host::{Host, HostName, Inventory, MIN_HOSTS};
pub use matrix::{MatrixEntry, ReachabilityMatrix};
pub use outcome::{OutcomeStatus, ReceiverOutcome, RoundResult};
pub use probe::{ProbePayload, ProbeReport, RecvReport, RecvStatus, SendReport, SendStatus};
pub use report::{HostSnapshot, RunId, RunReport, RunSummary};
pub use round::Round;
