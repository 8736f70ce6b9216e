// Application Layer - Verification use cases

pub mod classify;
pub mod config;
pub mod constants;
pub mod coordinator;
pub mod deploy;
pub mod probe_command;
pub mod process;
pub mod round_executor;
pub mod snapshot;

// Re-exports
pub use config::{ProbeSettings, RemoteSettings, SweepConfig, TimingSettings};
pub use coordinator::{Coordinator, RunOptions};
pub use deploy::{DeployResult, Deployer};
pub use probe_command::ProbeCommands;
pub use process::{RemoteProcess, Started, StopReport};
pub use round_executor::RoundExecutor;
pub use snapshot::SnapshotCollector;
