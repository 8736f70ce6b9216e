// Port Layer - Interfaces for external collaborators

pub mod id_provider; // For deterministic testing
pub mod remote_executor;
pub mod report_store;
pub mod time_provider;

// Re-exports
pub use id_provider::IdProvider;
pub use remote_executor::{
    CommandOutput, ExecutionError, LaunchMode, Launched, ProcessHandle, RemoteExecutor,
    Termination,
};
pub use report_store::ReportStore;
pub use time_provider::TimeProvider;
