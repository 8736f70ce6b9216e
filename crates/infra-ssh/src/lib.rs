// castcheck Infrastructure - Remote Execution Adapter
// Implements: RemoteExecutor over ssh/scp, or a local shell for loopback runs

pub mod constants;
mod registry;
pub mod settings;
pub mod shell_executor;
mod transport;

pub use settings::SshSettings;
pub use shell_executor::ShellExecutor;
