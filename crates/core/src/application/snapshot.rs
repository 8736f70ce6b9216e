// Host network snapshots
//
// Read-only diagnostics (addresses, routes, multicast memberships) captured
// once per host before the first round, so a failing matrix can be read
// against the network state it ran on.

use super::config::SweepConfig;
use super::constants::HOUSEKEEPING_TIMEOUT;
use super::process::RemoteProcess;
use crate::domain::{Host, HostSnapshot, Inventory};
use crate::port::{RemoteExecutor, TimeProvider};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct SnapshotCollector {
    executor: Arc<dyn RemoteExecutor>,
    config: Arc<SweepConfig>,
    time_provider: Arc<dyn TimeProvider>,
}

impl SnapshotCollector {
    pub fn new(
        executor: Arc<dyn RemoteExecutor>,
        config: Arc<SweepConfig>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            executor,
            config,
            time_provider,
        }
    }

    /// One snapshot per (host, command). Failures are captured as text.
    pub async fn collect(&self, inventory: &Inventory) -> Vec<HostSnapshot> {
        join_all(inventory.hosts().iter().map(|host| self.collect_host(host)))
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    async fn collect_host(&self, host: &Host) -> Vec<HostSnapshot> {
        let mut snapshots = Vec::with_capacity(self.config.remote.snapshot_commands.len());

        for command in &self.config.remote.snapshot_commands {
            let result = tokio::time::timeout(
                HOUSEKEEPING_TIMEOUT,
                RemoteProcess::run_foreground(Arc::clone(&self.executor), host, command),
            )
            .await;

            let (exit_code, output) = match result {
                Ok(Ok(output)) => (output.exit_code, output.transcript()),
                Ok(Err(e)) => {
                    warn!(host = %host.name, command = %command, error = %e, "Snapshot command failed");
                    (None, e.to_string())
                }
                Err(_) => {
                    warn!(host = %host.name, command = %command, "Snapshot command timed out");
                    (None, "timed out".to_string())
                }
            };
            debug!(host = %host.name, command = %command, ?exit_code, "Snapshot captured");

            snapshots.push(HostSnapshot {
                host: host.name.clone(),
                command: command.clone(),
                captured_at: self.time_provider.now_millis(),
                exit_code,
                output,
            });
        }

        snapshots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::remote_executor::mocks::{HostBehavior, SimulatedExecutor};
    use crate::port::time_provider::SystemTimeProvider;

    #[tokio::test]
    async fn test_unreachable_host_is_captured_not_fatal() {
        let sim = Arc::new(SimulatedExecutor::new().with_behavior("b", HostBehavior::Unreachable));
        let collector = SnapshotCollector::new(
            sim,
            Arc::new(SweepConfig::default()),
            Arc::new(SystemTimeProvider),
        );
        let inventory = Inventory::new(vec![Host::new("a"), Host::new("b")]).unwrap();

        let snapshots = collector.collect(&inventory).await;

        assert_eq!(snapshots.len(), 6);
        let b: Vec<_> = snapshots.iter().filter(|s| s.host == "b").collect();
        assert!(b.iter().all(|s| s.exit_code.is_none()));
        assert!(b[0].output.contains("Connection failed"));
        assert!(snapshots
            .iter()
            .filter(|s| s.host == "a")
            .all(|s| s.exit_code == Some(0)));
    }
}
