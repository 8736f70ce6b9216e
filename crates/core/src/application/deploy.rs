// Probe deployment
//
// Copies the probe binary to every host before the first round. Hosts are
// handled concurrently; a failed host is reported, never fatal, because its
// rounds will surface as EXEC_ERROR anyway.

use super::config::SweepConfig;
use super::constants::HOUSEKEEPING_TIMEOUT;
use super::probe_command::ProbeCommands;
use super::process::RemoteProcess;
use crate::domain::{Host, HostName, Inventory};
use crate::port::RemoteExecutor;
use futures::future::join_all;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Per-host deployment result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployResult {
    pub host: HostName,
    pub error: Option<String>,
}

impl DeployResult {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

pub struct Deployer {
    executor: Arc<dyn RemoteExecutor>,
    config: Arc<SweepConfig>,
}

impl Deployer {
    pub fn new(executor: Arc<dyn RemoteExecutor>, config: Arc<SweepConfig>) -> Self {
        Self { executor, config }
    }

    /// Push `local_probe` to every host and make it executable
    pub async fn deploy(&self, inventory: &Inventory, local_probe: &Path) -> Vec<DeployResult> {
        info!(
            hosts = inventory.len(),
            probe = %local_probe.display(),
            "Deploying probe"
        );

        let results = join_all(
            inventory
                .hosts()
                .iter()
                .map(|host| self.deploy_host(host, local_probe)),
        )
        .await;

        for result in results.iter().filter(|r| !r.is_ok()) {
            warn!(host = %result.host, error = ?result.error, "Probe deployment failed");
        }
        results
    }

    async fn deploy_host(&self, host: &Host, local_probe: &Path) -> DeployResult {
        DeployResult {
            host: host.name.clone(),
            error: self.install(host, local_probe).await.err(),
        }
    }

    async fn install(&self, host: &Host, local_probe: &Path) -> Result<(), String> {
        let commands = ProbeCommands::new(&self.config);

        self.housekeeping(host, &commands.prepare_dir()).await?;
        tokio::time::timeout(
            HOUSEKEEPING_TIMEOUT,
            self.executor.push(host, local_probe, &commands.probe_path()),
        )
        .await
        .map_err(|_| "copy timed out".to_string())?
        .map_err(|e| e.to_string())?;
        self.housekeeping(host, &commands.make_executable()).await
    }

    async fn housekeeping(&self, host: &Host, command: &str) -> Result<(), String> {
        let output = tokio::time::timeout(
            HOUSEKEEPING_TIMEOUT,
            RemoteProcess::run_foreground(Arc::clone(&self.executor), host, command),
        )
        .await
        .map_err(|_| format!("`{}` timed out", command))?
        .map_err(|e| e.to_string())?;

        if output.success() {
            Ok(())
        } else {
            Err(format!(
                "`{}` exited with {:?}: {}",
                command,
                output.exit_code,
                output.stderr.trim()
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::remote_executor::mocks::{HostBehavior, SimEventKind, SimulatedExecutor};

    #[tokio::test]
    async fn test_deploy_reports_each_host() {
        let sim = Arc::new(SimulatedExecutor::new().with_behavior("b", HostBehavior::Unreachable));
        let deployer = Deployer::new(sim.clone(), Arc::new(SweepConfig::default()));
        let inventory = Inventory::new(vec![Host::new("a"), Host::new("b")]).unwrap();

        let results = deployer
            .deploy(&inventory, Path::new("target/release/castcheck-probe"))
            .await;

        assert!(results[0].is_ok());
        assert!(!results[1].is_ok());

        let pushed = sim.events_of(SimEventKind::Pushed);
        assert_eq!(pushed.len(), 1);
        assert!(pushed[0].detail.ends_with("/tmp/castcheck/castcheck-probe"));
        assert!(sim
            .events_of(SimEventKind::Command)
            .iter()
            .any(|e| e.detail.starts_with("chmod +x")));
    }
}
