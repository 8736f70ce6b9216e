// CLI configuration loading
//
// One TOML file plus `CASTCHECK__SECTION__KEY` environment overrides.

use anyhow::{Context, Result};
use castcheck_core::application::{ProbeSettings, RemoteSettings, SweepConfig, TimingSettings};
use castcheck_core::domain::{Host, Inventory};
use castcheck_infra_ssh::SshSettings;
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const ENV_PREFIX: &str = "CASTCHECK";
const ENV_SEPARATOR: &str = "__";
pub const DEFAULT_DB_PATH: &str = "~/.castcheck/reports.db";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub path: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: DEFAULT_DB_PATH.to_string(),
        }
    }
}

/// Everything the binary reads from its config file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Inventory, in round order
    pub hosts: Vec<Host>,
    pub probe: ProbeSettings,
    pub timing: TimingSettings,
    pub remote: RemoteSettings,
    pub ssh: SshSettings,
    pub database: DatabaseSettings,
}

impl AppSettings {
    /// Load `path` (optional) and overlay the process environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_from(path, None)
    }

    /// `env` replaces the process environment when given
    pub fn load_from(path: Option<&Path>, env: Option<HashMap<String, String>>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator(ENV_SEPARATOR)
                .separator(ENV_SEPARATOR)
                .try_parsing(true)
                .source(env),
        );

        let settings: AppSettings = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .with_context(|| match path {
                Some(p) => format!("Failed to load configuration from {}", p.display()),
                None => "Failed to load configuration from environment".to_string(),
            })?;

        settings.expanded()
    }

    /// Expand `~` and `$VARS` in local paths. Remote paths are left alone.
    fn expanded(mut self) -> Result<Self> {
        self.database.path = expand(&self.database.path)?;
        if let Some(identity) = &self.ssh.default_identity_file {
            self.ssh.default_identity_file = Some(expand_path(identity)?);
        }
        for host in &mut self.hosts {
            if let Some(identity) = &host.identity_file {
                host.identity_file = Some(expand_path(identity)?);
            }
        }
        Ok(self)
    }

    pub fn sweep(&self) -> SweepConfig {
        SweepConfig {
            probe: self.probe.clone(),
            timing: self.timing.clone(),
            remote: self.remote.clone(),
        }
    }

    pub fn inventory(&self) -> Result<Inventory> {
        Inventory::new(self.hosts.clone()).context("Invalid host inventory")
    }
}

pub fn expand(raw: &str) -> Result<String> {
    shellexpand::full(raw)
        .map(|s| s.into_owned())
        .with_context(|| format!("Failed to expand path {}", raw))
}

pub fn expand_path(raw: &Path) -> Result<PathBuf> {
    expand(&raw.to_string_lossy()).map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const SAMPLE: &str = r#"
[[hosts]]
name = "alpha"
address = "10.0.0.1"

[[hosts]]
name = "beta"
user = "ops"
ssh_port = 2222

[probe]
group = "239.9.9.9"

[timing]
listen_window_ms = 6000

[database]
path = "/var/lib/castcheck/reports.db"
"#;

    fn write_sample() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("castcheck.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        (dir, path)
    }

    #[test]
    fn test_file_values_and_defaults() {
        let (_dir, path) = write_sample();

        let settings = AppSettings::load_from(Some(&path), Some(HashMap::new())).unwrap();

        assert_eq!(settings.hosts.len(), 2);
        assert_eq!(settings.hosts[1].ssh_port, Some(2222));
        assert_eq!(settings.probe.group, Ipv4Addr::new(239, 9, 9, 9));
        assert_eq!(settings.probe.port, 5000);
        assert_eq!(settings.timing.listen_window_ms, 6000);
        assert_eq!(settings.timing.grace_period_ms, 2000);
        assert_eq!(settings.database.path, "/var/lib/castcheck/reports.db");
        assert!(settings.sweep().validate().is_ok());
        assert_eq!(settings.inventory().unwrap().len(), 2);
    }

    #[test]
    fn test_environment_overrides_file() {
        let (_dir, path) = write_sample();
        let env = HashMap::from([
            ("CASTCHECK__PROBE__PORT".to_string(), "6000".to_string()),
            ("CASTCHECK__SSH__DEFAULT_USER".to_string(), "root".to_string()),
        ]);

        let settings = AppSettings::load_from(Some(&path), Some(env)).unwrap();

        assert_eq!(settings.probe.port, 6000);
        assert_eq!(settings.ssh.default_user.as_deref(), Some("root"));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = AppSettings::load_from(
            Some(Path::new("/nonexistent/castcheck.toml")),
            Some(HashMap::new()),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_inventory_rejected() {
        let settings = AppSettings::default();
        assert!(settings.inventory().is_err());
    }
}
