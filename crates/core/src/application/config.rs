// Sweep Configuration
//
// Passed explicitly into the coordinator at construction; every field has a
// documented default so a config file only needs to list what differs.

use super::constants::*;
use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::time::Duration;

/// Multicast probe wire settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeSettings {
    pub group: Ipv4Addr,
    pub port: u16,
    pub ttl: u32,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            group: DEFAULT_GROUP.parse().unwrap_or(Ipv4Addr::new(239, 1, 1, 1)),
            port: DEFAULT_PORT,
            ttl: DEFAULT_TTL,
        }
    }
}

/// Round timing, all in milliseconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingSettings {
    pub grace_period_ms: u64,
    pub listen_window_ms: u64,
    pub collection_margin_ms: u64,
    pub collect_timeout_ms: u64,
    pub sender_timeout_ms: u64,
    pub settle_delay_ms: u64,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            grace_period_ms: DEFAULT_GRACE_PERIOD_MS,
            listen_window_ms: DEFAULT_LISTEN_WINDOW_MS,
            collection_margin_ms: DEFAULT_COLLECTION_MARGIN_MS,
            collect_timeout_ms: DEFAULT_COLLECT_TIMEOUT_MS,
            sender_timeout_ms: DEFAULT_SENDER_TIMEOUT_MS,
            settle_delay_ms: DEFAULT_SETTLE_DELAY_MS,
        }
    }
}

impl TimingSettings {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn listen_window(&self) -> Duration {
        Duration::from_millis(self.listen_window_ms)
    }

    pub fn collection_margin(&self) -> Duration {
        Duration::from_millis(self.collection_margin_ms)
    }

    pub fn collect_timeout(&self) -> Duration {
        Duration::from_millis(self.collect_timeout_ms)
    }

    pub fn sender_timeout(&self) -> Duration {
        Duration::from_millis(self.sender_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Hard lifetime of a remote listener, enforced on the host by `timeout`
    pub fn listener_lifetime_secs(&self) -> u64 {
        (self.listen_window_ms + self.collection_margin_ms).div_ceil(1000)
            + LISTENER_KILL_AFTER_SECS
    }
}

/// Where things live on the remote hosts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteSettings {
    /// Working directory for the probe binary and receiver logs.
    /// Not tilde-expanded: use an absolute path.
    pub remote_dir: String,
    /// Probe binary path; defaults to `<remote_dir>/castcheck-probe`
    pub probe_path: Option<String>,
    /// Diagnostics run on every host when snapshots are requested
    pub snapshot_commands: Vec<String>,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            remote_dir: DEFAULT_REMOTE_DIR.to_string(),
            probe_path: None,
            snapshot_commands: DEFAULT_SNAPSHOT_COMMANDS
                .iter()
                .map(|c| c.to_string())
                .collect(),
        }
    }
}

impl RemoteSettings {
    pub fn probe_path(&self) -> String {
        self.probe_path
            .clone()
            .unwrap_or_else(|| format!("{}/{}", self.remote_dir, PROBE_BINARY_NAME))
    }
}

/// Complete sweep configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub probe: ProbeSettings,
    pub timing: TimingSettings,
    pub remote: RemoteSettings,
}

impl SweepConfig {
    /// Reject settings that would make every round meaningless
    pub fn validate(&self) -> Result<()> {
        if !self.probe.group.is_multicast() {
            return Err(AppError::Config(format!(
                "probe.group {} is not a multicast address",
                self.probe.group
            )));
        }
        if self.probe.port == 0 {
            return Err(AppError::Config("probe.port must be non-zero".to_string()));
        }
        if self.probe.ttl == 0 || self.probe.ttl > MAX_TTL {
            return Err(AppError::Config(format!(
                "probe.ttl must be within 1..={}, got {}",
                MAX_TTL, self.probe.ttl
            )));
        }

        let t = &self.timing;
        if t.listen_window_ms <= t.grace_period_ms {
            return Err(AppError::Config(format!(
                "timing.listen_window_ms ({}) must exceed timing.grace_period_ms ({})",
                t.listen_window_ms, t.grace_period_ms
            )));
        }
        if t.collect_timeout_ms == 0 || t.sender_timeout_ms == 0 {
            return Err(AppError::Config(
                "timing.collect_timeout_ms and timing.sender_timeout_ms must be non-zero"
                    .to_string(),
            ));
        }

        if self.remote.remote_dir.trim().is_empty() {
            return Err(AppError::Config("remote.remote_dir must not be empty".to_string()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = SweepConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.probe.group, Ipv4Addr::new(239, 1, 1, 1));
        assert_eq!(config.remote.probe_path(), "/tmp/castcheck/castcheck-probe");
    }

    #[test]
    fn test_rejects_unicast_group() {
        let mut config = SweepConfig::default();
        config.probe.group = Ipv4Addr::new(10, 0, 0, 1);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("not a multicast address"));
    }

    #[test]
    fn test_rejects_window_shorter_than_grace() {
        let mut config = SweepConfig::default();
        config.timing.listen_window_ms = 1_000;
        config.timing.grace_period_ms = 2_000;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("must exceed"));
    }

    #[test]
    fn test_rejects_unbounded_ttl() {
        let mut config = SweepConfig::default();
        config.probe.ttl = 64;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_listener_lifetime_rounds_up() {
        let timing = TimingSettings {
            listen_window_ms: 8_000,
            collection_margin_ms: 1_500,
            ..Default::default()
        };
        // ceil(9.5s) + 1s kill-after
        assert_eq!(timing.listener_lifetime_secs(), 11);
    }

    #[test]
    fn test_partial_document_keeps_defaults() {
        let config: SweepConfig =
            serde_json::from_value(serde_json::json!({"timing": {"grace_period_ms": 500}}))
                .unwrap();
        assert_eq!(config.timing.grace_period_ms, 500);
        assert_eq!(config.timing.listen_window_ms, DEFAULT_LISTEN_WINDOW_MS);
        assert_eq!(config.probe.port, DEFAULT_PORT);
    }
}
