// ssh client settings

use crate::constants::DEFAULT_CONNECT_TIMEOUT_SECS;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Options shared by every ssh/scp invocation. Per-host user, port and
/// identity file from the inventory take precedence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshSettings {
    pub ssh_program: String,
    pub scp_program: String,
    pub connect_timeout_secs: u64,
    pub default_user: Option<String>,
    pub default_identity_file: Option<PathBuf>,
    /// Extra `-o Key=Value` options, e.g. `StrictHostKeyChecking=accept-new`
    pub options: Vec<String>,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            ssh_program: "ssh".to_string(),
            scp_program: "scp".to_string(),
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            default_user: None,
            default_identity_file: None,
            options: Vec::new(),
        }
    }
}
