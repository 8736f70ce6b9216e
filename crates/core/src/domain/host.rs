// Host & Inventory Domain Model

use super::error::{DomainError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

/// Host identity as it appears in the reachability matrix
pub type HostName = String;

/// A round-robin sweep needs one sender and at least one receiver
pub const MIN_HOSTS: usize = 2;

/// Host entity: identity plus a reference to its connection credentials.
/// Immutable for the lifetime of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub name: HostName,
    /// Network address used to reach the host; defaults to `name`
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub ssh_port: Option<u16>,
    #[serde(default)]
    pub identity_file: Option<PathBuf>,
    /// Local interface address the probes on this host send/join on;
    /// auto-detected by the probe when absent
    #[serde(default)]
    pub multicast_interface: Option<String>,
}

impl Host {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: None,
            user: None,
            ssh_port: None,
            identity_file: None,
            multicast_interface: None,
        }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn address(&self) -> &str {
        self.address.as_deref().unwrap_or(&self.name)
    }

    /// `user@address`, or just the address when no user is configured
    pub fn target(&self) -> String {
        match &self.user {
            Some(user) => format!("{}@{}", user, self.address()),
            None => self.address().to_string(),
        }
    }
}

impl std::fmt::Display for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Ordered, validated host list. Inventory order is round order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Host>", into = "Vec<Host>")]
pub struct Inventory {
    hosts: Vec<Host>,
}

impl Inventory {
    pub fn new(hosts: Vec<Host>) -> Result<Self> {
        if hosts.len() < MIN_HOSTS {
            return Err(DomainError::InventoryTooSmall {
                min: MIN_HOSTS,
                got: hosts.len(),
            });
        }

        let mut seen = HashSet::new();
        for host in &hosts {
            if host.name.trim().is_empty() {
                return Err(DomainError::EmptyHostName);
            }
            if !seen.insert(host.name.as_str()) {
                return Err(DomainError::DuplicateHost(host.name.clone()));
            }
        }

        Ok(Self { hosts })
    }

    pub fn hosts(&self) -> &[Host] {
        &self.hosts
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn names(&self) -> Vec<HostName> {
        self.hosts.iter().map(|h| h.name.clone()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&Host> {
        self.hosts.iter().find(|h| h.name == name)
    }

    /// Number of ordered (sender, receiver) pairs a complete run produces
    pub fn pair_count(&self) -> usize {
        self.hosts.len() * (self.hosts.len() - 1)
    }
}

impl TryFrom<Vec<Host>> for Inventory {
    type Error = DomainError;

    fn try_from(hosts: Vec<Host>) -> Result<Self> {
        Self::new(hosts)
    }
}

impl From<Inventory> for Vec<Host> {
    fn from(inventory: Inventory) -> Self {
        inventory.hosts
    }
}
