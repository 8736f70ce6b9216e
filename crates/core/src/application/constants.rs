// Sweep constants (ADR: No magic values)
use std::time::Duration;

/// Administratively scoped multicast group used when none is configured
pub const DEFAULT_GROUP: &str = "239.1.1.1";

/// UDP port the probes send to and listen on
pub const DEFAULT_PORT: u16 = 5000;

/// TTL 1 keeps the probe on the local subnet
pub const DEFAULT_TTL: u32 = 1;

/// Upper bound accepted for the probe TTL (scope-limiting hop count)
pub const MAX_TTL: u32 = 8;

/// Time receivers get to join the group before the sender transmits (2s)
pub const DEFAULT_GRACE_PERIOD_MS: u64 = 2_000;

/// Receiver listen window, counted from receiver launch (8s).
/// Must cover the grace period plus the sender's ssh connect + transmit.
pub const DEFAULT_LISTEN_WINDOW_MS: u64 = 8_000;

/// Slack after the listen window before output is collected (1.5s)
pub const DEFAULT_COLLECTION_MARGIN_MS: u64 = 1_500;

/// Maximum wait for one receiver's output at collection time (3s)
pub const DEFAULT_COLLECT_TIMEOUT_MS: u64 = 3_000;

/// Deadline for the foreground sender probe, ssh connect included (15s)
pub const DEFAULT_SENDER_TIMEOUT_MS: u64 = 15_000;

/// Pause between rounds so group membership from the previous round clears (1s)
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 1_000;

/// Remote working directory for the probe binary and receiver logs
pub const DEFAULT_REMOTE_DIR: &str = "/tmp/castcheck";

/// File name of the probe binary on remote hosts
pub const PROBE_BINARY_NAME: &str = "castcheck-probe";

/// Extra seconds `timeout -k` waits before SIGKILLing a remote listener
pub const LISTENER_KILL_AFTER_SECS: u64 = 1;

/// Deadline for cleanup, deploy and snapshot commands (10s)
pub const HOUSEKEEPING_TIMEOUT: Duration = Duration::from_secs(10);

/// Read-only network diagnostics captured per host when snapshots are enabled
pub const DEFAULT_SNAPSHOT_COMMANDS: [&str; 3] =
    ["ip -4 addr show", "ip route show", "ip maddr show"];
