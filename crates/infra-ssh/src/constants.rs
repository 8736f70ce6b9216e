// Remote execution constants (ADR: No magic values)
use std::time::Duration;

/// `ssh` exits 255 when the connection or authentication failed
pub const SSH_CONNECTION_FAILURE_EXIT: i32 = 255;

/// Seconds `ssh` waits for the TCP connection (ConnectTimeout)
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Time a terminated client gets between SIGTERM and SIGKILL (2 seconds)
pub const GRACEFUL_KILL_TIMEOUT: Duration = Duration::from_secs(2);

/// Liveness poll interval while waiting for SIGTERM to take effect (100ms)
pub const KILL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long output readers may keep draining after the process exited (500ms)
pub const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// First stdout word of a backgrounded ssh command: the remote shell's pid
pub const REMOTE_PID_MARKER: &str = "castcheck-pid";

/// How long a stop waits for the remote pid announcement (2 seconds)
pub const REMOTE_PID_WAIT: Duration = Duration::from_secs(2);

/// 100ms polls the remote stop script allows between SIGTERM and SIGKILL
pub const REMOTE_TERM_POLLS: u32 = 20;

/// Deadline for the whole remote stop, ssh connect included (15 seconds)
pub const REMOTE_STOP_TIMEOUT: Duration = Duration::from_secs(15);
