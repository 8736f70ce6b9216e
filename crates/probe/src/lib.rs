// castcheck Probe - multicast sender and receiver
//
// Both roles finish by producing a single `ProbeReport`; the binary prints it
// as the terminal line the round executor classifies.

pub mod iface;
pub mod recv;
pub mod send;

pub use recv::{receive, BindStrategy, RecvOptions};
pub use send::{send, SendOptions};

/// Largest datagram the receiver reads; probe payloads are far smaller
pub const MAX_DATAGRAM: usize = 1024;

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
