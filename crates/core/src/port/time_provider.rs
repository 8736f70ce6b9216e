// Time Provider Port
//
// Run, round and snapshot timestamps in a report all come from here.

/// Source of the epoch-millisecond timestamps stored in run reports
pub trait TimeProvider: Send + Sync {
    /// Milliseconds since the Unix epoch, UTC
    fn now_millis(&self) -> i64;
}

/// Wall clock of the machine running the coordinator
pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

pub mod mocks {
    use super::*;

    /// Clock stuck at one instant
    pub struct FixedTimeProvider(pub i64);

    impl TimeProvider for FixedTimeProvider {
        fn now_millis(&self) -> i64 {
            self.0
        }
    }
}
