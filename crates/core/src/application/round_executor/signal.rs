// Round Signal

use tokio::sync::watch;

/// What receiver tasks are told once the sender step is over
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// Listen window elapsed: collect output now
    Collect,
    /// Sender step failed: skip collection, every receiver is EXEC_ERROR
    Abort(String),
}

/// Receiver-side view of the round signal
#[derive(Clone)]
pub struct RoundSignal {
    rx: watch::Receiver<Option<Directive>>,
}

impl RoundSignal {
    /// Wait for the round's directive. If the executor goes away without
    /// deciding, the receiver is told to abort.
    pub async fn wait(&mut self) -> Directive {
        loop {
            if let Some(directive) = self.rx.borrow_and_update().clone() {
                return directive;
            }
            if self.rx.changed().await.is_err() {
                return Directive::Abort("round executor dropped before collection".to_string());
            }
        }
    }
}

/// Executor-side half
pub struct RoundSignalSender {
    tx: watch::Sender<Option<Directive>>,
}

impl RoundSignalSender {
    pub fn collect(&self) {
        let _ = self.tx.send(Some(Directive::Collect));
    }

    pub fn abort(&self, reason: impl Into<String>) {
        let _ = self.tx.send(Some(Directive::Abort(reason.into())));
    }
}

/// Create a round signal channel
pub fn round_signal() -> (RoundSignalSender, RoundSignal) {
    let (tx, rx) = watch::channel(None);
    (RoundSignalSender { tx }, RoundSignal { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_late_subscribers_see_directive() {
        let (tx, mut signal) = round_signal();
        let mut late = signal.clone();

        tx.collect();

        assert_eq!(signal.wait().await, Directive::Collect);
        assert_eq!(late.wait().await, Directive::Collect);
    }

    #[tokio::test]
    async fn test_dropped_sender_aborts() {
        let (tx, mut signal) = round_signal();
        drop(tx);

        assert!(matches!(signal.wait().await, Directive::Abort(_)));
    }
}
