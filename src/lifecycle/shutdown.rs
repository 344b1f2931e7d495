//! Shutdown coordination.
//!
//! Subscribers:
//! - one per accept port (`PortListener::serve`): stop accepting, finish
//!   open requests
//! - the replay loop (`ReplayEngine::run`): no new refill, wait for the
//!   deliveries already dispatched
//!
//! Triggered by ctrl-c/SIGTERM in `main`, or by `start` when a listener
//! fails so the replay loop does not outlive the accept side.

use tokio::sync::broadcast;

/// One-shot broadcast; a trigger with no subscribers is a no-op.
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }

    /// Subscribers that have not dropped their receiver yet.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
