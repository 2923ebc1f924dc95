//! Single-resolution signal
//!
//! Used for the shutdown latch and for the operator start gate. Once fired
//! it stays fired; waiters that arrive late return immediately.

use std::sync::Arc;
use tokio::sync::watch;

/// A latch that can be fired once from any thread and awaited from async code
#[derive(Debug, Clone)]
pub struct Signal {
    tx: Arc<watch::Sender<bool>>,
}

impl Signal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Fire the signal. Safe to call more than once.
    pub fn fire(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_fired(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the signal has fired
    pub async fn fired(&self) {
        let mut rx = self.tx.subscribe();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}
