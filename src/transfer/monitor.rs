//! Transfer Activity Monitor
//!
//! A process-wide signal saying whether fragment payloads are currently
//! flowing in. Restore workers watch it: while data is arriving they hold
//! off on judging a block lost, and when the flow stops they re-evaluate
//! immediately instead of waiting for the next timer tick.

use tokio::sync::watch;
use tracing::debug;

/// Whether any incoming transfer is active right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferActivity {
    Idle,
    Receiving,
}

/// Broadcast of [`TransferActivity`] changes over a `tokio::sync::watch`.
pub struct TransferMonitor {
    tx: watch::Sender<TransferActivity>,
}

impl Default for TransferMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferMonitor {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(TransferActivity::Idle);
        Self { tx }
    }

    /// Observe activity changes; the receiver always holds the latest value.
    pub fn subscribe(&self) -> watch::Receiver<TransferActivity> {
        self.tx.subscribe()
    }

    pub fn is_receiving(&self) -> bool {
        *self.tx.borrow() == TransferActivity::Receiving
    }

    pub fn set_receiving(&self) {
        self.set(TransferActivity::Receiving);
    }

    pub fn set_idle(&self) {
        self.set(TransferActivity::Idle);
    }

    fn set(&self, activity: TransferActivity) {
        // only a real change wakes the watchers
        let changed = self.tx.send_if_modified(|current| {
            if *current == activity {
                false
            } else {
                *current = activity;
                true
            }
        });
        if changed {
            debug!(?activity, "transfer activity changed");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
