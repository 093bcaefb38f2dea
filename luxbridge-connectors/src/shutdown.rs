//! Cooperative shutdown
//!
//! One [`Shutdown`] is owned by whoever decides the process should stop.
//! Every task holds a cloned [`ShutdownSignal`] and selects on
//! [`ShutdownSignal::cancelled`] next to its own work.

use tokio::sync::watch;

/// Trigger side
#[derive(Debug)]
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    /// Not yet triggered
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// A new listener
    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal { rx: self.tx.subscribe() }
    }

    /// Tell every listener to stop, idempotent
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Whether [`Shutdown::trigger`] was called
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Listener side, cheap to clone
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Resolves once shutdown is triggered or the trigger is dropped
    pub async fn cancelled(&mut self) {
        // Err means the Shutdown was dropped, which also stops us
        let _ = self.rx.wait_for(|stop| *stop).await;
    }

    /// Non-blocking check
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }
}
