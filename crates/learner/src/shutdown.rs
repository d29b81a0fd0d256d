//! Cooperative shutdown for node loops
//!
//! Dropping or firing the trigger disconnects the channel, which wakes every
//! listener blocked in [`ShutdownListener::wait_timeout`].

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::Duration;

/// Create a trigger and its first listener
pub fn channel() -> (ShutdownTrigger, ShutdownListener) {
    let (sender, receiver) = bounded(0);
    (ShutdownTrigger { _sender: sender }, ShutdownListener { receiver })
}

/// Owner side; shutdown happens when it is fired or dropped
#[derive(Debug)]
pub struct ShutdownTrigger {
    _sender: Sender<()>,
}

impl ShutdownTrigger {
    pub fn fire(self) {
        tracing::debug!("Shutdown requested");
    }
}

/// Observed by node loops between cycles
#[derive(Debug, Clone)]
pub struct ShutdownListener {
    receiver: Receiver<()>,
}

impl ShutdownListener {
    pub fn is_shutdown(&self) -> bool {
        matches!(self.receiver.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Sleep for `period` or until shutdown. Returns true on shutdown.
    pub fn wait_timeout(&self, period: Duration) -> bool {
        match self.receiver.recv_timeout(period) {
            Err(RecvTimeoutError::Timeout) => false,
            Err(RecvTimeoutError::Disconnected) => true,
            // Nothing is ever sent
            Ok(()) => false,
        }
    }
}
