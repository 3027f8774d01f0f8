//! Control signals for the infeed feeder
//!
//! An unbounded FIFO channel carrying exactly two signals from the host
//! control task to the feeder task. Sending never blocks; receiving waits
//! until a signal arrives. Every send produces exactly one receive.

use tokio::sync::mpsc;

use crate::error::{LockstepError, Result};

/// Signal used to control the infeed feeder task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Feed one loop's worth of batches
    NextBatch,
    /// Exit the feeder loop
    Stop,
}

/// Sending half of the signal channel
#[derive(Clone)]
pub struct SignalSender {
    tx: mpsc::UnboundedSender<Signal>,
}

impl SignalSender {
    /// Send a signal; never blocks
    ///
    /// Fails only when the feeder task is gone, which callers use as a
    /// dead-feeder indicator.
    pub fn send(&self, signal: Signal) -> Result<()> {
        self.tx
            .send(signal)
            .map_err(|_| LockstepError::InfeedClosed)
    }
}

/// Receiving half of the signal channel
pub struct SignalReceiver {
    rx: mpsc::UnboundedReceiver<Signal>,
}

impl SignalReceiver {
    /// Receive the next signal in FIFO order
    ///
    /// Returns `None` when all senders have been dropped.
    pub async fn recv(&mut self) -> Option<Signal> {
        self.rx.recv().await
    }
}

/// Create a fresh signal channel for one training session
pub fn signal_channel() -> (SignalSender, SignalReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (SignalSender { tx }, SignalReceiver { rx })
}
