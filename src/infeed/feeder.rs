//! Infeed feeder task
//!
//! A background task that keeps the hardware input queue full. Each
//! NEXT_BATCH signal authorizes exactly one loop's worth of enqueue
//! executions; STOP ends the task after the current batch completes.

use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::queue::EnqueueOps;
use super::signal::{signal_channel, Signal, SignalSender};
use crate::error::{LockstepError, Result};
use crate::metrics::standard::FEEDER_ACTIVE;

/// Background feeder for the infeed queue
///
/// Owns the signal channel's sending half and the task handle. The task and
/// the host loop share nothing else.
pub struct InfeedFeeder {
    signals: SignalSender,
    task: JoinHandle<Result<u64>>,
}

impl InfeedFeeder {
    /// Spawn the feeder loop on the given runtime handle
    pub fn start(handle: &Handle, enqueue: Arc<EnqueueOps>, iterations_per_signal: usize) -> Self {
        let (signals, mut rx) = signal_channel();
        FEEDER_ACTIVE.set(1);

        let task = handle.spawn(async move {
            let mut count: u64 = 0;
            loop {
                match rx.recv().await {
                    Some(Signal::Stop) | None => {
                        info!(batches = count, "stopping infeed feeder");
                        FEEDER_ACTIVE.set(0);
                        return Ok(count);
                    }
                    Some(Signal::NextBatch) => {
                        for i in 0..iterations_per_signal {
                            debug!(batch = count, iteration = i, "enqueue for iteration");
                            if let Err(e) = enqueue.run().await {
                                error!(batch = count, iteration = i, error = %e, "enqueue failed, feeder exiting");
                                FEEDER_ACTIVE.set(0);
                                return Err(e);
                            }
                        }
                        count += 1;
                    }
                }
            }
        });

        Self { signals, task }
    }

    /// Signal the feeder to push one loop's worth of batches
    ///
    /// Fire-and-forget; back-pressure comes from the bounded hardware queue
    /// blocking the feeder, never the caller.
    pub fn load_next_batch(&self) -> Result<()> {
        self.signals.send(Signal::NextBatch)
    }

    /// True once the feeder task has exited, normally or not
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Send STOP and wait for the task to exit
    ///
    /// Returns the number of batches the feeder processed. If the task
    /// already died mid-enqueue its error is returned instead; the failed
    /// STOP send is expected in that case.
    pub async fn join(self) -> Result<u64> {
        info!("waiting for infeed feeder to exit");
        let _ = self.signals.send(Signal::Stop);
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(LockstepError::FeederDead {
                reason: format!("feeder task panicked: {}", e),
            }),
        }
    }
}
