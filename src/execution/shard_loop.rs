//! Sharded repeat-loop execution
//!
//! Replicates one step function across every shard as a fixed-count loop
//! and reports the representative shard's loss.

use std::future::Future;
use std::sync::Arc;
use async_trait::async_trait;
use tokio::runtime::Handle;
use tracing::debug;

use crate::config::RunConfig;
use crate::error::{LockstepError, Result};

/// Seed value for the loop-carried loss
///
/// Only exists to give the first iteration a carry; every real iteration
/// overwrites it.
pub const INITIAL_LOOP_LOSS: f32 = 1e7;

/// One replicated training step, executed per shard per iteration
#[async_trait]
pub trait ShardStep: Send + Sync {
    /// Execute one step on `shard`, consuming one dequeued batch
    async fn step(&self, shard: usize, carry_loss: f32) -> Result<f32>;
}

/// Run `body` exactly `iterations` times, threading the loss carry
pub async fn repeat<F, Fut>(iterations: usize, mut body: F, initial_carry: f32) -> Result<f32>
where
    F: FnMut(f32) -> Fut,
    Fut: Future<Output = Result<f32>>,
{
    let mut carry = initial_carry;
    for _ in 0..iterations {
        carry = body(carry).await?;
    }
    Ok(carry)
}

/// Replicate the same body across `num_shards` shards
///
/// Every shard runs an identical copy of the program over its own slice of
/// data. When `outputs_from_all_shards` is false only shard 0's output is
/// returned.
pub async fn run_sharded<F, Fut>(
    handle: &Handle,
    num_shards: usize,
    body: F,
    outputs_from_all_shards: bool,
) -> Result<Vec<f32>>
where
    F: Fn(usize) -> Fut,
    Fut: Future<Output = Result<f32>> + Send + 'static,
{
    if num_shards == 0 {
        return Err(LockstepError::InvalidConfig {
            reason: "cannot replicate across zero shards".into(),
        });
    }

    let tasks: Vec<_> = (0..num_shards)
        .map(|shard| handle.spawn(body(shard)))
        .collect();

    let mut outputs = Vec::with_capacity(num_shards);
    for (shard, task) in tasks.into_iter().enumerate() {
        let loss = task.await.map_err(|e| LockstepError::Internal {
            message: format!("shard {} task failed: {}", shard, e),
        })??;
        outputs.push(loss);
    }

    if !outputs_from_all_shards {
        outputs.truncate(1);
    }
    Ok(outputs)
}

/// Execute the replicated repeat loop once and return the representative loss
///
/// Each shard repeats `step` for `iterations_per_loop` iterations. Only the
/// first shard's final-iteration loss is returned; there is no cross-shard
/// reduction.
pub async fn train_on_shards(
    handle: &Handle,
    config: &RunConfig,
    step: Arc<dyn ShardStep>,
) -> Result<f32> {
    let iterations = config.accel.iterations_per_loop;
    let num_shards = config.accel.num_shards;
    debug!(num_shards, iterations, "running replicated shard loop");

    let losses = run_sharded(
        handle,
        num_shards,
        move |shard| {
            let step = step.clone();
            async move {
                repeat(
                    iterations,
                    |carry| {
                        let step = step.clone();
                        async move { step.step(shard, carry).await }
                    },
                    INITIAL_LOOP_LOSS,
                )
                .await
            }
        },
        false,
    )
    .await?;

    Ok(losses[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_repeat_threads_carry() {
        let loss = repeat(3, |carry| async move { Ok(carry + 1.0) }, 0.0)
            .await
            .unwrap();
        assert_eq!(loss, 3.0);
    }

    #[tokio::test]
    async fn test_repeat_zero_iterations_returns_seed() {
        let loss = repeat(0, |carry| async move { Ok(carry * 2.0) }, 7.0)
            .await
            .unwrap();
        assert_eq!(loss, 7.0);
    }

    #[tokio::test]
    async fn test_run_sharded_representative_only() {
        let handle = Handle::current();
        let outputs = run_sharded(&handle, 4, |shard| async move { Ok(shard as f32) }, false)
            .await
            .unwrap();
        assert_eq!(outputs, vec![0.0]);

        let all = run_sharded(&handle, 4, |shard| async move { Ok(shard as f32) }, true)
            .await
            .unwrap();
        assert_eq!(all, vec![0.0, 1.0, 2.0, 3.0]);
    }
}
