//! Sharded execution
//!
//! Runtime management, the accelerator system contract, and the replicated
//! repeat-loop executor.

pub mod runtime;
pub mod shard_loop;

pub use runtime::{AcceleratorBackend, LocalBackend, LockstepRuntime, RuntimeConfig};
pub use shard_loop::{repeat, run_sharded, train_on_shards, ShardStep, INITIAL_LOOP_LOSS};
