//! Lockstep Core - replica-synchronous training execution
//!
//! This crate coordinates synchronous, replicated computation on a fixed
//! array of accelerator shards:
//! - Infeed orchestration (feeder task + signal protocol)
//! - Enqueue/dequeue pair construction over a bounded hardware queue
//! - A replicated fixed-count step loop across all shards
//! - A model-function adapter with a restricted result contract

pub mod config;
pub mod error;
pub mod execution;
pub mod infeed;
pub mod metrics;
pub mod model_fn;
pub mod tensor;

pub use config::{AcceleratorConfig, RunConfig, TrainingContext};
pub use error::{LockstepError, Result};
pub use execution::{AcceleratorBackend, LocalBackend, LockstepRuntime};
pub use infeed::{InfeedController, InfeedFeeder, TrainingHook};
pub use model_fn::{wrap_model_fn, Mode, ModelFn, ModelFnCaps, StepSpec, WrappedModelFn};
