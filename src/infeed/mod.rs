//! Infeed orchestration
//!
//! Signal channel, feeder task, lifecycle controller, and the hardware
//! input-queue pair builder.

pub mod controller;
pub mod feeder;
pub mod queue;
pub mod signal;

pub use controller::{ControllerPhase, InfeedController, TrainingHook};
pub use feeder::InfeedFeeder;
pub use queue::{
    build_infeed_pair, BatchDescriptor, BatchSource, DequeueHandle, EnqueueOps, HostPlacement,
    ShardTopology, SHARDS_PER_HOST_TASK,
};
pub use signal::{signal_channel, Signal, SignalReceiver, SignalSender};
