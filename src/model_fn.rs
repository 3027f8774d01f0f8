//! Model-function adapter
//!
//! Wraps a user-supplied per-batch computation so it can run once per
//! dequeue inside the replicated shard loop. Enforces the restricted step
//! result contract: a loss and an update operation, nothing else.

use std::sync::Arc;
use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::TrainingContext;
use crate::error::{LockstepError, Result};
use crate::execution::runtime::{AcceleratorBackend, LockstepRuntime};
use crate::execution::shard_loop::{train_on_shards, ShardStep};
use crate::infeed::controller::{InfeedController, TrainingHook};
use crate::infeed::queue::{build_infeed_pair, BatchDescriptor, BatchSource, DequeueHandle, ShardTopology};
use crate::metrics::standard::{GLOBAL_STEP, STEPS_EXECUTED};
use crate::tensor::{Features, Tensor};

/// Session mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Train,
    Eval,
    Predict,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Mode::Train => "train",
            Mode::Eval => "eval",
            Mode::Predict => "predict",
        };
        write!(f, "{}", name)
    }
}

/// Capability flags for the user model function
///
/// Set once by the integrator; the adapter passes `mode` and `config` to the
/// model function only when the corresponding flag is set. No call-time
/// introspection.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelFnCaps {
    pub supports_mode: bool,
    pub supports_config: bool,
}

/// Optional named parameters for one model-function invocation
pub struct StepContext<'a> {
    pub mode: Option<Mode>,
    pub config: Option<&'a crate::config::RunConfig>,
}

/// Update operation returned by the model function
pub type TrainOp = Box<dyn FnOnce() -> Result<()> + Send>;

/// Result of one model-function invocation
pub struct StepSpec {
    /// Loss for this step
    pub loss: f32,
    /// Update operation, applied before the loss readback counts
    pub train_op: TrainOp,
    /// Per-step hooks; requesting any is a contract violation
    pub training_hooks: Vec<Box<dyn TrainingHook>>,
    /// Chief-only hooks; requesting any is a contract violation
    pub training_chief_hooks: Vec<Box<dyn TrainingHook>>,
}

impl std::fmt::Debug for StepSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepSpec")
            .field("loss", &self.loss)
            .field("training_hooks", &self.training_hooks.len())
            .field("training_chief_hooks", &self.training_chief_hooks.len())
            .finish_non_exhaustive()
    }
}

impl StepSpec {
    /// Create a spec with no hooks
    pub fn new(loss: f32, train_op: TrainOp) -> Self {
        Self {
            loss,
            train_op,
            training_hooks: Vec::new(),
            training_chief_hooks: Vec::new(),
        }
    }
}

/// User-supplied per-batch computation
pub trait ModelFn: Send + Sync {
    /// Compute one step from a dequeued batch
    fn call(&self, features: Features, labels: Tensor, ctx: StepContext<'_>) -> Result<StepSpec>;
}

impl<F> ModelFn for F
where
    F: Fn(Features, Tensor, StepContext<'_>) -> Result<StepSpec> + Send + Sync,
{
    fn call(&self, features: Features, labels: Tensor, ctx: StepContext<'_>) -> Result<StepSpec> {
        self(features, labels, ctx)
    }
}

/// Validate the step spec against the restricted contract
///
/// Hooks have no meaning when the computation body executes device-side;
/// the enclosing controller supplies all lifecycle behavior.
pub fn verify_step_spec(spec: StepSpec) -> Result<StepSpec> {
    if !spec.training_chief_hooks.is_empty() {
        return Err(LockstepError::UnsupportedHooks {
            kind: "training_chief_hooks".into(),
        });
    }
    if !spec.training_hooks.is_empty() {
        return Err(LockstepError::UnsupportedHooks {
            kind: "training_hooks".into(),
        });
    }
    Ok(spec)
}

/// The replicated training step built from a model function
pub struct TrainStep {
    dequeue: DequeueHandle,
    model_fn: Arc<dyn ModelFn>,
    caps: ModelFnCaps,
    ctx: Arc<TrainingContext>,
}

#[async_trait]
impl ShardStep for TrainStep {
    async fn step(&self, shard: usize, _carry_loss: f32) -> Result<f32> {
        // The carry only seeds the loop; every iteration's loss is real.
        let (features, labels) = self.dequeue.dequeue(shard).await?;

        let step_ctx = StepContext {
            mode: self.caps.supports_mode.then_some(Mode::Train),
            config: self.caps.supports_config.then(|| self.ctx.config()),
        };
        let spec = verify_step_spec(self.model_fn.call(features, labels, step_ctx)?)?;

        // Apply the update before the loss is considered this step's loss.
        let StepSpec { loss, train_op, .. } = spec;
        train_op()?;
        if !loss.is_finite() {
            return Err(LockstepError::NonFiniteLoss { shard, value: loss });
        }

        STEPS_EXECUTED.inc();
        if shard == 0 {
            GLOBAL_STEP.set(self.ctx.increment_step() as i64);
        }
        debug!(shard, loss, "step complete");
        Ok(loss)
    }
}

/// A model function wrapped for sharded execution
///
/// Drop-in substitute for a plain step function: the caller supplies the
/// input source and descriptor, and gets back the hook object and the
/// replicated loop program.
pub struct WrappedModelFn {
    model_fn: Arc<dyn ModelFn>,
    ctx: Arc<TrainingContext>,
    caps: ModelFnCaps,
    backend: Arc<dyn AcceleratorBackend>,
}

impl std::fmt::Debug for WrappedModelFn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WrappedModelFn")
            .field("caps", &self.caps)
            .finish_non_exhaustive()
    }
}

/// Wrap a model function for sharded execution
///
/// Validates the run configuration and creates the global step in the
/// training context; both failures surface here, before any session exists.
pub fn wrap_model_fn(
    model_fn: Arc<dyn ModelFn>,
    ctx: Arc<TrainingContext>,
    caps: ModelFnCaps,
    backend: Arc<dyn AcceleratorBackend>,
) -> Result<WrappedModelFn> {
    ctx.config().validate()?;
    ctx.create_global_step()?;
    Ok(WrappedModelFn {
        model_fn,
        ctx,
        caps,
        backend,
    })
}

impl WrappedModelFn {
    /// Build the training program and its lifecycle hook
    ///
    /// Only `Mode::Train` executes on shards; evaluation and inference are
    /// external collaborators.
    pub fn call(
        &self,
        mode: Mode,
        runtime: &LockstepRuntime,
        descriptor: BatchDescriptor,
        source: Box<dyn BatchSource>,
    ) -> Result<TrainSpec> {
        if mode != Mode::Train {
            return Err(LockstepError::UnsupportedMode {
                mode: mode.to_string(),
            });
        }

        let config = self.ctx.config().clone();
        let topology = ShardTopology::new(
            config.accel.num_shards,
            config.accelerator_job().map(String::from),
        );
        // Queue depth matches the iteration count so the device loop never
        // races ahead of the feeder.
        let (enqueue, dequeue) = build_infeed_pair(
            descriptor,
            source,
            topology,
            config.accel.iterations_per_loop,
        )?;

        let step = Arc::new(TrainStep {
            dequeue,
            model_fn: self.model_fn.clone(),
            caps: self.caps,
            ctx: self.ctx.clone(),
        });
        let hook = InfeedController::new(
            config.clone(),
            self.backend.clone(),
            Arc::new(enqueue),
            runtime.infeed_handle(),
        );

        info!(
            num_shards = config.accel.num_shards,
            iterations = config.accel.iterations_per_loop,
            "built sharded training program"
        );
        Ok(TrainSpec {
            hook,
            step,
            ctx: self.ctx.clone(),
            compute: runtime.compute_handle(),
        })
    }
}

/// One session's training program: the lifecycle hook plus the shard loop
pub struct TrainSpec {
    /// Lifecycle hook the host loop must drive
    pub hook: InfeedController,
    step: Arc<TrainStep>,
    ctx: Arc<TrainingContext>,
    compute: tokio::runtime::Handle,
}

impl std::fmt::Debug for TrainSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrainSpec").finish_non_exhaustive()
    }
}

impl TrainSpec {
    /// Run one replicated loop's worth of computation
    ///
    /// The host loop calls this once per `before_run`, after the hook has
    /// authorized the batch.
    pub async fn run_shards(&self) -> Result<f32> {
        train_on_shards(&self.compute, self.ctx.config(), self.step.clone()).await
    }

    /// Current global step
    pub fn global_step(&self) -> u64 {
        self.ctx.global_step()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopHook;

    #[async_trait]
    impl TrainingHook for NoopHook {}

    #[test]
    fn test_verify_rejects_chief_hooks() {
        let mut spec = StepSpec::new(1.0, Box::new(|| Ok(())));
        spec.training_chief_hooks.push(Box::new(NoopHook));
        let err = verify_step_spec(spec).unwrap_err();
        assert!(matches!(
            &err,
            LockstepError::UnsupportedHooks { kind } if kind == "training_chief_hooks"
        ));
        assert!(err.is_contract_violation());
    }

    #[test]
    fn test_verify_rejects_step_hooks() {
        let mut spec = StepSpec::new(1.0, Box::new(|| Ok(())));
        spec.training_hooks.push(Box::new(NoopHook));
        assert!(matches!(
            verify_step_spec(spec),
            Err(LockstepError::UnsupportedHooks { kind }) if kind == "training_hooks"
        ));
    }

    #[test]
    fn test_verify_accepts_bare_spec() {
        let spec = StepSpec::new(0.5, Box::new(|| Ok(())));
        assert!(verify_step_spec(spec).is_ok());
    }
}
