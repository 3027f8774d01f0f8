//! Infeed lifecycle controller
//!
//! Binds accelerator system bring-up and shutdown to the host session
//! lifecycle, and keeps the feeder in lockstep with the host loop. The
//! controller never decides why the enclosing loop stops; it only reacts to
//! callback ordering.

use std::sync::Arc;
use async_trait::async_trait;
use tokio::runtime::Handle;
use tracing::info;

use super::feeder::InfeedFeeder;
use super::queue::EnqueueOps;
use crate::config::RunConfig;
use crate::error::{LockstepError, Result};
use crate::execution::AcceleratorBackend;
use crate::metrics::standard::BATCH_SIGNALS;

/// Lifecycle callbacks consumed by the enclosing host training loop
///
/// The host loop calls these in order: `begin` once before the session,
/// `after_session_created` once the session exists, `before_run` at every
/// loop boundary, `end` exactly once at teardown.
#[async_trait]
pub trait TrainingHook: Send {
    /// Called once before the session is created
    fn begin(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called once after the session is created
    async fn after_session_created(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called before every host run step
    async fn before_run(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called once when the session ends
    async fn end(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Controller lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerPhase {
    Init,
    Running,
    Shutdown,
}

impl std::fmt::Display for ControllerPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ControllerPhase::Init => "init",
            ControllerPhase::Running => "running",
            ControllerPhase::Shutdown => "shutdown",
        };
        write!(f, "{}", name)
    }
}

/// Session lifecycle hook owning the accelerator system and the feeder
pub struct InfeedController {
    config: RunConfig,
    backend: Arc<dyn AcceleratorBackend>,
    enqueue: Option<Arc<EnqueueOps>>,
    infeed_handle: Handle,
    feeder: Option<InfeedFeeder>,
    phase: ControllerPhase,
}

impl InfeedController {
    /// Create a controller for one training session
    pub fn new(
        config: RunConfig,
        backend: Arc<dyn AcceleratorBackend>,
        enqueue: Arc<EnqueueOps>,
        infeed_handle: Handle,
    ) -> Self {
        Self {
            config,
            backend,
            enqueue: Some(enqueue),
            infeed_handle,
            feeder: None,
            phase: ControllerPhase::Init,
        }
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> ControllerPhase {
        self.phase
    }

    /// True if the feeder task has already exited
    ///
    /// Lets the host loop observe a dead feeder before `end` would hang on
    /// an undrainable queue.
    pub fn feeder_finished(&self) -> bool {
        self.feeder.as_ref().map(|f| f.is_finished()).unwrap_or(false)
    }
}

#[async_trait]
impl TrainingHook for InfeedController {
    fn begin(&mut self) -> Result<()> {
        info!(job = ?self.config.accelerator_job(), "infeed controller attached");
        Ok(())
    }

    async fn after_session_created(&mut self) -> Result<()> {
        let job = self.config.accelerator_job();
        info!("initializing accelerator system");
        self.backend.initialize_system(job).await?;

        let enqueue = self.enqueue.take().ok_or_else(|| LockstepError::Internal {
            message: "controller started twice".into(),
        })?;
        info!("starting infeed feeder");
        self.feeder = Some(InfeedFeeder::start(
            &self.infeed_handle,
            enqueue,
            self.config.accel.iterations_per_loop,
        ));
        self.phase = ControllerPhase::Running;
        Ok(())
    }

    async fn before_run(&mut self) -> Result<()> {
        if self.phase != ControllerPhase::Running {
            return Err(LockstepError::NotRunning {
                phase: self.phase.to_string(),
            });
        }
        let feeder = self.feeder.as_ref().ok_or_else(|| LockstepError::Internal {
            message: "running controller has no feeder".into(),
        })?;
        info!("load next batch of data to infeed");
        feeder.load_next_batch()?;
        BATCH_SIGNALS.inc();
        Ok(())
    }

    async fn end(&mut self) -> Result<()> {
        if let Some(feeder) = self.feeder.take() {
            info!("stopping infeed feeder");
            feeder.join().await?;
        }
        info!("shutting down accelerator system");
        self.backend
            .shutdown_system(self.config.accelerator_job())
            .await?;
        self.phase = ControllerPhase::Shutdown;
        Ok(())
    }
}
