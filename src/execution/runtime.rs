//! Runtime management and the accelerator system contract
//!
//! Provides separate infeed and compute runtimes so a stalled enqueue can
//! never starve the shard loops, plus the system bring-up/teardown trait
//! the controller drives.

use async_trait::async_trait;
use tokio::runtime::{Builder, Runtime};
use tracing::info;

use crate::error::{LockstepError, Result};

/// System bring-up and teardown for the accelerator fabric
///
/// Implementations must tolerate operation submission from both the host
/// control task and the feeder task.
#[async_trait]
pub trait AcceleratorBackend: Send + Sync {
    /// Initialize the accelerator system for the given job namespace
    async fn initialize_system(&self, job: Option<&str>) -> Result<()>;

    /// Shut the accelerator system down
    ///
    /// Must only be called after the feeder has fully drained.
    async fn shutdown_system(&self, job: Option<&str>) -> Result<()>;
}

/// Backend for single-host runs with no remote accelerator fabric
pub struct LocalBackend;

#[async_trait]
impl AcceleratorBackend for LocalBackend {
    async fn initialize_system(&self, job: Option<&str>) -> Result<()> {
        info!(job = ?job, "initialized local accelerator system");
        Ok(())
    }

    async fn shutdown_system(&self, job: Option<&str>) -> Result<()> {
        info!(job = ?job, "shut down local accelerator system");
        Ok(())
    }
}

/// Configuration for the lockstep runtime
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Number of threads for the infeed runtime
    pub infeed_threads: usize,
    /// Number of threads for shard computation
    pub compute_threads: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let cpus = num_cpus::get();
        Self {
            infeed_threads: 2,
            compute_threads: cpus.max(2),
        }
    }
}

/// Dual-runtime executor for lockstep training
///
/// The feeder runs on the infeed runtime; shard loops run on the compute
/// runtime. A full hardware queue then parks only infeed threads.
pub struct LockstepRuntime {
    infeed_runtime: Runtime,
    compute_runtime: Runtime,
}

impl LockstepRuntime {
    /// Create a new runtime with the given configuration
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        let infeed_runtime = Builder::new_multi_thread()
            .worker_threads(config.infeed_threads)
            .thread_name("lockstep-infeed")
            .enable_all()
            .build()
            .map_err(|e| LockstepError::Internal {
                message: format!("failed to create infeed runtime: {}", e),
            })?;

        let compute_runtime = Builder::new_multi_thread()
            .worker_threads(config.compute_threads)
            .thread_name("lockstep-compute")
            .enable_all()
            .build()
            .map_err(|e| LockstepError::Internal {
                message: format!("failed to create compute runtime: {}", e),
            })?;

        Ok(Self {
            infeed_runtime,
            compute_runtime,
        })
    }

    /// Handle for spawning infeed work
    pub fn infeed_handle(&self) -> tokio::runtime::Handle {
        self.infeed_runtime.handle().clone()
    }

    /// Handle for spawning shard computation
    pub fn compute_handle(&self) -> tokio::runtime::Handle {
        self.compute_runtime.handle().clone()
    }

    /// Run a future on the compute runtime, blocking until complete
    pub fn block_on<F: std::future::Future>(&self, future: F) -> F::Output {
        self.compute_runtime.block_on(future)
    }

    /// Shut both runtimes down
    pub fn shutdown(self) {
        self.compute_runtime.shutdown_background();
        self.infeed_runtime
            .shutdown_timeout(std::time::Duration::from_secs(30));
    }
}
