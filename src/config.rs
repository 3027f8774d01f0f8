//! Run configuration and training context
//!
//! Configuration for sharded execution plus the explicit training context
//! that owns the global step counter. No component reads ambient state;
//! the context is passed to everything that needs it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use serde::{Deserialize, Serialize};

use crate::error::{LockstepError, Result};

/// Job name used to place infeed operations when running against a remote master
pub const ACCELERATOR_JOB_NAME: &str = "accel_worker";

/// Accelerator-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceleratorConfig {
    /// Number of data-parallel shards
    pub num_shards: usize,
    /// Device-side iterations executed per host loop boundary
    pub iterations_per_loop: usize,
}

impl Default for AcceleratorConfig {
    fn default() -> Self {
        Self {
            num_shards: 2,
            iterations_per_loop: 2,
        }
    }
}

/// Run configuration for a training session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Master endpoint ("" or "local" means single-host)
    pub master: String,
    /// Accelerator configuration
    pub accel: AcceleratorConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            master: String::new(),
            accel: AcceleratorConfig::default(),
        }
    }
}

impl RunConfig {
    /// Job namespace for infeed placement
    ///
    /// Local masters have no job namespace; everything is placed on task 0.
    pub fn accelerator_job(&self) -> Option<&str> {
        match self.master.as_str() {
            "" | "local" => None,
            _ => Some(ACCELERATOR_JOB_NAME),
        }
    }

    /// Validate the configuration at construction time
    pub fn validate(&self) -> Result<()> {
        if self.accel.num_shards == 0 {
            return Err(LockstepError::InvalidConfig {
                reason: "num_shards must be at least 1".into(),
            });
        }
        if self.accel.iterations_per_loop == 0 {
            return Err(LockstepError::InvalidConfig {
                reason: "iterations_per_loop must be at least 1".into(),
            });
        }
        Ok(())
    }
}

/// Explicit training context owning the global step counter
///
/// The counter is created exactly once per session; a second creation is a
/// configuration error, matching the single-writer contract for the step.
pub struct TrainingContext {
    config: RunConfig,
    global_step: AtomicU64,
    step_created: AtomicBool,
}

impl TrainingContext {
    /// Create a new context for one training session
    pub fn new(config: RunConfig) -> Self {
        Self {
            config,
            global_step: AtomicU64::new(0),
            step_created: AtomicBool::new(false),
        }
    }

    /// Borrow the run configuration
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Create the global step counter
    pub fn create_global_step(&self) -> Result<()> {
        if self.step_created.swap(true, Ordering::SeqCst) {
            return Err(LockstepError::GlobalStepExists);
        }
        Ok(())
    }

    /// Current global step
    pub fn global_step(&self) -> u64 {
        self.global_step.load(Ordering::Relaxed)
    }

    /// Increment the global step, returning the new value
    pub fn increment_step(&self) -> u64 {
        self.global_step.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_resolution() {
        let mut config = RunConfig::default();
        assert_eq!(config.accelerator_job(), None);

        config.master = "local".into();
        assert_eq!(config.accelerator_job(), None);

        config.master = "grpc://10.0.0.1:8470".into();
        assert_eq!(config.accelerator_job(), Some(ACCELERATOR_JOB_NAME));
    }

    #[test]
    fn test_validate_rejects_zero_shards() {
        let config = RunConfig {
            accel: AcceleratorConfig {
                num_shards: 0,
                iterations_per_loop: 2,
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_global_step_single_creation() {
        let ctx = TrainingContext::new(RunConfig::default());
        ctx.create_global_step().unwrap();
        assert!(matches!(
            ctx.create_global_step(),
            Err(LockstepError::GlobalStepExists)
        ));

        assert_eq!(ctx.global_step(), 0);
        assert_eq!(ctx.increment_step(), 1);
        assert_eq!(ctx.global_step(), 1);
    }
}
