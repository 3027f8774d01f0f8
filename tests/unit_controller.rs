//! Unit tests for the infeed lifecycle controller

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lockstep_core::config::{AcceleratorConfig, RunConfig};
use lockstep_core::error::{LockstepError, Result};
use lockstep_core::execution::AcceleratorBackend;
use lockstep_core::infeed::{
    build_infeed_pair, BatchDescriptor, BatchSource, ControllerPhase, DequeueHandle,
    InfeedController, ShardTopology, TrainingHook,
};
use lockstep_core::tensor::{Batch, Features, Tensor};
use parking_lot::Mutex;
use tokio::runtime::Handle;

type EventLog = Arc<Mutex<Vec<String>>>;

struct LogBackend {
    log: EventLog,
}

#[async_trait]
impl AcceleratorBackend for LogBackend {
    async fn initialize_system(&self, _job: Option<&str>) -> Result<()> {
        self.log.lock().push("initialize_system".into());
        Ok(())
    }

    async fn shutdown_system(&self, _job: Option<&str>) -> Result<()> {
        self.log.lock().push("shutdown_system".into());
        Ok(())
    }
}

struct LogSource {
    log: EventLog,
}

#[async_trait]
impl BatchSource for LogSource {
    async fn next_batch(&mut self) -> Result<Batch> {
        self.log.lock().push("enqueue".into());
        Ok(Batch {
            features: Features::Single(Tensor::from_f32(vec![1], &[0.5]).unwrap()),
            label: Tensor::from_f32(vec![1], &[1.0]).unwrap(),
        })
    }
}

fn controller_under_test(log: EventLog, iterations: usize) -> (InfeedController, DequeueHandle) {
    let config = RunConfig {
        master: String::new(),
        accel: AcceleratorConfig {
            num_shards: 1,
            iterations_per_loop: iterations,
        },
    };
    let template = Batch {
        features: Features::Single(Tensor::from_f32(vec![1], &[0.0]).unwrap()),
        label: Tensor::from_f32(vec![1], &[0.0]).unwrap(),
    };
    let (enqueue, dequeue) = build_infeed_pair(
        BatchDescriptor::from_batch(&template),
        Box::new(LogSource { log: log.clone() }),
        ShardTopology::new(1, None),
        iterations,
    )
    .unwrap();
    let controller = InfeedController::new(
        config,
        Arc::new(LogBackend { log }),
        Arc::new(enqueue),
        Handle::current(),
    );
    (controller, dequeue)
}

async fn wait_for_event(log: &EventLog, event: &str) {
    for _ in 0..500 {
        if log.lock().iter().any(|e| e == event) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("event {event} never observed");
}

#[tokio::test]
async fn test_lifecycle_ordering() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let log: EventLog = Arc::new(Mutex::new(Vec::new()));
    let (mut controller, _dequeue) = controller_under_test(log.clone(), 2);

    controller.begin().unwrap();
    assert_eq!(controller.phase(), ControllerPhase::Init);

    controller.after_session_created().await.unwrap();
    assert_eq!(controller.phase(), ControllerPhase::Running);

    controller.before_run().await.unwrap();
    wait_for_event(&log, "enqueue").await;

    controller.end().await.unwrap();
    assert_eq!(controller.phase(), ControllerPhase::Shutdown);

    let events = log.lock().clone();
    let init_idx = events.iter().position(|e| e == "initialize_system").unwrap();
    let first_enqueue = events.iter().position(|e| e == "enqueue").unwrap();
    let shutdown_idx = events.iter().position(|e| e == "shutdown_system").unwrap();

    // Init strictly precedes the first enqueue; every enqueue precedes
    // shutdown (join drained the feeder first).
    assert!(init_idx < first_enqueue);
    assert_eq!(shutdown_idx, events.len() - 1);
    assert_eq!(events.iter().filter(|e| *e == "enqueue").count(), 2);
}

#[tokio::test]
async fn test_before_run_requires_running_phase() {
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));
    let (mut controller, _dequeue) = controller_under_test(log, 1);

    let err = controller.before_run().await.unwrap_err();
    assert!(matches!(err, LockstepError::NotRunning { .. }), "{err}");
}

#[tokio::test]
async fn test_end_without_signals_still_shuts_down() {
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));
    let (mut controller, _dequeue) = controller_under_test(log.clone(), 1);

    controller.begin().unwrap();
    controller.after_session_created().await.unwrap();
    controller.end().await.unwrap();

    let events = log.lock().clone();
    assert_eq!(events, vec!["initialize_system", "shutdown_system"]);
}

#[tokio::test]
async fn test_dead_feeder_visible_to_host_loop() {
    struct BrokenSource;

    #[async_trait]
    impl BatchSource for BrokenSource {
        async fn next_batch(&mut self) -> Result<Batch> {
            Err(LockstepError::Internal {
                message: "broken".into(),
            })
        }
    }

    let log: EventLog = Arc::new(Mutex::new(Vec::new()));
    let config = RunConfig {
        master: String::new(),
        accel: AcceleratorConfig {
            num_shards: 1,
            iterations_per_loop: 1,
        },
    };
    let template = Batch {
        features: Features::Single(Tensor::from_f32(vec![1], &[0.0]).unwrap()),
        label: Tensor::from_f32(vec![1], &[0.0]).unwrap(),
    };
    let (enqueue, _dequeue) = build_infeed_pair(
        BatchDescriptor::from_batch(&template),
        Box::new(BrokenSource),
        ShardTopology::new(1, None),
        1,
    )
    .unwrap();
    let mut controller = InfeedController::new(
        config,
        Arc::new(LogBackend { log }),
        Arc::new(enqueue),
        Handle::current(),
    );

    controller.begin().unwrap();
    controller.after_session_created().await.unwrap();
    assert!(!controller.feeder_finished());

    controller.before_run().await.unwrap();
    for _ in 0..500 {
        if controller.feeder_finished() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(controller.feeder_finished());

    // Teardown surfaces the feeder's error rather than hanging.
    let err = controller.end().await.unwrap_err();
    assert!(matches!(err, LockstepError::Internal { .. }), "{err}");
}
