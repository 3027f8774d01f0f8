//! Stress tests for the infeed path

use std::sync::Arc;

use async_trait::async_trait;
use lockstep_core::config::{AcceleratorConfig, RunConfig, TrainingContext};
use lockstep_core::error::{LockstepError, Result};
use lockstep_core::execution::{LocalBackend, LockstepRuntime, RuntimeConfig};
use lockstep_core::infeed::{signal_channel, BatchDescriptor, BatchSource, Signal, TrainingHook};
use lockstep_core::model_fn::{wrap_model_fn, Mode, ModelFn, ModelFnCaps, StepContext, StepSpec};
use lockstep_core::tensor::{Batch, Features, Tensor};

const SIGNAL_COUNT: usize = 10_000;

#[tokio::test]
async fn test_signal_ordering_under_interleaving() {
    let (tx, mut rx) = signal_channel();

    let producer = tokio::spawn(async move {
        for i in 0..SIGNAL_COUNT {
            tx.send(Signal::NextBatch).unwrap();
            if i % 64 == 0 {
                tokio::task::yield_now().await;
            }
        }
        tx.send(Signal::Stop).unwrap();
    });

    // Every send produces exactly one receive, in order: all NEXT_BATCH
    // signals first, then the single STOP, nothing after.
    let mut received = 0usize;
    loop {
        match rx.recv().await {
            Some(Signal::NextBatch) => received += 1,
            Some(Signal::Stop) => break,
            None => panic!("channel closed before STOP"),
        }
    }
    assert_eq!(received, SIGNAL_COUNT);

    // Once the producer is gone, nothing is left unconsumed.
    producer.await.unwrap();
    assert_eq!(rx.recv().await, None);
}

struct SequencedSource {
    produced: u32,
    rows: usize,
}

#[async_trait]
impl BatchSource for SequencedSource {
    async fn next_batch(&mut self) -> Result<Batch> {
        self.produced += 1;
        let fill = self.produced as f32;
        Ok(Batch {
            features: Features::Single(
                Tensor::from_f32(vec![self.rows, 2], &vec![fill; self.rows * 2]).unwrap(),
            ),
            label: Tensor::from_f32(vec![self.rows], &vec![fill; self.rows]).unwrap(),
        })
    }
}

struct MeanLoss;

impl ModelFn for MeanLoss {
    fn call(&self, features: Features, _labels: Tensor, _ctx: StepContext<'_>) -> Result<StepSpec> {
        let values = match &features {
            Features::Single(t) => t.to_f32_vec()?,
            Features::Named(_) => unreachable!("source produces anonymous features"),
        };
        let loss = values.iter().sum::<f32>() / values.len() as f32;
        Ok(StepSpec::new(loss, Box::new(|| Ok(()))))
    }
}

#[test]
fn test_many_host_loop_iterations() {
    const LOOPS: usize = 50;

    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let runtime = LockstepRuntime::new(RuntimeConfig::default()).unwrap();
    let config = RunConfig {
        master: String::new(),
        accel: AcceleratorConfig {
            num_shards: 2,
            iterations_per_loop: 2,
        },
    };
    let ctx = Arc::new(TrainingContext::new(config));
    let wrapped = wrap_model_fn(
        Arc::new(MeanLoss),
        ctx,
        ModelFnCaps::default(),
        Arc::new(LocalBackend),
    )
    .unwrap();

    let template = Batch {
        features: Features::Single(Tensor::from_f32(vec![2, 2], &[0.0; 4]).unwrap()),
        label: Tensor::from_f32(vec![2], &[0.0; 2]).unwrap(),
    };
    let mut spec = wrapped
        .call(
            Mode::Train,
            &runtime,
            BatchDescriptor::from_batch(&template),
            Box::new(SequencedSource { produced: 0, rows: 2 }),
        )
        .unwrap();

    let (losses, global_step) = runtime
        .block_on(async {
            spec.hook.begin()?;
            spec.hook.after_session_created().await?;
            let mut losses = Vec::new();
            for _ in 0..LOOPS {
                spec.hook.before_run().await?;
                losses.push(spec.run_shards().await?);
            }
            spec.hook.end().await?;
            Ok::<_, LockstepError>((losses, spec.global_step()))
        })
        .unwrap();
    runtime.shutdown();

    assert_eq!(losses.len(), LOOPS);
    assert!(losses.iter().all(|l| l.is_finite()));
    // Batches arrive in order, so the representative loss grows with the
    // batch sequence number: loop i consumes batches 2i+1 and 2i+2.
    assert_eq!(losses[0], 2.0);
    assert_eq!(losses[LOOPS - 1], (2 * LOOPS) as f32);
    assert_eq!(global_step, (LOOPS * 2) as u64);
}
