//! Hardware input queue and enqueue/dequeue pair builder
//!
//! Builds the per-shard enqueue operation set and the dequeue function that
//! reconstructs the original named-feature structure on the device side. The
//! ordered tuple of types and shapes is fixed at build time and enforced on
//! both sides; any disagreement is fatal.

use std::sync::Arc;
use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::error::{LockstepError, Result};
use crate::metrics::standard::ENQUEUES_ISSUED;
use crate::tensor::{Batch, ElementType, Features, Tensor};

/// Shards hosted per infeed task; placement divides by this width
pub const SHARDS_PER_HOST_TASK: usize = 8;

/// Shard count and job namespace for enqueue placement
#[derive(Debug, Clone)]
pub struct ShardTopology {
    /// Number of data-parallel shards
    pub num_shards: usize,
    /// Job namespace, if running against a remote master
    pub job: Option<String>,
}

impl ShardTopology {
    /// Create a topology
    pub fn new(num_shards: usize, job: Option<String>) -> Self {
        Self { num_shards, job }
    }

    /// Host placement for one shard's enqueue operation
    pub fn placement(&self, shard: usize) -> HostPlacement {
        match &self.job {
            None => HostPlacement {
                job: None,
                task: 0,
            },
            Some(job) => HostPlacement {
                job: Some(job.clone()),
                task: shard / SHARDS_PER_HOST_TASK,
            },
        }
    }
}

/// Placement of one enqueue operation on a host task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPlacement {
    pub job: Option<String>,
    pub task: usize,
}

impl std::fmt::Display for HostPlacement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.job {
            Some(job) => write!(f, "/job:{}/replica:0/task:{}/device:CPU:0", job, self.task),
            None => write!(f, "/replica:0/task:0/device:CPU:0"),
        }
    }
}

fn signature(dtype: ElementType, shape: &[usize]) -> String {
    format!("{}{:?}", dtype, shape)
}

/// Ordered type/shape contract for one batch
///
/// Feature ordering is fixed at construction; position `i` of the dequeued
/// tuple maps back to name `i`, with the final position always the label.
#[derive(Debug, Clone)]
pub struct BatchDescriptor {
    feature_names: Option<Vec<String>>,
    tuple_types: Vec<ElementType>,
    tuple_shapes: Vec<Vec<usize>>,
}

impl BatchDescriptor {
    /// Derive the descriptor from a template batch
    pub fn from_batch(batch: &Batch) -> Self {
        let feature_names = batch.features.names();
        let tuple = batch.tuple();
        Self {
            feature_names,
            tuple_types: tuple.iter().map(|t| t.dtype()).collect(),
            tuple_shapes: tuple.iter().map(|t| t.shape().to_vec()).collect(),
        }
    }

    /// Number of tuple positions (features plus label)
    pub fn tuple_len(&self) -> usize {
        self.tuple_types.len()
    }

    /// Feature names in positional order, if name-addressed
    pub fn feature_names(&self) -> Option<&[String]> {
        self.feature_names.as_deref()
    }

    /// Validate a full-batch tuple against the recorded types and shapes
    pub fn validate_tuple(&self, tuple: &[&Tensor]) -> Result<()> {
        self.validate_against(tuple, &self.tuple_shapes)
    }

    /// Per-shard shapes after splitting the leading dimension
    pub fn shard_shapes(&self, num_shards: usize) -> Result<Vec<Vec<usize>>> {
        self.tuple_shapes
            .iter()
            .map(|shape| {
                let leading = *shape.first().ok_or_else(|| LockstepError::ShardSplit {
                    reason: "cannot shard a rank-0 tensor".into(),
                })?;
                if leading % num_shards != 0 {
                    return Err(LockstepError::ShardSplit {
                        reason: format!(
                            "leading dimension {} is not divisible by {} shards",
                            leading, num_shards
                        ),
                    });
                }
                let mut s = shape.clone();
                s[0] = leading / num_shards;
                Ok(s)
            })
            .collect()
    }

    fn validate_against(&self, tuple: &[&Tensor], shapes: &[Vec<usize>]) -> Result<()> {
        if tuple.len() != self.tuple_types.len() {
            return Err(LockstepError::TupleMismatch {
                index: tuple.len().min(self.tuple_types.len()),
                expected: format!("{} positions", self.tuple_types.len()),
                actual: format!("{} positions", tuple.len()),
            });
        }
        for (i, tensor) in tuple.iter().enumerate() {
            if tensor.dtype() != self.tuple_types[i] || tensor.shape() != shapes[i] {
                return Err(LockstepError::TupleMismatch {
                    index: i,
                    expected: signature(self.tuple_types[i], &shapes[i]),
                    actual: signature(tensor.dtype(), tensor.shape()),
                });
            }
        }
        Ok(())
    }
}

/// Source of input batches for the enqueue side
#[async_trait]
pub trait BatchSource: Send {
    /// Produce the next batch
    async fn next_batch(&mut self) -> Result<Batch>;
}

/// One shard's slice of a batch, in transit through the hardware queue
struct ShardTuple {
    tensors: Vec<Tensor>,
    checksums: Vec<u32>,
}

/// Fixed-shape, fixed-capacity input queue with one lane per shard
pub struct InfeedQueue {
    descriptor: BatchDescriptor,
    shard_shapes: Vec<Vec<usize>>,
    num_shards: usize,
    receivers: Vec<Mutex<mpsc::Receiver<ShardTuple>>>,
}

impl InfeedQueue {
    /// Number of shards; immutable once built
    pub fn num_shards(&self) -> usize {
        self.num_shards
    }
}

/// One shard's enqueue operation
struct EnqueueOp {
    shard: usize,
    placement: HostPlacement,
    sender: mpsc::Sender<ShardTuple>,
}

/// The full per-shard enqueue operation set
///
/// One `run()` feeds every shard exactly one slice of one batch, blocking on
/// any shard whose queue lane is full.
pub struct EnqueueOps {
    ops: Vec<EnqueueOp>,
    source: Mutex<Box<dyn BatchSource>>,
    descriptor: BatchDescriptor,
    num_shards: usize,
}

impl EnqueueOps {
    /// Execute the enqueue set once
    pub async fn run(&self) -> Result<()> {
        let batch = self.source.lock().await.next_batch().await?;
        let tuple = batch.tuple();
        self.descriptor.validate_tuple(&tuple)?;

        // Split every tuple position across shards, then regroup per shard.
        let mut per_shard: Vec<ShardTuple> = (0..self.num_shards)
            .map(|_| ShardTuple {
                tensors: Vec::with_capacity(tuple.len()),
                checksums: Vec::with_capacity(tuple.len()),
            })
            .collect();
        for tensor in &tuple {
            for (shard, slice) in tensor.split_leading(self.num_shards)?.into_iter().enumerate() {
                per_shard[shard].checksums.push(slice.checksum());
                per_shard[shard].tensors.push(slice);
            }
        }

        for (op, shard_tuple) in self.ops.iter().zip(per_shard) {
            debug!(shard = op.shard, placement = %op.placement, "enqueue shard tuple");
            op.sender
                .send(shard_tuple)
                .await
                .map_err(|_| LockstepError::InfeedClosed)?;
        }
        ENQUEUES_ISSUED.inc();
        Ok(())
    }

    /// Placement assigned to one shard's operation
    pub fn placement(&self, shard: usize) -> Option<&HostPlacement> {
        self.ops.get(shard).map(|op| &op.placement)
    }
}

/// Device-side dequeue function for the replicated step
#[derive(Clone)]
pub struct DequeueHandle {
    queue: Arc<InfeedQueue>,
}

impl DequeueHandle {
    /// Dequeue one tuple for `shard`, reconstructing the batch structure
    pub async fn dequeue(&self, shard: usize) -> Result<(Features, Tensor)> {
        let lane = self
            .queue
            .receivers
            .get(shard)
            .ok_or_else(|| LockstepError::Internal {
                message: format!(
                    "shard {} out of range ({} shards)",
                    shard, self.queue.num_shards
                ),
            })?;
        let tuple = lane
            .lock()
            .await
            .recv()
            .await
            .ok_or(LockstepError::InfeedClosed)?;

        let refs: Vec<&Tensor> = tuple.tensors.iter().collect();
        self.queue
            .descriptor
            .validate_against(&refs, &self.queue.shard_shapes)?;
        for (tensor, &expected) in tuple.tensors.iter().zip(&tuple.checksums) {
            let actual = tensor.checksum();
            if actual != expected {
                return Err(LockstepError::ChecksumMismatch {
                    shard,
                    expected,
                    actual,
                });
            }
        }

        let mut tensors = tuple.tensors;
        let label = tensors.pop().ok_or(LockstepError::InfeedClosed)?;
        let features = match self.queue.descriptor.feature_names() {
            Some(names) => Features::Named(
                names
                    .iter()
                    .cloned()
                    .zip(tensors)
                    .collect(),
            ),
            None => {
                let single = tensors.pop().ok_or_else(|| LockstepError::Internal {
                    message: "anonymous batch without a feature tensor".into(),
                })?;
                Features::Single(single)
            }
        };
        Ok((features, label))
    }
}

/// Build the enqueue operation set and the matching dequeue function
///
/// `capacity` is the per-shard queue depth; the integrator sizes it to the
/// iteration count so the device loop never races ahead of the feeder.
pub fn build_infeed_pair(
    descriptor: BatchDescriptor,
    source: Box<dyn BatchSource>,
    topology: ShardTopology,
    capacity: usize,
) -> Result<(EnqueueOps, DequeueHandle)> {
    if topology.num_shards == 0 {
        return Err(LockstepError::InvalidConfig {
            reason: "topology requires at least one shard".into(),
        });
    }
    if capacity == 0 {
        return Err(LockstepError::InvalidConfig {
            reason: "infeed queue capacity must be at least 1".into(),
        });
    }
    let shard_shapes = descriptor.shard_shapes(topology.num_shards)?;

    let mut ops = Vec::with_capacity(topology.num_shards);
    let mut receivers = Vec::with_capacity(topology.num_shards);
    for shard in 0..topology.num_shards {
        let (tx, rx) = mpsc::channel(capacity);
        ops.push(EnqueueOp {
            shard,
            placement: topology.placement(shard),
            sender: tx,
        });
        receivers.push(Mutex::new(rx));
    }

    let queue = Arc::new(InfeedQueue {
        descriptor: descriptor.clone(),
        shard_shapes,
        num_shards: topology.num_shards,
        receivers,
    });

    debug!(
        num_shards = topology.num_shards,
        capacity, "built infeed enqueue/dequeue pair"
    );

    Ok((
        EnqueueOps {
            ops,
            source: Mutex::new(source),
            descriptor,
            num_shards: topology.num_shards,
        },
        DequeueHandle { queue },
    ))
}
