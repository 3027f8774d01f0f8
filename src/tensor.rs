//! Host-side tensor representation
//!
//! Zero-copy tensor payloads with checksums, plus the batch structure fed
//! through the infeed queue.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{LockstepError, Result};

/// Element type of a tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElementType {
    F32,
    F64,
    I32,
    I64,
    U8,
}

impl ElementType {
    /// Size of one element in bytes
    pub fn size_of(&self) -> usize {
        match self {
            ElementType::F32 | ElementType::I32 => 4,
            ElementType::F64 | ElementType::I64 => 8,
            ElementType::U8 => 1,
        }
    }
}

impl std::fmt::Display for ElementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ElementType::F32 => "f32",
            ElementType::F64 => "f64",
            ElementType::I32 => "i32",
            ElementType::I64 => "i64",
            ElementType::U8 => "u8",
        };
        write!(f, "{}", name)
    }
}

/// A dense host tensor with zero-copy payload
#[derive(Debug, Clone)]
pub struct Tensor {
    dtype: ElementType,
    shape: Vec<usize>,
    data: Bytes,
}

impl Tensor {
    /// Create a tensor, validating the payload length against dtype and shape
    pub fn new(dtype: ElementType, shape: Vec<usize>, data: Bytes) -> Result<Self> {
        let expected = shape.iter().product::<usize>() * dtype.size_of();
        if data.len() != expected {
            return Err(LockstepError::Internal {
                message: format!(
                    "tensor payload is {} bytes, shape {:?} of {} requires {}",
                    data.len(),
                    shape,
                    dtype,
                    expected
                ),
            });
        }
        Ok(Self { dtype, shape, data })
    }

    /// Build an f32 tensor from a slice
    pub fn from_f32(shape: Vec<usize>, values: &[f32]) -> Result<Self> {
        let mut buf = Vec::with_capacity(values.len() * 4);
        for v in values {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        Self::new(ElementType::F32, shape, Bytes::from(buf))
    }

    /// Element type
    pub fn dtype(&self) -> ElementType {
        self.dtype
    }

    /// Shape
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Raw payload
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Total element count
    pub fn num_elements(&self) -> usize {
        self.shape.iter().product()
    }

    /// CRC32C of the payload
    pub fn checksum(&self) -> u32 {
        crc32c::crc32c(&self.data)
    }

    /// Decode the payload as f32 values
    pub fn to_f32_vec(&self) -> Result<Vec<f32>> {
        if self.dtype != ElementType::F32 {
            return Err(LockstepError::Internal {
                message: format!("cannot decode {} tensor as f32", self.dtype),
            });
        }
        Ok(self
            .data
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    /// Split along the leading dimension into `num_shards` equal slices
    ///
    /// The slices share the underlying payload (no copy). The leading
    /// dimension must be divisible by `num_shards`.
    pub fn split_leading(&self, num_shards: usize) -> Result<Vec<Tensor>> {
        let leading = *self.shape.first().ok_or_else(|| LockstepError::ShardSplit {
            reason: "cannot split a rank-0 tensor".into(),
        })?;
        if num_shards == 0 || leading % num_shards != 0 {
            return Err(LockstepError::ShardSplit {
                reason: format!(
                    "leading dimension {} is not divisible by {} shards",
                    leading, num_shards
                ),
            });
        }

        let mut shard_shape = self.shape.clone();
        shard_shape[0] = leading / num_shards;
        let shard_bytes = self.data.len() / num_shards;

        (0..num_shards)
            .map(|i| {
                Tensor::new(
                    self.dtype,
                    shard_shape.clone(),
                    self.data.slice(i * shard_bytes..(i + 1) * shard_bytes),
                )
            })
            .collect()
    }
}

/// Feature tensors for one batch
///
/// Named features carry a fixed insertion order; that order is the positional
/// contract between the enqueue and dequeue sides.
#[derive(Debug, Clone)]
pub enum Features {
    /// Name-addressed features in fixed order
    Named(Vec<(String, Tensor)>),
    /// A single anonymous feature tensor
    Single(Tensor),
}

impl Features {
    /// Number of feature tensors
    pub fn len(&self) -> usize {
        match self {
            Features::Named(v) => v.len(),
            Features::Single(_) => 1,
        }
    }

    /// True if there are no feature tensors (named path only)
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Feature names in enqueue order, if name-addressed
    pub fn names(&self) -> Option<Vec<String>> {
        match self {
            Features::Named(v) => Some(v.iter().map(|(n, _)| n.clone()).collect()),
            Features::Single(_) => None,
        }
    }

    /// Tensors in enqueue order
    pub fn tensors(&self) -> Vec<&Tensor> {
        match self {
            Features::Named(v) => v.iter().map(|(_, t)| t).collect(),
            Features::Single(t) => vec![t],
        }
    }
}

/// One training batch: features plus a label
#[derive(Debug, Clone)]
pub struct Batch {
    pub features: Features,
    pub label: Tensor,
}

impl Batch {
    /// Ordered tuple view: all feature tensors, label last
    pub fn tuple(&self) -> Vec<&Tensor> {
        let mut tuple = self.features.tensors();
        tuple.push(&self.label);
        tuple
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_length_validated() {
        let bad = Tensor::new(ElementType::F32, vec![2, 2], Bytes::from_static(&[0u8; 8]));
        assert!(bad.is_err());

        let ok = Tensor::new(ElementType::F32, vec![2, 2], Bytes::from(vec![0u8; 16]));
        assert!(ok.is_ok());
    }

    #[test]
    fn test_split_leading() {
        let t = Tensor::from_f32(vec![4, 2], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]).unwrap();
        let parts = t.split_leading(2).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].shape(), &[2, 2]);
        assert_eq!(parts[0].to_f32_vec().unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(parts[1].to_f32_vec().unwrap(), vec![5.0, 6.0, 7.0, 8.0]);
    }

    #[test]
    fn test_split_rejects_uneven() {
        let t = Tensor::from_f32(vec![3], &[1.0, 2.0, 3.0]).unwrap();
        assert!(matches!(
            t.split_leading(2),
            Err(LockstepError::ShardSplit { .. })
        ));
    }

    #[test]
    fn test_checksum_stable() {
        let t = Tensor::from_f32(vec![2], &[1.5, -2.5]).unwrap();
        assert_eq!(t.checksum(), t.clone().checksum());
    }
}
