//! Batches of records

use crate::error::{RecordFlowError, Result};
use crate::features::{DType, FeatureValue, Record, TensorData};
use crate::sampler::RecordMetadata;

/// Consecutive records from the loader, in stream order
#[derive(Debug, Clone, Default)]
pub struct Batch {
    pub records: Vec<Record>,
    pub metadata: Vec<RecordMetadata>,
}

impl Batch {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Vec::with_capacity(capacity),
            metadata: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, metadata: RecordMetadata, record: Record) {
        self.metadata.push(metadata);
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Source positions of the records
    pub fn record_keys(&self) -> Vec<usize> {
        self.metadata.iter().map(|m| m.record_key).collect()
    }

    /// Values of one feature across the batch
    pub fn column(&self, name: &str) -> Vec<Option<&FeatureValue>> {
        self.records.iter().map(|r| r.get(name)).collect()
    }

    /// Stack one numeric feature into a tensor with a leading batch axis
    ///
    /// Scalars become shape `[n]`; tensors of shape `s` become `[n, s..]`.
    /// Bools stack as 0/1 integers. Mixed kinds or shapes are rejected.
    pub fn stack(&self, name: &str) -> Result<FeatureValue> {
        let values = self
            .column(name)
            .into_iter()
            .map(|v| {
                v.ok_or_else(|| RecordFlowError::SchemaMismatch {
                    reason: format!("feature {} missing from a batch record", name),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let n = values.len();

        let mismatch = |what: &str| RecordFlowError::SchemaMismatch {
            reason: format!("cannot stack {}: {}", name, what),
        };

        match values.first() {
            None => Ok(FeatureValue::Tensor {
                shape: vec![0],
                data: TensorData::Float64(Vec::new()),
            }),
            Some(FeatureValue::Int(_)) | Some(FeatureValue::Bool(_)) => {
                let data = values
                    .iter()
                    .map(|v| match v {
                        FeatureValue::Int(i) => Ok(*i),
                        FeatureValue::Bool(b) => Ok(*b as i64),
                        other => Err(mismatch(&format!("mixed int and {}", other.kind_name()))),
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(FeatureValue::Tensor { shape: vec![n], data: TensorData::Int64(data) })
            }
            Some(FeatureValue::Float(_)) => {
                let data = values
                    .iter()
                    .map(|v| v.as_float().ok_or_else(|| mismatch(&format!("mixed float and {}", v.kind_name()))))
                    .collect::<Result<Vec<_>>>()?;
                Ok(FeatureValue::Tensor { shape: vec![n], data: TensorData::Float64(data) })
            }
            Some(FeatureValue::Tensor { shape, data }) => {
                let item_shape = shape.clone();
                let dtype = data.dtype();
                let mut ints = Vec::new();
                let mut floats = Vec::new();
                for value in &values {
                    match value {
                        FeatureValue::Tensor { shape, data } if *shape == item_shape && data.dtype() == dtype => {
                            match data {
                                TensorData::Int64(v) => ints.extend_from_slice(v),
                                TensorData::Float64(v) => floats.extend_from_slice(v),
                            }
                        }
                        FeatureValue::Tensor { shape, .. } => {
                            return Err(mismatch(&format!("shape {:?} differs from {:?}", shape, item_shape)))
                        }
                        other => return Err(mismatch(&format!("mixed tensor and {}", other.kind_name()))),
                    }
                }

                let mut stacked_shape = Vec::with_capacity(item_shape.len() + 1);
                stacked_shape.push(n);
                stacked_shape.extend_from_slice(&item_shape);
                let data = match dtype {
                    DType::Int64 => TensorData::Int64(ints),
                    DType::Float64 => TensorData::Float64(floats),
                };
                Ok(FeatureValue::Tensor { shape: stacked_shape, data })
            }
            Some(other) => Err(mismatch(&format!("{} features are not numeric", other.kind_name()))),
        }
    }
}
