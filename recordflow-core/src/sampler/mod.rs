//! Index sampling
//!
//! Produces the order in which record positions are visited: sharding,
//! per-epoch shuffling and epoch repetition. Samplers only deal in
//! positions and never touch the data source.

pub mod shard;

pub use shard::ShardOptions;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::sync::Arc;
use tracing::debug;

use crate::error::{RecordFlowError, Result};

/// Sampler configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplerOptions {
    /// Number of records in the data source
    pub num_records: usize,
    /// Shuffle within each epoch
    pub shuffle: bool,
    /// Seed for shuffling; required when `shuffle` is set
    pub seed: Option<u64>,
    /// Number of passes; `None` repeats forever
    pub num_epochs: Option<u64>,
    /// Which records this reader owns
    pub shard: ShardOptions,
}

impl SamplerOptions {
    /// Single sequential pass over every record
    pub fn new(num_records: usize) -> Self {
        Self {
            num_records,
            shuffle: false,
            seed: None,
            num_epochs: Some(1),
            shard: ShardOptions::no_sharding(),
        }
    }

    pub fn shuffle(mut self, seed: u64) -> Self {
        self.shuffle = true;
        self.seed = Some(seed);
        self
    }

    pub fn num_epochs(mut self, num_epochs: Option<u64>) -> Self {
        self.num_epochs = num_epochs;
        self
    }

    pub fn shard(mut self, shard: ShardOptions) -> Self {
        self.shard = shard;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.shard.validate()?;
        if self.shuffle && self.seed.is_none() {
            return Err(RecordFlowError::InvalidSamplerOptions {
                reason: "shuffle requires a seed".into(),
            });
        }
        Ok(())
    }
}

/// One element of the sampled stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordMetadata {
    /// Step in this shard's stream, counting across epochs
    pub index: u64,
    /// Position in the data source
    pub record_key: usize,
    /// Epoch this step belongs to
    pub epoch: u64,
}

/// Deterministic sampler over record positions
///
/// Each epoch visits every position of the shard exactly once. With
/// shuffling, the order of epoch `e` is a permutation seeded from
/// `(seed, e)`, so any step can be recomputed without replaying the
/// stream.
#[derive(Debug, Clone)]
pub struct IndexSampler {
    options: SamplerOptions,
    range: Range<usize>,
    cursor: u64,
    permutation: Option<(u64, Arc<Vec<u32>>)>,
}

impl IndexSampler {
    pub fn new(options: SamplerOptions) -> Result<Self> {
        options.validate()?;
        if options.shuffle && options.num_records > u32::MAX as usize {
            return Err(RecordFlowError::InvalidSamplerOptions {
                reason: format!("cannot shuffle {} records", options.num_records),
            });
        }

        let range = options.shard.range(options.num_records);
        debug!(
            "Index sampler: shard {}/{} owns {:?}, shuffle={}, epochs={:?}",
            options.shard.shard_index, options.shard.shard_count, range, options.shuffle, options.num_epochs
        );

        Ok(Self {
            options,
            range,
            cursor: 0,
            permutation: None,
        })
    }

    pub fn options(&self) -> &SamplerOptions {
        &self.options
    }

    /// Records per epoch in this shard
    pub fn shard_len(&self) -> usize {
        self.range.len()
    }

    /// Total steps, or `None` when repeating forever
    pub fn total_len(&self) -> Option<u64> {
        self.options
            .num_epochs
            .map(|epochs| epochs.saturating_mul(self.shard_len() as u64))
    }

    /// Next step to be yielded by the iterator
    pub fn position(&self) -> u64 {
        self.cursor
    }

    /// Continue iteration from step `index`
    pub fn seek(&mut self, index: u64) {
        self.cursor = index;
    }

    /// Element at step `index`, or `None` past the end
    pub fn at(&mut self, index: u64) -> Option<RecordMetadata> {
        let shard_len = self.shard_len() as u64;
        if shard_len == 0 {
            return None;
        }
        if let Some(total) = self.total_len() {
            if index >= total {
                return None;
            }
        }

        let epoch = index / shard_len;
        let offset = (index % shard_len) as usize;
        let local = if self.options.shuffle {
            self.epoch_permutation(epoch)[offset] as usize
        } else {
            offset
        };

        Some(RecordMetadata {
            index,
            record_key: self.range.start + local,
            epoch,
        })
    }

    fn epoch_permutation(&mut self, epoch: u64) -> Arc<Vec<u32>> {
        if let Some((cached_epoch, perm)) = &self.permutation {
            if *cached_epoch == epoch {
                return perm.clone();
            }
        }

        let seed = self.options.seed.unwrap_or_default();
        let mut rng = StdRng::seed_from_u64(seed ^ epoch.wrapping_mul(0x9E37_79B9_7F4A_7C15));
        let mut perm: Vec<u32> = (0..self.shard_len() as u32).collect();
        perm.shuffle(&mut rng);

        let perm = Arc::new(perm);
        self.permutation = Some((epoch, perm.clone()));
        perm
    }
}

impl Iterator for IndexSampler {
    type Item = RecordMetadata;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.at(self.cursor)?;
        self.cursor += 1;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self.total_len() {
            Some(total) => {
                let remaining = total.saturating_sub(self.cursor) as usize;
                (remaining, Some(remaining))
            }
            None if self.shard_len() == 0 => (0, Some(0)),
            None => (usize::MAX, None),
        }
    }
}
