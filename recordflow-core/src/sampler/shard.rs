//! Deterministic record sharding
//!
//! Splits the positions of a data source into contiguous per-process
//! ranges.

use serde::{Deserialize, Serialize};
use std::ops::Range;

use crate::error::{RecordFlowError, Result};

/// Index of this process among all reading processes
pub const SHARD_INDEX_ENV: &str = "RECORDFLOW_SHARD_INDEX";

/// Number of reading processes
pub const SHARD_COUNT_ENV: &str = "RECORDFLOW_SHARD_COUNT";

/// Which slice of the records this reader owns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardOptions {
    /// This reader's shard, `< shard_count`
    pub shard_index: usize,
    /// Total number of shards
    pub shard_count: usize,
    /// Give every shard exactly `len / shard_count` records
    pub drop_remainder: bool,
}

impl Default for ShardOptions {
    fn default() -> Self {
        Self::no_sharding()
    }
}

impl ShardOptions {
    pub fn new(shard_index: usize, shard_count: usize, drop_remainder: bool) -> Self {
        Self {
            shard_index,
            shard_count,
            drop_remainder,
        }
    }

    /// A single shard owning every record
    pub fn no_sharding() -> Self {
        Self::new(0, 1, false)
    }

    /// Shard by process, read from `RECORDFLOW_SHARD_INDEX` / `RECORDFLOW_SHARD_COUNT`
    pub fn from_env(drop_remainder: bool) -> Result<Self> {
        let read = |key: &str, default: usize| -> Result<usize> {
            match std::env::var(key) {
                Ok(v) => v.parse().map_err(|_| RecordFlowError::InvalidSamplerOptions {
                    reason: format!("{}={} is not an integer", key, v),
                }),
                Err(_) => Ok(default),
            }
        };
        let options = Self::new(read(SHARD_INDEX_ENV, 0)?, read(SHARD_COUNT_ENV, 1)?, drop_remainder);
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<()> {
        if self.shard_count == 0 {
            return Err(RecordFlowError::InvalidSamplerOptions {
                reason: "shard_count must be positive".into(),
            });
        }
        if self.shard_index >= self.shard_count {
            return Err(RecordFlowError::InvalidSamplerOptions {
                reason: format!(
                    "shard_index {} must be smaller than shard_count {}",
                    self.shard_index, self.shard_count
                ),
            });
        }
        Ok(())
    }

    /// Positions owned by this shard out of `num_records`
    ///
    /// Without `drop_remainder` shard sizes differ by at most one.
    pub fn range(&self, num_records: usize) -> Range<usize> {
        let (i, k, n) = (self.shard_index as u128, self.shard_count as u128, num_records as u128);
        if self.drop_remainder {
            let per_shard = n / k;
            (i * per_shard) as usize..((i + 1) * per_shard) as usize
        } else {
            (i * n / k) as usize..((i + 1) * n / k) as usize
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ranges_cover_everything() {
        let n = 103;
        let mut covered = Vec::new();
        for i in 0..4 {
            let range = ShardOptions::new(i, 4, false).range(n);
            assert!(range.len() == 25 || range.len() == 26);
            covered.extend(range);
        }
        assert_eq!(covered, (0..n).collect::<Vec<_>>());
    }

    #[test]
    fn test_drop_remainder_equal_sizes() {
        let sizes: Vec<usize> = (0..4)
            .map(|i| ShardOptions::new(i, 4, true).range(103).len())
            .collect();
        assert_eq!(sizes, vec![25, 25, 25, 25]);
        assert_eq!(ShardOptions::new(3, 4, true).range(103), 75..100);
    }

    #[test]
    fn test_invalid() {
        assert!(ShardOptions::new(2, 2, false).validate().is_err());
        assert!(ShardOptions::new(0, 0, false).validate().is_err());
        assert!(ShardOptions::no_sharding().validate().is_ok());
    }

    #[test]
    fn test_more_shards_than_records() {
        let total: usize = (0..6).map(|i| ShardOptions::new(i, 6, false).range(3).len()).sum();
        assert_eq!(total, 3);
    }
}
