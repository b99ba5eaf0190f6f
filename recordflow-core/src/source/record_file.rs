//! Data source over sharded record files

use std::path::{Path, PathBuf};
use tracing::debug;

use super::RandomAccessDataSource;
use crate::error::{RecordFlowError, Result};
use crate::features::Record;
use crate::storage::RecordFileReader;

/// One split of a prepared dataset, spread over several record files
///
/// Global positions run through the shards in order. Locating a shard
/// is a binary search over shard start offsets; the read itself is a
/// single index lookup in that shard.
#[derive(Debug)]
pub struct RecordFileDataSource {
    name: String,
    readers: Vec<RecordFileReader>,
    /// Global position of each shard's first record
    starts: Vec<usize>,
    len: usize,
}

impl RecordFileDataSource {
    /// Open every shard file in the given order
    pub fn open<P: AsRef<Path>>(name: impl Into<String>, paths: &[P]) -> Result<Self> {
        let readers = paths
            .iter()
            .map(|p| RecordFileReader::open(p))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::from_readers(name, readers))
    }

    /// Build from already opened readers
    pub fn from_readers(name: impl Into<String>, readers: Vec<RecordFileReader>) -> Self {
        let mut starts = Vec::with_capacity(readers.len());
        let mut len = 0usize;
        for reader in &readers {
            starts.push(len);
            len += reader.len();
        }

        let name = name.into();
        debug!("Data source {} opened: {} shards, {} records", name, readers.len(), len);

        Self {
            name,
            readers,
            starts,
            len,
        }
    }

    /// Number of shard files
    pub fn num_shards(&self) -> usize {
        self.readers.len()
    }

    /// Paths of the shard files, in position order
    pub fn paths(&self) -> Vec<PathBuf> {
        self.readers.iter().map(|r| r.path().to_path_buf()).collect()
    }

    /// Map a global position to (shard, local position)
    fn locate(&self, position: usize) -> Result<(usize, usize)> {
        if position >= self.len {
            return Err(RecordFlowError::PositionOutOfRange {
                position,
                len: self.len,
            });
        }
        // Last shard starting at or before `position`; skips empty shards
        let shard = self.starts.partition_point(|&start| start <= position) - 1;
        Ok((shard, position - self.starts[shard]))
    }
}

impl RandomAccessDataSource for RecordFileDataSource {
    fn len(&self) -> usize {
        self.len
    }

    fn get(&self, position: usize) -> Result<Record> {
        let (shard, local) = self.locate(position)?;
        self.readers[shard].read(local)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::CompressionConfig;
    use crate::storage::RecordFileWriter;

    fn write_shard(dir: &Path, name: &str, ids: std::ops::Range<i64>) -> PathBuf {
        let path = dir.join(name);
        let mut writer = RecordFileWriter::create(&path, CompressionConfig::default()).unwrap();
        for id in ids {
            writer.append(&Record::new().with("id", id)).unwrap();
        }
        writer.finish().unwrap().path
    }

    #[test]
    fn test_positions_span_shards() {
        let dir = tempfile::tempdir().unwrap();
        let paths = vec![
            write_shard(dir.path(), "a", 0..3),
            write_shard(dir.path(), "b", 3..3),
            write_shard(dir.path(), "c", 3..8),
        ];
        let source = RecordFileDataSource::open("test", &paths).unwrap();

        assert_eq!(source.len(), 8);
        assert_eq!(source.num_shards(), 3);
        for position in 0..8 {
            let record = source.get(position).unwrap();
            assert_eq!(record.get("id").and_then(|v| v.as_int()), Some(position as i64));
        }
        assert!(source.get(8).is_err());
    }
}
