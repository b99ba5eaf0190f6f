//! Random-access data sources
//!
//! A data source is an immutable sequence of records addressed by
//! position. Sources are shared behind `Arc` by any number of samplers
//! and loaders; none of them mutate it.

pub mod memory;
pub mod record_file;

pub use memory::{InMemoryDataSource, MapDataSource};
pub use record_file::RecordFileDataSource;

use crate::error::Result;
use crate::features::Record;

/// One position or a list of positions
///
/// Retrieval accepts either form; the result mirrors the request shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Positions {
    Single(usize),
    Many(Vec<usize>),
}

impl From<usize> for Positions {
    fn from(position: usize) -> Self {
        Positions::Single(position)
    }
}

impl From<Vec<usize>> for Positions {
    fn from(positions: Vec<usize>) -> Self {
        Positions::Many(positions)
    }
}

impl From<&[usize]> for Positions {
    fn from(positions: &[usize]) -> Self {
        Positions::Many(positions.to_vec())
    }
}

impl<const N: usize> From<[usize; N]> for Positions {
    fn from(positions: [usize; N]) -> Self {
        Positions::Many(positions.to_vec())
    }
}

/// Records returned for a [`Positions`] request
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched {
    One(Record),
    Many(Vec<Record>),
}

impl Fetched {
    /// Flatten into a list regardless of request shape
    pub fn into_vec(self) -> Vec<Record> {
        match self {
            Fetched::One(record) => vec![record],
            Fetched::Many(records) => records,
        }
    }

    pub fn into_one(self) -> Option<Record> {
        match self {
            Fetched::One(record) => Some(record),
            Fetched::Many(_) => None,
        }
    }
}

/// Positional access to a fixed-length sequence of records
///
/// `len` must not change for the lifetime of the source, and `get` must
/// cost the same for every position.
pub trait RandomAccessDataSource: Send + Sync {
    /// Total number of records
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record at `position`; positions `>= len()` are an error
    fn get(&self, position: usize) -> Result<Record>;

    /// Records at `positions`, in request order
    fn get_many(&self, positions: &[usize]) -> Result<Vec<Record>> {
        positions.iter().map(|&p| self.get(p)).collect()
    }

    /// Retrieval accepting a single position or a list
    fn fetch(&self, positions: Positions) -> Result<Fetched> {
        match positions {
            Positions::Single(p) => self.get(p).map(Fetched::One),
            Positions::Many(ps) => self.get_many(&ps).map(Fetched::Many),
        }
    }

    /// Human-readable name for logs
    fn name(&self) -> &str {
        "data_source"
    }
}

impl<S: RandomAccessDataSource + ?Sized> RandomAccessDataSource for std::sync::Arc<S> {
    fn len(&self) -> usize {
        (**self).len()
    }

    fn get(&self, position: usize) -> Result<Record> {
        (**self).get(position)
    }

    fn get_many(&self, positions: &[usize]) -> Result<Vec<Record>> {
        (**self).get_many(positions)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RecordFlowError;

    fn source() -> InMemoryDataSource {
        InMemoryDataSource::new((0..5).map(|i| Record::new().with("id", i as i64)).collect())
    }

    #[test]
    fn test_fetch_mirrors_request_shape() {
        let source = source();

        let one = source.fetch(3usize.into()).unwrap();
        assert_eq!(one.into_one().unwrap().get("id").and_then(|v| v.as_int()), Some(3));

        let many = source.fetch([4usize, 0, 4].into()).unwrap().into_vec();
        let ids: Vec<_> = many.iter().map(|r| r.get("id").and_then(|v| v.as_int()).unwrap()).collect();
        assert_eq!(ids, vec![4, 0, 4]);
    }

    #[test]
    fn test_out_of_range_is_error() {
        let source = source();
        assert!(matches!(
            source.get(5),
            Err(RecordFlowError::PositionOutOfRange { position: 5, len: 5 })
        ));
        assert!(source.fetch(vec![1, 9].into()).is_err());
    }
}
