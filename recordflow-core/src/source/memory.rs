//! In-memory and derived data sources

use std::sync::Arc;

use super::RandomAccessDataSource;
use crate::error::{RecordFlowError, Result};
use crate::features::Record;

/// Data source over records held in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryDataSource {
    records: Arc<Vec<Record>>,
    name: String,
}

impl InMemoryDataSource {
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            records: Arc::new(records),
            name: "in_memory".into(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl FromIterator<Record> for InMemoryDataSource {
    fn from_iter<I: IntoIterator<Item = Record>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl RandomAccessDataSource for InMemoryDataSource {
    fn len(&self) -> usize {
        self.records.len()
    }

    fn get(&self, position: usize) -> Result<Record> {
        self.records
            .get(position)
            .cloned()
            .ok_or(RecordFlowError::PositionOutOfRange {
                position,
                len: self.records.len(),
            })
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Applies a function to each record as it is read
///
/// Length and positions are those of the inner source.
pub struct MapDataSource<S, F> {
    inner: S,
    map: F,
}

impl<S, F> MapDataSource<S, F>
where
    S: RandomAccessDataSource,
    F: Fn(Record) -> Result<Record> + Send + Sync,
{
    pub fn new(inner: S, map: F) -> Self {
        Self { inner, map }
    }
}

impl<S, F> RandomAccessDataSource for MapDataSource<S, F>
where
    S: RandomAccessDataSource,
    F: Fn(Record) -> Result<Record> + Send + Sync,
{
    fn len(&self) -> usize {
        self.inner.len()
    }

    fn get(&self, position: usize) -> Result<Record> {
        (self.map)(self.inner.get(position)?)
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_source() {
        let base: InMemoryDataSource = (0..4).map(|i| Record::new().with("x", i as i64)).collect();
        let doubled = MapDataSource::new(base, |mut r: Record| {
            let x = r.get("x").and_then(|v| v.as_int()).unwrap_or(0);
            r.insert("x", x * 2);
            Ok(r)
        });

        assert_eq!(doubled.len(), 4);
        assert_eq!(doubled.get(3).unwrap().get("x").and_then(|v| v.as_int()), Some(6));
        assert!(doubled.get(4).is_err());
    }
}
