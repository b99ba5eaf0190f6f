//! Per-record operations applied by loader workers

use crate::error::Result;
use crate::features::Record;

/// An operation applied to each record before batching
///
/// Returning `Ok(None)` drops the record from the stream.
pub trait Transform: Send + Sync {
    fn apply(&self, record: Record) -> Result<Option<Record>>;

    /// Name used in logs
    fn name(&self) -> &str {
        "transform"
    }
}

/// Record -> record map
pub struct MapTransform<F> {
    name: String,
    f: F,
}

impl<F> MapTransform<F>
where
    F: Fn(Record) -> Result<Record> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self { name: name.into(), f }
    }
}

impl<F> Transform for MapTransform<F>
where
    F: Fn(Record) -> Result<Record> + Send + Sync,
{
    fn apply(&self, record: Record) -> Result<Option<Record>> {
        (self.f)(record).map(Some)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Keeps records for which the predicate holds
pub struct FilterTransform<F> {
    name: String,
    predicate: F,
}

impl<F> FilterTransform<F>
where
    F: Fn(&Record) -> bool + Send + Sync,
{
    pub fn new(name: impl Into<String>, predicate: F) -> Self {
        Self {
            name: name.into(),
            predicate,
        }
    }
}

impl<F> Transform for FilterTransform<F>
where
    F: Fn(&Record) -> bool + Send + Sync,
{
    fn apply(&self, record: Record) -> Result<Option<Record>> {
        Ok((self.predicate)(&record).then_some(record))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Keeps only the named features
pub struct SelectFeatures {
    names: Vec<String>,
}

impl SelectFeatures {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }
}

impl Transform for SelectFeatures {
    fn apply(&self, mut record: Record) -> Result<Option<Record>> {
        let mut selected = Record::new();
        for name in &self.names {
            if let Some(value) = record.remove(name) {
                selected.insert(name.clone(), value);
            }
        }
        Ok(Some(selected))
    }

    fn name(&self) -> &str {
        "select_features"
    }
}

/// Run every transform in order, stopping at the first that drops the record
pub fn apply_all(transforms: &[Box<dyn Transform>], record: Record) -> Result<Option<Record>> {
    let mut current = record;
    for transform in transforms {
        match transform.apply(current)? {
            Some(next) => current = next,
            None => return Ok(None),
        }
    }
    Ok(Some(current))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain() {
        let transforms: Vec<Box<dyn Transform>> = vec![
            Box::new(FilterTransform::new("even", |r: &Record| {
                r.get("id").and_then(|v| v.as_int()).map(|i| i % 2 == 0).unwrap_or(false)
            })),
            Box::new(MapTransform::new("tag", |r: Record| Ok(r.with("tagged", true)))),
            Box::new(SelectFeatures::new(["tagged"])),
        ];

        let kept = apply_all(&transforms, Record::new().with("id", 4i64)).unwrap().unwrap();
        assert_eq!(kept.names().collect::<Vec<_>>(), vec!["tagged"]);

        assert!(apply_all(&transforms, Record::new().with("id", 3i64)).unwrap().is_none());
    }
}
