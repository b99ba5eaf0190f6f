//! Decoded feature values and records

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Element type of a tensor feature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Int64,
    Float64,
}

/// Flat tensor storage, row-major
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TensorData {
    Int64(Vec<i64>),
    Float64(Vec<f64>),
}

impl TensorData {
    /// Number of elements
    pub fn len(&self) -> usize {
        match self {
            TensorData::Int64(v) => v.len(),
            TensorData::Float64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dtype(&self) -> DType {
        match self {
            TensorData::Int64(_) => DType::Int64,
            TensorData::Float64(_) => DType::Float64,
        }
    }
}

/// A decoded feature value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FeatureValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    /// Opaque encoded payload (images, audio, video). Never decoded here.
    Bytes(Vec<u8>),
    Tensor { shape: Vec<usize>, data: TensorData },
}

impl FeatureValue {
    /// Build a tensor value, checking the element count against the shape
    pub fn tensor(shape: Vec<usize>, data: TensorData) -> Option<Self> {
        if shape.iter().product::<usize>() != data.len() {
            return None;
        }
        Some(FeatureValue::Tensor { shape, data })
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            FeatureValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            FeatureValue::Float(v) => Some(*v),
            FeatureValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FeatureValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            FeatureValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Short kind name used in error messages
    pub fn kind_name(&self) -> &'static str {
        match self {
            FeatureValue::Int(_) => "int",
            FeatureValue::Float(_) => "float",
            FeatureValue::Bool(_) => "bool",
            FeatureValue::Text(_) => "text",
            FeatureValue::Bytes(_) => "bytes",
            FeatureValue::Tensor { .. } => "tensor",
        }
    }

    /// Plain JSON rendering (bytes are summarized, not dumped)
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::json;
        match self {
            FeatureValue::Int(v) => json!(v),
            FeatureValue::Float(v) => json!(v),
            FeatureValue::Bool(v) => json!(v),
            FeatureValue::Text(s) => json!(s),
            FeatureValue::Bytes(b) => json!({ "bytes": b.len() }),
            FeatureValue::Tensor { shape, data } => match data {
                TensorData::Int64(v) => json!({ "shape": shape, "data": v }),
                TensorData::Float64(v) => json!({ "shape": shape, "data": v }),
            },
        }
    }
}

impl From<i64> for FeatureValue {
    fn from(v: i64) -> Self {
        FeatureValue::Int(v)
    }
}

impl From<f64> for FeatureValue {
    fn from(v: f64) -> Self {
        FeatureValue::Float(v)
    }
}

impl From<bool> for FeatureValue {
    fn from(v: bool) -> Self {
        FeatureValue::Bool(v)
    }
}

impl From<&str> for FeatureValue {
    fn from(v: &str) -> Self {
        FeatureValue::Text(v.to_string())
    }
}

impl From<String> for FeatureValue {
    fn from(v: String) -> Self {
        FeatureValue::Text(v)
    }
}

impl From<Vec<u8>> for FeatureValue {
    fn from(v: Vec<u8>) -> Self {
        FeatureValue::Bytes(v)
    }
}

/// One example: feature name -> decoded value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    features: BTreeMap<String, FeatureValue>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, name: impl Into<String>, value: impl Into<FeatureValue>) -> Self {
        self.features.insert(name.into(), value.into());
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<FeatureValue>) {
        self.features.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&FeatureValue> {
        self.features.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<FeatureValue> {
        self.features.remove(name)
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.features.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FeatureValue)> {
        self.features.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn into_inner(self) -> BTreeMap<String, FeatureValue> {
        self.features
    }

    /// Render as a flat JSON object
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.features
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }
}

impl From<BTreeMap<String, FeatureValue>> for Record {
    fn from(features: BTreeMap<String, FeatureValue>) -> Self {
        Self { features }
    }
}

impl FromIterator<(String, FeatureValue)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, FeatureValue)>>(iter: I) -> Self {
        Self { features: iter.into_iter().collect() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tensor_shape_check() {
        assert!(FeatureValue::tensor(vec![2, 3], TensorData::Int64(vec![0; 6])).is_some());
        assert!(FeatureValue::tensor(vec![2, 3], TensorData::Int64(vec![0; 5])).is_none());
    }

    #[test]
    fn test_record_json() {
        let record = Record::new()
            .with("label", 3i64)
            .with("image", vec![1u8, 2, 3])
            .with("name", "cat");

        let json = record.to_json();
        assert_eq!(json["label"], 3);
        assert_eq!(json["image"]["bytes"], 3);
        assert_eq!(json["name"], "cat");
        assert_eq!(record.names().collect::<Vec<_>>(), vec!["image", "label", "name"]);
    }
}
