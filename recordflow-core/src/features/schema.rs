//! Feature schema and validation
//!
//! A dataset declares its features once; every record written during
//! preparation is checked against that declaration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::value::{DType, FeatureValue, Record, TensorData};
use crate::error::{RecordFlowError, Result};

/// Kind of encoded media stored as opaque bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Audio,
    Video,
}

/// Declared type of a single feature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeatureKind {
    Int,
    Float,
    Bool,
    Text,
    /// Integer label in `0..num_classes`
    ClassLabel { num_classes: i64 },
    /// Encoded media, kept as bytes
    Media { media: MediaKind },
    /// Fixed-rank tensor; `-1` marks a dimension of any size
    Tensor { dtype: DType, shape: Vec<i64> },
}

impl FeatureKind {
    /// Check a value against this kind
    pub fn check(&self, name: &str, value: &FeatureValue) -> Result<()> {
        let ok = match (self, value) {
            (FeatureKind::Int, FeatureValue::Int(_)) => true,
            (FeatureKind::Float, FeatureValue::Float(_)) => true,
            (FeatureKind::Bool, FeatureValue::Bool(_)) => true,
            (FeatureKind::Text, FeatureValue::Text(_)) => true,
            (FeatureKind::Media { .. }, FeatureValue::Bytes(_)) => true,
            (FeatureKind::ClassLabel { num_classes }, FeatureValue::Int(v)) => {
                if *v < 0 || v >= num_classes {
                    return Err(RecordFlowError::SchemaMismatch {
                        reason: format!("{} = {} outside 0..{}", name, v, num_classes),
                    });
                }
                true
            }
            (FeatureKind::Tensor { dtype, shape }, FeatureValue::Tensor { shape: actual, data }) => {
                if data.dtype() != *dtype {
                    return Err(RecordFlowError::SchemaMismatch {
                        reason: format!("{} has dtype {:?}, expected {:?}", name, data.dtype(), dtype),
                    });
                }
                if !shape_matches(shape, actual) {
                    return Err(RecordFlowError::SchemaMismatch {
                        reason: format!("{} has shape {:?}, expected {:?}", name, actual, shape),
                    });
                }
                if actual.iter().product::<usize>() != data.len() {
                    return Err(RecordFlowError::SchemaMismatch {
                        reason: format!("{} holds {} elements for shape {:?}", name, data.len(), actual),
                    });
                }
                true
            }
            _ => false,
        };

        if !ok {
            return Err(RecordFlowError::SchemaMismatch {
                reason: format!("{} is {}, expected {}", name, value.kind_name(), self.name()),
            });
        }
        Ok(())
    }

    /// Short name used in messages
    pub fn name(&self) -> &'static str {
        match self {
            FeatureKind::Int => "int",
            FeatureKind::Float => "float",
            FeatureKind::Bool => "bool",
            FeatureKind::Text => "text",
            FeatureKind::ClassLabel { .. } => "class_label",
            FeatureKind::Media { .. } => "media",
            FeatureKind::Tensor { .. } => "tensor",
        }
    }

    /// Convert a text cell (CSV) into a value of this kind
    ///
    /// Media cells are file references and are resolved by the caller.
    pub fn parse_text(&self, text: &str) -> std::result::Result<FeatureValue, String> {
        let text = text.trim();
        match self {
            FeatureKind::Int | FeatureKind::ClassLabel { .. } => text
                .parse::<i64>()
                .map(FeatureValue::Int)
                .map_err(|e| format!("'{}' is not an integer: {}", text, e)),
            FeatureKind::Float => text
                .parse::<f64>()
                .map(FeatureValue::Float)
                .map_err(|e| format!("'{}' is not a float: {}", text, e)),
            FeatureKind::Bool => match text.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(FeatureValue::Bool(true)),
                "false" | "0" | "no" => Ok(FeatureValue::Bool(false)),
                _ => Err(format!("'{}' is not a bool", text)),
            },
            FeatureKind::Text => Ok(FeatureValue::Text(text.to_string())),
            FeatureKind::Media { .. } => Err("media cells must be resolved as files".into()),
            FeatureKind::Tensor { .. } => {
                let json: serde_json::Value = serde_json::from_str(text)
                    .map_err(|e| format!("'{}' is not a JSON array: {}", text, e))?;
                self.parse_json(&json)
            }
        }
    }

    /// Convert a JSON value (JSON Lines input) into a value of this kind
    pub fn parse_json(&self, json: &serde_json::Value) -> std::result::Result<FeatureValue, String> {
        use serde_json::Value;
        match (self, json) {
            (FeatureKind::Int | FeatureKind::ClassLabel { .. }, Value::Number(n)) => n
                .as_i64()
                .map(FeatureValue::Int)
                .ok_or_else(|| format!("{} is not an integer", n)),
            (FeatureKind::Float, Value::Number(n)) => n
                .as_f64()
                .map(FeatureValue::Float)
                .ok_or_else(|| format!("{} is not a float", n)),
            (FeatureKind::Bool, Value::Bool(b)) => Ok(FeatureValue::Bool(*b)),
            (FeatureKind::Text, Value::String(s)) => Ok(FeatureValue::Text(s.clone())),
            (FeatureKind::Tensor { dtype, .. }, Value::Array(_)) => {
                let mut shape = Vec::new();
                let mut flat = Vec::new();
                flatten_json(json, 0, &mut shape, &mut None, &mut flat)?;
                let data = match dtype {
                    DType::Int64 => TensorData::Int64(
                        flat.iter()
                            .map(|n| n.as_i64().ok_or_else(|| format!("{} is not an integer", n)))
                            .collect::<std::result::Result<_, _>>()?,
                    ),
                    DType::Float64 => TensorData::Float64(
                        flat.iter()
                            .map(|n| n.as_f64().ok_or_else(|| format!("{} is not a float", n)))
                            .collect::<std::result::Result<_, _>>()?,
                    ),
                };
                Ok(FeatureValue::Tensor { shape, data })
            }
            (_, Value::String(s)) if !matches!(self, FeatureKind::Media { .. }) => self.parse_text(s),
            _ => Err(format!("{} cannot be read as {}", json, self.name())),
        }
    }
}

/// Walk a nested JSON array, recording its shape and flattening numbers
///
/// Every number must sit at the same depth, one below the innermost array.
fn flatten_json(
    value: &serde_json::Value,
    depth: usize,
    shape: &mut Vec<usize>,
    leaf_depth: &mut Option<usize>,
    out: &mut Vec<serde_json::Number>,
) -> std::result::Result<(), String> {
    match value {
        serde_json::Value::Array(items) => {
            if leaf_depth.is_some_and(|leaf| depth >= leaf) {
                return Err("ragged tensor".into());
            }
            if shape.len() == depth {
                shape.push(items.len());
            } else if shape[depth] != items.len() {
                return Err("ragged tensor".into());
            }
            for item in items {
                flatten_json(item, depth + 1, shape, leaf_depth, out)?;
            }
            Ok(())
        }
        serde_json::Value::Number(n) => {
            if depth < shape.len() || leaf_depth.is_some_and(|leaf| leaf != depth) {
                return Err("ragged tensor".into());
            }
            *leaf_depth = Some(depth);
            out.push(n.clone());
            Ok(())
        }
        other => Err(format!("{} is not a number", other)),
    }
}

fn shape_matches(declared: &[i64], actual: &[usize]) -> bool {
    declared.len() == actual.len()
        && declared
            .iter()
            .zip(actual)
            .all(|(&d, &a)| d == -1 || d as usize == a)
}

/// Feature name -> declared kind
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeaturesDict {
    features: BTreeMap<String, FeatureKind>,
}

impl FeaturesDict {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style declaration
    pub fn with(mut self, name: impl Into<String>, kind: FeatureKind) -> Self {
        self.features.insert(name.into(), kind);
        self
    }

    pub fn get(&self, name: &str) -> Option<&FeatureKind> {
        self.features.get(name)
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FeatureKind)> {
        self.features.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Reject missing, extra or mistyped features
    pub fn validate(&self, record: &Record) -> Result<()> {
        for (name, kind) in &self.features {
            match record.get(name) {
                Some(value) => kind.check(name, value)?,
                None => {
                    return Err(RecordFlowError::SchemaMismatch {
                        reason: format!("missing feature {}", name),
                    })
                }
            }
        }
        if let Some(extra) = record.names().find(|n| !self.features.contains_key(*n)) {
            return Err(RecordFlowError::SchemaMismatch {
                reason: format!("undeclared feature {}", extra),
            });
        }
        Ok(())
    }
}
