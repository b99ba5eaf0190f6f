//! Record model and feature schema
//!
//! Records are maps from feature name to decoded value. Media features
//! stay as encoded bytes.

pub mod schema;
pub mod value;

pub use schema::{FeatureKind, FeaturesDict, MediaKind};
pub use value::{DType, FeatureValue, Record, TensorData};

use crate::error::Result;

/// Serialize a record into its on-disk payload
pub fn encode_record(record: &Record) -> Result<Vec<u8>> {
    Ok(bincode::serialize(record)?)
}

/// Deserialize a record payload
pub fn decode_record(payload: &[u8]) -> Result<Record> {
    Ok(bincode::deserialize(payload)?)
}
