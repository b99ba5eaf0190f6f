//! Dataset info file handling
//!
//! `dataset_info.json` is the commit marker of a prepared dataset: if it
//! exists and is valid, every shard it lists is complete.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use crate::compression::CompressionConfig;
use crate::error::{RecordFlowError, Result};
use crate::features::FeaturesDict;
use crate::storage::FileFormat;

/// Name of the info file inside a prepared version directory
pub const DATASET_INFO_FILE: &str = "dataset_info.json";

/// Description of a prepared dataset version
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetInfo {
    /// Info format version for compatibility
    pub format_version: u32,
    pub name: String,
    /// Dataset version, e.g. `1.0.0`
    pub version: String,
    #[serde(default)]
    pub description: String,
    pub features: FeaturesDict,
    pub file_format: FileFormat,
    pub compression: CompressionConfig,
    /// Splits keyed by name
    pub splits: BTreeMap<String, SplitInfo>,
    pub created_at: DateTime<Utc>,
}

/// One split and its shard files
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SplitInfo {
    pub name: String,
    pub shards: Vec<ShardInfo>,
}

/// A single shard file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardInfo {
    /// File name relative to the version directory
    pub file_name: String,
    pub num_records: u64,
    pub num_bytes: u64,
    /// Index checksum for record files, content checksum for JSON Lines
    pub crc32c: u32,
}

impl SplitInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shards: Vec::new(),
        }
    }

    /// Records across all shards
    pub fn num_records(&self) -> u64 {
        self.shards.iter().map(|s| s.num_records).sum()
    }

    pub fn num_bytes(&self) -> u64 {
        self.shards.iter().map(|s| s.num_bytes).sum()
    }
}

impl DatasetInfo {
    /// Current info format version
    pub const CURRENT_VERSION: u32 = 1;

    pub fn new(name: impl Into<String>, version: impl Into<String>, features: FeaturesDict) -> Self {
        Self {
            format_version: Self::CURRENT_VERSION,
            name: name.into(),
            version: version.into(),
            description: String::new(),
            features,
            file_format: FileFormat::default(),
            compression: CompressionConfig::default(),
            splits: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Split names in sorted order
    pub fn split_names(&self) -> Vec<String> {
        self.splits.keys().cloned().collect()
    }

    pub fn split(&self, name: &str) -> Result<&SplitInfo> {
        self.splits.get(name).ok_or_else(|| RecordFlowError::SplitNotFound {
            dataset: self.name.clone(),
            split: name.to_string(),
            available: self.split_names(),
        })
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| RecordFlowError::InfoInvalid {
            reason: format!("Serialization failed: {}", e),
        })
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let info: Self = serde_json::from_str(json).map_err(|e| RecordFlowError::InfoInvalid {
            reason: format!("Deserialization failed: {}", e),
        })?;

        if info.format_version > Self::CURRENT_VERSION {
            return Err(RecordFlowError::InfoInvalid {
                reason: format!(
                    "Info version {} is newer than supported {}",
                    info.format_version,
                    Self::CURRENT_VERSION
                ),
            });
        }

        Ok(info)
    }

    /// Read and validate `dataset_info.json` from a version directory
    pub fn load(dir: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(dir.join(DATASET_INFO_FILE))?;
        let info = Self::from_json(&json)?;
        info.validate()?;
        Ok(info)
    }

    /// Write `dataset_info.json` into a version directory
    pub fn save(&self, dir: &Path) -> Result<()> {
        self.validate()?;
        let tmp = dir.join(format!("{}.tmp", DATASET_INFO_FILE));
        std::fs::write(&tmp, self.to_json()?)?;
        std::fs::rename(&tmp, dir.join(DATASET_INFO_FILE))?;
        Ok(())
    }

    /// Check internal consistency
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() || self.version.is_empty() {
            return Err(RecordFlowError::InfoInvalid {
                reason: "name and version must be set".into(),
            });
        }

        let mut seen_files = HashSet::new();
        for (key, split) in &self.splits {
            if *key != split.name {
                return Err(RecordFlowError::InfoInvalid {
                    reason: format!("Split keyed '{}' is named '{}'", key, split.name),
                });
            }
            for shard in &split.shards {
                if !seen_files.insert(shard.file_name.as_str()) {
                    return Err(RecordFlowError::InfoInvalid {
                        reason: format!("Duplicate shard file: {}", shard.file_name),
                    });
                }
            }
        }

        Ok(())
    }
}
