//! Per-record compression
//!
//! Provides LZ4 and Zstd compression. Every payload is prefixed with a
//! one-byte algorithm tag so readers need no configuration.

use serde::{Deserialize, Serialize};

use crate::error::{RecordFlowError, Result};

const TAG_NONE: u8 = 0;
const TAG_LZ4: u8 = 1;
const TAG_ZSTD: u8 = 2;

/// Compression algorithm selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    /// No compression
    #[default]
    None,
    /// LZ4 - fast compression
    Lz4,
    /// Zstd - high compression ratio
    Zstd,
}

impl std::str::FromStr for CompressionAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "lz4" => Ok(Self::Lz4),
            "zstd" => Ok(Self::Zstd),
            other => Err(format!("unknown compression '{}'", other)),
        }
    }
}

/// Compression level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressionLevel(i32);

impl CompressionLevel {
    /// Fast compression (lower ratio)
    pub const FAST: Self = Self(1);
    /// Default compression
    pub const DEFAULT: Self = Self(3);
    /// Best compression (slower)
    pub const BEST: Self = Self(19);

    pub fn value(&self) -> i32 {
        self.0
    }
}

impl Default for CompressionLevel {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Compression configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompressionConfig {
    /// Algorithm to use
    pub algorithm: CompressionAlgorithm,
    /// Compression level (zstd only)
    pub level: CompressionLevel,
    /// Payloads smaller than this are stored raw
    pub min_size: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            algorithm: CompressionAlgorithm::None,
            level: CompressionLevel::DEFAULT,
            min_size: 256,
        }
    }
}

impl CompressionConfig {
    pub fn new(algorithm: CompressionAlgorithm) -> Self {
        Self { algorithm, ..Default::default() }
    }
}

/// Compress a payload, prefixing the algorithm tag
pub fn compress(data: &[u8], config: &CompressionConfig) -> Result<Vec<u8>> {
    let algorithm = if data.len() < config.min_size {
        CompressionAlgorithm::None
    } else {
        config.algorithm
    };

    let mut output = Vec::with_capacity(data.len() + 1);
    match algorithm {
        CompressionAlgorithm::None => {
            output.push(TAG_NONE);
            output.extend_from_slice(data);
        }
        CompressionAlgorithm::Lz4 => {
            output.push(TAG_LZ4);
            output.extend_from_slice(&lz4_flex::compress_prepend_size(data));
        }
        CompressionAlgorithm::Zstd => {
            output.push(TAG_ZSTD);
            let compressed = zstd::encode_all(data, config.level.value()).map_err(|e| {
                RecordFlowError::Compression { message: format!("zstd encode failed: {}", e) }
            })?;
            output.extend_from_slice(&compressed);
        }
    }
    Ok(output)
}

/// Decompress a tagged payload
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let (tag, body) = data.split_first().ok_or_else(|| RecordFlowError::Compression {
        message: "empty payload".into(),
    })?;

    match *tag {
        TAG_NONE => Ok(body.to_vec()),
        TAG_LZ4 => lz4_flex::decompress_size_prepended(body).map_err(|e| {
            RecordFlowError::Compression { message: format!("lz4 decode failed: {}", e) }
        }),
        TAG_ZSTD => zstd::decode_all(body).map_err(|e| RecordFlowError::Compression {
            message: format!("zstd decode failed: {}", e),
        }),
        other => Err(RecordFlowError::Compression {
            message: format!("unknown compression tag {}", other),
        }),
    }
}

/// Original size over compressed size, 0 when nothing was compressed
pub fn compression_ratio(original: usize, compressed: usize) -> f64 {
    if compressed == 0 {
        return 0.0;
    }
    original as f64 / compressed as f64
}
