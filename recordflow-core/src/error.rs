//! Error types for recordflow
//!
//! Error taxonomy covering record storage, data sources, sampling,
//! loading and dataset preparation.

use std::path::PathBuf;
use thiserror::Error;

/// Primary error type for all recordflow operations
#[derive(Debug, Error)]
pub enum RecordFlowError {
    // ========== Storage Errors ==========

    /// Underlying file I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// File does not start or end with the record file magic
    #[error("Bad magic in {path}")]
    BadMagic { path: PathBuf },

    /// Record file was written by a newer format version
    #[error("Unsupported format version {found} in {path} (max supported {supported})")]
    UnsupportedVersion { path: PathBuf, found: u16, supported: u16 },

    /// File is shorter than its header, footer or index claims
    #[error("Truncated record file {path}: {reason}")]
    Truncated { path: PathBuf, reason: String },

    /// Checksum mismatch on read
    #[error("Checksum mismatch in {path} at record {position}: expected {expected}, got {actual}")]
    ChecksumMismatch { path: PathBuf, position: u64, expected: u32, actual: u32 },

    /// Record payload could not be encoded or decoded
    #[error("Record codec error: {message}")]
    Codec { message: String },

    /// Compression or decompression failed
    #[error("Compression error: {message}")]
    Compression { message: String },

    /// File format cannot be used for the requested operation
    #[error("File format {format} does not support {operation}")]
    UnsupportedFileFormat { format: String, operation: String },

    // ========== Data Source Errors ==========

    /// Position is past the end of the data source
    #[error("Position {position} out of range for data source of length {len}")]
    PositionOutOfRange { position: usize, len: usize },

    /// Record does not match the dataset's feature schema
    #[error("Record does not match features: {reason}")]
    SchemaMismatch { reason: String },

    /// Split is not part of the dataset
    #[error("Split {split} not found in dataset {dataset} (available: {available:?})")]
    SplitNotFound { dataset: String, split: String, available: Vec<String> },

    /// Dataset has not been prepared under the data directory
    #[error("Dataset {name} not prepared under {data_dir}")]
    DatasetNotPrepared { name: String, data_dir: PathBuf },

    // ========== Sampler Errors ==========

    /// Sampler options are inconsistent
    #[error("Invalid sampler options: {reason}")]
    InvalidSamplerOptions { reason: String },

    // ========== Loader Errors ==========

    /// Loader options are inconsistent
    #[error("Invalid loader config: {reason}")]
    InvalidLoaderConfig { reason: String },

    /// A loader worker stopped before delivering its elements
    #[error("Loader worker {worker_id} disconnected")]
    WorkerDisconnected { worker_id: usize },

    // ========== Builder Errors ==========

    /// dataset_info.json failed validation
    #[error("Dataset info invalid: {reason}")]
    InfoInvalid { reason: String },

    /// Manifest failed to parse or validate
    #[error("Manifest invalid: {reason}")]
    ManifestInvalid { reason: String },

    /// Record set id is not declared in the manifest
    #[error("Unknown record set {id} (available: {available:?})")]
    UnknownRecordSet { id: String, available: Vec<String> },

    /// File mapping argument was not a JSON object of strings
    #[error("Error parsing mapping parameter: {mapping}")]
    InvalidMapping { mapping: String },

    /// Source file row could not be converted into a record
    #[error("Bad input at {path}:{line}: {reason}")]
    BadInput { path: PathBuf, line: usize, reason: String },

    // ========== Runtime Errors ==========

    /// Shutdown in progress
    #[error("Shutdown in progress")]
    ShutdownInProgress,

    /// Internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl RecordFlowError {
    /// Returns true if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            RecordFlowError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::TimedOut
            ),
            RecordFlowError::WorkerDisconnected { .. } => true,
            _ => false,
        }
    }

    /// Returns true if this error indicates data corruption
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            RecordFlowError::BadMagic { .. }
                | RecordFlowError::Truncated { .. }
                | RecordFlowError::ChecksumMismatch { .. }
                | RecordFlowError::Codec { .. }
                | RecordFlowError::Compression { .. }
        )
    }
}

impl From<bincode::Error> for RecordFlowError {
    fn from(e: bincode::Error) -> Self {
        RecordFlowError::Codec { message: e.to_string() }
    }
}

impl From<serde_json::Error> for RecordFlowError {
    fn from(e: serde_json::Error) -> Self {
        RecordFlowError::Codec { message: e.to_string() }
    }
}

/// Result type alias for recordflow operations
pub type Result<T> = std::result::Result<T, RecordFlowError>;
