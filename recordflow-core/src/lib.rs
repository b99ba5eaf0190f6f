//! RecordFlow Core - random-access datasets for training input pipelines
//!
//! This crate provides:
//! - Indexed record files with constant-time positional reads
//! - Data sources, index samplers and a parallel batching loader
//! - Dataset preparation and the split factory
//! - Manifest-driven builds from CSV and JSON Lines inputs

pub mod builder;
pub mod compression;
pub mod config;
pub mod error;
pub mod features;
pub mod loader;
pub mod manifest;
pub mod metrics;
#[cfg(feature = "python")]
pub mod python_api;
pub mod runtime;
pub mod sampler;
pub mod source;
pub mod storage;

pub use builder::{data_sources, DatasetBuilder, DatasetInfo};
pub use error::{RecordFlowError, Result};
pub use features::{FeatureKind, FeatureValue, FeaturesDict, Record};
pub use loader::{Batch, DataLoader, DataLoaderConfig, DataLoaderState};
pub use sampler::{IndexSampler, RecordMetadata, SamplerOptions, ShardOptions};
pub use source::{Fetched, Positions, RandomAccessDataSource, RecordFileDataSource};

/// Record file format version written by this crate
pub const FORMAT_VERSION: u16 = storage::record_file::FORMAT_VERSION;

/// Default per-worker channel capacity of the loader
pub const DEFAULT_WORKER_BUFFER_SIZE: usize = 4;
