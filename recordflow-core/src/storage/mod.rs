//! On-disk record storage
//!
//! Random-access record files plus a sequential JSON Lines format.

pub mod jsonl;
pub mod record_file;

pub use jsonl::{read_json_lines, JsonLinesWriter};
pub use record_file::{RecordFileReader, RecordFileSummary, RecordFileWriter};

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::compression::CompressionConfig;
use crate::error::Result;
use crate::features::Record;

/// Output file format for prepared datasets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileFormat {
    /// Indexed, random-access record file
    #[default]
    RecordFile,
    /// One JSON record per line, sequential only
    JsonLines,
}

impl FileFormat {
    pub const ALL: [FileFormat; 2] = [FileFormat::RecordFile, FileFormat::JsonLines];

    /// Name used on the command line and in dataset_info.json
    pub fn as_str(&self) -> &'static str {
        match self {
            FileFormat::RecordFile => "record_file",
            FileFormat::JsonLines => "json_lines",
        }
    }

    /// File extension of shards in this format
    pub fn extension(&self) -> &'static str {
        match self {
            FileFormat::RecordFile => "rflw",
            FileFormat::JsonLines => "jsonl",
        }
    }

    /// Whether shards can back a random-access data source
    pub fn supports_random_access(&self) -> bool {
        matches!(self, FileFormat::RecordFile)
    }

    /// Open a writer for one shard
    pub fn create_writer(&self, path: &Path, compression: CompressionConfig) -> Result<ShardWriter> {
        Ok(match self {
            FileFormat::RecordFile => ShardWriter::RecordFile(RecordFileWriter::create(path, compression)?),
            FileFormat::JsonLines => ShardWriter::JsonLines(JsonLinesWriter::create(path)?),
        })
    }
}

impl std::fmt::Display for FileFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FileFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        FileFormat::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| {
                let names: Vec<_> = FileFormat::ALL.iter().map(|f| f.as_str()).collect();
                format!("unknown file format '{}', expected one of {:?}", s, names)
            })
    }
}

/// Writer for a single shard in any supported format
pub enum ShardWriter {
    RecordFile(RecordFileWriter),
    JsonLines(JsonLinesWriter),
}

impl ShardWriter {
    pub fn append(&mut self, record: &Record) -> Result<u64> {
        match self {
            ShardWriter::RecordFile(w) => w.append(record),
            ShardWriter::JsonLines(w) => w.append(record),
        }
    }

    pub fn finish(self) -> Result<RecordFileSummary> {
        match self {
            ShardWriter::RecordFile(w) => w.finish(),
            ShardWriter::JsonLines(w) => w.finish(),
        }
    }
}

/// Shard file name: `<dataset>-<split>.<ext>-<index>-of-<count>`
pub fn shard_file_name(dataset: &str, split: &str, format: FileFormat, index: usize, count: usize) -> String {
    format!(
        "{}-{}.{}-{:05}-of-{:05}",
        dataset,
        split,
        format.extension(),
        index,
        count
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shard_file_name() {
        assert_eq!(
            shard_file_name("mnist", "train", FileFormat::RecordFile, 3, 16),
            "mnist-train.rflw-00003-of-00016"
        );
    }

    #[test]
    fn test_file_format_parse() {
        assert_eq!("json_lines".parse::<FileFormat>().unwrap(), FileFormat::JsonLines);
        assert!("tfrecord".parse::<FileFormat>().is_err());
        assert!(FileFormat::RecordFile.supports_random_access());
        assert!(!FileFormat::JsonLines.supports_random_access());
    }
}
