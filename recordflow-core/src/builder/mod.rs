//! Dataset preparation and the split factory
//!
//! A builder writes the examples of every split into shard files under
//! `<data_dir>/<name>/<version>.incomplete/`, writes `dataset_info.json`,
//! and renames the directory to `<data_dir>/<name>/<version>/`. A version
//! directory therefore either holds a complete dataset or does not exist.

pub mod info;

pub use info::{DatasetInfo, ShardInfo, SplitInfo, DATASET_INFO_FILE};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::compression::CompressionConfig;
use crate::error::{RecordFlowError, Result};
use crate::features::{FeaturesDict, Record};
use crate::source::{RandomAccessDataSource, RecordFileDataSource};
use crate::storage::{shard_file_name, FileFormat, RecordFileSummary, ShardWriter};

/// Suffix of a version directory still being written
const INCOMPLETE_SUFFIX: &str = ".incomplete";

/// Split name -> data source
pub type DataSources = BTreeMap<String, Arc<RecordFileDataSource>>;

/// Prepares one version of a dataset on disk
#[derive(Debug, Clone)]
pub struct DatasetBuilder {
    name: String,
    version: String,
    description: String,
    features: FeaturesDict,
    data_dir: PathBuf,
    file_format: FileFormat,
    compression: CompressionConfig,
    max_records_per_shard: Option<u64>,
    overwrite: bool,
}

impl DatasetBuilder {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        features: FeaturesDict,
        data_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: String::new(),
            features,
            data_dir: data_dir.into(),
            file_format: FileFormat::default(),
            compression: CompressionConfig::default(),
            max_records_per_shard: None,
            overwrite: false,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn file_format(mut self, file_format: FileFormat) -> Self {
        self.file_format = file_format;
        self
    }

    pub fn compression(mut self, compression: CompressionConfig) -> Self {
        self.compression = compression;
        self
    }

    /// Start a new shard file after this many records
    pub fn max_records_per_shard(mut self, max: u64) -> Self {
        self.max_records_per_shard = Some(max.max(1));
        self
    }

    /// Rebuild even when a prepared version exists
    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn features(&self) -> &FeaturesDict {
        &self.features
    }

    /// `<data_dir>/<name>/<version>`
    pub fn version_dir(&self) -> PathBuf {
        self.data_dir.join(&self.name).join(&self.version)
    }

    fn incomplete_dir(&self) -> PathBuf {
        self.data_dir
            .join(&self.name)
            .join(format!("{}{}", self.version, INCOMPLETE_SUFFIX))
    }

    /// Whether a complete version directory exists
    pub fn is_prepared(&self) -> bool {
        self.version_dir().join(DATASET_INFO_FILE).is_file()
    }

    /// Info of the prepared version
    pub fn info(&self) -> Result<DatasetInfo> {
        if !self.is_prepared() {
            return Err(RecordFlowError::DatasetNotPrepared {
                name: self.name.clone(),
                data_dir: self.data_dir.clone(),
            });
        }
        DatasetInfo::load(&self.version_dir())
    }

    /// Write every example to shard files and commit the version
    ///
    /// Examples are `(split, record)` pairs and are validated against the
    /// declared features. Split order within a file follows the order the
    /// examples arrive in. When the version is already prepared and
    /// `overwrite` is off, nothing is written.
    pub fn download_and_prepare<I>(&self, examples: I) -> Result<DatasetInfo>
    where
        I: IntoIterator<Item = Result<(String, Record)>>,
    {
        if self.is_prepared() && !self.overwrite {
            info!(
                "Dataset {} {} already prepared in {}, skipping",
                self.name,
                self.version,
                self.version_dir().display()
            );
            return self.info();
        }

        let incomplete = self.incomplete_dir();
        if incomplete.exists() {
            warn!("Removing leftover {}", incomplete.display());
            std::fs::remove_dir_all(&incomplete)?;
        }
        std::fs::create_dir_all(&incomplete)?;

        info!(
            "Preparing dataset {} {} ({}) into {}",
            self.name,
            self.version,
            self.file_format,
            incomplete.display()
        );

        let info = match self.write_version(&incomplete, examples) {
            Ok(info) => info,
            Err(e) => {
                if let Err(cleanup) = std::fs::remove_dir_all(&incomplete) {
                    debug!("Failed to clean up {}: {}", incomplete.display(), cleanup);
                }
                return Err(e);
            }
        };

        let version_dir = self.version_dir();
        if version_dir.exists() {
            std::fs::remove_dir_all(&version_dir)?;
        }
        std::fs::rename(&incomplete, &version_dir)?;

        info!(
            "Dataset {} {} prepared: {}",
            self.name,
            self.version,
            info.splits
                .values()
                .map(|s| format!("{}={}", s.name, s.num_records()))
                .collect::<Vec<_>>()
                .join(", ")
        );

        Ok(info)
    }

    fn write_version<I>(&self, dir: &Path, examples: I) -> Result<DatasetInfo>
    where
        I: IntoIterator<Item = Result<(String, Record)>>,
    {
        let mut splits: BTreeMap<String, SplitWriter> = BTreeMap::new();

        for example in examples {
            let (split, record) = example?;
            self.features.validate(&record)?;

            let writer = splits
                .entry(split.clone())
                .or_insert_with(|| SplitWriter::new(split));
            writer.append(self, dir, &record)?;
        }

        let mut info = DatasetInfo::new(&self.name, &self.version, self.features.clone())
            .with_description(&self.description);
        info.file_format = self.file_format;
        info.compression = self.compression;

        for (name, writer) in splits {
            let split = writer.finish(self, dir)?;
            info.splits.insert(name, split);
        }

        info.save(dir)?;
        Ok(info)
    }

    /// Data sources of every split of the prepared version
    pub fn data_sources(&self) -> Result<DataSources> {
        let info = self.info()?;
        open_splits(&self.version_dir(), &info)
    }

    /// Data source of one split of the prepared version
    pub fn data_source(&self, split: &str) -> Result<Arc<RecordFileDataSource>> {
        let info = self.info()?;
        open_split(&self.version_dir(), &info, split).map(Arc::new)
    }
}

/// Shards written so far for one split
struct SplitWriter {
    name: String,
    current: Option<(ShardWriter, u64)>,
    finished: Vec<RecordFileSummary>,
}

impl SplitWriter {
    fn new(name: String) -> Self {
        Self {
            name,
            current: None,
            finished: Vec::new(),
        }
    }

    /// Shards are written under a provisional name until the count is known
    fn provisional_path(&self, builder: &DatasetBuilder, dir: &Path) -> PathBuf {
        dir.join(format!(
            "{}-{}.{}-{:05}",
            builder.name,
            self.name,
            builder.file_format.extension(),
            self.finished.len()
        ))
    }

    fn append(&mut self, builder: &DatasetBuilder, dir: &Path, record: &Record) -> Result<()> {
        if self.current.is_none() {
            let path = self.provisional_path(builder, dir);
            let writer = builder.file_format.create_writer(&path, builder.compression)?;
            self.current = Some((writer, 0));
        }

        if let Some((writer, count)) = self.current.as_mut() {
            writer.append(record)?;
            *count += 1;
            if builder.max_records_per_shard.is_some_and(|max| *count >= max) {
                self.rotate()?;
            }
        }
        Ok(())
    }

    fn rotate(&mut self) -> Result<()> {
        if let Some((writer, _)) = self.current.take() {
            self.finished.push(writer.finish()?);
        }
        Ok(())
    }

    fn finish(mut self, builder: &DatasetBuilder, dir: &Path) -> Result<SplitInfo> {
        self.rotate()?;

        let count = self.finished.len();
        let mut split = SplitInfo::new(&self.name);
        for (index, summary) in self.finished.iter().enumerate() {
            let file_name = shard_file_name(&builder.name, &self.name, builder.file_format, index, count);
            std::fs::rename(&summary.path, dir.join(&file_name))?;
            debug!("Shard {} holds {} records", file_name, summary.num_records);

            split.shards.push(ShardInfo {
                file_name,
                num_records: summary.num_records,
                num_bytes: summary.num_bytes,
                crc32c: summary.crc32c,
            });
        }
        Ok(split)
    }
}

fn open_split(dir: &Path, info: &DatasetInfo, split: &str) -> Result<RecordFileDataSource> {
    if !info.file_format.supports_random_access() {
        return Err(RecordFlowError::UnsupportedFileFormat {
            format: info.file_format.to_string(),
            operation: "random access".into(),
        });
    }

    let split_info = info.split(split)?;
    let paths: Vec<PathBuf> = split_info.shards.iter().map(|s| dir.join(&s.file_name)).collect();
    let source = RecordFileDataSource::open(format!("{}/{}", info.name, split), &paths)?;

    if source.len() as u64 != split_info.num_records() {
        return Err(RecordFlowError::InfoInvalid {
            reason: format!(
                "Split {} lists {} records but its shards hold {}",
                split,
                split_info.num_records(),
                source.len()
            ),
        });
    }
    Ok(source)
}

fn open_splits(dir: &Path, info: &DatasetInfo) -> Result<DataSources> {
    info.splits
        .keys()
        .map(|split| Ok((split.clone(), Arc::new(open_split(dir, info, split)?))))
        .collect()
}

/// Directory of a prepared version; the highest one when `version` is `None`
pub fn resolve_version_dir(name: &str, data_dir: &Path, version: Option<&str>) -> Result<PathBuf> {
    let not_prepared = || RecordFlowError::DatasetNotPrepared {
        name: name.to_string(),
        data_dir: data_dir.to_path_buf(),
    };
    let dataset_dir = data_dir.join(name);

    if let Some(version) = version {
        let dir = dataset_dir.join(version);
        return if dir.join(DATASET_INFO_FILE).is_file() {
            Ok(dir)
        } else {
            Err(not_prepared())
        };
    }

    let entries = match std::fs::read_dir(&dataset_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(not_prepared()),
        Err(e) => return Err(e.into()),
    };

    let mut best: Option<(VersionKey, PathBuf)> = None;
    for entry in entries {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(version) = file_name.to_str() else {
            continue;
        };
        if version.ends_with(INCOMPLETE_SUFFIX) || !entry.path().join(DATASET_INFO_FILE).is_file() {
            continue;
        }
        let key = VersionKey::parse(version);
        if best.as_ref().map_or(true, |(b, _)| key > *b) {
            best = Some((key, entry.path()));
        }
    }

    best.map(|(_, dir)| dir).ok_or_else(not_prepared)
}

/// Info of a prepared dataset
pub fn load_info(name: &str, data_dir: &Path, version: Option<&str>) -> Result<DatasetInfo> {
    DatasetInfo::load(&resolve_version_dir(name, data_dir, version)?)
}

/// Split factory over an already prepared dataset
///
/// Returns one data source per split, keyed by split name.
pub fn data_sources(name: &str, data_dir: &Path, version: Option<&str>) -> Result<DataSources> {
    let dir = resolve_version_dir(name, data_dir, version)?;
    let info = DatasetInfo::load(&dir)?;
    open_splits(&dir, &info)
}

/// Dotted versions compare numerically, component by component
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct VersionKey {
    numbers: Vec<u64>,
    raw: String,
}

impl VersionKey {
    fn parse(version: &str) -> Self {
        Self {
            numbers: version
                .split('.')
                .map(|part| part.parse().unwrap_or(0))
                .collect(),
            raw: version.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureKind;

    fn features() -> FeaturesDict {
        FeaturesDict::new().with("id", FeatureKind::Int)
    }

    fn examples(n: i64) -> impl Iterator<Item = Result<(String, Record)>> {
        (0..n).map(|i| {
            let split = if i % 4 == 0 { "test" } else { "train" };
            Ok((split.to_string(), Record::new().with("id", i)))
        })
    }

    #[test]
    fn test_prepare_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let builder = DatasetBuilder::new("toy", "1.0.0", features(), dir.path()).max_records_per_shard(4);

        let info = builder.download_and_prepare(examples(20)).unwrap();
        assert_eq!(info.split("train").unwrap().num_records(), 15);
        assert_eq!(info.split("train").unwrap().shards.len(), 4);
        assert!(builder.version_dir().exists());
        assert!(!builder.incomplete_dir().exists());

        let sources = builder.data_sources().unwrap();
        let test = &sources["test"];
        assert_eq!(test.len(), 5);
        let ids: Vec<i64> = (0..5)
            .map(|i| test.get(i).unwrap().get("id").and_then(|v| v.as_int()).unwrap())
            .collect();
        assert_eq!(ids, vec![0, 4, 8, 12, 16]);
    }

    #[test]
    fn test_schema_violation_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let builder = DatasetBuilder::new("toy", "1.0.0", features(), dir.path());
        let bad = vec![Ok(("train".to_string(), Record::new().with("id", "x")))];

        assert!(builder.download_and_prepare(bad).is_err());
        assert!(!builder.version_dir().exists());
        assert!(!builder.incomplete_dir().exists());
    }

    #[test]
    fn test_skip_when_prepared() {
        let dir = tempfile::tempdir().unwrap();
        let builder = DatasetBuilder::new("toy", "1.0.0", features(), dir.path());
        builder.download_and_prepare(examples(8)).unwrap();

        let info = builder.download_and_prepare(examples(100)).unwrap();
        assert_eq!(info.split("train").unwrap().num_records(), 6);

        let info = builder.overwrite(true).download_and_prepare(examples(100)).unwrap();
        assert_eq!(info.split("train").unwrap().num_records(), 75);
    }

    #[test]
    fn test_factory_picks_latest_version() {
        let dir = tempfile::tempdir().unwrap();
        DatasetBuilder::new("toy", "1.2.0", features(), dir.path())
            .download_and_prepare(examples(4))
            .unwrap();
        DatasetBuilder::new("toy", "1.10.0", features(), dir.path())
            .download_and_prepare(examples(8))
            .unwrap();

        let sources = data_sources("toy", dir.path(), None).unwrap();
        assert_eq!(sources["train"].len(), 6);

        let sources = data_sources("toy", dir.path(), Some("1.2.0")).unwrap();
        assert_eq!(sources["train"].len(), 3);

        assert!(matches!(
            data_sources("missing", dir.path(), None),
            Err(RecordFlowError::DatasetNotPrepared { .. })
        ));
    }

    #[test]
    fn test_info_count_must_match_shards() {
        let dir = tempfile::tempdir().unwrap();
        let builder = DatasetBuilder::new("toy", "1.0.0", features(), dir.path());
        let mut info = builder.download_and_prepare(examples(8)).unwrap();
        assert_eq!(builder.data_source("train").unwrap().len(), 6);

        if let Some(split) = info.splits.get_mut("train") {
            split.shards[0].num_records += 1;
        }
        info.save(&builder.version_dir()).unwrap();

        assert!(matches!(
            builder.data_source("train"),
            Err(RecordFlowError::InfoInvalid { .. })
        ));
        assert_eq!(builder.data_source("test").unwrap().len(), 2);
    }

    #[test]
    fn test_json_lines_has_no_data_source() {
        let dir = tempfile::tempdir().unwrap();
        let builder = DatasetBuilder::new("toy", "1.0.0", features(), dir.path()).file_format(FileFormat::JsonLines);
        builder.download_and_prepare(examples(4)).unwrap();

        assert!(matches!(
            builder.data_source("train"),
            Err(RecordFlowError::UnsupportedFileFormat { .. })
        ));
    }
}
