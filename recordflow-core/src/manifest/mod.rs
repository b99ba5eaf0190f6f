//! Manifest-driven dataset builds
//!
//! A manifest is a JSON document naming the raw input files of a dataset
//! and its record sets. Each record set declares its fields (feature kind
//! plus the input column it comes from) and which file holds each split.
//! Building prepares one dataset per record set under
//! `<out_dir>/<manifest name>/<record set>/<version>/`.

pub mod csv;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::builder::{DatasetBuilder, DatasetInfo};
use crate::error::{RecordFlowError, Result};
use crate::features::{FeatureKind, FeatureValue, FeaturesDict, Record};
use crate::storage::FileFormat;
use self::csv::CsvReader;

/// Raw input file referenced by record sets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileObject {
    pub name: String,
    /// Location relative to the manifest; absent for manual downloads
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// One feature of a record set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(flatten)]
    pub kind: FeatureKind,
    /// Input column; defaults to `name`
    #[serde(default)]
    pub column: Option<String>,
}

impl FieldSpec {
    pub fn column(&self) -> &str {
        self.column.as_deref().unwrap_or(&self.name)
    }
}

/// A group of records sharing one set of fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordSet {
    pub id: String,
    pub fields: Vec<FieldSpec>,
    /// Split name -> file name
    pub splits: BTreeMap<String, String>,
}

impl RecordSet {
    pub fn features(&self) -> FeaturesDict {
        self.fields
            .iter()
            .fold(FeaturesDict::new(), |features, field| features.with(&field.name, field.kind.clone()))
    }
}

fn default_version() -> String {
    "1.0.0".into()
}

/// Build manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub description: String,
    pub files: Vec<FileObject>,
    pub record_sets: Vec<RecordSet>,
    /// Directory relative file paths resolve against
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl Manifest {
    pub fn from_json(json: &str, base_dir: impl Into<PathBuf>) -> Result<Self> {
        let mut manifest: Self = serde_json::from_str(json).map_err(|e| RecordFlowError::ManifestInvalid {
            reason: format!("Deserialization failed: {}", e),
        })?;
        manifest.base_dir = base_dir.into();
        manifest.validate()?;
        Ok(manifest)
    }

    /// Read a manifest file; relative paths resolve against its directory
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Self::from_json(&json, base_dir)
    }

    pub fn record_set_ids(&self) -> Vec<String> {
        self.record_sets.iter().map(|r| r.id.clone()).collect()
    }

    pub fn record_set(&self, id: &str) -> Result<&RecordSet> {
        self.record_sets
            .iter()
            .find(|r| r.id == id)
            .ok_or_else(|| RecordFlowError::UnknownRecordSet {
                id: id.to_string(),
                available: self.record_set_ids(),
            })
    }

    /// Check that names are set and every split names a declared file
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Err(RecordFlowError::ManifestInvalid { reason });

        if self.name.is_empty() {
            return invalid("manifest name is empty".into());
        }
        for record_set in &self.record_sets {
            if record_set.fields.is_empty() {
                return invalid(format!("record set {} has no fields", record_set.id));
            }
            for (split, file) in &record_set.splits {
                if !self.files.iter().any(|f| &f.name == file) {
                    return invalid(format!(
                        "split {} of record set {} uses undeclared file {}",
                        split, record_set.id, file
                    ));
                }
            }
        }
        Ok(())
    }

    /// Where a file lives, honoring the manual-download mapping first
    pub fn resolve_file(&self, name: &str, mapping: &BTreeMap<String, PathBuf>) -> Result<PathBuf> {
        if let Some(path) = mapping.get(name) {
            return Ok(path.clone());
        }
        let file = self.files.iter().find(|f| f.name == name);
        match file.and_then(|f| f.path.as_ref()) {
            Some(path) if path.is_absolute() => Ok(path.clone()),
            Some(path) => Ok(self.base_dir.join(path)),
            None => Err(RecordFlowError::ManifestInvalid {
                reason: format!("file {} has no path; provide it through the mapping", name),
            }),
        }
    }
}

/// Parse a `{file name -> path}` JSON object
///
/// A leading `~/` expands to the home directory.
pub fn parse_mapping(mapping: Option<&str>) -> Result<BTreeMap<String, PathBuf>> {
    let Some(mapping) = mapping.filter(|m| !m.trim().is_empty()) else {
        return Ok(BTreeMap::new());
    };

    let parsed: BTreeMap<String, String> =
        serde_json::from_str(mapping).map_err(|_| RecordFlowError::InvalidMapping {
            mapping: mapping.to_string(),
        })?;

    Ok(parsed
        .into_iter()
        .map(|(name, path)| (name, expand_home(&path)))
        .collect())
}

fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), std::env::var_os("HOME")) {
        (Some(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => PathBuf::from(path),
    }
}

/// Prepare the selected record sets (all when `record_sets` is empty)
///
/// Returns the info of every prepared dataset, in record set order.
pub fn prepare_from_manifest(
    manifest: &Manifest,
    record_sets: &[String],
    file_format: FileFormat,
    out_dir: &Path,
    mapping: Option<&str>,
) -> Result<Vec<DatasetInfo>> {
    let mapping = parse_mapping(mapping)?;

    let selected: Vec<&RecordSet> = if record_sets.is_empty() {
        manifest.record_sets.iter().collect()
    } else {
        record_sets
            .iter()
            .map(|id| manifest.record_set(id))
            .collect::<Result<_>>()?
    };

    let data_dir = out_dir.join(&manifest.name);
    let mut infos = Vec::with_capacity(selected.len());

    for record_set in selected {
        info!("Building record set {} of {}", record_set.id, manifest.name);

        let mut inputs = Vec::with_capacity(record_set.splits.len());
        for (split, file) in &record_set.splits {
            let path = manifest.resolve_file(file, &mapping)?;
            debug!("Split {} reads {}", split, path.display());
            inputs.push((split.clone(), path));
        }

        let builder = DatasetBuilder::new(&record_set.id, &manifest.version, record_set.features(), &data_dir)
            .description(&manifest.description)
            .file_format(file_format);

        let fields = &record_set.fields;
        let examples = inputs.into_iter().flat_map(move |(split, path)| {
            let rows = read_records(&path, fields).unwrap_or_else(|e| Box::new(std::iter::once(Err(e))));
            rows.map(move |record| record.map(|r| (split.clone(), r)))
        });

        infos.push(builder.download_and_prepare(examples)?);
    }

    Ok(infos)
}

/// Records of one input file; `.jsonl` is JSON Lines, anything else CSV
pub fn read_records<'a>(
    path: &Path,
    fields: &'a [FieldSpec],
) -> Result<Box<dyn Iterator<Item = Result<Record>> + 'a>> {
    let media_root = path.parent().map(Path::to_path_buf).unwrap_or_default();
    let is_json_lines = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("jsonl"));

    if is_json_lines {
        let file_path = path.to_path_buf();
        let lines = BufReader::new(File::open(path)?).lines().enumerate();
        let records = lines.filter_map(move |(i, line)| {
            let line_no = i + 1;
            let line = match line {
                Ok(line) => line,
                Err(e) => return Some(Err(e.into())),
            };
            if line.trim().is_empty() {
                return None;
            }
            Some(json_record(&line, fields, &media_root).map_err(|reason| RecordFlowError::BadInput {
                path: file_path.clone(),
                line: line_no,
                reason,
            }))
        });
        return Ok(Box::new(records));
    }

    let reader = CsvReader::open(path)?;
    let columns = fields
        .iter()
        .map(|field| {
            reader.column(field.column()).ok_or_else(|| RecordFlowError::BadInput {
                path: path.to_path_buf(),
                line: 1,
                reason: format!("missing column {}", field.column()),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let file_path = path.to_path_buf();
    let mut reader = reader;
    let records = std::iter::from_fn(move || {
        let row = reader.next()?;
        let line_no = reader.line_no();
        Some(row.and_then(|cells| {
            csv_record(&cells, &columns, fields, &media_root).map_err(|reason| RecordFlowError::BadInput {
                path: file_path.clone(),
                line: line_no,
                reason,
            })
        }))
    });
    Ok(Box::new(records))
}

fn csv_record(
    cells: &[String],
    columns: &[usize],
    fields: &[FieldSpec],
    media_root: &Path,
) -> std::result::Result<Record, String> {
    let mut record = Record::new();
    for (field, &column) in fields.iter().zip(columns) {
        let cell = &cells[column];
        let value = match &field.kind {
            FeatureKind::Media { .. } => read_media(media_root, cell)?,
            kind => kind.parse_text(cell).map_err(|e| format!("{}: {}", field.name, e))?,
        };
        record.insert(field.name.clone(), value);
    }
    Ok(record)
}

fn json_record(line: &str, fields: &[FieldSpec], media_root: &Path) -> std::result::Result<Record, String> {
    let object: serde_json::Value = serde_json::from_str(line).map_err(|e| e.to_string())?;
    let mut record = Record::new();
    for field in fields {
        let json = object
            .get(field.column())
            .ok_or_else(|| format!("missing key {}", field.column()))?;
        let value = match (&field.kind, json) {
            (FeatureKind::Media { .. }, serde_json::Value::String(path)) => read_media(media_root, path)?,
            (kind, json) => kind.parse_json(json).map_err(|e| format!("{}: {}", field.name, e))?,
        };
        record.insert(field.name.clone(), value);
    }
    Ok(record)
}

/// Media cells name a file; its encoded bytes are stored as is
fn read_media(root: &Path, reference: &str) -> std::result::Result<FeatureValue, String> {
    let path = root.join(reference.trim());
    std::fs::read(&path)
        .map(FeatureValue::Bytes)
        .map_err(|e| format!("cannot read media {}: {}", path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manifest(base_dir: &Path) -> Manifest {
        let json = json!({
            "name": "flowers",
            "files": [
                {"name": "train.csv", "path": "train.csv"},
                {"name": "extra.csv"}
            ],
            "record_sets": [{
                "id": "default",
                "fields": [
                    {"name": "label", "kind": "class_label", "num_classes": 3},
                    {"name": "petal", "kind": "float", "column": "petal_len"}
                ],
                "splits": {"train": "train.csv"}
            }]
        });
        Manifest::from_json(&json.to_string(), base_dir).unwrap()
    }

    #[test]
    fn test_field_kind_flattened() {
        let manifest = manifest(Path::new("/data"));
        let fields = &manifest.record_sets[0].fields;
        assert_eq!(fields[0].kind, FeatureKind::ClassLabel { num_classes: 3 });
        assert_eq!(fields[1].column(), "petal_len");
        assert_eq!(fields[0].column(), "label");
    }

    #[test]
    fn test_resolve_file_and_mapping() {
        let manifest = manifest(Path::new("/data"));
        let empty = BTreeMap::new();
        assert_eq!(manifest.resolve_file("train.csv", &empty).unwrap(), PathBuf::from("/data/train.csv"));
        assert!(manifest.resolve_file("extra.csv", &empty).is_err());

        let mapping = parse_mapping(Some(r#"{"extra.csv": "/downloads/extra.csv"}"#)).unwrap();
        assert_eq!(
            manifest.resolve_file("extra.csv", &mapping).unwrap(),
            PathBuf::from("/downloads/extra.csv")
        );
    }

    #[test]
    fn test_invalid_mapping() {
        let err = parse_mapping(Some("{not json")).unwrap_err();
        assert!(matches!(err, RecordFlowError::InvalidMapping { .. }));
        assert!(err.to_string().starts_with("Error parsing mapping parameter"));
        assert!(parse_mapping(None).unwrap().is_empty());
    }

    #[test]
    fn test_undeclared_split_file() {
        let json = json!({
            "name": "x",
            "files": [],
            "record_sets": [{"id": "a", "fields": [{"name": "v", "kind": "int"}], "splits": {"train": "nope.csv"}}]
        });
        assert!(Manifest::from_json(&json.to_string(), "/").is_err());
    }
}
