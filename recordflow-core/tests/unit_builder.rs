//! Unit tests for dataset preparation and the split factory

use std::sync::Arc;

use recordflow_core::builder::{data_sources, load_info, DatasetBuilder, DatasetInfo, DATASET_INFO_FILE};
use recordflow_core::compression::{CompressionAlgorithm, CompressionConfig};
use recordflow_core::features::{DType, FeatureKind, FeaturesDict, MediaKind, Record, TensorData};
use recordflow_core::loader::{DataLoader, DataLoaderConfig};
use recordflow_core::sampler::{IndexSampler, SamplerOptions};
use recordflow_core::source::RandomAccessDataSource;
use recordflow_core::{FeatureValue, RecordFlowError, Result};

fn features() -> FeaturesDict {
    FeaturesDict::new()
        .with("image", FeatureKind::Media { media: MediaKind::Image })
        .with("label", FeatureKind::ClassLabel { num_classes: 10 })
        .with(
            "pixels",
            FeatureKind::Tensor {
                dtype: DType::Int64,
                shape: vec![2, -1],
            },
        )
}

fn example(i: i64) -> Record {
    Record::new()
        .with("image", vec![0x89, b'P', b'N', b'G', i as u8])
        .with("label", i % 10)
        .with(
            "pixels",
            FeatureValue::tensor(vec![2, 2], TensorData::Int64(vec![i, i, i, i])).unwrap(),
        )
}

fn examples(train: i64, test: i64) -> Vec<Result<(String, Record)>> {
    (0..train)
        .map(|i| Ok(("train".to_string(), example(i))))
        .chain((0..test).map(|i| Ok(("test".to_string(), example(1000 + i)))))
        .collect()
}

#[test]
fn test_prepared_splits_feed_the_loader() {
    let dir = tempfile::tempdir().unwrap();
    let builder = DatasetBuilder::new("digits", "2.0.0", features(), dir.path())
        .compression(CompressionConfig::new(CompressionAlgorithm::Zstd))
        .max_records_per_shard(16);
    builder.download_and_prepare(examples(60, 10)).unwrap();

    let sources = data_sources("digits", dir.path(), None).unwrap();
    assert_eq!(sources.keys().cloned().collect::<Vec<_>>(), vec!["test", "train"]);

    let train = sources["train"].clone();
    assert_eq!(train.len(), 60);
    assert_eq!(train.num_shards(), 4);
    assert_eq!(train.get(42).unwrap(), example(42));

    let source: Arc<dyn RandomAccessDataSource> = train;
    let sampler = IndexSampler::new(SamplerOptions::new(source.len()).shuffle(0)).unwrap();
    let config = DataLoaderConfig::default().worker_count(2).batch_size(32);
    let mut labels: Vec<i64> = DataLoader::new(source, sampler, Vec::new(), config)
        .unwrap()
        .flat_map(|batch| {
            let batch = batch.unwrap();
            (0..batch.len())
                .map(|i| batch.records[i].get("label").and_then(|v| v.as_int()).unwrap())
                .collect::<Vec<_>>()
        })
        .collect();
    labels.sort_unstable();
    let mut expected: Vec<i64> = (0..60).map(|i| i % 10).collect();
    expected.sort_unstable();
    assert_eq!(labels, expected);
}

#[test]
fn test_info_round_trips_through_disk() {
    let dir = tempfile::tempdir().unwrap();
    let builder = DatasetBuilder::new("digits", "1.0.0", features(), dir.path()).description("handwritten digits");
    let written = builder.download_and_prepare(examples(5, 3)).unwrap();

    assert!(builder.version_dir().join(DATASET_INFO_FILE).is_file());
    let loaded = load_info("digits", dir.path(), Some("1.0.0")).unwrap();
    assert_eq!(loaded.splits, written.splits);
    assert_eq!(loaded.features, features());
    assert_eq!(loaded.description, "handwritten digits");

    let json = std::fs::read_to_string(builder.version_dir().join(DATASET_INFO_FILE)).unwrap();
    assert_eq!(DatasetInfo::from_json(&json).unwrap().split("test").unwrap().num_records(), 3);
}

#[test]
fn test_generator_error_aborts_preparation() {
    let dir = tempfile::tempdir().unwrap();
    let builder = DatasetBuilder::new("digits", "1.0.0", features(), dir.path());
    let mut items = examples(3, 0);
    items.push(Err(RecordFlowError::Internal {
        message: "download failed".into(),
    }));

    assert!(builder.download_and_prepare(items).is_err());
    assert!(!builder.is_prepared());
    assert!(matches!(
        builder.data_sources(),
        Err(RecordFlowError::DatasetNotPrepared { .. })
    ));
}

#[test]
fn test_unknown_split() {
    let dir = tempfile::tempdir().unwrap();
    let builder = DatasetBuilder::new("digits", "1.0.0", features(), dir.path());
    builder.download_and_prepare(examples(2, 0)).unwrap();

    match builder.data_source("validation") {
        Err(RecordFlowError::SplitNotFound { available, .. }) => assert_eq!(available, vec!["train"]),
        other => panic!("expected SplitNotFound, got {:?}", other.map(|s| s.len())),
    }
}
