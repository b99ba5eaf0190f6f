//! Unit tests for the data loader

use std::sync::Arc;

use recordflow_core::features::{FeatureValue, Record, TensorData};
use recordflow_core::loader::{
    Batch, DataLoader, DataLoaderConfig, DataLoaderState, FilterTransform, MapTransform, Transform,
};
use recordflow_core::sampler::{IndexSampler, SamplerOptions};
use recordflow_core::source::{InMemoryDataSource, RandomAccessDataSource};
use recordflow_core::RecordFlowError;

fn source(n: i64) -> Arc<dyn RandomAccessDataSource> {
    Arc::new(
        (0..n)
            .map(|i| Record::new().with("id", i).with("x", i as f64 * 0.5))
            .collect::<InMemoryDataSource>(),
    )
}

fn ids(batch: &Batch) -> Vec<i64> {
    batch
        .records
        .iter()
        .map(|r| r.get("id").and_then(|v| v.as_int()).unwrap())
        .collect()
}

fn collect_ids(loader: DataLoader) -> Vec<i64> {
    loader.flat_map(|batch| ids(&batch.unwrap())).collect()
}

fn loader(n: i64, options: SamplerOptions, config: DataLoaderConfig, transforms: Vec<Box<dyn Transform>>) -> DataLoader {
    DataLoader::new(source(n), IndexSampler::new(options).unwrap(), transforms, config).unwrap()
}

#[test]
fn test_order_is_independent_of_worker_count() {
    let options = SamplerOptions::new(97).shuffle(5).num_epochs(Some(2));
    let expected: Vec<i64> = IndexSampler::new(options.clone())
        .unwrap()
        .map(|m| m.record_key as i64)
        .collect();

    for worker_count in [0usize, 1, 3, 8] {
        let config = DataLoaderConfig::default().worker_count(worker_count).batch_size(10);
        let got = collect_ids(loader(97, options.clone(), config, Vec::new()));
        assert_eq!(got, expected, "worker_count={}", worker_count);
    }
}

#[test]
fn test_transforms_run_before_batching() {
    let transforms: Vec<Box<dyn Transform>> = vec![
        Box::new(FilterTransform::new("odd", |r: &Record| {
            r.get("id").and_then(|v| v.as_int()).map(|i| i % 2 == 1).unwrap_or(false)
        })),
        Box::new(MapTransform::new("negate", |r: Record| {
            let id = r.get("id").and_then(|v| v.as_int()).unwrap_or(0);
            Ok(r.with("id", -id))
        })),
    ];
    let config = DataLoaderConfig::default().worker_count(2).batch_size(4);
    let mut loader = loader(20, SamplerOptions::new(20), config, transforms);

    let first = loader.next().unwrap().unwrap();
    assert_eq!(ids(&first), vec![-1, -3, -5, -7]);
    let rest: Vec<Batch> = loader.collect::<Result<_, _>>().unwrap();
    assert_eq!(rest.iter().map(Batch::len).collect::<Vec<_>>(), vec![4, 2]);
}

#[test]
fn test_errors_surface_in_order() {
    let transforms: Vec<Box<dyn Transform>> = vec![Box::new(MapTransform::new("fail_on_5", |r: Record| {
        match r.get("id").and_then(|v| v.as_int()) {
            Some(5) => Err(RecordFlowError::SchemaMismatch {
                reason: "bad record 5".into(),
            }),
            _ => Ok(r),
        }
    }))];
    let config = DataLoaderConfig::default().worker_count(3);
    let mut loader = loader(8, SamplerOptions::new(8), config, transforms);

    let mut seen = Vec::new();
    let mut failed_after = None;
    while let Some(item) = loader.next() {
        match item {
            Ok(batch) => seen.extend(ids(&batch)),
            Err(e) => {
                assert!(e.to_string().contains("bad record 5"));
                failed_after = Some(seen.len());
            }
        }
    }
    assert_eq!(failed_after, Some(5));
    assert_eq!(seen, vec![0, 1, 2, 3, 4, 6, 7]);
}

#[test]
fn test_drop_remainder_with_workers() {
    let config = DataLoaderConfig::default().worker_count(4).batch_size(8).drop_remainder(true);
    let loader = loader(30, SamplerOptions::new(30), config, Vec::new());
    let batches: Vec<Batch> = loader.collect::<Result<_, _>>().unwrap();
    assert_eq!(batches.len(), 3);
    assert!(batches.iter().all(|b| b.len() == 8));
}

#[test]
fn test_resume_with_workers_matches_uninterrupted_run() {
    let options = SamplerOptions::new(50).shuffle(77).num_epochs(Some(2));
    let config = DataLoaderConfig::default().worker_count(3).batch_size(7);

    let uninterrupted = collect_ids(loader(50, options.clone(), config.clone(), Vec::new()));

    let mut first = loader(50, options.clone(), config.clone(), Vec::new());
    let mut head = Vec::new();
    for _ in 0..5 {
        head.extend(ids(&first.next().unwrap().unwrap()));
    }
    let state = first.state();
    assert_eq!(state, DataLoaderState { next_index: 35 });
    drop(first);

    let json = serde_json::to_string(&state).unwrap();
    let restored: DataLoaderState = serde_json::from_str(&json).unwrap();
    let tail = collect_ids(loader(50, options, config, Vec::new()).resume(restored));

    head.extend(tail);
    assert_eq!(head, uninterrupted);
}

#[test]
fn test_stack_batch_features() {
    let config = DataLoaderConfig::default().batch_size(3);
    let mut loader = loader(3, SamplerOptions::new(3), config, Vec::new());
    let batch = loader.next().unwrap().unwrap();

    assert_eq!(
        batch.stack("x").unwrap(),
        FeatureValue::Tensor {
            shape: vec![3],
            data: TensorData::Float64(vec![0.0, 0.5, 1.0]),
        }
    );
}

#[test]
fn test_invalid_config_rejected() {
    let sampler = IndexSampler::new(SamplerOptions::new(4)).unwrap();
    let config = DataLoaderConfig {
        batch_size: Some(0),
        ..Default::default()
    };
    assert!(matches!(
        DataLoader::new(source(4), sampler, Vec::new(), config),
        Err(RecordFlowError::InvalidLoaderConfig { .. })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_async_batches_on_current_runtime() {
    let config = DataLoaderConfig::default().worker_count(4).batch_size(16);
    let mut loader = loader(100, SamplerOptions::new(100).shuffle(3), config, Vec::new());

    let mut total = 0;
    while let Some(batch) = loader.next_batch().await.unwrap() {
        total += batch.len();
    }
    assert_eq!(total, 100);
    assert_eq!(loader.state().next_index, 100);
    loader.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_mid_stream() {
    let config = DataLoaderConfig::default().worker_count(2).worker_buffer_size(2).batch_size(4);
    let mut loader = loader(1000, SamplerOptions::new(1000).num_epochs(None), config, Vec::new());

    let batch = loader.next_batch().await.unwrap().unwrap();
    assert_eq!(batch.len(), 4);
    assert!(loader.pending_count() <= 2 * 8);

    tokio::time::timeout(std::time::Duration::from_secs(5), loader.shutdown())
        .await
        .expect("workers should stop promptly");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_blocking_iteration_with_workers_errors_inside_runtime() {
    let config = DataLoaderConfig::default().worker_count(2).batch_size(4);
    let mut loader = loader(10, SamplerOptions::new(10), config, Vec::new());

    match loader.next() {
        Some(Err(RecordFlowError::InvalidLoaderConfig { reason })) => {
            assert!(reason.contains("next_batch().await"));
        }
        other => panic!("expected InvalidLoaderConfig, got {:?}", other.map(|b| b.map(|b| b.len()))),
    }
    assert_eq!(loader.state().next_index, 0);

    let batch = loader.next_batch().await.unwrap().unwrap();
    assert_eq!(ids(&batch), vec![0, 1, 2, 3]);
    loader.shutdown().await;
}

#[tokio::test]
async fn test_inline_blocking_iteration_inside_runtime() {
    let config = DataLoaderConfig::default().batch_size(5);
    let got = collect_ids(loader(10, SamplerOptions::new(10), config, Vec::new()));
    assert_eq!(got, (0..10).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_worker_reads_do_not_block_the_runtime_thread() {
    // Steps 0 and 1 belong to different workers and only complete together
    let barrier = Arc::new(std::sync::Barrier::new(2));
    let transforms: Vec<Box<dyn Transform>> = vec![Box::new(MapTransform::new("rendezvous", {
        let barrier = barrier.clone();
        move |r: Record| {
            if r.get("id").and_then(|v| v.as_int()).is_some_and(|id| id < 2) {
                barrier.wait();
            }
            Ok(r)
        }
    }))];
    let config = DataLoaderConfig::default().worker_count(2).batch_size(4);
    let mut loader = loader(8, SamplerOptions::new(8), config, transforms);

    let mut got = Vec::new();
    while let Some(batch) = loader.next_batch().await.unwrap() {
        got.extend(ids(&batch));
    }
    assert_eq!(got, (0..8).collect::<Vec<_>>());
    loader.shutdown().await;
}
