//! Data loading
//!
//! Drives an [`IndexSampler`] over a [`RandomAccessDataSource`], applies
//! per-record transforms (optionally on parallel workers), and groups the
//! results into batches. Output order depends only on the sampler, never
//! on the worker count.

pub mod backpressure;
pub mod batch;
pub mod transform;
pub mod worker;

pub use backpressure::{BackpressureConfig, BackpressureController};
pub use batch::Batch;
pub use transform::{FilterTransform, MapTransform, SelectFeatures, Transform};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::error::{RecordFlowError, Result};
use crate::features::Record;
use crate::metrics::{standard, Counter, MetricsRegistry};
use crate::runtime::{LoaderRuntime, RuntimeConfig, ShutdownSignal};
use crate::sampler::{IndexSampler, RecordMetadata};
use crate::source::RandomAccessDataSource;
use worker::{Element, WorkerContext, WorkerPool};

/// Configuration for the data loader
#[derive(Debug, Clone)]
pub struct DataLoaderConfig {
    /// Parallel workers; 0 reads on the consumer's thread
    pub worker_count: usize,
    /// Elements each worker may prepare ahead of the consumer
    pub worker_buffer_size: usize,
    /// Records per batch; `None` yields one record per batch
    pub batch_size: Option<usize>,
    /// Drop a final batch smaller than `batch_size`
    pub drop_remainder: bool,
    /// Per-worker limit on elements read but not yet consumed
    pub backpressure: BackpressureConfig,
}

impl Default for DataLoaderConfig {
    fn default() -> Self {
        Self {
            worker_count: 0,
            worker_buffer_size: crate::DEFAULT_WORKER_BUFFER_SIZE,
            batch_size: None,
            drop_remainder: false,
            backpressure: BackpressureConfig::default(),
        }
    }
}

impl DataLoaderConfig {
    pub fn worker_count(mut self, n: usize) -> Self {
        self.worker_count = n;
        self
    }

    pub fn worker_buffer_size(mut self, n: usize) -> Self {
        self.worker_buffer_size = n;
        self
    }

    pub fn batch_size(mut self, n: usize) -> Self {
        self.batch_size = Some(n);
        self
    }

    pub fn drop_remainder(mut self, d: bool) -> Self {
        self.drop_remainder = d;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == Some(0) {
            return Err(RecordFlowError::InvalidLoaderConfig {
                reason: "batch_size must be positive".into(),
            });
        }
        if self.worker_count > 0 && (self.worker_buffer_size == 0 || self.backpressure.max_pending == 0) {
            return Err(RecordFlowError::InvalidLoaderConfig {
                reason: "worker_buffer_size and max_pending must be positive".into(),
            });
        }
        Ok(())
    }
}

/// Serializable loader position for checkpointing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataLoaderState {
    /// Next sampler step the loader will consume
    pub next_index: u64,
}

/// Loader over a data source and sampler
///
/// Iterate synchronously with the [`Iterator`] impl, or call
/// [`next_batch`](DataLoader::next_batch) from async code. With workers
/// enabled the sync iterator yields an error inside a Tokio runtime.
pub struct DataLoader {
    source: Arc<dyn RandomAccessDataSource>,
    sampler: IndexSampler,
    transforms: Arc<Vec<Box<dyn Transform>>>,
    config: DataLoaderConfig,
    next_index: u64,
    pool: Option<WorkerPool>,
    runtime: Option<Arc<LoaderRuntime>>,
    exhausted: bool,
    metrics: MetricsRegistry,
    elements: Arc<Counter>,
    filtered: Arc<Counter>,
    failed: Arc<Counter>,
}

impl DataLoader {
    /// Create a loader; the sampler must not address past the source
    pub fn new(
        source: Arc<dyn RandomAccessDataSource>,
        sampler: IndexSampler,
        transforms: Vec<Box<dyn Transform>>,
        config: DataLoaderConfig,
    ) -> Result<Self> {
        config.validate()?;
        if sampler.options().num_records > source.len() {
            return Err(RecordFlowError::InvalidLoaderConfig {
                reason: format!(
                    "sampler covers {} records but source {} has {}",
                    sampler.options().num_records,
                    source.name(),
                    source.len()
                ),
            });
        }

        let metrics = MetricsRegistry::new();
        let elements = metrics.counter("loader_elements_total", "Stream steps consumed");
        let filtered = metrics.counter("loader_filtered_total", "Records dropped by transforms");
        let failed = metrics.counter("loader_errors_total", "Steps that failed to read or transform");
        let next_index = sampler.position();

        Ok(Self {
            source,
            sampler,
            transforms: Arc::new(transforms),
            config,
            next_index,
            pool: None,
            runtime: None,
            exhausted: false,
            metrics,
            elements,
            filtered,
            failed,
        })
    }

    /// Run workers on the given runtime instead of an implicit one
    pub fn with_runtime(mut self, runtime: Arc<LoaderRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn config(&self) -> &DataLoaderConfig {
        &self.config
    }

    /// Current position for checkpointing
    pub fn state(&self) -> DataLoaderState {
        DataLoaderState {
            next_index: self.next_index,
        }
    }

    /// Builder form of [`set_state`](DataLoader::set_state)
    pub fn resume(mut self, state: DataLoaderState) -> Self {
        self.set_state(state);
        self
    }

    /// Continue from a checkpointed position, restarting workers
    pub fn set_state(&mut self, state: DataLoaderState) {
        if let Some(mut pool) = self.pool.take() {
            pool.stop();
        }
        self.next_index = state.next_index;
        self.exhausted = false;
        debug!("Loader resumed at step {}", state.next_index);
    }

    /// Elements prepared by workers but not yet consumed
    pub fn pending_count(&self) -> usize {
        self.pool.as_ref().map(|p| p.pending_count()).unwrap_or(0)
    }

    /// Per-loader metrics
    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    /// Next record that survives the transforms, async
    pub async fn next_record(&mut self) -> Result<Option<(RecordMetadata, Record)>> {
        loop {
            let element = if self.config.worker_count == 0 {
                self.next_inline()
            } else {
                self.ensure_pool()?;
                let received = match self.pool.as_mut() {
                    Some(pool) => {
                        let slot = pool.slot(self.next_index);
                        pool.receivers[slot].recv().await
                    }
                    None => None,
                };
                self.on_received(received)?
            };
            match self.finish_element(element)? {
                Step::Record(metadata, record) => return Ok(Some((metadata, record))),
                Step::Filtered => continue,
                Step::End => return Ok(None),
            }
        }
    }

    /// Next record that survives the transforms, blocking
    ///
    /// With workers enabled this fails inside a Tokio runtime, where
    /// [`next_record`](DataLoader::next_record) must be awaited instead.
    pub fn next_record_blocking(&mut self) -> Result<Option<(RecordMetadata, Record)>> {
        if self.config.worker_count > 0 && tokio::runtime::Handle::try_current().is_ok() {
            return Err(RecordFlowError::InvalidLoaderConfig {
                reason: "blocking iteration with workers inside an async runtime; use next_batch().await".into(),
            });
        }
        loop {
            let element = if self.config.worker_count == 0 {
                self.next_inline()
            } else {
                self.ensure_pool()?;
                let received = match self.pool.as_mut() {
                    Some(pool) => {
                        let slot = pool.slot(self.next_index);
                        pool.receivers[slot].blocking_recv()
                    }
                    None => None,
                };
                self.on_received(received)?
            };
            match self.finish_element(element)? {
                Step::Record(metadata, record) => return Ok(Some((metadata, record))),
                Step::Filtered => continue,
                Step::End => return Ok(None),
            }
        }
    }

    /// Next batch, async; `None` once the stream is exhausted
    pub async fn next_batch(&mut self) -> Result<Option<Batch>> {
        let target = self.config.batch_size.unwrap_or(1);
        let mut batch = Batch::with_capacity(target);
        while batch.len() < target {
            match self.next_record().await? {
                Some((metadata, record)) => batch.push(metadata, record),
                None => break,
            }
        }
        Ok(self.emit(batch, target))
    }

    /// Next batch, blocking; `None` once the stream is exhausted
    pub fn next_batch_blocking(&mut self) -> Result<Option<Batch>> {
        let target = self.config.batch_size.unwrap_or(1);
        let mut batch = Batch::with_capacity(target);
        while batch.len() < target {
            match self.next_record_blocking()? {
                Some((metadata, record)) => batch.push(metadata, record),
                None => break,
            }
        }
        Ok(self.emit(batch, target))
    }

    /// Stop workers and wait for them to exit
    pub async fn shutdown(mut self) {
        if let Some(pool) = self.pool.take() {
            pool.join().await;
        }
        debug!(
            "DataLoader shutdown complete, consumed {} steps",
            self.elements.get()
        );
    }

    fn emit(&mut self, batch: Batch, target: usize) -> Option<Batch> {
        if batch.is_empty() || (batch.len() < target && self.config.drop_remainder) {
            return None;
        }
        standard::BATCHES_PRODUCED.inc();
        Some(batch)
    }

    fn next_inline(&mut self) -> Option<Element> {
        if self.exhausted {
            return None;
        }
        let metadata = self.sampler.at(self.next_index)?;
        Some(worker::process(self.source.as_ref(), &self.transforms, metadata))
    }

    fn ensure_pool(&mut self) -> Result<()> {
        if self.pool.is_some() || self.exhausted {
            return Ok(());
        }

        let handle = match &self.runtime {
            Some(runtime) => runtime.handle(),
            None => match tokio::runtime::Handle::try_current() {
                Ok(handle) => handle,
                Err(_) => {
                    let runtime = LoaderRuntime::new(RuntimeConfig {
                        worker_threads: self.config.worker_count,
                        ..Default::default()
                    })?;
                    let handle = runtime.handle();
                    self.runtime = Some(runtime);
                    handle
                }
            },
        };

        let context = WorkerContext {
            source: self.source.clone(),
            transforms: self.transforms.clone(),
            sampler: self.sampler.clone(),
            shutdown: ShutdownSignal::new(),
        };
        self.pool = Some(WorkerPool::start(
            &handle,
            context,
            self.config.worker_count,
            self.config.worker_buffer_size,
            &self.config.backpressure,
            self.next_index,
        ));
        Ok(())
    }

    /// A closed channel is the end of the stream only if the sampler agrees
    fn on_received(&mut self, received: Option<Element>) -> Result<Option<Element>> {
        match received {
            Some(element) => Ok(Some(element)),
            None if self.exhausted || self.sampler.at(self.next_index).is_none() => Ok(None),
            None => {
                let worker_id = self.pool.as_ref().map(|p| p.slot(self.next_index)).unwrap_or(0);
                Err(RecordFlowError::WorkerDisconnected { worker_id })
            }
        }
    }

    fn finish_element(&mut self, element: Option<Element>) -> Result<Step> {
        let Some(element) = element else {
            if !self.exhausted {
                debug!("Loader exhausted at step {}", self.next_index);
            }
            self.exhausted = true;
            self.pool = None;
            return Ok(Step::End);
        };

        debug_assert_eq!(element.metadata.index, self.next_index);
        self.next_index += 1;
        self.elements.inc();

        match element.record {
            Ok(Some(record)) => Ok(Step::Record(element.metadata, record)),
            Ok(None) => {
                self.filtered.inc();
                Ok(Step::Filtered)
            }
            Err(e) => {
                self.failed.inc();
                Err(e)
            }
        }
    }
}

enum Step {
    Record(RecordMetadata, Record),
    Filtered,
    End,
}

impl Iterator for DataLoader {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_batch_blocking().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::SamplerOptions;
    use crate::source::InMemoryDataSource;

    fn source(n: i64) -> Arc<dyn RandomAccessDataSource> {
        Arc::new((0..n).map(|i| Record::new().with("id", i)).collect::<InMemoryDataSource>())
    }

    fn ids(batch: &Batch) -> Vec<i64> {
        batch.records.iter().map(|r| r.get("id").and_then(|v| v.as_int()).unwrap()).collect()
    }

    #[test]
    fn test_inline_batches() {
        let sampler = IndexSampler::new(SamplerOptions::new(7)).unwrap();
        let loader = DataLoader::new(source(7), sampler, vec![], DataLoaderConfig::default().batch_size(3)).unwrap();

        let batches: Vec<Batch> = loader.collect::<Result<_>>().unwrap();
        assert_eq!(batches.len(), 3);
        assert_eq!(ids(&batches[0]), vec![0, 1, 2]);
        assert_eq!(ids(&batches[2]), vec![6]);
    }

    #[test]
    fn test_drop_remainder() {
        let sampler = IndexSampler::new(SamplerOptions::new(7)).unwrap();
        let config = DataLoaderConfig::default().batch_size(3).drop_remainder(true);
        let loader = DataLoader::new(source(7), sampler, vec![], config).unwrap();
        assert_eq!(loader.count(), 2);
    }

    #[test]
    fn test_sampler_larger_than_source() {
        let sampler = IndexSampler::new(SamplerOptions::new(10)).unwrap();
        assert!(DataLoader::new(source(5), sampler, vec![], DataLoaderConfig::default()).is_err());
    }

    #[test]
    fn test_state_resume_inline() {
        let options = SamplerOptions::new(10).shuffle(11);
        let mut loader = DataLoader::new(
            source(10),
            IndexSampler::new(options.clone()).unwrap(),
            vec![],
            DataLoaderConfig::default().batch_size(4),
        )
        .unwrap();

        let first = loader.next_batch_blocking().unwrap().unwrap();
        let state = loader.state();
        assert_eq!(state.next_index, 4);
        let rest: Vec<i64> = loader.flat_map(|b| ids(&b.unwrap())).collect();

        let resumed = DataLoader::new(
            source(10),
            IndexSampler::new(options).unwrap(),
            vec![],
            DataLoaderConfig::default().batch_size(4),
        )
        .unwrap()
        .resume(state);
        let resumed_rest: Vec<i64> = resumed.flat_map(|b| ids(&b.unwrap())).collect();

        assert_eq!(rest, resumed_rest);
        assert_eq!(first.len() + rest.len(), 10);
    }
}
