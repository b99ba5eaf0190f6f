//! Loader worker tasks
//!
//! Worker `w` of `k` reads the steps `start + w`, `start + w + k`, ... of
//! the sampler stream, applies the transforms, and hands each element to
//! the consumer through its own bounded channel. Reads and transforms run
//! on the blocking pool, off the async worker threads.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::backpressure::{BackpressureConfig, BackpressureController, BackpressurePermit};
use super::transform::{apply_all, Transform};
use crate::error::Result;
use crate::features::Record;
use crate::metrics::standard;
use crate::runtime::ShutdownSignal;
use crate::sampler::{IndexSampler, RecordMetadata};
use crate::source::RandomAccessDataSource;

/// One processed step of the stream
#[derive(Debug)]
pub struct Element {
    pub metadata: RecordMetadata,
    /// `Ok(None)` when a transform filtered the record out
    pub record: Result<Option<Record>>,
    /// Released when the consumer drops the element
    pub(crate) _permit: Option<BackpressurePermit>,
}

/// Read one step and run the transforms on it
pub fn process(
    source: &dyn RandomAccessDataSource,
    transforms: &[Box<dyn Transform>],
    metadata: RecordMetadata,
) -> Element {
    let record = source
        .get(metadata.record_key)
        .and_then(|record| apply_all(transforms, record));
    Element {
        metadata,
        record,
        _permit: None,
    }
}

/// Everything a worker needs, shared across all workers of a loader
pub struct WorkerContext {
    pub source: Arc<dyn RandomAccessDataSource>,
    pub transforms: Arc<Vec<Box<dyn Transform>>>,
    pub sampler: IndexSampler,
    pub shutdown: ShutdownSignal,
}

/// Running workers and the consumer ends of their channels
pub struct WorkerPool {
    /// Step the pool started at
    pub start_index: u64,
    pub receivers: Vec<mpsc::Receiver<Element>>,
    controllers: Vec<BackpressureController>,
    handles: Vec<JoinHandle<()>>,
    shutdown: ShutdownSignal,
}

impl WorkerPool {
    /// Spawn `worker_count` workers starting at step `start_index`
    pub fn start(
        handle: &tokio::runtime::Handle,
        context: WorkerContext,
        worker_count: usize,
        buffer_size: usize,
        backpressure: &BackpressureConfig,
        start_index: u64,
    ) -> Self {
        let mut receivers = Vec::with_capacity(worker_count);
        let mut controllers = Vec::with_capacity(worker_count);
        let mut handles = Vec::with_capacity(worker_count);
        let context = Arc::new(context);

        for worker_id in 0..worker_count {
            let (sender, receiver) = mpsc::channel(buffer_size.max(1));
            let controller = BackpressureController::new(backpressure.clone());

            let worker = Worker {
                worker_id,
                stride: worker_count as u64,
                next_index: start_index + worker_id as u64,
                sender,
                backpressure: controller.clone(),
                context: context.clone(),
            };
            handles.push(handle.spawn(worker.run()));
            receivers.push(receiver);
            controllers.push(controller);
        }

        debug!("Started {} loader workers at step {}", worker_count, start_index);

        Self {
            start_index,
            receivers,
            controllers,
            handles,
            shutdown: context.shutdown.clone(),
        }
    }

    /// Channel holding step `index`
    pub fn slot(&self, index: u64) -> usize {
        ((index - self.start_index) % self.receivers.len() as u64) as usize
    }

    /// Elements produced but not yet taken, across workers
    pub fn pending_count(&self) -> usize {
        self.controllers.iter().map(|c| c.pending_count()).sum()
    }

    /// Signal workers to stop without waiting for them
    pub fn stop(&mut self) {
        self.shutdown.shutdown();
        for controller in &self.controllers {
            controller.close();
        }
        self.receivers.clear();
    }

    /// Stop and wait for every worker task
    pub async fn join(mut self) {
        self.stop();
        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                warn!("Loader worker panicked: {}", e);
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Worker {
    worker_id: usize,
    stride: u64,
    next_index: u64,
    sender: mpsc::Sender<Element>,
    backpressure: BackpressureController,
    context: Arc<WorkerContext>,
}

impl Worker {
    async fn run(mut self) {
        standard::ACTIVE_WORKERS.inc();
        let mut sampler = self.context.sampler.clone();
        let mut produced = 0u64;

        loop {
            if self.context.shutdown.is_shutdown() {
                break;
            }
            let Some(metadata) = sampler.at(self.next_index) else {
                break;
            };

            let permit = match self.backpressure.acquire().await {
                Ok(permit) => permit,
                Err(_) => break,
            };

            let context = self.context.clone();
            let processed = tokio::task::spawn_blocking(move || {
                process(context.source.as_ref(), &context.transforms, metadata)
            })
            .await;
            let mut element = match processed {
                Ok(element) => element,
                Err(e) => {
                    warn!("Loader worker {} read task failed: {}", self.worker_id, e);
                    break;
                }
            };
            element._permit = Some(permit);

            tokio::select! {
                sent = self.sender.send(element) => {
                    if sent.is_err() {
                        break;
                    }
                }
                _ = self.context.shutdown.wait() => break,
            }

            produced += 1;
            self.next_index += self.stride;
        }

        standard::ACTIVE_WORKERS.dec();
        debug!("Loader worker {} finished after {} elements", self.worker_id, produced);
    }
}
