//! Tokio runtime for loader workers
//!
//! Loader workers run on their own multi-thread runtime so record reads
//! and transforms never compete with the caller's executor.

use std::sync::Arc;
use tokio::runtime::{Builder, Runtime};

use crate::error::{RecordFlowError, Result};

/// Configuration for the loader runtime
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Number of runtime threads
    pub worker_threads: usize,
    /// Thread name prefix
    pub thread_name: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_threads: num_cpus::get().max(2),
            thread_name: "recordflow-worker".into(),
        }
    }
}

/// Runtime shared by the workers of one or more loaders
pub struct LoaderRuntime {
    runtime: Runtime,
    config: RuntimeConfig,
}

impl LoaderRuntime {
    /// Create a new runtime with the given configuration
    pub fn new(config: RuntimeConfig) -> Result<Arc<Self>> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(config.worker_threads.max(1))
            .thread_name(config.thread_name.clone())
            .enable_all()
            .build()
            .map_err(|e| RecordFlowError::Internal {
                message: format!("Failed to create loader runtime: {}", e),
            })?;

        Ok(Arc::new(Self { runtime, config }))
    }

    /// Spawn a task on the runtime
    pub fn spawn<F>(&self, future: F) -> tokio::task::JoinHandle<F::Output>
    where
        F: std::future::Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.runtime.spawn(future)
    }

    /// Run a future to completion from outside any runtime
    pub fn block_on<F: std::future::Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    /// Get the runtime handle
    pub fn handle(&self) -> tokio::runtime::Handle {
        self.runtime.handle().clone()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Stop the runtime, giving in-flight tasks a grace period
    pub fn shutdown(self) {
        self.runtime.shutdown_timeout(std::time::Duration::from_secs(5));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_creation() {
        let runtime = LoaderRuntime::new(RuntimeConfig {
            worker_threads: 2,
            ..Default::default()
        })
        .unwrap();

        let handle = runtime.spawn(async { 40 + 2 });
        assert_eq!(runtime.block_on(handle).unwrap(), 42);
    }
}
