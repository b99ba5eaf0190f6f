//! Backpressure for loader workers
//!
//! Bounds how many elements a worker may have produced but the consumer
//! has not yet taken. A permit travels with each element and is released
//! when the consumer drops it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{RecordFlowError, Result};

/// Configuration for backpressure control
#[derive(Debug, Clone)]
pub struct BackpressureConfig {
    /// Maximum elements a worker may have in flight
    pub max_pending: usize,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self { max_pending: 8 }
    }
}

/// Permit-based limiter for one worker
#[derive(Clone)]
pub struct BackpressureController {
    /// Semaphore to limit pending elements
    semaphore: Arc<Semaphore>,
    /// Configuration
    config: BackpressureConfig,
    /// Current pending count
    pending: Arc<AtomicUsize>,
}

impl BackpressureController {
    /// Create a new backpressure controller
    pub fn new(config: BackpressureConfig) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(config.max_pending.max(1))),
            config,
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Wait for a free slot (called by the worker before reading)
    pub async fn acquire(&self) -> Result<BackpressurePermit> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| RecordFlowError::ShutdownInProgress)?;
        Ok(self.wrap(permit))
    }

    /// Try to acquire without waiting
    pub fn try_acquire(&self) -> Option<BackpressurePermit> {
        self.semaphore
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| self.wrap(permit))
    }

    /// Wake every waiter with an error; used on shutdown
    pub fn close(&self) {
        self.semaphore.close();
    }

    /// Get current pending count
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }

    /// Configured capacity
    pub fn capacity(&self) -> usize {
        self.config.max_pending.max(1)
    }

    fn wrap(&self, permit: OwnedSemaphorePermit) -> BackpressurePermit {
        self.pending.fetch_add(1, Ordering::Relaxed);
        BackpressurePermit {
            _permit: permit,
            pending: self.pending.clone(),
        }
    }
}

/// Permit that tracks a pending element
pub struct BackpressurePermit {
    _permit: OwnedSemaphorePermit,
    pending: Arc<AtomicUsize>,
}

impl Drop for BackpressurePermit {
    fn drop(&mut self) {
        self.pending.fetch_sub(1, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for BackpressurePermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BackpressurePermit")
    }
}
