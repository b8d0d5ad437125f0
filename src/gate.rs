use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::scanner::ScanError;

/// Hard upper bound on simultaneous probing units.
pub const MAX_CAPACITY: usize = 5_000;

/// Counting gate bounding how many probing units run at once.
///
/// Each admitted unit holds its permit until it finishes.
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    sem: Arc<Semaphore>,
    capacity: usize,
}

impl AdmissionGate {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, MAX_CAPACITY);
        Self {
            sem: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.sem.available_permits()
    }

    /// Wait for a free slot, giving up as soon as `cancel` fires.
    pub async fn admit(&self, cancel: &CancellationToken) -> Result<OwnedSemaphorePermit, ScanError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ScanError::Cancelled),
            permit = self.sem.clone().acquire_owned() => permit.map_err(|_| ScanError::Cancelled),
        }
    }
}
