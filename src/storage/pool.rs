//! Fixed connection ceiling for the storage backend.
//!
//! Each gateway operation holds a lease for its duration. When every lease is
//! taken the operation fails with `PoolExhausted` instead of waiting.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::PersistenceError;

#[derive(Debug, Clone)]
pub struct ConnectionPool {
    permits: Arc<Semaphore>,
    size: usize,
}

/// A held connection slot, released on drop.
#[derive(Debug)]
pub struct PoolLease {
    _permit: OwnedSemaphorePermit,
}

impl ConnectionPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn lease(&self) -> Result<PoolLease, PersistenceError> {
        Arc::clone(&self.permits)
            .try_acquire_owned()
            .map(|permit| PoolLease { _permit: permit })
            .map_err(|_| PersistenceError::PoolExhausted(self.size))
    }

    #[cfg(test)]
    fn size(&self) -> usize {
        self.size
    }

    #[cfg(test)]
    fn available(&self) -> usize {
        self.permits.available_permits()
    }
}
