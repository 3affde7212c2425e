//! Durable storage
//!
//! Servers, snapshots, players, predictions and feedback all live behind the
//! [`PersistenceGateway`] trait. Callers wrap writes in
//! [`crate::retry::with_backoff`] with [`write_policy`].

mod gateway;
mod memory;
mod pool;
pub mod retention;
mod sled_store;

pub use gateway::{PersistenceError, PersistenceGateway};
pub use memory::InMemoryGateway;
pub use pool::{ConnectionPool, PoolLease};
pub use sled_store::SledGateway;

use std::sync::Arc;
use std::time::Duration;

use crate::config::StorageConfig;
use crate::retry::RetryPolicy;

/// Open the configured backend, or an in-memory one when `ephemeral`.
pub fn open_gateway(config: &StorageConfig, ephemeral: bool) -> Result<Arc<dyn PersistenceGateway>, PersistenceError> {
    if ephemeral {
        tracing::warn!("Using in-memory storage, nothing will be persisted");
        return Ok(Arc::new(InMemoryGateway::new()));
    }
    Ok(Arc::new(SledGateway::open(&config.path, config.pool_size)?))
}

/// Retry policy for storage writes.
pub fn write_policy(config: &StorageConfig) -> RetryPolicy {
    RetryPolicy::new(config.write_retries, Duration::from_millis(config.write_backoff_ms))
}
