//! Snapshot retention.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{PersistenceError, PersistenceGateway};

/// How often the retention task runs.
pub const RETENTION_INTERVAL: Duration = Duration::from_secs(24 * 3600);

/// Delete snapshots older than `retention_days`.
pub fn prune_once(gateway: &dyn PersistenceGateway, retention_days: i64) -> Result<usize, PersistenceError> {
    let cutoff = Utc::now() - chrono::Duration::days(retention_days);
    let pruned = gateway.prune_snapshots(cutoff)?;
    if pruned > 0 {
        info!(pruned, retention_days, "Pruned old snapshots");
    }
    Ok(pruned)
}

/// Prune at startup, then once per [`RETENTION_INTERVAL`] until cancelled.
pub async fn run(gateway: Arc<dyn PersistenceGateway>, retention_days: i64, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(RETENTION_INTERVAL);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = prune_once(gateway.as_ref(), retention_days) {
                    warn!(error = %e, "Snapshot pruning failed");
                }
            }
        }
    }
}
