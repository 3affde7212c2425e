//! Enrichment worker
//!
//! One loop pulls batches from the [`WorkList`] and processes them serially
//! with a fixed pause in between. Items refreshed within the refresh
//! interval are skipped before any remote call. Failed items go back on the
//! list with one more retry and are dropped once their retries run out.

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::client::{CachedProfileClient, OwnedGames, PlayerSummary, ProfileApi};
use super::queue::{Priority, QueueItem, WorkList};
use crate::config::EnrichmentConfig;
use crate::retry::{with_backoff, RetryPolicy};
use crate::storage::{PersistenceError, PersistenceGateway};
use crate::types::{PlayerId, PlayerRecord};

/// What happened to one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub enriched: usize,
    /// Refreshed recently, no remote call made.
    pub skipped: usize,
    pub requeued: usize,
    pub dropped: usize,
}

pub struct EnrichmentWorker<A> {
    gateway: Arc<dyn PersistenceGateway>,
    client: CachedProfileClient<A>,
    config: EnrichmentConfig,
    target_app_id: u32,
    write_policy: RetryPolicy,
    work: Mutex<WorkList>,
    wake: Notify,
}

impl<A: ProfileApi> EnrichmentWorker<A> {
    pub fn new(
        gateway: Arc<dyn PersistenceGateway>,
        client: CachedProfileClient<A>,
        config: EnrichmentConfig,
        target_app_id: u32,
        write_policy: RetryPolicy,
    ) -> Self {
        Self {
            gateway,
            client,
            config,
            target_app_id,
            write_policy,
            work: Mutex::new(WorkList::new()),
            wake: Notify::new(),
        }
    }

    fn work(&self) -> std::sync::MutexGuard<'_, WorkList> {
        self.work.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue ids for enrichment and wake the worker.
    pub fn enqueue(&self, ids: impl IntoIterator<Item = PlayerId>, priority: Priority) -> usize {
        let added = self.work().enqueue(ids, priority);
        if added > 0 {
            debug!(added, priority = %priority, "Queued players for enrichment");
            self.wake.notify_one();
        }
        added
    }

    pub fn pending(&self) -> usize {
        self.work().len()
    }

    /// Take and process the next batch. `None` when the list is empty.
    pub async fn run_once(&self) -> Option<BatchOutcome> {
        let batch = self.work().next_batch(self.config.batch_size);
        if batch.is_empty() {
            return None;
        }
        Some(self.process_batch(batch).await)
    }

    pub async fn process_batch(&self, batch: Vec<QueueItem>) -> BatchOutcome {
        let now = Utc::now();
        let mut outcome = BatchOutcome::default();
        let mut to_fetch = Vec::with_capacity(batch.len());

        for item in batch {
            if self.is_fresh(item.id, now) {
                outcome.skipped += 1;
            } else {
                to_fetch.push(item);
            }
        }
        if to_fetch.is_empty() {
            return outcome;
        }

        let ids: Vec<PlayerId> = to_fetch.iter().map(|item| item.id).collect();
        let mut summaries = match self.client.summaries(&ids).await {
            Ok(found) => found,
            Err(e) => {
                warn!(count = to_fetch.len(), error = %e, "Profile batch failed");
                self.retry_later(to_fetch, &mut outcome);
                return outcome;
            }
        };

        let mut failed = Vec::new();
        for item in to_fetch {
            let Some(summary) = summaries.remove(&item.id) else {
                debug!(player = %item.id, "No profile returned");
                failed.push(item);
                continue;
            };
            match self.enrich_one(&summary, now).await {
                Ok(()) => outcome.enriched += 1,
                Err(e) => {
                    warn!(player = %item.id, error = %e, "Failed to enrich player");
                    failed.push(item);
                }
            }
        }
        self.retry_later(failed, &mut outcome);

        info!(
            enriched = outcome.enriched,
            skipped = outcome.skipped,
            requeued = outcome.requeued,
            dropped = outcome.dropped,
            "Enrichment batch finished"
        );
        outcome
    }

    fn is_fresh(&self, id: PlayerId, now: DateTime<Utc>) -> bool {
        match self.gateway.get_player(id) {
            Ok(Some(record)) => record.is_fresh(now, self.config.refresh_interval()),
            Ok(None) => false,
            Err(e) => {
                warn!(player = %id, error = %e, "Could not read player record");
                false
            }
        }
    }

    async fn enrich_one(&self, summary: &PlayerSummary, now: DateTime<Utc>) -> Result<(), EnrichError> {
        let id = summary.player_id().ok_or(EnrichError::BadId)?;
        let owned = self.client.owned_games(id).await?;
        let record = player_record(id, summary, owned.as_ref(), self.target_app_id, now);

        let gateway = self.gateway.as_ref();
        let record = &record;
        with_backoff(self.write_policy, "upsert_player", || async move { gateway.upsert_player(record) }).await?;
        Ok(())
    }

    fn retry_later(&self, items: Vec<QueueItem>, outcome: &mut BatchOutcome) {
        let mut work = self.work();
        for item in items {
            let id = item.id;
            if work.requeue(item, self.config.max_item_retries) {
                outcome.requeued += 1;
            } else {
                outcome.dropped += 1;
                warn!(player = %id, "Dropping player after repeated failures");
            }
        }
    }

    /// Queue players whose records are older than the refresh interval.
    pub fn enqueue_stale(&self) -> Result<usize, PersistenceError> {
        let cutoff = Utc::now() - self.config.refresh_interval();
        let stale = self.gateway.stale_players(cutoff, self.config.stale_sweep_limit)?;
        let found = stale.len();
        let added = self.enqueue(stale, Priority::Normal);
        info!(found, added, "Stale player sweep");
        Ok(added)
    }

    /// Worker loop: serial batches until cancelled.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(batch_size = self.config.batch_size, "Enrichment worker started");
        loop {
            let pause = match self.run_once().await {
                Some(_) => self.config.batch_delay(),
                None => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = self.wake.notified() => continue,
                    }
                }
            };
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }
        info!(pending = self.pending(), "Enrichment worker shutting down");
    }

    /// Periodic stale sweep until cancelled.
    pub async fn run_stale_sweep(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.enqueue_stale() {
                        warn!(error = %e, "Stale player sweep failed");
                    }
                    let evicted = self.client.purge_expired();
                    if evicted > 0 {
                        debug!(evicted, "Purged expired profile cache entries");
                    }
                }
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum EnrichError {
    #[error("profile carried an invalid id")]
    BadId,
    #[error(transparent)]
    Api(#[from] super::client::ApiError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Build the stored record from API data.
pub fn player_record(
    id: PlayerId,
    summary: &PlayerSummary,
    owned: Option<&OwnedGames>,
    target_app_id: u32,
    refreshed_at: DateTime<Utc>,
) -> PlayerRecord {
    PlayerRecord {
        id,
        name: summary.personaname.clone(),
        profile_url: summary.profileurl.clone(),
        country: summary.loccountrycode.clone(),
        account_created: summary
            .timecreated
            .and_then(|secs| DateTime::from_timestamp(secs, 0)),
        avatar_url: summary.avatarfull.clone(),
        owns_target_game: owned.map(|games| games.owns(target_app_id)),
        game_count: owned.map(|games| games.game_count),
        refreshed_at,
    }
}
