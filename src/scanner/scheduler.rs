//! Full and hot sweep timers.
//!
//! Two independent intervals drive the [`Sweeper`]. Each kind of sweep has
//! an in-progress flag; a tick that fires while the previous sweep of the
//! same kind is still running is skipped and counted.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::sweep::{SweepStats, Sweeper};
use crate::config::ScannerConfig;
use crate::discovery::{discover_all, DiscoverySource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepKind {
    /// Discovery followed by a sweep of every candidate.
    Full,
    /// Re-probe of the regional-interest set only.
    Hot,
}

impl fmt::Display for SweepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SweepKind::Full => write!(f, "full"),
            SweepKind::Hot => write!(f, "hot"),
        }
    }
}

/// Cumulative scanner statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanStats {
    pub full_sweeps: u64,
    pub hot_sweeps: u64,
    pub skipped_full: u64,
    pub skipped_hot: u64,
    pub probed: u64,
    pub online: u64,
    pub offline: u64,
    pub write_errors: u64,
    pub last_duration_ms: u64,
    pub last_sweep_at: Option<DateTime<Utc>>,
}

impl ScanStats {
    fn absorb(&mut self, kind: SweepKind, sweep: &SweepStats) {
        match kind {
            SweepKind::Full => self.full_sweeps += 1,
            SweepKind::Hot => self.hot_sweeps += 1,
        }
        self.probed += sweep.total as u64;
        self.online += sweep.online as u64;
        self.offline += sweep.offline as u64;
        self.write_errors += sweep.write_errors as u64;
        self.last_duration_ms = u64::try_from(sweep.duration.as_millis()).unwrap_or(u64::MAX);
        self.last_sweep_at = Some(Utc::now());
    }
}

/// Holds a sweep's in-progress flag; cleared on drop.
struct SweepGuard<'a>(&'a AtomicBool);

impl<'a> SweepGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for SweepGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct ScanScheduler {
    sweeper: Arc<Sweeper>,
    sources: Vec<Box<dyn DiscoverySource>>,
    config: ScannerConfig,
    full_running: AtomicBool,
    hot_running: AtomicBool,
    stats: Mutex<ScanStats>,
}

impl ScanScheduler {
    pub fn new(sweeper: Arc<Sweeper>, sources: Vec<Box<dyn DiscoverySource>>, config: ScannerConfig) -> Self {
        Self {
            sweeper,
            sources,
            config,
            full_running: AtomicBool::new(false),
            hot_running: AtomicBool::new(false),
            stats: Mutex::new(ScanStats::default()),
        }
    }

    pub fn stats(&self) -> ScanStats {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn sweeper(&self) -> &Arc<Sweeper> {
        &self.sweeper
    }

    /// Discover and sweep every candidate. `None` when a full sweep is
    /// already running.
    pub async fn full_sweep(&self) -> Option<SweepStats> {
        let Some(_guard) = SweepGuard::try_acquire(&self.full_running) else {
            self.skipped(SweepKind::Full);
            return None;
        };
        let candidates: Vec<_> = discover_all(&self.sources).await.into_iter().collect();
        info!(candidates = candidates.len(), "Starting full sweep");
        let stats = self.sweeper.sweep(&candidates).await;
        self.finished(SweepKind::Full, &stats);
        Some(stats)
    }

    /// Re-probe the regional-interest set. `None` when a hot sweep is
    /// already running.
    pub async fn hot_sweep(&self) -> Option<SweepStats> {
        let Some(_guard) = SweepGuard::try_acquire(&self.hot_running) else {
            self.skipped(SweepKind::Hot);
            return None;
        };
        let hot = self.sweeper.hot_addresses();
        info!(candidates = hot.len(), "Starting hot sweep");
        let stats = self.sweeper.sweep(&hot).await;
        self.finished(SweepKind::Hot, &stats);
        Some(stats)
    }

    fn skipped(&self, kind: SweepKind) {
        warn!(kind = %kind, "Previous sweep still running, skipping tick");
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        match kind {
            SweepKind::Full => stats.skipped_full += 1,
            SweepKind::Hot => stats.skipped_hot += 1,
        }
    }

    fn finished(&self, kind: SweepKind, sweep: &SweepStats) {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .absorb(kind, sweep);
    }

    /// Drive both timers until cancelled. Sweeps run as separate tasks so a
    /// long full sweep never delays the hot timer.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut full_tick = tokio::time::interval(self.config.full_sweep_interval());
        let mut hot_tick = tokio::time::interval(self.config.hot_sweep_interval());
        full_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        hot_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first full sweep fills the hot set
        hot_tick.tick().await;

        let mut sweeps = JoinSet::new();
        info!(
            full_interval_secs = self.config.full_sweep_interval_secs,
            hot_interval_secs = self.config.hot_sweep_interval_secs,
            "Scan scheduler started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Scan scheduler shutting down");
                    break;
                }
                _ = full_tick.tick() => {
                    let this = Arc::clone(&self);
                    sweeps.spawn(async move { this.full_sweep().await; });
                }
                _ = hot_tick.tick() => {
                    let this = Arc::clone(&self);
                    sweeps.spawn(async move { this.hot_sweep().await; });
                }
                Some(joined) = sweeps.join_next(), if !sweeps.is_empty() => {
                    if let Err(e) = joined {
                        warn!(error = %e, "Sweep task failed");
                    }
                }
            }
        }

        sweeps.shutdown().await;
    }
}
