//! Player enrichment
//!
//! Resolves player ids to profile data through a cached, rate-limited API
//! client and stores the result as [`crate::types::PlayerRecord`]s.
//!
//! - `queue`: prioritised in-memory work list
//! - `rate_limiter`: exact sliding-window limiter
//! - `cache`: TTL cache for API responses
//! - `client`: [`ProfileApi`] trait, Steam implementation, caching wrapper
//! - `worker`: serial batch loop and stale-record sweep

pub mod cache;
pub mod client;
pub mod queue;
pub mod rate_limiter;
pub mod worker;

pub use cache::TtlCache;
pub use client::{ApiError, CachedProfileClient, OwnedGames, PlayerSummary, ProfileApi, SteamProfileClient};
pub use queue::{Priority, QueueItem, WorkList};
pub use rate_limiter::SlidingWindowLimiter;
pub use worker::{BatchOutcome, EnrichmentWorker};
