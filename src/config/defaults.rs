//! System-wide default constants.
//!
//! Every `Default` impl in [`super::ScoutConfig`] reads from here so the
//! values live in one place. Grouped by subsystem.

// ============================================================================
// Discovery
// ============================================================================

/// Valve master server used for the directory query.
pub const MASTER_SERVER_HOST: &str = "hl2master.steampowered.com";

/// Directory protocol UDP port.
pub const MASTER_SERVER_PORT: u16 = 27011;

/// Game directory passed in the directory filter string.
pub const GAME_DIR: &str = "garrysmod";

/// Time budget for collecting directory responses (seconds).
pub const DIRECTORY_BUDGET_SECS: u64 = 10;

/// Steam Web API base URL (listing + profile endpoints).
pub const WEB_API_BASE_URL: &str = "https://api.steampowered.com";

/// Maximum number of servers requested from the HTTP listing endpoint.
pub const LISTING_LIMIT: u32 = 5_000;

/// HTTP request timeout for the listing endpoint (seconds).
pub const LISTING_TIMEOUT_SECS: u64 = 10;

// ============================================================================
// Scanner
// ============================================================================

/// Full sweep interval (seconds). 600 = 10 minutes.
pub const FULL_SWEEP_INTERVAL_SECS: u64 = 600;

/// Hot-subset sweep interval (seconds). 300 = 5 minutes.
pub const HOT_SWEEP_INTERVAL_SECS: u64 = 300;

/// Probes run concurrently within one batch.
pub const MAX_CONCURRENT_PROBES: usize = 50;

/// Per-query UDP timeout (milliseconds).
pub const PROBE_TIMEOUT_MS: u64 = 5_000;

/// Pause between consecutive probe batches (milliseconds).
pub const INTER_BATCH_PAUSE_MS: u64 = 100;

// ============================================================================
// Classifier
// ============================================================================

/// Game-mode rule result used outright above this confidence.
pub const GAME_MODE_RULE_CONFIDENT: f64 = 0.8;

/// Minimum learned confidence for the learned stage to override the rules.
pub const GAME_MODE_LEARNED_GATE: f64 = 0.6;

/// Below this confidence a prediction is flagged for review.
pub const REVIEW_THRESHOLD: f64 = 0.5;

/// Regional blend weight of the rule stage (learned gets the remainder).
pub const REGIONAL_RULE_WEIGHT: f64 = 0.6;

/// Upper bound of the regional ambiguous band.
pub const REGIONAL_COMBINED_CONFIDENT: f64 = 0.7;

/// Lower bound of the regional ambiguous band.
pub const REGIONAL_AMBIGUOUS_FLOOR: f64 = 0.3;

/// Retraining interval (seconds). 3600 = 1 hour.
pub const RETRAIN_INTERVAL_SECS: u64 = 3_600;

/// Passes over the feedback set per retraining run.
pub const TRAINING_PASSES: usize = 10;

/// SGD learning rate for the learned stage.
pub const LEARNING_RATE: f64 = 0.1;

/// Maximum vocabulary size for the bag-of-words features.
pub const VOCABULARY_SIZE: usize = 512;

/// Minimum feedback samples before a model is retrained.
pub const MIN_TRAINING_SAMPLES: usize = 8;

// ============================================================================
// Enrichment
// ============================================================================

/// Queue items processed per batch.
pub const ENRICHMENT_BATCH_SIZE: usize = 50;

/// Delay between enrichment batches (milliseconds).
pub const ENRICHMENT_BATCH_DELAY_MS: u64 = 2_000;

/// Sliding rate-limit window (seconds). 300 = 5 minutes.
pub const RATE_LIMIT_WINDOW_SECS: u64 = 300;

/// Requests allowed inside one window.
pub const RATE_LIMIT_MAX_REQUESTS: usize = 200;

/// Profile cache expiry (seconds). 86 400 = 24 hours.
pub const CACHE_TTL_SECS: u64 = 86_400;

/// Player records younger than this are not re-fetched (seconds).
pub const REFRESH_INTERVAL_SECS: u64 = 86_400;

/// Queue item is dropped after this many failed batches.
pub const MAX_ITEM_RETRIES: u32 = 3;

/// Retries for a single external API call.
pub const API_MAX_RETRIES: u32 = 3;

/// First backoff delay (milliseconds); doubles on every retry.
pub const BACKOFF_BASE_MS: u64 = 1_000;

/// Maximum ids per profile-summary request.
pub const PROFILE_BATCH_LIMIT: usize = 100;

/// Steam app id of the target game.
pub const TARGET_APP_ID: u32 = 4_000;

/// How often stale player records are re-enqueued (seconds).
pub const STALE_SWEEP_INTERVAL_SECS: u64 = 3_600;

/// Stale player records enqueued per staleness sweep.
pub const STALE_SWEEP_LIMIT: usize = 500;

// ============================================================================
// Storage
// ============================================================================

/// Default sled database path.
pub const DB_PATH: &str = "./data/scout.db";

/// Default directory for learned-model checkpoints.
pub const MODEL_DIR: &str = "./data/models";

/// Concurrent storage operations allowed before `PoolExhausted`.
pub const POOL_SIZE: usize = 10;

/// Snapshots older than this are pruned (days).
pub const SNAPSHOT_RETENTION_DAYS: i64 = 7;

/// Retries for a single storage write.
pub const WRITE_RETRIES: u32 = 3;

/// First storage write backoff (milliseconds).
pub const WRITE_BACKOFF_MS: u64 = 50;
