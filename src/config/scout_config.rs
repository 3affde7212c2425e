//! Scout Configuration - scanner, classifier and enrichment tuning as TOML values
//!
//! Each section implements `Default` with the values in [`super::defaults`],
//! so a missing file or a partial file behaves exactly like the built-in
//! configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use super::defaults as d;

/// Environment variable holding an explicit config path.
pub const CONFIG_ENV_VAR: &str = "SCOUT_CONFIG";

/// Environment variable holding the Steam Web API key.
pub const API_KEY_ENV_VAR: &str = "STEAM_API_KEY";

/// Config file looked up in the working directory.
const LOCAL_CONFIG_FILE: &str = "scout_config.toml";

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for a scout deployment.
///
/// Load with `ScoutConfig::load()` which searches:
/// 1. `$SCOUT_CONFIG` env var
/// 2. `./scout_config.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScoutConfig {
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    #[serde(default)]
    pub scanner: ScannerConfig,

    #[serde(default)]
    pub classifier: ClassifierConfig,

    #[serde(default)]
    pub enrichment: EnrichmentConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub api: ApiConfig,
}

impl ScoutConfig {
    /// Load configuration using the standard search order.
    pub fn load() -> Self {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "Loaded scout config from {}", CONFIG_ENV_VAR);
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from {}, falling back", CONFIG_ENV_VAR);
                    }
                }
            } else {
                warn!(path = %path, "{} points to non-existent file, falling back", CONFIG_ENV_VAR);
            }
        }

        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!("Loaded scout config from ./{}", LOCAL_CONFIG_FILE);
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./{}, using defaults", LOCAL_CONFIG_FILE);
                }
            }
        }

        info!("No {} found — using built-in defaults", LOCAL_CONFIG_FILE);
        Self::default()
    }

    /// Load from a specific TOML file path and validate it.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the current config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Resolve the API key: `api.key` first, then `$STEAM_API_KEY`.
    pub fn api_key(&self) -> Option<String> {
        self.api
            .key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var(API_KEY_ENV_VAR).ok().filter(|k| !k.trim().is_empty()))
    }

    /// Same as [`Self::api_key`] but a missing key is a startup error.
    pub fn require_api_key(&self) -> Result<String, ConfigError> {
        self.api_key()
            .ok_or(ConfigError::MissingCredential(API_KEY_ENV_VAR))
    }

    /// Validate values for internal consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        let s = &self.scanner;
        if s.max_concurrent_probes == 0 {
            errors.push("scanner.max_concurrent_probes must be > 0".to_string());
        }
        if s.probe_timeout_ms == 0 {
            errors.push("scanner.probe_timeout_ms must be > 0".to_string());
        }
        if s.full_sweep_interval_secs == 0 || s.hot_sweep_interval_secs == 0 {
            errors.push("scanner sweep intervals must be > 0".to_string());
        }

        let gm = &self.classifier.game_mode;
        Self::check_unit(gm.rule_confident, "classifier.game_mode.rule_confident", &mut errors);
        Self::check_unit(gm.learned_gate, "classifier.game_mode.learned_gate", &mut errors);
        Self::check_unit(gm.review, "classifier.game_mode.review", &mut errors);
        if gm.review > gm.rule_confident {
            errors.push(format!(
                "classifier.game_mode.review ({:.2}) must not exceed rule_confident ({:.2})",
                gm.review, gm.rule_confident
            ));
        }

        let rg = &self.classifier.regional;
        Self::check_unit(rg.rule_weight, "classifier.regional.rule_weight", &mut errors);
        Self::check_unit(rg.review, "classifier.regional.review", &mut errors);
        Self::check_unit(rg.ambiguous_floor, "classifier.regional.ambiguous_floor", &mut errors);
        Self::check_unit(rg.combined_confident, "classifier.regional.combined_confident", &mut errors);
        if rg.ambiguous_floor >= rg.combined_confident {
            errors.push(format!(
                "classifier.regional.ambiguous_floor ({:.2}) must be less than combined_confident ({:.2})",
                rg.ambiguous_floor, rg.combined_confident
            ));
        }
        if self.classifier.vocabulary_size == 0 {
            errors.push("classifier.vocabulary_size must be > 0".to_string());
        }

        let e = &self.enrichment;
        if e.batch_size == 0 {
            errors.push("enrichment.batch_size must be > 0".to_string());
        }
        if e.rate_limit_max_requests == 0 || e.rate_limit_window_secs == 0 {
            errors.push("enrichment rate limit must allow at least one request per window".to_string());
        }

        if self.storage.pool_size == 0 {
            errors.push("storage.pool_size must be > 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    fn check_unit(value: f64, name: &str, errors: &mut Vec<String>) {
        if !(0.0..=1.0).contains(&value) {
            errors.push(format!("{name} ({value:.2}) must be within [0, 1]"));
        }
    }
}

// ============================================================================
// Sections
// ============================================================================

/// Where candidate addresses come from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub master_host: String,
    pub master_port: u16,
    pub game_dir: String,
    /// Seconds spent collecting directory responses.
    pub directory_budget_secs: u64,
    /// Disable the HTTP listing source even when an API key is present.
    pub listing_enabled: bool,
    pub listing_limit: u32,
    pub listing_timeout_secs: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            master_host: d::MASTER_SERVER_HOST.to_string(),
            master_port: d::MASTER_SERVER_PORT,
            game_dir: d::GAME_DIR.to_string(),
            directory_budget_secs: d::DIRECTORY_BUDGET_SECS,
            listing_enabled: true,
            listing_limit: d::LISTING_LIMIT,
            listing_timeout_secs: d::LISTING_TIMEOUT_SECS,
        }
    }
}

impl DiscoveryConfig {
    pub fn directory_budget(&self) -> Duration {
        Duration::from_secs(self.directory_budget_secs)
    }

    pub fn listing_timeout(&self) -> Duration {
        Duration::from_secs(self.listing_timeout_secs)
    }
}

/// Batch query scheduler tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub full_sweep_interval_secs: u64,
    pub hot_sweep_interval_secs: u64,
    pub max_concurrent_probes: usize,
    pub probe_timeout_ms: u64,
    pub inter_batch_pause_ms: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            full_sweep_interval_secs: d::FULL_SWEEP_INTERVAL_SECS,
            hot_sweep_interval_secs: d::HOT_SWEEP_INTERVAL_SECS,
            max_concurrent_probes: d::MAX_CONCURRENT_PROBES,
            probe_timeout_ms: d::PROBE_TIMEOUT_MS,
            inter_batch_pause_ms: d::INTER_BATCH_PAUSE_MS,
        }
    }
}

impl ScannerConfig {
    pub fn full_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.full_sweep_interval_secs)
    }

    pub fn hot_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.hot_sweep_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn inter_batch_pause(&self) -> Duration {
        Duration::from_millis(self.inter_batch_pause_ms)
    }
}

/// Combination thresholds for the game-mode classifier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct GameModeThresholds {
    /// Rule result is used outright above this confidence.
    pub rule_confident: f64,
    /// Learned result must exceed this to override the rules.
    pub learned_gate: f64,
    /// Below this the prediction is flagged for review.
    pub review: f64,
}

impl Default for GameModeThresholds {
    fn default() -> Self {
        Self {
            rule_confident: d::GAME_MODE_RULE_CONFIDENT,
            learned_gate: d::GAME_MODE_LEARNED_GATE,
            review: d::REVIEW_THRESHOLD,
        }
    }
}

/// Blend weight and review band for the regional-affinity classifier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionalThresholds {
    pub rule_weight: f64,
    pub review: f64,
    pub ambiguous_floor: f64,
    pub combined_confident: f64,
}

impl Default for RegionalThresholds {
    fn default() -> Self {
        Self {
            rule_weight: d::REGIONAL_RULE_WEIGHT,
            review: d::REVIEW_THRESHOLD,
            ambiguous_floor: d::REGIONAL_AMBIGUOUS_FLOOR,
            combined_confident: d::REGIONAL_COMBINED_CONFIDENT,
        }
    }
}

/// Classification ensemble tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub game_mode: GameModeThresholds,
    pub regional: RegionalThresholds,
    pub retrain_interval_secs: u64,
    pub training_passes: usize,
    pub learning_rate: f64,
    pub vocabulary_size: usize,
    pub min_training_samples: usize,
    pub model_dir: PathBuf,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            game_mode: GameModeThresholds::default(),
            regional: RegionalThresholds::default(),
            retrain_interval_secs: d::RETRAIN_INTERVAL_SECS,
            training_passes: d::TRAINING_PASSES,
            learning_rate: d::LEARNING_RATE,
            vocabulary_size: d::VOCABULARY_SIZE,
            min_training_samples: d::MIN_TRAINING_SAMPLES,
            model_dir: PathBuf::from(d::MODEL_DIR),
        }
    }
}

impl ClassifierConfig {
    pub fn retrain_interval(&self) -> Duration {
        Duration::from_secs(self.retrain_interval_secs)
    }
}

/// Enrichment queue and profile client tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    pub batch_size: usize,
    pub batch_delay_ms: u64,
    pub rate_limit_window_secs: u64,
    pub rate_limit_max_requests: usize,
    pub cache_ttl_secs: u64,
    pub refresh_interval_secs: u64,
    pub max_item_retries: u32,
    pub api_max_retries: u32,
    pub backoff_base_ms: u64,
    pub stale_sweep_interval_secs: u64,
    pub stale_sweep_limit: usize,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            batch_size: d::ENRICHMENT_BATCH_SIZE,
            batch_delay_ms: d::ENRICHMENT_BATCH_DELAY_MS,
            rate_limit_window_secs: d::RATE_LIMIT_WINDOW_SECS,
            rate_limit_max_requests: d::RATE_LIMIT_MAX_REQUESTS,
            cache_ttl_secs: d::CACHE_TTL_SECS,
            refresh_interval_secs: d::REFRESH_INTERVAL_SECS,
            max_item_retries: d::MAX_ITEM_RETRIES,
            api_max_retries: d::API_MAX_RETRIES,
            backoff_base_ms: d::BACKOFF_BASE_MS,
            stale_sweep_interval_secs: d::STALE_SWEEP_INTERVAL_SECS,
            stale_sweep_limit: d::STALE_SWEEP_LIMIT,
        }
    }
}

impl EnrichmentConfig {
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn refresh_interval(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.refresh_interval_secs).unwrap_or(i64::MAX))
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn stale_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.stale_sweep_interval_secs)
    }
}

/// Persistence tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub path: PathBuf,
    pub pool_size: usize,
    pub snapshot_retention_days: i64,
    pub write_retries: u32,
    pub write_backoff_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(d::DB_PATH),
            pool_size: d::POOL_SIZE,
            snapshot_retention_days: d::SNAPSHOT_RETENTION_DAYS,
            write_retries: d::WRITE_RETRIES,
            write_backoff_ms: d::WRITE_BACKOFF_MS,
        }
    }
}

/// External Steam Web API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Prefer `$STEAM_API_KEY` over committing a key to the file.
    pub key: Option<String>,
    pub base_url: String,
    pub target_app_id: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            key: None,
            base_url: d::WEB_API_BASE_URL.to_string(),
            target_app_id: d::TARGET_APP_ID,
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, toml::de::Error),
    Serialize(toml::ser::Error),
    Validation(Vec<String>),
    MissingCredential(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "Config I/O error ({}): {}", path.display(), e),
            ConfigError::Parse(path, e) => {
                write!(f, "Config parse error ({}): {}", path.display(), e)
            }
            ConfigError::Serialize(e) => write!(f, "Config serialization error: {}", e),
            ConfigError::Validation(errors) => {
                writeln!(f, "Config validation failed:")?;
                for e in errors {
                    writeln!(f, "  - {}", e)?;
                }
                Ok(())
            }
            ConfigError::MissingCredential(var) => {
                write!(f, "Missing required credential: set api.key or ${}", var)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
