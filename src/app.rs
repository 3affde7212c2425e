//! Shared process wiring.
//!
//! [`ScoutContext`] owns the configuration, the storage backend and the
//! classifier ensemble, and builds every long-running component from them.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::classifier::{text_blob, Ensemble, Retrainer};
use crate::config::{ConfigError, ScoutConfig};
use crate::discovery::configured_sources;
use crate::enrichment::{ApiError, CachedProfileClient, EnrichmentWorker, SteamProfileClient};
use crate::scanner::{ScanScheduler, Sweeper};
use crate::storage::{self, PersistenceError, PersistenceGateway};

/// Errors that stop the process from starting.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Storage error: {0}")]
    Persistence(#[from] PersistenceError),
    #[error("Invalid classifier pattern: {0}")]
    Classifier(#[from] regex::Error),
    #[error("Profile client error: {0}")]
    Api(#[from] ApiError),
}

pub struct ScoutContext {
    pub config: ScoutConfig,
    pub gateway: Arc<dyn PersistenceGateway>,
    pub ensemble: Arc<Ensemble>,
}

impl ScoutContext {
    /// Validate the configuration, open storage and load the classifiers.
    pub fn open(config: ScoutConfig, ephemeral: bool) -> Result<Self, StartupError> {
        config.validate()?;
        let gateway = storage::open_gateway(&config.storage, ephemeral)?;
        info!(backend = gateway.backend_name(), "Storage ready");
        Self::with_gateway(config, gateway)
    }

    /// Same as [`Self::open`] over an existing backend.
    pub fn with_gateway(config: ScoutConfig, gateway: Arc<dyn PersistenceGateway>) -> Result<Self, StartupError> {
        let history: Vec<String> = gateway
            .list_servers()?
            .iter()
            .map(|s| text_blob(&s.name, &s.tags, &s.map))
            .collect();
        let ensemble = Ensemble::bootstrap(&config.classifier, history.iter().map(String::as_str))?;
        Ok(Self {
            config,
            gateway,
            ensemble: Arc::new(ensemble),
        })
    }

    pub fn sweeper(&self) -> Sweeper {
        Sweeper::new(
            Arc::clone(&self.gateway),
            Arc::clone(&self.ensemble),
            self.config.scanner.clone(),
            storage::write_policy(&self.config.storage),
        )
    }

    pub fn scheduler(&self) -> ScanScheduler {
        ScanScheduler::new(
            Arc::new(self.sweeper()),
            configured_sources(&self.config),
            self.config.scanner.clone(),
        )
    }

    pub fn retrainer(&self) -> Retrainer {
        Retrainer::new(
            Arc::clone(&self.gateway),
            Arc::clone(&self.ensemble),
            self.config.classifier.clone(),
        )
    }

    /// Enrichment worker backed by the Steam Web API. Fails without an API
    /// key.
    pub fn enrichment_worker(&self) -> Result<EnrichmentWorker<SteamProfileClient>, StartupError> {
        let key = self.config.require_api_key()?;
        let api = SteamProfileClient::new(&self.config.api.base_url, key, Duration::from_secs(30))?;
        Ok(EnrichmentWorker::new(
            Arc::clone(&self.gateway),
            CachedProfileClient::new(api, &self.config.enrichment),
            self.config.enrichment.clone(),
            self.config.api.target_app_id,
            storage::write_policy(&self.config.storage),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryGateway;

    #[test]
    fn test_enrichment_requires_api_key() {
        let mut config = ScoutConfig::default();
        config.api.key = None;
        config.classifier.model_dir = std::env::temp_dir().join("scout-no-models");
        let ctx = ScoutContext::with_gateway(config, Arc::new(InMemoryGateway::new())).unwrap();
        if std::env::var(crate::config::API_KEY_ENV_VAR).is_err() {
            assert!(matches!(
                ctx.enrichment_worker(),
                Err(StartupError::Config(ConfigError::MissingCredential(_)))
            ));
        }
    }

    #[test]
    fn test_components_share_storage() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = ScoutConfig::default();
        config.classifier.model_dir = dir.path().to_path_buf();
        let ctx = ScoutContext::with_gateway(config, Arc::new(InMemoryGateway::new())).unwrap();
        let sweeper = ctx.sweeper();
        assert!(sweeper.hot_addresses().is_empty());
        assert_eq!(ctx.scheduler().stats().full_sweeps, 0);
    }
}
