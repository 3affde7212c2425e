//! Discovery sources
//!
//! Each source produces candidate server addresses on demand. Sources are
//! best-effort: failures are logged inside the source and surface as an empty
//! or partial list, never as an error.

mod directory;
mod listing;

pub use directory::MasterServerSource;
pub use listing::{parse_listing, WebListingSource};

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::config::{DiscoveryConfig, ScoutConfig};

/// Why a source came back empty or partial. Logged, never propagated past
/// [`DiscoverySource::discover`].
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("cannot resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} has no IPv4 address")]
    NoIpv4Address(String),

    #[error("name resolution did not finish within {0:?}")]
    ResolveTimeout(Duration),

    #[error("network error: {0}")]
    Network(#[from] std::io::Error),

    #[error("listing request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("listing returned status {0}")]
    Status(reqwest::StatusCode),

    #[error("malformed listing payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Trait abstracting where candidate addresses come from.
#[async_trait]
pub trait DiscoverySource: Send + Sync {
    async fn discover(&self) -> Vec<SocketAddr>;

    /// Human-readable name for logging.
    fn name(&self) -> &str;
}

/// Query every source concurrently and union the results by address.
pub async fn discover_all(sources: &[Box<dyn DiscoverySource>]) -> BTreeSet<SocketAddr> {
    let results = futures::future::join_all(sources.iter().map(|source| async move {
        let addrs = source.discover().await;
        info!(source = source.name(), count = addrs.len(), "Discovery source finished");
        addrs
    }))
    .await;

    results.into_iter().flatten().collect()
}

/// Sources enabled by the configuration. The HTTP listing is skipped when no
/// API key is available.
pub fn configured_sources(config: &ScoutConfig) -> Vec<Box<dyn DiscoverySource>> {
    let discovery: &DiscoveryConfig = &config.discovery;
    let mut sources: Vec<Box<dyn DiscoverySource>> = vec![Box::new(MasterServerSource::from_config(discovery))];

    match (discovery.listing_enabled, config.api_key()) {
        (true, Some(key)) => match WebListingSource::new(&config.api.base_url, key, discovery) {
            Ok(source) => sources.push(Box::new(source)),
            Err(e) => tracing::warn!(error = %e, "HTTP listing source disabled"),
        },
        (true, None) => tracing::warn!("No API key configured, HTTP listing source disabled"),
        (false, _) => {}
    }
    sources
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticSource(&'static str, Vec<SocketAddr>);

    #[async_trait]
    impl DiscoverySource for StaticSource {
        async fn discover(&self) -> Vec<SocketAddr> {
            self.1.clone()
        }

        fn name(&self) -> &str {
            self.0
        }
    }

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_union_deduplicates_by_address() {
        let sources: Vec<Box<dyn DiscoverySource>> = vec![
            Box::new(StaticSource("a", vec![addr("10.0.0.2:27015"), addr("10.0.0.1:27015")])),
            Box::new(StaticSource("b", vec![addr("10.0.0.1:27015"), addr("10.0.0.1:27016")])),
            Box::new(StaticSource("empty", vec![])),
        ];
        let all = discover_all(&sources).await;
        assert_eq!(
            all.into_iter().collect::<Vec<_>>(),
            vec![addr("10.0.0.1:27015"), addr("10.0.0.1:27016"), addr("10.0.0.2:27015")]
        );
    }

    #[test]
    fn test_listing_source_toggle() {
        let mut config = ScoutConfig::default();
        config.api.key = Some("k".to_string());
        config.discovery.listing_enabled = false;
        assert_eq!(configured_sources(&config).len(), 1);

        config.discovery.listing_enabled = true;
        let sources = configured_sources(&config);
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[1].name(), "web-listing");
    }
}
