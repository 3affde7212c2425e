//! HTTP server listing source (`IGameServersService/GetServerList`).

use async_trait::async_trait;
use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{DiscoveryError, DiscoverySource};
use crate::config::DiscoveryConfig;

#[derive(Debug, Deserialize)]
struct ListingEnvelope {
    #[serde(default)]
    response: ListingBody,
}

#[derive(Debug, Default, Deserialize)]
struct ListingBody {
    #[serde(default)]
    servers: Vec<ListedServer>,
}

#[derive(Debug, Deserialize)]
struct ListedServer {
    addr: String,
}

/// Extract addresses from a listing payload. Entries whose `addr` does not
/// parse as `ip:port` are skipped.
pub fn parse_listing(body: &str) -> Result<Vec<SocketAddr>, serde_json::Error> {
    let envelope: ListingEnvelope = serde_json::from_str(body)?;
    Ok(envelope
        .response
        .servers
        .into_iter()
        .filter_map(|s| match s.addr.parse() {
            Ok(addr) => Some(addr),
            Err(_) => {
                debug!(addr = %s.addr, "Skipping unparseable listing address");
                None
            }
        })
        .collect())
}

pub struct WebListingSource {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    game_dir: String,
    limit: u32,
}

impl WebListingSource {
    pub fn new(base_url: &str, api_key: String, config: &DiscoveryConfig) -> Result<Self, reqwest::Error> {
        Self::with_timeout(base_url, api_key, &config.game_dir, config.listing_limit, config.listing_timeout())
    }

    pub fn with_timeout(
        base_url: &str,
        api_key: String,
        game_dir: &str,
        limit: u32,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            game_dir: game_dir.to_string(),
            limit,
        })
    }

    async fn fetch(&self) -> Result<Vec<SocketAddr>, DiscoveryError> {
        let filter = format!("\\gamedir\\{}", self.game_dir);
        let limit = self.limit.to_string();
        let resp = self
            .http
            .get(format!("{}/IGameServersService/GetServerList/v1/", self.base_url))
            .query(&[
                ("key", self.api_key.as_str()),
                ("filter", filter.as_str()),
                ("limit", limit.as_str()),
            ])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(DiscoveryError::Status(status));
        }
        let body = resp.text().await?;
        Ok(parse_listing(&body)?)
    }
}

#[async_trait]
impl DiscoverySource for WebListingSource {
    async fn discover(&self) -> Vec<SocketAddr> {
        match self.fetch().await {
            Ok(addrs) => {
                info!(count = addrs.len(), "HTTP server listing collected");
                addrs
            }
            Err(e) => {
                warn!(error = %e, "HTTP server listing failed");
                Vec::new()
            }
        }
    }

    fn name(&self) -> &str {
        "web-listing"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_listing_payload() {
        let body = r#"{"response":{"servers":[
            {"addr":"1.2.3.4:27015","gameport":27015,"name":"A"},
            {"addr":"garbage"},
            {"addr":"5.6.7.8:27016"}
        ]}}"#;
        let addrs = parse_listing(body).unwrap();
        assert_eq!(
            addrs,
            vec![
                "1.2.3.4:27015".parse::<SocketAddr>().unwrap(),
                "5.6.7.8:27016".parse::<SocketAddr>().unwrap(),
            ]
        );
    }

    #[test]
    fn test_empty_response_object() {
        assert!(parse_listing(r#"{"response":{}}"#).unwrap().is_empty());
        assert!(parse_listing("not json").is_err());
    }

    #[tokio::test]
    async fn test_unreachable_listing_is_an_http_error() {
        let source = WebListingSource::with_timeout(
            "http://127.0.0.1:9",
            "key".to_string(),
            "garrysmod",
            10,
            Duration::from_millis(200),
        )
        .unwrap();
        assert!(matches!(source.fetch().await, Err(DiscoveryError::Http(_))));
    }

    #[tokio::test]
    async fn test_unreachable_listing_yields_empty() {
        let source = WebListingSource::with_timeout(
            "http://127.0.0.1:9",
            "key".to_string(),
            "garrysmod",
            10,
            Duration::from_millis(200),
        )
        .unwrap();
        assert!(source.discover().await.is_empty());
    }
}
