//! Player profile API client
//!
//! [`SteamProfileClient`] talks to the Steam Web API. [`CachedProfileClient`]
//! wraps any [`ProfileApi`] with the TTL cache, the sliding-window limiter
//! and retry with backoff. Cache hits never touch the limiter.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use super::cache::TtlCache;
use super::rate_limiter::SlidingWindowLimiter;
use crate::config::{defaults, EnrichmentConfig};
use crate::retry::{with_backoff, RetryPolicy, Retryable};
use crate::types::PlayerId;

/// Profile API errors
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Rate limit exceeded")]
    RateLimitExceeded,
    #[error("External API error: {0}")]
    External(String),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Retryable for ApiError {
    fn is_retryable(&self) -> bool {
        match self {
            ApiError::RateLimitExceeded | ApiError::External(_) => true,
            ApiError::Http(e) => !e.is_builder(),
        }
    }
}

/// Public profile fields from `GetPlayerSummaries`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSummary {
    pub steamid: String,
    #[serde(default)]
    pub personaname: String,
    #[serde(default)]
    pub profileurl: String,
    #[serde(default)]
    pub avatarfull: String,
    #[serde(default)]
    pub loccountrycode: Option<String>,
    /// Unix seconds; absent on private profiles.
    #[serde(default)]
    pub timecreated: Option<i64>,
}

impl PlayerSummary {
    pub fn player_id(&self) -> Option<PlayerId> {
        self.steamid.parse().ok()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnedGame {
    pub appid: u32,
}

/// Owned titles from `GetOwnedGames`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnedGames {
    #[serde(default)]
    pub game_count: u32,
    #[serde(default)]
    pub games: Vec<OwnedGame>,
}

impl OwnedGames {
    pub fn owns(&self, app_id: u32) -> bool {
        self.games.iter().any(|g| g.appid == app_id)
    }
}

/// Remote profile lookups.
#[async_trait]
pub trait ProfileApi: Send + Sync {
    /// Summaries for up to [`defaults::PROFILE_BATCH_LIMIT`] ids. Unknown
    /// ids are simply missing from the result.
    async fn player_summaries(&self, ids: &[PlayerId]) -> Result<Vec<PlayerSummary>, ApiError>;

    /// Owned titles of one player; `None` when the library is private.
    async fn owned_games(&self, id: PlayerId) -> Result<Option<OwnedGames>, ApiError>;
}

#[derive(Deserialize)]
struct Envelope<T> {
    response: T,
}

#[derive(Deserialize)]
struct SummariesBody {
    #[serde(default)]
    players: Vec<PlayerSummary>,
}

#[derive(Deserialize)]
struct OwnedGamesBody {
    game_count: Option<u32>,
    #[serde(default)]
    games: Vec<OwnedGame>,
}

/// Parse a `GetPlayerSummaries` response body.
pub fn parse_summaries(body: &str) -> Result<Vec<PlayerSummary>, ApiError> {
    serde_json::from_str::<Envelope<SummariesBody>>(body)
        .map(|e| e.response.players)
        .map_err(|e| ApiError::External(format!("malformed summaries payload: {}", e)))
}

/// Parse a `GetOwnedGames` response body. An empty response object means
/// the library is not visible.
pub fn parse_owned_games(body: &str) -> Result<Option<OwnedGames>, ApiError> {
    let body = serde_json::from_str::<Envelope<OwnedGamesBody>>(body)
        .map_err(|e| ApiError::External(format!("malformed owned games payload: {}", e)))?
        .response;
    Ok(body.game_count.map(|game_count| OwnedGames {
        game_count,
        games: body.games,
    }))
}

/// HTTP client for the Steam Web API
#[derive(Clone)]
pub struct SteamProfileClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl SteamProfileClient {
    pub fn new(base_url: &str, api_key: String, timeout: Duration) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<String, ApiError> {
        let resp = self
            .http
            .get(format!("{}/{}", self.base_url, path))
            .query(&[("key", self.api_key.as_str())])
            .query(query)
            .send()
            .await?;

        match resp.status() {
            reqwest::StatusCode::TOO_MANY_REQUESTS => Err(ApiError::RateLimitExceeded),
            s if s.is_success() => Ok(resp.text().await?),
            s => Err(ApiError::External(format!("{} returned status {}", path, s))),
        }
    }
}

#[async_trait]
impl ProfileApi for SteamProfileClient {
    async fn player_summaries(&self, ids: &[PlayerId]) -> Result<Vec<PlayerSummary>, ApiError> {
        if ids.len() > defaults::PROFILE_BATCH_LIMIT {
            return Err(ApiError::External(format!(
                "{} ids exceeds the batch limit of {}",
                ids.len(),
                defaults::PROFILE_BATCH_LIMIT
            )));
        }
        let joined = ids.iter().map(ToString::to_string).collect::<Vec<_>>().join(",");
        let body = self
            .get("ISteamUser/GetPlayerSummaries/v2/", &[("steamids", joined)])
            .await?;
        parse_summaries(&body)
    }

    async fn owned_games(&self, id: PlayerId) -> Result<Option<OwnedGames>, ApiError> {
        let body = self
            .get(
                "IPlayerService/GetOwnedGames/v1/",
                &[
                    ("steamid", id.to_string()),
                    ("include_played_free_games", "1".to_string()),
                ],
            )
            .await?;
        parse_owned_games(&body)
    }
}

/// Cached, rate-limited, retrying wrapper around a [`ProfileApi`].
pub struct CachedProfileClient<A> {
    api: A,
    limiter: SlidingWindowLimiter,
    summaries: TtlCache<PlayerId, PlayerSummary>,
    owned: TtlCache<PlayerId, Option<OwnedGames>>,
    retry: RetryPolicy,
}

impl<A: ProfileApi> CachedProfileClient<A> {
    pub fn new(api: A, config: &EnrichmentConfig) -> Self {
        Self {
            api,
            limiter: SlidingWindowLimiter::new(config.rate_limit_window(), config.rate_limit_max_requests),
            summaries: TtlCache::new(config.cache_ttl()),
            owned: TtlCache::new(config.cache_ttl()),
            retry: RetryPolicy::new(config.api_max_retries, config.backoff_base()),
        }
    }

    /// Summaries keyed by id. Ids the API does not know are absent.
    pub async fn summaries(&self, ids: &[PlayerId]) -> Result<HashMap<PlayerId, PlayerSummary>, ApiError> {
        let mut found = HashMap::new();
        let mut missing = Vec::new();
        for &id in ids {
            match self.summaries.get(&id) {
                Some(summary) => {
                    found.insert(id, summary);
                }
                None => missing.push(id),
            }
        }
        debug!(cached = found.len(), to_fetch = missing.len(), "Resolving player summaries");

        for chunk in missing.chunks(defaults::PROFILE_BATCH_LIMIT) {
            let fetched = self
                .call("player_summaries", || async {
                    self.limiter.acquire().await;
                    self.api.player_summaries(chunk).await
                })
                .await?;
            for summary in fetched {
                if let Some(id) = summary.player_id() {
                    self.summaries.insert(id, summary.clone());
                    found.insert(id, summary);
                }
            }
        }
        Ok(found)
    }

    pub async fn owned_games(&self, id: PlayerId) -> Result<Option<OwnedGames>, ApiError> {
        if let Some(cached) = self.owned.get(&id) {
            return Ok(cached);
        }
        let owned = self
            .call("owned_games", || async {
                self.limiter.acquire().await;
                self.api.owned_games(id).await
            })
            .await?;
        self.owned.insert(id, owned.clone());
        Ok(owned)
    }

    /// Evict expired entries from both caches. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.summaries.purge_expired() + self.owned.purge_expired()
    }

    /// Retry `op`; a rate limit that outlasts the retries is reported as an
    /// external failure.
    async fn call<T, F, Fut>(&self, operation: &str, op: F) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, ApiError>>,
    {
        with_backoff(self.retry, operation, op)
            .await
            .map_err(|e| match e {
                ApiError::RateLimitExceeded => {
                    ApiError::External(format!("{} still rate limited after retries", operation))
                }
                other => other,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_parse_summaries() {
        let body = r#"{"response":{"players":[
            {"steamid":"76561197960287930","personaname":"Rabscuttle","profileurl":"https://steamcommunity.com/id/rabscuttle/","avatarfull":"a.jpg","loccountrycode":"FR","timecreated":1063407589}
        ]}}"#;
        let players = parse_summaries(body).unwrap();
        assert_eq!(players.len(), 1);
        assert_eq!(players[0].player_id(), Some(PlayerId(76_561_197_960_287_930)));
        assert_eq!(players[0].loccountrycode.as_deref(), Some("FR"));
        assert_eq!(players[0].timecreated, Some(1_063_407_589));
    }

    #[test]
    fn test_parse_owned_games_private_and_public() {
        assert_eq!(parse_owned_games(r#"{"response":{}}"#).unwrap(), None);
        let owned = parse_owned_games(r#"{"response":{"game_count":2,"games":[{"appid":4000},{"appid":440}]}}"#)
            .unwrap()
            .unwrap();
        assert_eq!(owned.game_count, 2);
        assert!(owned.owns(4000));
        assert!(!owned.owns(730));
        assert!(matches!(parse_owned_games("<html>"), Err(ApiError::External(_))));
    }

    /// Fake API that fails the first `failures` calls.
    struct FakeApi {
        calls: AtomicUsize,
        failures: usize,
        error: fn() -> ApiError,
    }

    impl FakeApi {
        fn new(failures: usize, error: fn() -> ApiError) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                failures,
                error,
            }
        }

        fn fail(&self) -> Option<ApiError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            (n < self.failures).then(self.error)
        }
    }

    #[async_trait]
    impl ProfileApi for FakeApi {
        async fn player_summaries(&self, ids: &[PlayerId]) -> Result<Vec<PlayerSummary>, ApiError> {
            if let Some(e) = self.fail() {
                return Err(e);
            }
            Ok(ids
                .iter()
                .filter(|id| id.0 != 0)
                .map(|id| PlayerSummary {
                    steamid: id.to_string(),
                    personaname: format!("player{}", id),
                    profileurl: String::new(),
                    avatarfull: String::new(),
                    loccountrycode: None,
                    timecreated: None,
                })
                .collect())
        }

        async fn owned_games(&self, _id: PlayerId) -> Result<Option<OwnedGames>, ApiError> {
            if let Some(e) = self.fail() {
                return Err(e);
            }
            Ok(None)
        }
    }

    fn config() -> EnrichmentConfig {
        let mut config = EnrichmentConfig::default();
        config.backoff_base_ms = 1;
        config
    }

    #[tokio::test]
    async fn test_cache_hits_skip_the_api() {
        let client = CachedProfileClient::new(FakeApi::new(0, || ApiError::RateLimitExceeded), &config());
        let first = client.summaries(&[PlayerId(1), PlayerId(2), PlayerId(0)]).await.unwrap();
        assert_eq!(first.len(), 2);
        let again = client.summaries(&[PlayerId(1), PlayerId(2)]).await.unwrap();
        assert_eq!(again.len(), 2);
        assert_eq!(client.api.calls.load(Ordering::SeqCst), 1);

        assert_eq!(client.owned_games(PlayerId(1)).await.unwrap(), None);
        assert_eq!(client.owned_games(PlayerId(1)).await.unwrap(), None);
        assert_eq!(client.api.calls.load(Ordering::SeqCst), 2);
        assert_eq!(client.limiter.in_window().await, 2);
    }

    #[tokio::test]
    async fn test_large_requests_are_chunked() {
        let client = CachedProfileClient::new(FakeApi::new(0, || ApiError::RateLimitExceeded), &config());
        let ids: Vec<PlayerId> = (1..=250).map(PlayerId).collect();
        let found = client.summaries(&ids).await.unwrap();
        assert_eq!(found.len(), 250);
        assert_eq!(client.api.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let client = CachedProfileClient::new(
            FakeApi::new(2, || ApiError::External("503".to_string())),
            &config(),
        );
        let found = client.summaries(&[PlayerId(5)]).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(client.api.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_rate_limit_does_not_surface() {
        let client = CachedProfileClient::new(FakeApi::new(10, || ApiError::RateLimitExceeded), &config());
        let err = client.owned_games(PlayerId(5)).await.unwrap_err();
        assert!(matches!(err, ApiError::External(_)));
        // 1 attempt + 3 retries
        assert_eq!(client.api.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_drops_expired_profiles() {
        let client = CachedProfileClient::new(FakeApi::new(0, || ApiError::RateLimitExceeded), &config());
        client.summaries(&[PlayerId(1), PlayerId(2)]).await.unwrap();
        client.owned_games(PlayerId(1)).await.unwrap();
        assert_eq!(client.purge_expired(), 0);

        tokio::time::advance(config().cache_ttl() + Duration::from_secs(1)).await;
        assert_eq!(client.purge_expired(), 3);
        assert!(client.summaries.is_empty());
        assert!(client.owned.is_empty());
    }
}
