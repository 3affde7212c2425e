//! Batched probing of a candidate address list.
//!
//! Addresses are split into batches of `max_concurrent_probes`. Batches run
//! one after another with a short pause; probes inside a batch run
//! concurrently. A failed probe or a failed write only affects its own
//! address.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::probe::{probe, ProbeResult};
use crate::classifier::{Ensemble, ServerClassification};
use crate::config::ScannerConfig;
use crate::protocol::ServerInfo;
use crate::retry::{with_backoff, RetryPolicy};
use crate::storage::{PersistenceError, PersistenceGateway};
use crate::types::{ServerId, ServerObservation, Snapshot};

/// Outcome counters for one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepStats {
    pub total: usize,
    pub online: usize,
    pub offline: usize,
    /// Results whose persistence failed after retries.
    pub write_errors: usize,
    pub duration: Duration,
}

pub struct Sweeper {
    gateway: Arc<dyn PersistenceGateway>,
    ensemble: Arc<Ensemble>,
    config: ScannerConfig,
    write_policy: RetryPolicy,
    /// Addresses whose latest regional classification is positive.
    hot_set: Mutex<BTreeSet<SocketAddr>>,
}

impl Sweeper {
    pub fn new(
        gateway: Arc<dyn PersistenceGateway>,
        ensemble: Arc<Ensemble>,
        config: ScannerConfig,
        write_policy: RetryPolicy,
    ) -> Self {
        Self {
            gateway,
            ensemble,
            config,
            write_policy,
            hot_set: Mutex::new(BTreeSet::new()),
        }
    }

    /// Snapshot of the regional-interest set.
    pub fn hot_addresses(&self) -> Vec<SocketAddr> {
        self.hot_set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect()
    }

    fn update_hot_set(&self, addr: SocketAddr, regional: bool) {
        let mut hot = self.hot_set.lock().unwrap_or_else(PoisonError::into_inner);
        if regional {
            hot.insert(addr);
        } else {
            hot.remove(&addr);
        }
    }

    /// Probe every address and persist what comes back.
    pub async fn sweep(&self, addrs: &[SocketAddr]) -> SweepStats {
        let started = Instant::now();
        let mut stats = SweepStats {
            total: addrs.len(),
            ..SweepStats::default()
        };
        let timeout = self.config.probe_timeout();
        let batch_size = self.config.max_concurrent_probes.max(1);
        let batch_count = addrs.len().div_ceil(batch_size);

        for (index, batch) in addrs.chunks(batch_size).enumerate() {
            let results = join_all(batch.iter().map(|&addr| probe(addr, timeout))).await;
            for result in results {
                if result.is_online() {
                    stats.online += 1;
                } else {
                    stats.offline += 1;
                }
                let addr = result.addr;
                if let Err(e) = self.record(result).await {
                    stats.write_errors += 1;
                    warn!(addr = %addr, error = %e, "Failed to persist probe result");
                }
            }
            debug!(batch = index + 1, batches = batch_count, "Probe batch finished");

            if index + 1 < batch_count {
                tokio::time::sleep(self.config.inter_batch_pause()).await;
            }
        }

        stats.duration = started.elapsed();
        info!(
            total = stats.total,
            online = stats.online,
            offline = stats.offline,
            write_errors = stats.write_errors,
            duration_ms = u64::try_from(stats.duration.as_millis()).unwrap_or(u64::MAX),
            "Sweep finished"
        );
        stats
    }

    /// Persist one probe result.
    pub async fn record(&self, result: ProbeResult) -> Result<(), PersistenceError> {
        let now = Utc::now();
        let latency_ms = result.latency_ms();
        match (result.info, result.players) {
            (Ok(info), _) => self.record_info(result.addr, &info, latency_ms, now).await,
            (Err(info_error), Ok(players)) => {
                debug!(addr = %result.addr, error = %info_error, "Info query failed, player query answered");
                self.record_players_only(result.addr, saturating_u8(players.len()), now)
                    .await
            }
            (Err(info_error), Err(players_error)) => {
                debug!(
                    addr = %result.addr,
                    info_error = %info_error,
                    players_error = %players_error,
                    "Server did not answer"
                );
                let addr = result.addr;
                self.write("mark_offline", |gw| gw.mark_offline(addr, now)).await?;
                Ok(())
            }
        }
    }

    async fn record_info(
        &self,
        addr: SocketAddr,
        info: &ServerInfo,
        latency_ms: Option<u32>,
        now: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        let observation = ServerObservation {
            addr,
            name: info.name.clone(),
            map: info.map.clone(),
            tags: info.tags().to_string(),
            max_players: info.max_players,
            password_protected: info.password_protected,
            vac_secured: info.vac_secured,
            version: info.version.clone(),
            os: info.os(),
            country: None,
            seen_at: now,
        };
        let server_id = self.write("upsert_server", |gw| gw.upsert_server(&observation)).await?;

        let classification = self.ensemble.classify(&info.name, info.tags(), &info.map);
        let snapshot = snapshot(server_id, now, info.players, info.max_players, info.bots, &info.map, &classification, latency_ms);
        self.write("insert_snapshot", |gw| gw.insert_snapshot(&snapshot)).await?;
        for prediction in classification.predictions(server_id, now) {
            self.write("upsert_prediction", |gw| gw.upsert_prediction(&prediction)).await?;
        }
        self.update_hot_set(addr, classification.regional.label);
        Ok(())
    }

    async fn record_players_only(&self, addr: SocketAddr, players: u8, now: DateTime<Utc>) -> Result<(), PersistenceError> {
        let Some(server_id) = self.write("mark_online", |gw| gw.mark_online(addr, now)).await? else {
            debug!(addr = %addr, "Player list from unknown server, not recorded");
            return Ok(());
        };
        let Some(record) = self.gateway.get_server(server_id)? else {
            return Ok(());
        };

        let classification = self.ensemble.classify(&record.name, &record.tags, &record.map);
        let snapshot = snapshot(server_id, now, players, record.max_players, 0, &record.map, &classification, None);
        self.write("insert_snapshot", |gw| gw.insert_snapshot(&snapshot)).await?;
        self.update_hot_set(addr, classification.regional.label);
        Ok(())
    }

    async fn write<T, F>(&self, operation: &str, f: F) -> Result<T, PersistenceError>
    where
        F: Fn(&dyn PersistenceGateway) -> Result<T, PersistenceError>,
    {
        let gateway = self.gateway.as_ref();
        let f = &f;
        with_backoff(self.write_policy, operation, || async move { f(gateway) }).await
    }
}

#[allow(clippy::too_many_arguments)]
fn snapshot(
    server_id: ServerId,
    taken_at: DateTime<Utc>,
    players: u8,
    max_players: u8,
    bots: u8,
    map: &str,
    classification: &ServerClassification,
    latency_ms: Option<u32>,
) -> Snapshot {
    Snapshot {
        server_id,
        taken_at,
        players,
        max_players,
        bots,
        map: map.to_string(),
        game_mode: classification.game_mode.label,
        game_mode_confidence: classification.game_mode.confidence,
        regional: classification.regional.label,
        regional_confidence: classification.regional.confidence,
        latency_ms,
    }
}

fn saturating_u8(n: usize) -> u8 {
    u8::try_from(n).unwrap_or(u8::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::Vocabulary;
    use crate::config::ClassifierConfig;
    use crate::protocol::{info as info_codec, ExtraData, PlayerEntry, ProtocolError};
    use crate::storage::InMemoryGateway;
    use crate::types::GameMode;

    fn server_info(name: &str) -> ServerInfo {
        ServerInfo {
            protocol: 17,
            name: name.to_string(),
            map: "rp_downtown_v4c".to_string(),
            folder: "garrysmod".to_string(),
            game: "DarkRP".to_string(),
            app_id: 4000,
            players: 12,
            max_players: 64,
            bots: 1,
            server_type: 'd',
            environment: 'l',
            password_protected: false,
            vac_secured: true,
            version: "2024.10.29".to_string(),
            extra: ExtraData {
                keywords: Some("gm:darkrp".to_string()),
                ..ExtraData::default()
            },
        }
    }

    fn sweeper() -> (Arc<InMemoryGateway>, Sweeper) {
        let gateway = Arc::new(InMemoryGateway::new());
        let config = ClassifierConfig::default();
        let ensemble = Arc::new(Ensemble::untrained(&config, Vocabulary::build(["darkrp"], 16)).unwrap());
        let mut scanner = ScannerConfig::default();
        scanner.probe_timeout_ms = 100;
        scanner.inter_batch_pause_ms = 1;
        let sweeper = Sweeper::new(gateway.clone(), ensemble, scanner, RetryPolicy::none());
        (gateway, sweeper)
    }

    fn result(addr: SocketAddr, info: Option<ServerInfo>, players: Option<usize>) -> ProbeResult {
        ProbeResult {
            addr,
            info: info.ok_or(ProtocolError::Timeout),
            players: players
                .map(|n| {
                    (0..n)
                        .map(|i| PlayerEntry {
                            index: 0,
                            name: format!("p{i}"),
                            score: 0,
                            duration_secs: 1.0,
                        })
                        .collect()
                })
                .ok_or(ProtocolError::Timeout),
            latency: Some(Duration::from_millis(42)),
        }
    }

    #[tokio::test]
    async fn test_info_result_creates_server_snapshot_and_predictions() {
        let (gateway, sweeper) = sweeper();
        let addr: SocketAddr = "10.0.0.1:27015".parse().unwrap();

        sweeper
            .record(result(addr, Some(server_info("[FR] Serveur DarkRP")), Some(3)))
            .await
            .unwrap();

        let id = gateway.get_server_id(addr).unwrap().unwrap();
        let record = gateway.get_server(id).unwrap().unwrap();
        assert!(record.online);
        assert_eq!(record.tags, "gm:darkrp");

        let snapshots = gateway.server_snapshots(id, 10).unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].players, 12);
        assert_eq!(snapshots[0].bots, 1);
        assert_eq!(snapshots[0].game_mode, GameMode::DarkRp);
        assert_eq!(snapshots[0].latency_ms, Some(42));
        assert!(snapshots[0].regional);
        assert_eq!(sweeper.hot_addresses(), vec![addr]);
    }

    #[tokio::test]
    async fn test_players_only_refreshes_known_server() {
        let (gateway, sweeper) = sweeper();
        let addr: SocketAddr = "10.0.0.2:27015".parse().unwrap();
        sweeper.record(result(addr, Some(server_info("Generic")), None)).await.unwrap();
        let id = gateway.get_server_id(addr).unwrap().unwrap();
        sweeper.record(result(addr, None, None)).await.unwrap();
        assert!(!gateway.get_server(id).unwrap().unwrap().online);

        let mut players_only = result(addr, None, Some(5));
        players_only.latency = None;
        sweeper.record(players_only).await.unwrap();

        assert!(gateway.get_server(id).unwrap().unwrap().online);
        let snapshots = gateway.server_snapshots(id, 10).unwrap();
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[0].players, 5);
        assert_eq!(snapshots[0].latency_ms, None);
    }

    #[tokio::test]
    async fn test_unknown_addresses_are_not_created() {
        let (gateway, sweeper) = sweeper();
        let addr: SocketAddr = "10.0.0.3:27015".parse().unwrap();
        sweeper.record(result(addr, None, Some(2))).await.unwrap();
        sweeper.record(result(addr, None, None)).await.unwrap();
        assert_eq!(gateway.get_server_id(addr).unwrap(), None);
        assert!(gateway.list_servers().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sweep_counts_per_address() {
        let (_, sweeper) = sweeper();
        let responder = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let live = responder.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 256];
            let body = info_codec::encode_response(&server_info("Live"));
            while let Ok((len, peer)) = responder.recv_from(&mut buf).await {
                // Answer info queries only
                if buf[..len].starts_with(&info_codec::encode_request()) {
                    let _ = responder.send_to(&body, peer).await;
                }
            }
        });
        let silent = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let dead = silent.local_addr().unwrap();

        let stats = sweeper.sweep(&[live, dead, dead]).await;
        assert_eq!(stats.total, 3);
        assert_eq!(stats.online, 1);
        assert_eq!(stats.offline, 2);
        assert_eq!(stats.write_errors, 0);
    }

    #[tokio::test]
    async fn test_non_regional_result_leaves_hot_set() {
        let (_, sweeper) = sweeper();
        let addr: SocketAddr = "10.0.0.4:27015".parse().unwrap();
        sweeper
            .record(result(addr, Some(server_info("[FR] Serveur francais")), None))
            .await
            .unwrap();
        assert_eq!(sweeper.hot_addresses(), vec![addr]);
        sweeper.record(result(addr, Some(server_info("US East")), None)).await.unwrap();
        assert!(sweeper.hot_addresses().is_empty());
    }
}
