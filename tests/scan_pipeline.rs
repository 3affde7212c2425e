//! Scan Pipeline Integration Tests
//!
//! Loopback UDP servers stand in for real game servers; everything else
//! (sweeper, classifier, storage, review queue) is the real thing.

use std::net::SocketAddr;
use std::sync::Arc;

use server_scout::protocol::{info, players, ExtraData, PlayerEntry, ServerInfo};
use server_scout::scanner::ScanScheduler;
use server_scout::types::{ClassifierKind, Feedback, Verdict};
use server_scout::{InMemoryGateway, PersistenceGateway, ScoutConfig, ScoutContext};
use tempfile::TempDir;
use tokio::net::UdpSocket;

/// Which queries the fake server answers.
#[derive(Clone, Copy)]
struct Answers {
    info: bool,
    players: bool,
}

fn server_info(name: &str, map: &str, keywords: Option<&str>) -> ServerInfo {
    ServerInfo {
        protocol: 17,
        name: name.to_string(),
        map: map.to_string(),
        folder: "garrysmod".to_string(),
        game: "Garry's Mod".to_string(),
        app_id: 4000,
        players: 2,
        max_players: 32,
        bots: 0,
        server_type: 'd',
        environment: 'l',
        password_protected: false,
        vac_secured: true,
        version: "2024.10.29".to_string(),
        extra: ExtraData {
            keywords: keywords.map(str::to_string),
            ..ExtraData::default()
        },
    }
}

/// Start a fake game server on loopback and return its address.
async fn spawn_server(reply: ServerInfo, answers: Answers) -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    let info_body = info::encode_response(&reply);
    let players_body = players::encode_response(&[
        PlayerEntry {
            index: 0,
            name: "alice".to_string(),
            score: 3,
            duration_secs: 120.0,
        },
        PlayerEntry {
            index: 1,
            name: "bob".to_string(),
            score: 1,
            duration_secs: 60.0,
        },
    ]);

    tokio::spawn(async move {
        let mut buf = [0u8; 512];
        while let Ok((len, peer)) = socket.recv_from(&mut buf).await {
            let body = match buf[..len].get(4).copied() {
                Some(b'T') if answers.info => &info_body,
                Some(players::QUERY_TYPE) if answers.players => &players_body,
                _ => continue,
            };
            let _ = socket.send_to(body, peer).await;
        }
    });
    addr
}

fn context(dir: &TempDir) -> ScoutContext {
    let mut config = ScoutConfig::default();
    config.classifier.model_dir = dir.path().to_path_buf();
    config.scanner.probe_timeout_ms = 300;
    config.scanner.inter_batch_pause_ms = 1;
    config.scanner.max_concurrent_probes = 2;
    ScoutContext::with_gateway(config, Arc::new(InMemoryGateway::new())).unwrap()
}

#[tokio::test]
async fn test_sweep_persists_and_queues_review() {
    let dir = TempDir::new().unwrap();
    let ctx = context(&dir);

    let french = spawn_server(
        server_info("[FR] Serveur DarkRP", "rp_downtown_v4c", Some("gm:darkrp")),
        Answers { info: true, players: true },
    )
    .await;
    let generic = spawn_server(
        server_info("Just Some Server", "custom_map", None),
        Answers { info: true, players: true },
    )
    .await;

    let sweeper = ctx.sweeper();
    let stats = sweeper.sweep(&[french, generic]).await;
    assert_eq!(stats.total, 2);
    assert_eq!(stats.online, 2);
    assert_eq!(stats.write_errors, 0);

    let servers = ctx.gateway.list_servers().unwrap();
    assert_eq!(servers.len(), 2);
    let french_id = ctx.gateway.get_server_id(french).unwrap().unwrap();
    let generic_id = ctx.gateway.get_server_id(generic).unwrap().unwrap();

    let snapshot = &ctx.gateway.server_snapshots(french_id, 1).unwrap()[0];
    assert_eq!(snapshot.players, 2);
    assert!(snapshot.regional);
    assert!(snapshot.latency_ms.is_some());
    assert_eq!(sweeper.hot_addresses(), vec![french]);

    // Nothing matches the generic server, so both of its labels need review
    let pending = ctx.gateway.predictions_needing_review().unwrap();
    assert_eq!(pending.len(), 2);
    assert!(pending.iter().all(|p| p.server_id == generic_id));

    let regional = pending
        .iter()
        .find(|p| p.kind == ClassifierKind::Regional)
        .unwrap();
    let accept = Feedback {
        verdict: Verdict::Accept,
        reason: Some("english server".to_string()),
        submitted_at: chrono::Utc::now(),
    };
    let reject = Feedback {
        verdict: Verdict::Reject,
        reason: None,
        submitted_at: chrono::Utc::now(),
    };
    assert!(ctx.gateway.submit_feedback(regional.id, accept).unwrap());
    assert!(!ctx.gateway.submit_feedback(regional.id, reject).unwrap());
    let kept = ctx.gateway.get_prediction(regional.id).unwrap().unwrap().feedback.unwrap();
    assert_eq!(kept.verdict, Verdict::Accept);
    assert_eq!(ctx.gateway.predictions_needing_review().unwrap().len(), 1);

    // A second sweep does not unfreeze the reviewed prediction
    sweeper.sweep(&[generic]).await;
    let pending = ctx.gateway.predictions_needing_review().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].kind, ClassifierKind::GameMode);
}

#[tokio::test]
async fn test_player_only_answers_keep_known_servers_alive() {
    let dir = TempDir::new().unwrap();
    let ctx = context(&dir);
    let sweeper = ctx.sweeper();

    let stranger = spawn_server(
        server_info("Stranger", "gm_flatgrass", None),
        Answers { info: false, players: true },
    )
    .await;
    let stats = sweeper.sweep(&[stranger]).await;
    assert_eq!(stats.online, 1);
    assert_eq!(ctx.gateway.get_server_id(stranger).unwrap(), None);

    let known = spawn_server(
        server_info("Known", "gm_flatgrass", None),
        Answers { info: true, players: false },
    )
    .await;
    sweeper.sweep(&[known]).await;
    let id = ctx.gateway.get_server_id(known).unwrap().unwrap();
    let record = ctx.gateway.get_server(id).unwrap().unwrap();
    assert!(record.online);
    assert_eq!(ctx.gateway.server_snapshots(id, 10).unwrap().len(), 1);
}

#[tokio::test]
async fn test_unreachable_server_is_marked_offline() {
    let dir = TempDir::new().unwrap();
    let ctx = context(&dir);
    let sweeper = ctx.sweeper();

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    let body = info::encode_response(&server_info("Flaky", "gm_construct", None));
    let responder = tokio::spawn(async move {
        let mut buf = [0u8; 512];
        // Answer exactly one info query, then go quiet
        loop {
            let (len, peer) = socket.recv_from(&mut buf).await.unwrap();
            if buf[..len] == info::encode_request()[..] {
                socket.send_to(&body, peer).await.unwrap();
                break;
            }
        }
        socket
    });

    sweeper.sweep(&[addr]).await;
    let _quiet = responder.await.unwrap();
    let id = ctx.gateway.get_server_id(addr).unwrap().unwrap();
    assert!(ctx.gateway.get_server(id).unwrap().unwrap().online);

    let stats = sweeper.sweep(&[addr]).await;
    assert_eq!(stats.offline, 1);
    let record = ctx.gateway.get_server(id).unwrap().unwrap();
    assert!(!record.online);
}

#[tokio::test]
async fn test_hot_sweep_reprobes_regional_servers() {
    let dir = TempDir::new().unwrap();
    let ctx = context(&dir);
    let french = spawn_server(
        server_info("Serveur francais [FR]", "ttt_minecraft_b5", None),
        Answers { info: true, players: true },
    )
    .await;
    let other = spawn_server(
        server_info("US East TTT", "ttt_minecraft_b5", None),
        Answers { info: true, players: true },
    )
    .await;

    let sweeper = Arc::new(ctx.sweeper());
    sweeper.sweep(&[french, other]).await;

    let scheduler = ScanScheduler::new(Arc::clone(&sweeper), Vec::new(), ctx.config.scanner.clone());
    let stats = scheduler.hot_sweep().await.unwrap();
    assert_eq!(stats.total, 1);
    assert_eq!(stats.online, 1);

    let id = ctx.gateway.get_server_id(french).unwrap().unwrap();
    assert_eq!(ctx.gateway.server_snapshots(id, 10).unwrap().len(), 2);
    assert_eq!(scheduler.stats().hot_sweeps, 1);
}
