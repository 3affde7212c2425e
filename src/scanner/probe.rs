//! One server probe: info and player queries in parallel.
//!
//! The two queries use independent sockets, timeouts and error channels. A
//! server is online when either query succeeds.

use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::Instant;

use crate::protocol::{info, players, PlayerEntry, ProtocolError, ServerInfo};
use crate::udp::round_trip;

#[derive(Debug)]
pub struct ProbeResult {
    pub addr: SocketAddr,
    pub info: Result<ServerInfo, ProtocolError>,
    pub players: Result<Vec<PlayerEntry>, ProtocolError>,
    /// Round-trip time of the successful info query.
    pub latency: Option<Duration>,
}

impl ProbeResult {
    pub fn is_online(&self) -> bool {
        self.info.is_ok() || self.players.is_ok()
    }

    pub fn latency_ms(&self) -> Option<u32> {
        self.latency
            .map(|d| u32::try_from(d.as_millis()).unwrap_or(u32::MAX))
    }
}

/// Info query. A challenge reply is answered once with the challenge
/// appended; the latency covers the final round-trip only.
pub async fn query_info(addr: SocketAddr, timeout: Duration) -> Result<(ServerInfo, Duration), ProtocolError> {
    let started = Instant::now();
    let reply = round_trip(addr, &info::encode_request(), timeout).await?;
    match info::decode_response(&reply) {
        Err(ProtocolError::ChallengeRequired(challenge)) => {
            let started = Instant::now();
            let reply = round_trip(addr, &info::encode_request_with_challenge(challenge), timeout).await?;
            let decoded = info::decode_response(&reply)?;
            Ok((decoded, started.elapsed()))
        }
        other => other.map(|decoded| (decoded, started.elapsed())),
    }
}

/// Player query with the placeholder challenge.
pub async fn query_players(addr: SocketAddr, timeout: Duration) -> Result<Vec<PlayerEntry>, ProtocolError> {
    let reply = round_trip(addr, &players::encode_request(), timeout).await?;
    players::decode_response(&reply)
}

pub async fn probe(addr: SocketAddr, timeout: Duration) -> ProbeResult {
    let (info, players) = tokio::join!(query_info(addr, timeout), query_players(addr, timeout));
    let (info, latency) = match info {
        Ok((info, latency)) => (Ok(info), Some(latency)),
        Err(e) => (Err(e), None),
    };
    ProbeResult {
        addr,
        info,
        players,
        latency,
    }
}
