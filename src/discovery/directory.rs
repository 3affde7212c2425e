//! Master server directory source.
//!
//! Sends one directory request and decodes every reply datagram that arrives
//! before the time budget runs out.

use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{DiscoveryError, DiscoverySource};
use crate::config::DiscoveryConfig;
use crate::protocol::directory;
use crate::udp;

pub struct MasterServerSource {
    host: String,
    port: u16,
    game_dir: String,
    budget: Duration,
}

impl MasterServerSource {
    pub fn new(host: impl Into<String>, port: u16, game_dir: impl Into<String>, budget: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            game_dir: game_dir.into(),
            budget,
        }
    }

    pub fn from_config(config: &DiscoveryConfig) -> Self {
        Self::new(
            config.master_host.clone(),
            config.master_port,
            config.game_dir.clone(),
            config.directory_budget(),
        )
    }

    /// Resolve the master host to an IPv4 address before `deadline`.
    async fn resolve(&self, deadline: Instant) -> Result<SocketAddr, DiscoveryError> {
        let lookup = tokio::net::lookup_host((self.host.as_str(), self.port));
        let mut candidates = tokio::time::timeout_at(deadline, lookup)
            .await
            .map_err(|_| DiscoveryError::ResolveTimeout(self.budget))?
            .map_err(|source| DiscoveryError::Resolve {
                host: self.host.clone(),
                source,
            })?;
        candidates
            .find(SocketAddr::is_ipv4)
            .ok_or_else(|| DiscoveryError::NoIpv4Address(self.host.clone()))
    }

    async fn collect(&self, addrs: &mut Vec<SocketAddr>) -> Result<(), DiscoveryError> {
        // Resolution counts against the same budget as the replies
        let deadline = Instant::now() + self.budget;
        let target = self.resolve(deadline).await?;

        let socket = udp::bind_ephemeral(target, Some(udp::LARGE_RECV_BUFFER))?;
        socket.send_to(&directory::encode_request(&self.game_dir), target).await?;

        let mut buf = vec![0u8; 64 * 1024];
        let mut datagrams = 0usize;
        loop {
            let (len, from) = match tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await {
                Ok(received) => received?,
                Err(_) => break,
            };
            if from.ip() != target.ip() {
                debug!(%from, "Ignoring datagram from unexpected peer");
                continue;
            }
            datagrams += 1;
            match directory::decode_response(&buf[..len]) {
                Ok(batch) => addrs.extend(batch),
                Err(e) => warn!(%from, error = %e, "Skipping undecodable directory datagram"),
            }
        }
        debug!(datagrams, "Directory budget elapsed");
        Ok(())
    }
}

#[async_trait]
impl DiscoverySource for MasterServerSource {
    async fn discover(&self) -> Vec<SocketAddr> {
        let mut addrs = Vec::new();
        if let Err(e) = self.collect(&mut addrs).await {
            warn!(
                host = %self.host,
                port = self.port,
                error = %e,
                partial = addrs.len(),
                "Directory query failed"
            );
        }
        info!(count = addrs.len(), "Master server directory collected");
        addrs
    }

    fn name(&self) -> &str {
        "master-server"
    }
}
