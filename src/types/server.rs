//! Server identity, per-probe observations and point-in-time snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

use super::GameMode;

/// Storage-assigned server identifier.
pub type ServerId = u64;

/// Operating system reported by the info query environment byte.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ServerOs {
    Linux,
    Windows,
    Mac,
    #[default]
    Unknown,
}

impl ServerOs {
    /// Map the single-character environment field (`l`, `w`, `m`/`o`).
    pub fn from_env_byte(byte: u8) -> Self {
        match byte {
            b'l' | b'L' => ServerOs::Linux,
            b'w' | b'W' => ServerOs::Windows,
            b'm' | b'o' => ServerOs::Mac,
            _ => ServerOs::Unknown,
        }
    }
}

/// What a successful info query tells us about a server at one instant.
///
/// This is the write model for `upsert_server`: identity is `addr`, every
/// other field replaces the stored value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerObservation {
    pub addr: SocketAddr,
    pub name: String,
    pub map: String,
    pub tags: String,
    pub max_players: u8,
    pub password_protected: bool,
    pub vac_secured: bool,
    pub version: String,
    pub os: ServerOs,
    pub country: Option<String>,
    pub seen_at: DateTime<Utc>,
}

/// Durable record of one game server, keyed by `(address, port)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerRecord {
    pub id: ServerId,
    pub addr: SocketAddr,
    pub name: String,
    pub map: String,
    /// Free-text keyword string advertised by the server.
    pub tags: String,
    pub max_players: u8,
    pub password_protected: bool,
    pub vac_secured: bool,
    /// Engine build string.
    pub version: String,
    pub os: ServerOs,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub online: bool,
    /// Best-effort location, never inferred from the address alone.
    pub country: Option<String>,
}

impl ServerRecord {
    /// Build a fresh record from its first observation.
    pub fn from_observation(id: ServerId, obs: &ServerObservation) -> Self {
        Self {
            id,
            addr: obs.addr,
            name: obs.name.clone(),
            map: obs.map.clone(),
            tags: obs.tags.clone(),
            max_players: obs.max_players,
            password_protected: obs.password_protected,
            vac_secured: obs.vac_secured,
            version: obs.version.clone(),
            os: obs.os,
            first_seen: obs.seen_at,
            last_seen: obs.seen_at,
            online: true,
            country: obs.country.clone(),
        }
    }

    /// Overwrite mutable attributes with a newer observation.
    ///
    /// `id` and `first_seen` are left untouched. A missing country in the
    /// observation keeps the previously known one.
    pub fn apply(&mut self, obs: &ServerObservation) {
        self.name = obs.name.clone();
        self.map = obs.map.clone();
        self.tags = obs.tags.clone();
        self.max_players = obs.max_players;
        self.password_protected = obs.password_protected;
        self.vac_secured = obs.vac_secured;
        self.version = obs.version.clone();
        self.os = obs.os;
        self.last_seen = obs.seen_at;
        self.online = true;
        if obs.country.is_some() {
            self.country = obs.country.clone();
        }
    }
}

/// Point-in-time observation of a server, appended on every successful probe.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    pub server_id: ServerId,
    pub taken_at: DateTime<Utc>,
    pub players: u8,
    pub max_players: u8,
    pub bots: u8,
    pub map: String,
    pub game_mode: GameMode,
    pub game_mode_confidence: f64,
    pub regional: bool,
    pub regional_confidence: f64,
    /// Info-query round trip; `None` when only the player query answered.
    pub latency_ms: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observation(name: &str, at: DateTime<Utc>) -> ServerObservation {
        ServerObservation {
            addr: "10.0.0.1:27015".parse().unwrap(),
            name: name.to_string(),
            map: "rp_downtown_v4c".to_string(),
            tags: "gm:darkrp".to_string(),
            max_players: 64,
            password_protected: false,
            vac_secured: true,
            version: "2024.10.29".to_string(),
            os: ServerOs::Linux,
            country: None,
            seen_at: at,
        }
    }

    #[test]
    fn test_apply_keeps_identity_and_first_seen() {
        let first = Utc::now();
        let later = first + chrono::Duration::minutes(10);
        let mut record = ServerRecord::from_observation(7, &observation("Old", first));
        record.online = false;
        record.country = Some("FR".to_string());

        record.apply(&observation("New", later));

        assert_eq!(record.id, 7);
        assert_eq!(record.name, "New");
        assert_eq!(record.first_seen, first);
        assert_eq!(record.last_seen, later);
        assert!(record.online);
        assert_eq!(record.country.as_deref(), Some("FR"));
    }

    #[test]
    fn test_os_from_env_byte() {
        assert_eq!(ServerOs::from_env_byte(b'l'), ServerOs::Linux);
        assert_eq!(ServerOs::from_env_byte(b'w'), ServerOs::Windows);
        assert_eq!(ServerOs::from_env_byte(b'o'), ServerOs::Mac);
        assert_eq!(ServerOs::from_env_byte(b'?'), ServerOs::Unknown);
    }
}
