//! `A2S_PLAYER` player list query.
//!
//! Request: `FF FF FF FF 55` + 4-byte challenge.
//!
//! Reply (after `FF FF FF FF 'D'`): player count, then per player an index
//! byte, null-terminated name, i32 LE score and f32 LE seconds connected.
//!
//! Known limitation: the request always carries the placeholder challenge
//! `FF FF FF FF` and never performs the challenge exchange. Servers that
//! enforce challenges answer with `'A'`, which decodes to
//! [`ProtocolError::ChallengeRequired`].

use serde::{Deserialize, Serialize};

use super::{ByteReader, ProtocolError, PACKET_PREFIX};

/// Player query message type.
pub const QUERY_TYPE: u8 = 0x55;

/// Challenge value sent in place of a real challenge number.
pub const PLACEHOLDER_CHALLENGE: [u8; 4] = [0xFF, 0xFF, 0xFF, 0xFF];

/// Reply type byte for a player list.
pub const RESPONSE_HEADER: u8 = 0x44;

/// Reply type byte for a challenge response.
pub const CHALLENGE_HEADER: u8 = 0x41;

/// One connected player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerEntry {
    pub index: u8,
    pub name: String,
    pub score: i32,
    pub duration_secs: f32,
}

/// Build the player request with the placeholder challenge.
pub fn encode_request() -> Vec<u8> {
    let mut buf = Vec::with_capacity(9);
    buf.extend_from_slice(&PACKET_PREFIX);
    buf.push(QUERY_TYPE);
    buf.extend_from_slice(&PLACEHOLDER_CHALLENGE);
    buf
}

/// Decode a player list reply datagram.
pub fn decode_response(buf: &[u8]) -> Result<Vec<PlayerEntry>, ProtocolError> {
    let mut r = ByteReader::new(buf);
    r.expect(&PACKET_PREFIX, "packet prefix")?;
    match r.u8("reply type")? {
        RESPONSE_HEADER => {}
        CHALLENGE_HEADER => return Err(ProtocolError::ChallengeRequired(r.u32_le("challenge")?)),
        other => {
            return Err(ProtocolError::malformed(format!(
                "unexpected player reply type {:#04x}",
                other
            )))
        }
    }

    let count = r.u8("player count")?;
    let mut players = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        players.push(PlayerEntry {
            index: r.u8("player index")?,
            name: r.cstring("player name")?,
            score: r.i32_le("player score")?,
            duration_secs: r.f32_le("player duration")?,
        });
    }
    Ok(players)
}

/// Encode a player list reply. Used by local fake servers and fixtures.
pub fn encode_response(players: &[PlayerEntry]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(6 + players.len() * 24);
    buf.extend_from_slice(&PACKET_PREFIX);
    buf.push(RESPONSE_HEADER);
    buf.push(u8::try_from(players.len()).unwrap_or(u8::MAX));
    for p in players.iter().take(usize::from(u8::MAX)) {
        buf.push(p.index);
        buf.extend_from_slice(p.name.as_bytes());
        buf.push(0);
        buf.extend_from_slice(&p.score.to_le_bytes());
        buf.extend_from_slice(&p.duration_secs.to_le_bytes());
    }
    buf
}
