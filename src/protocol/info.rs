//! `A2S_INFO` server state query.
//!
//! Request: `FF FF FF FF "TSource Engine Query" 00`, optionally followed by
//! a 4-byte challenge when the server answered the first request with `'A'`.
//!
//! Reply (after `FF FF FF FF 'I'`):
//!
//! | field | encoding |
//! |---|---|
//! | protocol | u8 |
//! | name, map, folder, game | null-terminated strings |
//! | app id | u16 LE |
//! | players, max players, bots | u8 each |
//! | server type, environment | single ASCII char each |
//! | visibility, anti-cheat | u8 flags |
//! | version | null-terminated string |
//! | extra data | optional, flag byte + flagged fields |

use serde::{Deserialize, Serialize};

use super::{ByteReader, ProtocolError, PACKET_PREFIX};
use crate::types::ServerOs;

/// Literal payload of the info request.
pub const QUERY_STRING: &str = "TSource Engine Query";

/// Reply type byte for an info response.
pub const RESPONSE_HEADER: u8 = 0x49;

/// Reply type byte for a challenge response.
pub const CHALLENGE_HEADER: u8 = 0x41;

mod edf {
    pub const PORT: u8 = 0x80;
    pub const STEAM_ID: u8 = 0x10;
    pub const SPECTATOR: u8 = 0x40;
    pub const KEYWORDS: u8 = 0x20;
    pub const GAME_ID: u8 = 0x01;
}

/// Optional trailing fields announced by the extra-data flag byte.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraData {
    pub port: Option<u16>,
    pub steam_id: Option<u64>,
    pub spectator_port: Option<u16>,
    pub spectator_name: Option<String>,
    /// Comma or space separated tag string (`sv_tags`).
    pub keywords: Option<String>,
    pub game_id: Option<u64>,
}

/// Decoded info reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub protocol: u8,
    pub name: String,
    pub map: String,
    pub folder: String,
    pub game: String,
    pub app_id: u16,
    pub players: u8,
    pub max_players: u8,
    pub bots: u8,
    /// `d` dedicated, `l` listen, `p` relay.
    pub server_type: char,
    /// `l` Linux, `w` Windows, `m`/`o` Mac.
    pub environment: char,
    pub password_protected: bool,
    pub vac_secured: bool,
    pub version: String,
    #[serde(default)]
    pub extra: ExtraData,
}

impl ServerInfo {
    pub fn os(&self) -> ServerOs {
        u8::try_from(self.environment).map_or(ServerOs::Unknown, ServerOs::from_env_byte)
    }

    /// Tag string, empty when the server does not advertise keywords.
    pub fn tags(&self) -> &str {
        self.extra.keywords.as_deref().unwrap_or("")
    }
}

/// Build the info request.
pub fn encode_request() -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + QUERY_STRING.len() + 1);
    buf.extend_from_slice(&PACKET_PREFIX);
    buf.extend_from_slice(QUERY_STRING.as_bytes());
    buf.push(0);
    buf
}

/// Info request repeated with the challenge number a server handed out.
pub fn encode_request_with_challenge(challenge: u32) -> Vec<u8> {
    let mut buf = encode_request();
    buf.extend_from_slice(&challenge.to_le_bytes());
    buf
}

/// Decode an info reply datagram.
pub fn decode_response(buf: &[u8]) -> Result<ServerInfo, ProtocolError> {
    let mut r = ByteReader::new(buf);
    r.expect(&PACKET_PREFIX, "packet prefix")?;
    match r.u8("reply type")? {
        RESPONSE_HEADER => {}
        CHALLENGE_HEADER => return Err(ProtocolError::ChallengeRequired(r.u32_le("challenge")?)),
        other => {
            return Err(ProtocolError::malformed(format!(
                "unexpected info reply type {:#04x}",
                other
            )))
        }
    }

    let protocol = r.u8("protocol")?;
    let name = r.cstring("name")?;
    let map = r.cstring("map")?;
    let folder = r.cstring("folder")?;
    let game = r.cstring("game")?;
    let app_id = r.u16_le("app id")?;
    let players = r.u8("players")?;
    let max_players = r.u8("max players")?;
    let bots = r.u8("bots")?;
    let server_type = char::from(r.u8("server type")?);
    let environment = char::from(r.u8("environment")?);
    let password_protected = r.u8("visibility")? != 0;
    let vac_secured = r.u8("anti-cheat")? != 0;
    let version = r.cstring("version")?;

    let extra = if r.remaining() > 0 {
        decode_extra(&mut r)?
    } else {
        ExtraData::default()
    };

    Ok(ServerInfo {
        protocol,
        name,
        map,
        folder,
        game,
        app_id,
        players,
        max_players,
        bots,
        server_type,
        environment,
        password_protected,
        vac_secured,
        version,
        extra,
    })
}

fn decode_extra(r: &mut ByteReader<'_>) -> Result<ExtraData, ProtocolError> {
    let flags = r.u8("extra data flag")?;
    let mut extra = ExtraData::default();
    if flags & edf::PORT != 0 {
        extra.port = Some(r.u16_le("game port")?);
    }
    if flags & edf::STEAM_ID != 0 {
        extra.steam_id = Some(r.u64_le("steam id")?);
    }
    if flags & edf::SPECTATOR != 0 {
        extra.spectator_port = Some(r.u16_le("spectator port")?);
        extra.spectator_name = Some(r.cstring("spectator name")?);
    }
    if flags & edf::KEYWORDS != 0 {
        extra.keywords = Some(r.cstring("keywords")?);
    }
    if flags & edf::GAME_ID != 0 {
        extra.game_id = Some(r.u64_le("game id")?);
    }
    Ok(extra)
}

/// Encode an info reply. Used by local fake servers and fixtures.
pub fn encode_response(info: &ServerInfo) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64 + info.name.len() + info.map.len());
    buf.extend_from_slice(&PACKET_PREFIX);
    buf.push(RESPONSE_HEADER);
    buf.push(info.protocol);
    for s in [&info.name, &info.map, &info.folder, &info.game] {
        buf.extend_from_slice(s.as_bytes());
        buf.push(0);
    }
    buf.extend_from_slice(&info.app_id.to_le_bytes());
    buf.extend_from_slice(&[info.players, info.max_players, info.bots]);
    buf.push(u8::try_from(info.server_type).unwrap_or(b'd'));
    buf.push(u8::try_from(info.environment).unwrap_or(b'l'));
    buf.push(u8::from(info.password_protected));
    buf.push(u8::from(info.vac_secured));
    buf.extend_from_slice(info.version.as_bytes());
    buf.push(0);

    let extra = &info.extra;
    let mut flags = 0u8;
    let mut tail = Vec::new();
    if let Some(port) = extra.port {
        flags |= edf::PORT;
        tail.extend_from_slice(&port.to_le_bytes());
    }
    if let Some(id) = extra.steam_id {
        flags |= edf::STEAM_ID;
        tail.extend_from_slice(&id.to_le_bytes());
    }
    if let (Some(port), Some(name)) = (extra.spectator_port, &extra.spectator_name) {
        flags |= edf::SPECTATOR;
        tail.extend_from_slice(&port.to_le_bytes());
        tail.extend_from_slice(name.as_bytes());
        tail.push(0);
    }
    if let Some(keywords) = &extra.keywords {
        flags |= edf::KEYWORDS;
        tail.extend_from_slice(keywords.as_bytes());
        tail.push(0);
    }
    if let Some(id) = extra.game_id {
        flags |= edf::GAME_ID;
        tail.extend_from_slice(&id.to_le_bytes());
    }
    if flags != 0 {
        buf.push(flags);
        buf.extend_from_slice(&tail);
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> ServerInfo {
        ServerInfo {
            protocol: 17,
            name: "[FR] Paris DarkRP | Serious RP".to_string(),
            map: "rp_downtown_tits_v2".to_string(),
            folder: "garrysmod".to_string(),
            game: "DarkRP".to_string(),
            app_id: 4000,
            players: 42,
            max_players: 64,
            bots: 1,
            server_type: 'd',
            environment: 'l',
            password_protected: false,
            vac_secured: true,
            version: "2024.10.29".to_string(),
            extra: ExtraData::default(),
        }
    }

    #[test]
    fn test_request_layout() {
        let mut expected = vec![0xFF, 0xFF, 0xFF, 0xFF];
        expected.extend_from_slice(b"TSource Engine Query\0");
        assert_eq!(encode_request(), expected);
    }

    #[test]
    fn test_challenge_request_layout() {
        let req = encode_request_with_challenge(0x1234_5678);
        assert_eq!(&req[..25], encode_request().as_slice());
        assert_eq!(&req[25..], &[0x78, 0x56, 0x34, 0x12]);
    }

    #[test]
    fn test_decode_fixture_fields() {
        let decoded = decode_response(&encode_response(&fixture())).unwrap();
        assert_eq!(decoded, fixture());
        assert_eq!(decoded.os(), ServerOs::Linux);
        assert_eq!(decoded.tags(), "");
    }

    #[test]
    fn test_decode_with_extra_data() {
        let mut info = fixture();
        info.extra = ExtraData {
            port: Some(27015),
            steam_id: Some(90_000_000_000_000_001),
            spectator_port: None,
            spectator_name: None,
            keywords: Some("gm:darkrp,roleplay,fr".to_string()),
            game_id: Some(4000),
        };
        let decoded = decode_response(&encode_response(&info)).unwrap();
        assert_eq!(decoded.extra, info.extra);
        assert_eq!(decoded.tags(), "gm:darkrp,roleplay,fr");
    }

    #[test]
    fn test_truncation_inside_any_string_is_malformed() {
        let info = fixture();
        let bytes = encode_response(&info);
        // Offsets of every byte that belongs to one of the string fields
        let mut string_bytes = Vec::new();
        let mut offset = 6;
        for s in [&info.name, &info.map, &info.folder, &info.game] {
            string_bytes.extend(offset..offset + s.len() + 1);
            offset += s.len() + 1;
        }
        let version_start = bytes.len() - info.version.len() - 1;
        string_bytes.extend(version_start..bytes.len());

        for cut in string_bytes {
            let result = decode_response(&bytes[..cut]);
            assert!(
                matches!(result, Err(ProtocolError::MalformedResponse(_))),
                "cut at {} gave {:?}",
                cut,
                result
            );
        }
    }

    #[test]
    fn test_every_prefix_fails_cleanly() {
        let bytes = encode_response(&fixture());
        for cut in 0..bytes.len() {
            assert!(decode_response(&bytes[..cut]).is_err());
        }
    }

    #[test]
    fn test_challenge_reply() {
        let buf = [0xFF, 0xFF, 0xFF, 0xFF, 0x41, 0x78, 0x56, 0x34, 0x12];
        assert!(matches!(
            decode_response(&buf),
            Err(ProtocolError::ChallengeRequired(0x1234_5678))
        ));
    }

    #[test]
    fn test_wrong_reply_type() {
        let buf = [0xFF, 0xFF, 0xFF, 0xFF, 0x44, 0x00];
        assert!(matches!(
            decode_response(&buf),
            Err(ProtocolError::MalformedResponse(_))
        ));
    }
}
