//! Master server directory query.
//!
//! Request: `FF FF FF FF 31 <region> "0.0.0.0:0" 00 "\gamedir\<game>" 00`
//!
//! Reply: a 6-byte header followed by 6-byte records (4 IPv4 octets, big-endian
//! port). The list ends with a `0.0.0.0:0` terminator record.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use super::{ProtocolError, PACKET_PREFIX};

/// Directory query message type.
pub const QUERY_TYPE: u8 = 0x31;

/// Region code meaning "rest of world" / all regions.
pub const REGION_ALL: u8 = 0xFF;

/// Seed address asking for the first page of results.
pub const SEED_ADDRESS: &str = "0.0.0.0:0";

/// Bytes preceding the first address record in a reply.
pub const RESPONSE_HEADER_LEN: usize = 6;

/// Size of one address record.
pub const RECORD_LEN: usize = 6;

/// Build the directory request for a game directory filter.
pub fn encode_request(game_dir: &str) -> Vec<u8> {
    let filter = format!("\\gamedir\\{}", game_dir);
    let mut buf = Vec::with_capacity(6 + SEED_ADDRESS.len() + filter.len() + 2);
    buf.extend_from_slice(&PACKET_PREFIX);
    buf.push(QUERY_TYPE);
    buf.push(REGION_ALL);
    buf.extend_from_slice(SEED_ADDRESS.as_bytes());
    buf.push(0);
    buf.extend_from_slice(filter.as_bytes());
    buf.push(0);
    buf
}

/// Decode the address records of one reply datagram.
///
/// Only complete records are read; a trailing partial record is ignored and
/// the `0.0.0.0:0` terminator ends the list.
pub fn decode_response(buf: &[u8]) -> Result<Vec<SocketAddr>, ProtocolError> {
    if buf.len() < RESPONSE_HEADER_LEN {
        return Err(ProtocolError::malformed(format!(
            "directory reply is {} bytes, header needs {}",
            buf.len(),
            RESPONSE_HEADER_LEN
        )));
    }

    let mut addrs = Vec::with_capacity((buf.len() - RESPONSE_HEADER_LEN) / RECORD_LEN);
    for record in buf[RESPONSE_HEADER_LEN..].chunks_exact(RECORD_LEN) {
        let ip = Ipv4Addr::new(record[0], record[1], record[2], record[3]);
        let port = u16::from_be_bytes([record[4], record[5]]);
        if ip.is_unspecified() && port == 0 {
            break;
        }
        addrs.push(SocketAddr::V4(SocketAddrV4::new(ip, port)));
    }
    Ok(addrs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_layout() {
        let req = encode_request("garrysmod");
        let mut expected = vec![0xFF, 0xFF, 0xFF, 0xFF, 0x31, 0xFF];
        expected.extend_from_slice(b"0.0.0.0:0\0\\gamedir\\garrysmod\0");
        assert_eq!(req, expected);
    }

    #[test]
    fn test_single_record() {
        let buf = [0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 192, 168, 1, 1, 0x69, 0xA7];
        let addrs = decode_response(&buf).unwrap();
        assert_eq!(addrs.len(), 1);
        assert_eq!(addrs[0].to_string(), "192.168.1.1:27047");
    }

    #[test]
    fn test_terminator_and_partial_record() {
        let mut buf = vec![0xFF, 0xFF, 0xFF, 0xFF, 0x66, 0x0A];
        buf.extend_from_slice(&[10, 0, 0, 1, 0x69, 0x87]);
        buf.extend_from_slice(&[10, 0, 0, 2, 0x69, 0x88]);
        buf.extend_from_slice(&[0, 0, 0, 0, 0, 0]);
        buf.extend_from_slice(&[10, 0, 0, 3]);
        let addrs = decode_response(&buf).unwrap();
        assert_eq!(
            addrs,
            vec![
                "10.0.0.1:27015".parse::<SocketAddr>().unwrap(),
                "10.0.0.2:27016".parse::<SocketAddr>().unwrap(),
            ]
        );
    }

    #[test]
    fn test_header_only_and_short_buffers() {
        assert!(decode_response(&[0xFF; 6]).unwrap().is_empty());
        assert!(matches!(
            decode_response(&[0xFF; 5]),
            Err(ProtocolError::MalformedResponse(_))
        ));
    }
}
