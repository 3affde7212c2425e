//! Source engine query protocols
//!
//! Pure encode/decode of the binary formats spoken over UDP; no I/O lives
//! here, so every codec is testable with literal byte arrays.
//!
//! - `directory`: master server directory query (address listing)
//! - `info`: `A2S_INFO` server state query
//! - `players`: `A2S_PLAYER` player list query
//! - `reader`: bounds-checked datagram cursor and null-terminated string scan

pub mod directory;
pub mod info;
pub mod players;
pub mod reader;

pub use info::{ExtraData, ServerInfo};
pub use players::PlayerEntry;
pub use reader::{read_cstring, ByteReader};

use thiserror::Error;

/// Connectionless packet prefix shared by every query and reply.
pub const PACKET_PREFIX: [u8; 4] = [0xFF, 0xFF, 0xFF, 0xFF];

/// Largest datagram a server is expected to send in one reply.
pub const MAX_DATAGRAM_SIZE: usize = 1400;

/// Query protocol errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// The server answered with a challenge number instead of data.
    #[error("Server requires challenge {0:#010x}")]
    ChallengeRequired(u32),

    #[error("Timeout waiting for response")]
    Timeout,

    #[error("Network error: {0}")]
    Network(#[from] std::io::Error),
}

impl ProtocolError {
    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        ProtocolError::MalformedResponse(message.into())
    }
}
