//! Error types for liveforged-media.

use thiserror::Error;

/// Result type for liveforged-media operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for liveforged-media operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Packet does not start with the transport stream sync byte.
    #[error("Lost sync: expected 0x47, found {found:#04x}")]
    LostSync { found: u8 },

    /// Buffer too small for operation.
    #[error("Buffer underflow: need {need} bytes, have {have}")]
    BufferUnderflow { need: usize, have: usize },

    /// Structurally invalid transport packet.
    #[error("Invalid transport packet: {0}")]
    InvalidPacket(String),
}

impl Error {
    /// Create an invalid packet error.
    pub fn invalid_packet(msg: impl Into<String>) -> Self {
        Self::InvalidPacket(msg.into())
    }
}
