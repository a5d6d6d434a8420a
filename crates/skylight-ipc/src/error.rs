//! Transport errors.

use skylight_protocol::{DecodeError, EncodeError};
use std::io;
use thiserror::Error;

/// Malformed traffic. Any protocol error tears the connection down.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("bad frame magic {0:#010x}")]
    BadMagic(u32),

    #[error("unsupported frame version {0}")]
    UnsupportedVersion(u8),

    #[error("unknown frame kind {0}")]
    UnknownKind(u8),

    #[error("frame of {len} bytes exceeds limit of {max}")]
    FrameTooLarge { len: usize, max: usize },

    #[error("frame checksum mismatch")]
    ChecksumMismatch,

    #[error("bulk record {got} arrived, expected {expected}")]
    BulkOutOfOrder { expected: u64, got: u64 },

    #[error("handshake tokens differ between channels")]
    HandshakeMismatch,

    #[error("unexpected {0} frame")]
    UnexpectedFrame(&'static str),

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
}

/// Transport error. Delivered to the error handler as an event, or
/// returned from calls made on the caller's thread.
#[derive(Debug, Error)]
pub enum IpcError {
    #[error("endpoint {name} is not available: {source}")]
    Connect {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("transport is already connected")]
    AlreadyConnected,

    #[error("transport is not connected")]
    NotConnected,

    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("send queue is full")]
    QueueFull,

    #[error("message of {len} bytes exceeds frame limit of {max}")]
    MessageTooLarge { len: usize, max: usize },

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl IpcError {
    /// Whether the connection is unusable after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConnectionLost(_) | Self::Protocol(_) | Self::Io(_) | Self::NotConnected
        )
    }
}
