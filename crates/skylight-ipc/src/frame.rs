//! Frame format shared by the control and bulk streams.
//!
//! Header (16 bytes, little-endian):
//! - magic `u32` = `'REND'`
//! - version `u8`
//! - kind `u8`
//! - flags `u16`
//! - payload length `u32`
//! - checksum `u32`, low half of the xxh3-64 of the payload

use crate::error::{IpcError, ProtocolError};
use skylight_protocol::MessageKind;
use std::io::{self, ErrorKind, Read, Write};
use xxhash_rust::xxh3::xxh3_64;

pub const FRAME_MAGIC: u32 = 0x5245_4E44;
pub const FRAME_VERSION: u8 = 1;
pub const HEADER_LEN: usize = 16;

/// Control frame whose body travels on the bulk stream. Its payload is the
/// 8-byte sequence number of the bulk record.
pub const FLAG_BULK_REF: u16 = 0x0001;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    Command,
    Result,
    Metrics,
    Ping,
    Pong,
    /// Record on the bulk stream
    Bulk,
    /// First frame on each stream, pairs the two streams of one connection
    Hello,
}

impl FrameKind {
    pub fn code(&self) -> u8 {
        match self {
            Self::Command => 1,
            Self::Result => 2,
            Self::Metrics => 3,
            Self::Ping => 4,
            Self::Pong => 5,
            Self::Bulk => 6,
            Self::Hello => 7,
        }
    }

    pub fn from_code(code: u8) -> Result<Self, ProtocolError> {
        Ok(match code {
            1 => Self::Command,
            2 => Self::Result,
            3 => Self::Metrics,
            4 => Self::Ping,
            5 => Self::Pong,
            6 => Self::Bulk,
            7 => Self::Hello,
            other => return Err(ProtocolError::UnknownKind(other)),
        })
    }

    pub fn message_kind(&self) -> Option<MessageKind> {
        match self {
            Self::Command => Some(MessageKind::Command),
            Self::Result => Some(MessageKind::Result),
            Self::Metrics => Some(MessageKind::Metrics),
            Self::Ping => Some(MessageKind::Ping),
            Self::Pong => Some(MessageKind::Pong),
            Self::Bulk | Self::Hello => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::Result => "result",
            Self::Metrics => "metrics",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Bulk => "bulk",
            Self::Hello => "hello",
        }
    }
}

impl From<MessageKind> for FrameKind {
    fn from(kind: MessageKind) -> Self {
        match kind {
            MessageKind::Command => Self::Command,
            MessageKind::Result => Self::Result,
            MessageKind::Metrics => Self::Metrics,
            MessageKind::Ping => Self::Ping,
            MessageKind::Pong => Self::Pong,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub kind: FrameKind,
    pub flags: u16,
    pub len: u32,
    pub checksum: u32,
}

impl FrameHeader {
    pub fn for_payload(kind: FrameKind, flags: u16, payload: &[u8]) -> Self {
        Self {
            kind,
            flags,
            len: payload.len() as u32,
            checksum: checksum(payload),
        }
    }

    pub fn is_bulk_ref(&self) -> bool {
        self.flags & FLAG_BULK_REF != 0
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(&FRAME_MAGIC.to_le_bytes());
        out[4] = FRAME_VERSION;
        out[5] = self.kind.code();
        out[6..8].copy_from_slice(&self.flags.to_le_bytes());
        out[8..12].copy_from_slice(&self.len.to_le_bytes());
        out[12..16].copy_from_slice(&self.checksum.to_le_bytes());
        out
    }

    /// Parse and validate a header against the payload size limit.
    pub fn parse(bytes: &[u8; HEADER_LEN], max_len: usize) -> Result<Self, ProtocolError> {
        let magic = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if magic != FRAME_MAGIC {
            return Err(ProtocolError::BadMagic(magic));
        }
        if bytes[4] != FRAME_VERSION {
            return Err(ProtocolError::UnsupportedVersion(bytes[4]));
        }
        let kind = FrameKind::from_code(bytes[5])?;
        let flags = u16::from_le_bytes([bytes[6], bytes[7]]);
        let len = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        if len as usize > max_len {
            return Err(ProtocolError::FrameTooLarge {
                len: len as usize,
                max: max_len,
            });
        }
        let checksum = u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]);
        Ok(Self {
            kind,
            flags,
            len,
            checksum,
        })
    }
}

pub fn checksum(payload: &[u8]) -> u32 {
    xxh3_64(payload) as u32
}

/// Write one frame and flush. Returns the number of bytes written.
pub fn write_frame(
    w: &mut dyn Write,
    kind: FrameKind,
    flags: u16,
    payload: &[u8],
) -> io::Result<usize> {
    let header = FrameHeader::for_payload(kind, flags, payload);
    w.write_all(&header.to_bytes())?;
    w.write_all(payload)?;
    w.flush()?;
    Ok(HEADER_LEN + payload.len())
}

/// Read one frame. `Ok(None)` means the peer closed the stream cleanly
/// between frames.
pub fn read_frame(
    r: &mut dyn Read,
    max_len: usize,
) -> Result<Option<(FrameHeader, Vec<u8>)>, IpcError> {
    let mut raw = [0u8; HEADER_LEN];
    let mut filled = 0;
    while filled < HEADER_LEN {
        match r.read(&mut raw[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => return Err(IpcError::ConnectionLost("stream closed mid-frame".into())),
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(IpcError::Io(e)),
        }
    }

    let header = FrameHeader::parse(&raw, max_len)?;
    let mut payload = vec![0u8; header.len as usize];
    r.read_exact(&mut payload).map_err(|e| {
        if e.kind() == ErrorKind::UnexpectedEof {
            IpcError::ConnectionLost("stream closed mid-frame".into())
        } else {
            IpcError::Io(e)
        }
    })?;

    if checksum(&payload) != header.checksum {
        return Err(ProtocolError::ChecksumMismatch.into());
    }
    Ok(Some((header, payload)))
}

/// Bulk record payload: sequence, message kind, message body.
pub fn encode_bulk_record(seq: u64, kind: FrameKind, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(9 + body.len());
    out.extend_from_slice(&seq.to_le_bytes());
    out.push(kind.code());
    out.extend_from_slice(body);
    out
}

pub fn decode_bulk_record(payload: &[u8]) -> Result<(u64, FrameKind, &[u8]), ProtocolError> {
    if payload.len() < 9 {
        return Err(ProtocolError::UnexpectedFrame("truncated bulk"));
    }
    let seq = u64_at(payload);
    let kind = FrameKind::from_code(payload[8])?;
    Ok((seq, kind, &payload[9..]))
}

/// Sequence number carried by a bulk reference or hello frame.
pub fn decode_u64_payload(payload: &[u8], what: &'static str) -> Result<u64, ProtocolError> {
    if payload.len() < 8 {
        return Err(ProtocolError::UnexpectedFrame(what));
    }
    Ok(u64_at(payload))
}

fn u64_at(bytes: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(raw)
}
