pub(crate) mod abort;
pub(crate) mod data;
pub(crate) mod init;
pub(crate) mod param;
pub(crate) mod sack;

use bytes::{Buf, BufMut, Bytes, BytesMut};

pub use abort::{AbortChunk, ErrorCause};
pub use data::{DataChunk, PayloadProtocolIdentifier};
pub use init::InitChunk;
pub use param::Param;
pub use sack::{GapAckBlock, SackChunk};

use crate::error::{Error, Result};
use crate::util::get_padding_size;

pub(crate) const CHUNK_HEADER_SIZE: usize = 4;

pub(crate) const CT_DATA: u8 = 0;
pub(crate) const CT_INIT: u8 = 1;
pub(crate) const CT_INIT_ACK: u8 = 2;
pub(crate) const CT_SACK: u8 = 3;
pub(crate) const CT_HEARTBEAT: u8 = 4;
pub(crate) const CT_HEARTBEAT_ACK: u8 = 5;
pub(crate) const CT_ABORT: u8 = 6;
pub(crate) const CT_SHUTDOWN: u8 = 7;
pub(crate) const CT_SHUTDOWN_ACK: u8 = 8;
pub(crate) const CT_COOKIE_ECHO: u8 = 10;
pub(crate) const CT_COOKIE_ACK: u8 = 11;
pub(crate) const CT_SHUTDOWN_COMPLETE: u8 = 14;

/// A decoded SCTP chunk.
///
/// Unlike a trait-object hierarchy keyed on a type byte, this is a closed
/// enum: exhaustive `match` at every call site makes it impossible to add
/// a new wire chunk kind without updating every place that handles one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    Data(DataChunk),
    Init(InitChunk),
    InitAck(InitChunk),
    Sack(SackChunk),
    Heartbeat(Bytes),
    HeartbeatAck(Bytes),
    Abort(AbortChunk),
    Shutdown { cumulative_tsn_ack: u32 },
    ShutdownAck,
    CookieEcho(Bytes),
    CookieAck,
    ShutdownComplete,
    /// A structurally valid but unrecognized chunk type. RFC 4960 §3.2
    /// only requires these to be ignored, not rejected; decoding still
    /// validates the TLV framing so packet iteration stays well-defined.
    Unknown(u8),
}

impl Chunk {
    fn chunk_type(&self) -> u8 {
        match self {
            Chunk::Data(_) => CT_DATA,
            Chunk::Init(_) => CT_INIT,
            Chunk::InitAck(_) => CT_INIT_ACK,
            Chunk::Sack(_) => CT_SACK,
            Chunk::Heartbeat(_) => CT_HEARTBEAT,
            Chunk::HeartbeatAck(_) => CT_HEARTBEAT_ACK,
            Chunk::Abort(_) => CT_ABORT,
            Chunk::Shutdown { .. } => CT_SHUTDOWN,
            Chunk::ShutdownAck => CT_SHUTDOWN_ACK,
            Chunk::CookieEcho(_) => CT_COOKIE_ECHO,
            Chunk::CookieAck => CT_COOKIE_ACK,
            Chunk::ShutdownComplete => CT_SHUTDOWN_COMPLETE,
            Chunk::Unknown(t) => *t,
        }
    }

    fn flags(&self) -> u8 {
        match self {
            Chunk::Data(d) => d.flags(),
            _ => 0,
        }
    }

    fn value_length(&self) -> usize {
        match self {
            Chunk::Data(d) => d.value_length(),
            Chunk::Init(i) | Chunk::InitAck(i) => i.value_length(),
            Chunk::Sack(s) => s.value_length(),
            Chunk::Heartbeat(v) | Chunk::HeartbeatAck(v) => {
                param::PARAM_HEADER_LENGTH + v.len()
            }
            Chunk::Abort(a) => a.value_length(),
            Chunk::Shutdown { .. } => 4,
            Chunk::ShutdownAck | Chunk::CookieAck | Chunk::ShutdownComplete => 0,
            Chunk::CookieEcho(v) => v.len(),
            Chunk::Unknown(_) => 0,
        }
    }

    /// Total on-the-wire footprint, including the 4-byte chunk header and
    /// trailing padding (the chunk's declared `length` field never
    /// includes this padding).
    pub(crate) fn padded_len(&self) -> usize {
        let len = CHUNK_HEADER_SIZE + self.value_length();
        len + get_padding_size(len)
    }

    pub(crate) fn marshal_to(&self, writer: &mut BytesMut) {
        writer.put_u8(self.chunk_type());
        writer.put_u8(self.flags());
        writer.put_u16((CHUNK_HEADER_SIZE + self.value_length()) as u16);
        match self {
            Chunk::Data(d) => d.marshal_to(writer),
            Chunk::Init(i) | Chunk::InitAck(i) => i.marshal_to(writer),
            Chunk::Sack(s) => s.marshal_to(writer),
            Chunk::Heartbeat(v) | Chunk::HeartbeatAck(v) => {
                let p = Param::HeartbeatInfo(v.clone());
                p.marshal_to(writer);
            }
            Chunk::Abort(a) => a.marshal_to(writer),
            Chunk::Shutdown { cumulative_tsn_ack } => writer.put_u32(*cumulative_tsn_ack),
            Chunk::ShutdownAck | Chunk::CookieAck | Chunk::ShutdownComplete => {}
            Chunk::CookieEcho(v) => writer.extend_from_slice(v),
            Chunk::Unknown(_) => {}
        }
        let unpadded = CHUNK_HEADER_SIZE + self.value_length();
        writer.extend(std::iter::repeat(0u8).take(get_padding_size(unpadded)));
    }

    pub(crate) fn marshal(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.padded_len());
        self.marshal_to(&mut buf);
        buf.freeze()
    }

    /// Decodes exactly one chunk (including its padding) starting at the
    /// front of `raw`. Returns the chunk and the number of bytes consumed,
    /// padding included.
    pub(crate) fn unmarshal(raw: &Bytes) -> Result<(Self, usize)> {
        if raw.len() < CHUNK_HEADER_SIZE {
            return Err(Error::ErrChunkHeaderTooSmall);
        }
        let typ = raw[0];
        let flags = raw[1];
        let length = u16::from_be_bytes([raw[2], raw[3]]) as usize;
        if length < CHUNK_HEADER_SIZE {
            return Err(Error::ErrChunkHeaderInvalidLength);
        }
        if length > raw.len() {
            return Err(Error::ErrChunkHeaderNotEnoughSpace);
        }
        let value = raw.slice(CHUNK_HEADER_SIZE..length);

        let chunk = match typ {
            CT_DATA => Chunk::Data(DataChunk::unmarshal(flags, value)?),
            CT_INIT => Chunk::Init(InitChunk::unmarshal(flags, value)?),
            CT_INIT_ACK => Chunk::InitAck(InitChunk::unmarshal(flags, value)?),
            CT_SACK => Chunk::Sack(SackChunk::unmarshal(value)?),
            CT_HEARTBEAT => Chunk::Heartbeat(heartbeat_info(value)?),
            CT_HEARTBEAT_ACK => Chunk::HeartbeatAck(heartbeat_info(value)?),
            CT_ABORT => Chunk::Abort(AbortChunk::unmarshal(value)?),
            CT_SHUTDOWN => {
                if value.len() < 4 {
                    return Err(Error::ErrChunkValueTooShort);
                }
                Chunk::Shutdown {
                    cumulative_tsn_ack: u32::from_be_bytes([value[0], value[1], value[2], value[3]]),
                }
            }
            CT_SHUTDOWN_ACK => Chunk::ShutdownAck,
            CT_COOKIE_ECHO => Chunk::CookieEcho(value),
            CT_COOKIE_ACK => Chunk::CookieAck,
            CT_SHUTDOWN_COMPLETE => Chunk::ShutdownComplete,
            other => Chunk::Unknown(other),
        };

        let padded = length + get_padding_size(length);
        let consumed = std::cmp::min(padded, raw.len());
        Ok((chunk, consumed))
    }
}

fn heartbeat_info(value: Bytes) -> Result<Bytes> {
    let (p, _) = Param::unmarshal(&value)?;
    Ok(p.value().clone())
}
