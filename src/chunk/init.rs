use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::param::{marshal_params, params_encoded_len, unmarshal_params, Param};
use crate::error::{Error, Result};

pub(crate) const INIT_CHUNK_FIXED_LENGTH: usize = 16;

/// Shared payload for INIT and INIT-ACK, which differ only in the chunk
/// type byte and in INIT-ACK's mandatory State-Cookie parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitChunk {
    pub initiate_tag: u32,
    pub advertised_receiver_window_credit: u32,
    pub num_outbound_streams: u16,
    pub num_inbound_streams: u16,
    pub initial_tsn: u32,
    pub params: Vec<Param>,
}

impl InitChunk {
    pub(crate) fn value_length(&self) -> usize {
        INIT_CHUNK_FIXED_LENGTH + params_encoded_len(&self.params)
    }

    pub(crate) fn unmarshal(flags: u8, value: Bytes) -> Result<Self> {
        if flags != 0 {
            return Err(Error::ErrInitFlagsNonZero);
        }
        if value.len() < INIT_CHUNK_FIXED_LENGTH {
            return Err(Error::ErrChunkValueTooShort);
        }
        let mut reader = value.slice(0..INIT_CHUNK_FIXED_LENGTH);
        let initiate_tag = reader.get_u32();
        let advertised_receiver_window_credit = reader.get_u32();
        let num_outbound_streams = reader.get_u16();
        let num_inbound_streams = reader.get_u16();
        let initial_tsn = reader.get_u32();
        let params = unmarshal_params(value.slice(INIT_CHUNK_FIXED_LENGTH..))?;
        Ok(InitChunk {
            initiate_tag,
            advertised_receiver_window_credit,
            num_outbound_streams,
            num_inbound_streams,
            initial_tsn,
            params,
        })
    }

    pub(crate) fn marshal_to(&self, writer: &mut BytesMut) {
        writer.put_u32(self.initiate_tag);
        writer.put_u32(self.advertised_receiver_window_credit);
        writer.put_u16(self.num_outbound_streams);
        writer.put_u16(self.num_inbound_streams);
        writer.put_u32(self.initial_tsn);
        marshal_params(&self.params, writer);
    }

    /// RFC 4960 §3.3.2/§3.3.3 mandatory-field sanity checks.
    pub(crate) fn check(&self) -> Result<()> {
        if self.initiate_tag == 0 {
            return Err(Error::ErrInitiateTagZero);
        }
        if self.num_inbound_streams == 0 {
            return Err(Error::ErrInboundStreamsZero);
        }
        if self.num_outbound_streams == 0 {
            return Err(Error::ErrOutboundStreamsZero);
        }
        if self.advertised_receiver_window_credit < 1500 {
            return Err(Error::ErrAdvertisedRwndTooSmall);
        }
        Ok(())
    }

    pub(crate) fn state_cookie(&self) -> Option<&Bytes> {
        self.params.iter().find_map(|p| match p {
            Param::StateCookie(v) => Some(v),
            _ => None,
        })
    }
}
