use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::util::get_padding_size;

pub(crate) const PARAM_HEADER_LENGTH: usize = 4;

const PARAM_TYPE_HEARTBEAT_INFO: u16 = 1;
const PARAM_TYPE_STATE_COOKIE: u16 = 7;

/// A single INIT/INIT-ACK parameter. Only the kinds this core cares about
/// are broken out; everything else round-trips as `Unknown` so unrecognized
/// (but well-formed) parameters survive a decode/encode cycle unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Param {
    StateCookie(Bytes),
    HeartbeatInfo(Bytes),
    Unknown { param_type: u16, value: Bytes },
}

impl Param {
    pub(crate) fn param_type(&self) -> u16 {
        match self {
            Param::StateCookie(_) => PARAM_TYPE_STATE_COOKIE,
            Param::HeartbeatInfo(_) => PARAM_TYPE_HEARTBEAT_INFO,
            Param::Unknown { param_type, .. } => *param_type,
        }
    }

    pub(crate) fn value(&self) -> &Bytes {
        match self {
            Param::StateCookie(v) | Param::HeartbeatInfo(v) => v,
            Param::Unknown { value, .. } => value,
        }
    }

    pub(crate) fn value_length(&self) -> usize {
        self.value().len()
    }

    /// Decodes one parameter starting at the front of `raw`. Returns the
    /// decoded parameter and the number of bytes consumed, *not including*
    /// inter-parameter padding (callers are responsible for skipping it,
    /// except after the last parameter in a chunk, which carries none).
    pub(crate) fn unmarshal(raw: &Bytes) -> Result<(Self, usize)> {
        if raw.len() < PARAM_HEADER_LENGTH {
            return Err(Error::ErrParamHeaderTooShort);
        }
        let mut reader = raw.slice(0..PARAM_HEADER_LENGTH);
        let param_type = reader.get_u16();
        let len = reader.get_u16() as usize;
        if len < PARAM_HEADER_LENGTH || raw.len() < len {
            return Err(Error::ErrParamHeaderLengthMismatch);
        }
        let value = raw.slice(PARAM_HEADER_LENGTH..len);
        let param = match param_type {
            PARAM_TYPE_STATE_COOKIE => Param::StateCookie(value),
            PARAM_TYPE_HEARTBEAT_INFO => Param::HeartbeatInfo(value),
            _ => Param::Unknown { param_type, value },
        };
        Ok((param, len))
    }

    pub(crate) fn marshal_to(&self, writer: &mut BytesMut) {
        writer.put_u16(self.param_type());
        writer.put_u16((PARAM_HEADER_LENGTH + self.value_length()) as u16);
        writer.extend_from_slice(self.value());
    }
}

/// Encodes a run of parameters with the inter-parameter (but not trailing)
/// 4-byte padding rule from RFC 4960 §3.2.1.
pub(crate) fn marshal_params(params: &[Param], writer: &mut BytesMut) {
    for (idx, p) in params.iter().enumerate() {
        p.marshal_to(writer);
        if idx != params.len() - 1 {
            let this_len = PARAM_HEADER_LENGTH + p.value_length();
            writer.extend(std::iter::repeat(0u8).take(get_padding_size(this_len)));
        }
    }
}

pub(crate) fn params_encoded_len(params: &[Param]) -> usize {
    let mut l = 0;
    for (idx, p) in params.iter().enumerate() {
        let this_len = PARAM_HEADER_LENGTH + p.value_length();
        l += this_len;
        if idx != params.len() - 1 {
            l += get_padding_size(this_len);
        }
    }
    l
}

/// Decodes a run of parameters filling the rest of a chunk value.
pub(crate) fn unmarshal_params(mut raw: Bytes) -> Result<Vec<Param>> {
    let mut params = vec![];
    while raw.len() > PARAM_HEADER_LENGTH {
        let (p, consumed) = Param::unmarshal(&raw)?;
        params.push(p);
        let padded = consumed + get_padding_size(consumed);
        if padded >= raw.len() {
            break;
        }
        raw = raw.slice(padded..);
    }
    Ok(params)
}
