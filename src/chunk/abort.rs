use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::util::get_padding_size;

const ERROR_CAUSE_HEADER_LENGTH: usize = 4;

pub(crate) const CAUSE_PROTOCOL_VIOLATION: u16 = 13;
pub(crate) const CAUSE_INVALID_MANDATORY_PARAMETER: u16 = 7;
pub(crate) const CAUSE_USER_INITIATED_ABORT: u16 = 12;

/// One error cause TLV, carried inside an ABORT or ERROR chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorCause {
    pub code: u16,
    pub info: Bytes,
}

impl ErrorCause {
    pub(crate) fn new(code: u16) -> Self {
        ErrorCause {
            code,
            info: Bytes::new(),
        }
    }

    fn encoded_len(&self) -> usize {
        ERROR_CAUSE_HEADER_LENGTH + self.info.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AbortChunk {
    pub error_causes: Vec<ErrorCause>,
}

impl AbortChunk {
    pub(crate) fn value_length(&self) -> usize {
        self.error_causes.iter().enumerate().fold(0, |acc, (i, c)| {
            let len = c.encoded_len();
            let pad = if i == self.error_causes.len() - 1 {
                0
            } else {
                get_padding_size(len)
            };
            acc + len + pad
        })
    }

    pub(crate) fn unmarshal(mut value: Bytes) -> Result<Self> {
        let mut error_causes = vec![];
        while value.len() >= ERROR_CAUSE_HEADER_LENGTH {
            let mut reader = value.slice(0..ERROR_CAUSE_HEADER_LENGTH);
            let code = reader.get_u16();
            let len = reader.get_u16() as usize;
            if len < ERROR_CAUSE_HEADER_LENGTH || value.len() < len {
                return Err(Error::ErrChunkValueTooShort);
            }
            let info = value.slice(ERROR_CAUSE_HEADER_LENGTH..len);
            error_causes.push(ErrorCause { code, info });
            let padded = len + get_padding_size(len);
            if padded >= value.len() {
                break;
            }
            value = value.slice(padded..);
        }
        Ok(AbortChunk { error_causes })
    }

    pub(crate) fn marshal_to(&self, writer: &mut BytesMut) {
        for (i, c) in self.error_causes.iter().enumerate() {
            writer.put_u16(c.code);
            writer.put_u16(c.encoded_len() as u16);
            writer.extend_from_slice(&c.info);
            if i != self.error_causes.len() - 1 {
                writer.extend(std::iter::repeat(0u8).take(get_padding_size(c.encoded_len())));
            }
        }
    }
}
