use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

pub(crate) const DATA_CHUNK_HEADER_SIZE: usize = 16;

const FLAG_ENDING: u8 = 0x01;
const FLAG_BEGINNING: u8 = 0x02;
const FLAG_UNORDERED: u8 = 0x04;

/// Payload protocol identifier carried alongside a DATA chunk and relayed
/// to the user untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PayloadProtocolIdentifier(pub u32);

/// A single (possibly fragmented) slice of a user message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataChunk {
    pub unordered: bool,
    pub beginning_fragment: bool,
    pub ending_fragment: bool,
    pub tsn: u32,
    pub stream_identifier: u16,
    pub stream_sequence_number: u16,
    pub ppid: PayloadProtocolIdentifier,
    pub user_data: Bytes,
}

impl DataChunk {
    pub(crate) fn value_length(&self) -> usize {
        DATA_CHUNK_HEADER_SIZE - 4 + self.user_data.len()
    }

    pub(crate) fn flags(&self) -> u8 {
        let mut f = 0u8;
        if self.ending_fragment {
            f |= FLAG_ENDING;
        }
        if self.beginning_fragment {
            f |= FLAG_BEGINNING;
        }
        if self.unordered {
            f |= FLAG_UNORDERED;
        }
        f
    }

    pub(crate) fn unmarshal(flags: u8, value: Bytes) -> Result<Self> {
        if value.len() < DATA_CHUNK_HEADER_SIZE - 4 {
            return Err(Error::ErrChunkValueTooShort);
        }
        let mut reader = value.slice(0..DATA_CHUNK_HEADER_SIZE - 4);
        let tsn = reader.get_u32();
        let stream_identifier = reader.get_u16();
        let stream_sequence_number = reader.get_u16();
        let ppid = PayloadProtocolIdentifier(reader.get_u32());
        let user_data = value.slice(DATA_CHUNK_HEADER_SIZE - 4..);
        Ok(DataChunk {
            unordered: flags & FLAG_UNORDERED != 0,
            beginning_fragment: flags & FLAG_BEGINNING != 0,
            ending_fragment: flags & FLAG_ENDING != 0,
            tsn,
            stream_identifier,
            stream_sequence_number,
            ppid,
            user_data,
        })
    }

    pub(crate) fn marshal_to(&self, writer: &mut BytesMut) {
        writer.put_u32(self.tsn);
        writer.put_u16(self.stream_identifier);
        writer.put_u16(self.stream_sequence_number);
        writer.put_u32(self.ppid.0);
        writer.extend_from_slice(&self.user_data);
    }
}
