use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

pub(crate) const SACK_CHUNK_FIXED_LENGTH: usize = 12;

/// An offset range, relative to `cumulative_tsn_ack`, of TSNs the sender
/// has received. `start`/`end` are both inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GapAckBlock {
    pub start: u16,
    pub end: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SackChunk {
    pub cumulative_tsn_ack: u32,
    pub advertised_receiver_window_credit: u32,
    pub gap_ack_blocks: Vec<GapAckBlock>,
    pub duplicate_tsn: Vec<u32>,
}

impl SackChunk {
    pub(crate) fn value_length(&self) -> usize {
        SACK_CHUNK_FIXED_LENGTH + self.gap_ack_blocks.len() * 4 + self.duplicate_tsn.len() * 4
    }

    pub(crate) fn unmarshal(value: Bytes) -> Result<Self> {
        if value.len() < SACK_CHUNK_FIXED_LENGTH {
            return Err(Error::ErrChunkValueTooShort);
        }
        let mut reader = value.slice(0..SACK_CHUNK_FIXED_LENGTH);
        let cumulative_tsn_ack = reader.get_u32();
        let advertised_receiver_window_credit = reader.get_u32();
        let num_gap_ack_blocks = reader.get_u16() as usize;
        let num_dup_tsns = reader.get_u16() as usize;

        let mut offset = SACK_CHUNK_FIXED_LENGTH;
        let need = num_gap_ack_blocks * 4 + num_dup_tsns * 4;
        if value.len() < offset + need {
            return Err(Error::ErrChunkValueTooShort);
        }

        let mut gap_ack_blocks = Vec::with_capacity(num_gap_ack_blocks);
        for _ in 0..num_gap_ack_blocks {
            let mut r = value.slice(offset..offset + 4);
            gap_ack_blocks.push(GapAckBlock {
                start: r.get_u16(),
                end: r.get_u16(),
            });
            offset += 4;
        }

        let mut duplicate_tsn = Vec::with_capacity(num_dup_tsns);
        for _ in 0..num_dup_tsns {
            let mut r = value.slice(offset..offset + 4);
            duplicate_tsn.push(r.get_u32());
            offset += 4;
        }

        Ok(SackChunk {
            cumulative_tsn_ack,
            advertised_receiver_window_credit,
            gap_ack_blocks,
            duplicate_tsn,
        })
    }

    pub(crate) fn marshal_to(&self, writer: &mut BytesMut) {
        writer.put_u32(self.cumulative_tsn_ack);
        writer.put_u32(self.advertised_receiver_window_credit);
        writer.put_u16(self.gap_ack_blocks.len() as u16);
        writer.put_u16(self.duplicate_tsn.len() as u16);
        for b in &self.gap_ack_blocks {
            writer.put_u16(b.start);
            writer.put_u16(b.end);
        }
        for tsn in &self.duplicate_tsn {
            writer.put_u32(*tsn);
        }
    }
}
