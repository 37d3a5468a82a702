use bytes::{BufMut, Bytes, BytesMut};

use crate::chunk::Chunk;
use crate::error::{Error, Result};
use crate::util::generate_packet_checksum;

pub(crate) const COMMON_HEADER_SIZE: usize = 12;

/// The 12-byte common header shared by every SCTP packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommonHeader {
    pub source_port: u16,
    pub destination_port: u16,
    pub verification_tag: u32,
}

/// A fully decoded SCTP packet: a common header plus its ordered chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub common_header: CommonHeader,
    pub chunks: Vec<Chunk>,
}

impl Packet {
    pub(crate) fn new(common_header: CommonHeader) -> Self {
        Packet {
            common_header,
            chunks: vec![],
        }
    }

    /// RFC 4960 §3.1 invariants on the common header, plus the "first
    /// chunk starts at offset 12" structural requirement.
    fn check_header(raw: &[u8]) -> Result<CommonHeader> {
        if raw.len() < COMMON_HEADER_SIZE {
            return Err(Error::ErrHeaderTooSmall);
        }
        let source_port = u16::from_be_bytes([raw[0], raw[1]]);
        let destination_port = u16::from_be_bytes([raw[2], raw[3]]);
        if source_port == 0 || destination_port == 0 {
            return Err(Error::ErrZeroPort);
        }
        let verification_tag = u32::from_be_bytes([raw[4], raw[5], raw[6], raw[7]]);
        Ok(CommonHeader {
            source_port,
            destination_port,
            verification_tag,
        })
    }

    /// Full validation: header invariants plus a matching CRC32C. Chunks
    /// are not decoded here; call [`Packet::unmarshal`] for that once this
    /// has passed.
    pub fn is_valid_sctp(raw: &[u8]) -> bool {
        if Self::check_header(raw).is_err() {
            return false;
        }
        let stored = u32::from_le_bytes([raw[8], raw[9], raw[10], raw[11]]);
        generate_packet_checksum(raw) == stored
    }

    /// Decodes a complete, already-checksum-validated packet. Chunks that
    /// fail to decode abort the whole decode (the caller ABORTs the
    /// association per §4.4 step 3); unrecognized-but-well-formed chunk
    /// types decode to [`Chunk::Unknown`] and are kept.
    pub fn unmarshal(raw: &Bytes) -> Result<Self> {
        let common_header = Self::check_header(raw)?;
        let mut chunks = vec![];
        let mut offset = COMMON_HEADER_SIZE;
        while offset < raw.len() {
            let remaining = raw.slice(offset..);
            let (chunk, consumed) = Chunk::unmarshal(&remaining)?;
            chunks.push(chunk);
            if consumed == 0 {
                break;
            }
            offset += consumed;
        }
        Ok(Packet {
            common_header,
            chunks,
        })
    }

    /// Serializes the packet and stamps the CRC32C checksum, per §4.1.
    pub fn marshal(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(
            COMMON_HEADER_SIZE + self.chunks.iter().map(Chunk::padded_len).sum::<usize>(),
        );
        buf.put_u16(self.common_header.source_port);
        buf.put_u16(self.common_header.destination_port);
        buf.put_u32(self.common_header.verification_tag);
        buf.put_u32(0); // checksum placeholder, stamped below
        for c in &self.chunks {
            c.marshal_to(&mut buf);
        }
        let checksum = generate_packet_checksum(&buf);
        buf[8..12].copy_from_slice(&checksum.to_le_bytes());
        buf.freeze()
    }
}

/// Cheap, CRC-free demultiplexing peek (C8): returns the port pair if the
/// buffer merely *looks* like a well-formed SCTP packet. Never performs a
/// checksum; a positive result is not a guarantee that `Packet::unmarshal`
/// will succeed.
pub fn minimal_validation(raw: &[u8]) -> Option<(u16, u16)> {
    if raw.len() < COMMON_HEADER_SIZE {
        return None;
    }
    let source_port = u16::from_be_bytes([raw[0], raw[1]]);
    let destination_port = u16::from_be_bytes([raw[2], raw[3]]);
    if source_port == 0 || destination_port == 0 {
        return None;
    }
    if raw.len() < COMMON_HEADER_SIZE + 4 {
        return None;
    }
    let first_chunk_length = u16::from_be_bytes([raw[14], raw[15]]) as usize;
    if first_chunk_length < 4 || COMMON_HEADER_SIZE + first_chunk_length > raw.len() {
        return None;
    }
    Some((source_port, destination_port))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn header_round_trip() {
        // S2: raw bytes 01 02 03 04 05 06 07 08 09 0A 0B 0C
        let raw = [
            0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C,
        ];
        let header = Packet::check_header(&raw).unwrap();
        assert_eq!(header.source_port, 0x0102);
        assert_eq!(header.destination_port, 0x0304);
        assert_eq!(header.verification_tag, 0x0506_0708);

        let packet = Packet::new(CommonHeader {
            source_port: 0x1122,
            destination_port: 0x3344,
            verification_tag: 0x5566_7788,
        });
        let out = packet.marshal();
        assert_eq!(&out[0..4], &[0x11, 0x22, 0x33, 0x44]);
        assert_eq!(&out[4..8], &[0x55, 0x66, 0x77, 0x88]);
    }

    #[test]
    fn tampered_checksum_fails_validation_but_minimal_validation_survives() {
        let packet = Packet::new(CommonHeader {
            source_port: 1,
            destination_port: 2,
            verification_tag: 0,
        });
        let mut raw = packet.marshal().to_vec();
        assert!(Packet::is_valid_sctp(&raw));
        raw[8] ^= 0x01;
        assert!(!Packet::is_valid_sctp(&raw));
        assert_eq!(minimal_validation(&raw), None);
    }

    #[test]
    fn minimal_validation_rejects_short_or_zero_port_buffers() {
        assert_eq!(minimal_validation(&[0u8; 11]), None);
        let mut raw = vec![0u8; 16];
        raw[0] = 0; // zero source port
        raw[1] = 0;
        raw[2] = 0;
        raw[3] = 1;
        assert_eq!(minimal_validation(&raw), None);
    }

    #[test]
    fn unaligned_chunk_appending_s3() {
        use crate::chunk::{Chunk, DataChunk, PayloadProtocolIdentifier};

        let mut packet = Packet::new(CommonHeader {
            source_port: 1,
            destination_port: 2,
            verification_tag: 0,
        });
        packet.chunks.push(Chunk::Data(DataChunk {
            unordered: false,
            beginning_fragment: true,
            ending_fragment: true,
            tsn: 1,
            stream_identifier: 0,
            stream_sequence_number: 0,
            ppid: PayloadProtocolIdentifier(0),
            user_data: Bytes::from_static(&[0xAA, 0xBB]),
        }));
        packet.chunks.push(Chunk::Data(DataChunk {
            unordered: false,
            beginning_fragment: true,
            ending_fragment: true,
            tsn: 2,
            stream_identifier: 0,
            stream_sequence_number: 0,
            ppid: PayloadProtocolIdentifier(0),
            user_data: Bytes::from_static(&[1, 2, 3, 4, 5, 6, 7]),
        }));
        let raw = packet.marshal();
        // 12 (common header) + 2*16 (DATA headers) + 4 (payload 1, padded) + 8 (payload 2, padded)
        assert_eq!(raw.len(), 12 + 2 * 16 + 4 + 8);

        let decoded = Packet::unmarshal(&raw).unwrap();
        assert_eq!(decoded.chunks.len(), 2);
        match &decoded.chunks[0] {
            Chunk::Data(d) => assert_eq!(&d.user_data[..], &[0xAA, 0xBB]),
            _ => panic!("expected DATA"),
        }
        match &decoded.chunks[1] {
            Chunk::Data(d) => assert_eq!(&d.user_data[..], &[1, 2, 3, 4, 5, 6, 7]),
            _ => panic!("expected DATA"),
        }
    }
}
