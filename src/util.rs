use crc::{Crc, CRC_32_ISCSI};

pub(crate) const PADDING_MULTIPLE: usize = 4;

/// Number of zero bytes needed to round `len` up to a multiple of 4.
pub(crate) fn get_padding_size(len: usize) -> usize {
    (PADDING_MULTIPLE - (len % PADDING_MULTIPLE)) % PADDING_MULTIPLE
}

/// CRC32C (Castagnoli) over `raw` with the checksum field (bytes 8..12)
/// treated as zero, per RFC 4960 §6.8.
pub(crate) fn generate_packet_checksum(raw: &[u8]) -> u32 {
    let crc = Crc::<u32>::new(&CRC_32_ISCSI);
    let mut digest = crc.digest();
    digest.update(&raw[0..8]);
    digest.update(&[0, 0, 0, 0]);
    digest.update(&raw[12..]);
    digest.finalize()
}

/// Constant-time byte comparison, used to compare cookie HMAC tags so that
/// verification time does not leak how many leading bytes matched.
pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

// RFC 1982 serial number arithmetic, modulus 2^32, for TSN comparisons.
pub(crate) fn sna32lt(i1: u32, i2: u32) -> bool {
    (i1 < i2 && i2.wrapping_sub(i1) < 1 << 31) || (i1 > i2 && i1.wrapping_sub(i2) > 1 << 31)
}

pub(crate) fn sna32lte(i1: u32, i2: u32) -> bool {
    i1 == i2 || sna32lt(i1, i2)
}

pub(crate) fn sna32gt(i1: u32, i2: u32) -> bool {
    (i1 < i2 && i2.wrapping_sub(i1) > 1 << 31) || (i1 > i2 && i1.wrapping_sub(i2) < 1 << 31)
}

pub(crate) fn sna32gte(i1: u32, i2: u32) -> bool {
    i1 == i2 || sna32gt(i1, i2)
}

pub(crate) fn sna32eq(i1: u32, i2: u32) -> bool {
    i1 == i2
}

// modulus 2^16, for SSN comparisons.
pub(crate) fn sna16lt(i1: u16, i2: u16) -> bool {
    (i1 < i2 && i2.wrapping_sub(i1) < 1 << 15) || (i1 > i2 && i1.wrapping_sub(i2) > 1 << 15)
}

pub(crate) fn sna16lte(i1: u16, i2: u16) -> bool {
    i1 == i2 || sna16lt(i1, i2)
}

pub(crate) fn sna16gt(i1: u16, i2: u16) -> bool {
    (i1 < i2 && i2.wrapping_sub(i1) > 1 << 15) || (i1 > i2 && i1.wrapping_sub(i2) < 1 << 15)
}

pub(crate) fn sna16gte(i1: u16, i2: u16) -> bool {
    i1 == i2 || sna16gt(i1, i2)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_get_padding_size() {
        assert_eq!(get_padding_size(0), 0);
        assert_eq!(get_padding_size(1), 3);
        assert_eq!(get_padding_size(2), 2);
        assert_eq!(get_padding_size(3), 1);
        assert_eq!(get_padding_size(4), 0);
    }

    #[test]
    fn test_sna32() {
        assert!(sna32lt(0, 1));
        assert!(sna32lt(u32::MAX, 0));
        assert!(sna32gt(1, 0));
        assert!(sna32gt(0, u32::MAX));
        assert!(sna32lte(1, 1));
        assert!(sna32gte(1, 1));
        assert!(sna32eq(5, 5));
    }

    #[test]
    fn test_sna16() {
        assert!(sna16lt(0, 1));
        assert!(sna16lt(u16::MAX, 0));
        assert!(sna16gt(1, 0));
        assert!(sna16lte(1, 1));
        assert!(sna16gte(1, 1));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
    }
}
