//! Shared helpers for heap encoding and content deduplication.
//!
//! The hash functions use `FxHasher` from `rustc-hash`, which is optimized for the
//! small keys typical of heap deduplication. The compressed integer encoding follows
//! ECMA-335 II.23.2 and is shared by the blob heap and the signature builders.

use std::hash::{Hash, Hasher};

use rustc_hash::FxHasher;

/// Appends an ECMA-335 compressed unsigned integer to `buffer`.
///
/// - Values < 0x80 take 1 byte
/// - Values < 0x4000 take 2 bytes (high bit set)
/// - Values < 0x2000_0000 take 4 bytes (high two bits set)
///
/// Values at or above `0x2000_0000` cannot be represented and are clamped by
/// masking, matching the wire format's 29-bit limit.
pub fn write_compressed_uint(value: u32, buffer: &mut Vec<u8>) {
    if value < 0x80 {
        buffer.push(value as u8);
    } else if value < 0x4000 {
        buffer.push(0x80 | (value >> 8) as u8);
        buffer.push(value as u8);
    } else {
        let value = value & 0x1FFF_FFFF;
        buffer.push(0xC0 | (value >> 24) as u8);
        buffer.push((value >> 16) as u8);
        buffer.push((value >> 8) as u8);
        buffer.push(value as u8);
    }
}

/// Returns the encoded size in bytes of a compressed unsigned integer.
#[must_use]
pub fn compressed_uint_size(value: u32) -> usize {
    if value < 0x80 {
        1
    } else if value < 0x4000 {
        2
    } else {
        4
    }
}

/// Rounds `value` up to the next multiple of `align`.
///
/// `align` must be a power of two.
#[must_use]
pub fn align_up(value: u32, align: u32) -> u32 {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}

/// Computes a hash for string content (for deduplication detection).
///
/// Hashes the UTF-8 bytes of the string, matching how strings are stored in
/// the `#Strings` heap (null-terminated UTF-8 bytes).
#[must_use]
pub fn hash_string(s: &str) -> u64 {
    let mut hasher = FxHasher::default();
    s.as_bytes().hash(&mut hasher);
    hasher.finish()
}

/// Computes a hash for blob content (for deduplication detection).
#[must_use]
pub fn hash_blob(data: &[u8]) -> u64 {
    let mut hasher = FxHasher::default();
    data.hash(&mut hasher);
    hasher.finish()
}

/// Computes a hash for GUID content (for deduplication detection).
#[must_use]
pub fn hash_guid(guid: &[u8; 16]) -> u64 {
    let mut hasher = FxHasher::default();
    guid.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compressed_uint_one_byte() {
        let mut buf = Vec::new();
        write_compressed_uint(0x03, &mut buf);
        assert_eq!(buf, vec![0x03]);
        assert_eq!(compressed_uint_size(0x03), 1);

        buf.clear();
        write_compressed_uint(0x7F, &mut buf);
        assert_eq!(buf, vec![0x7F]);
    }

    #[test]
    fn test_compressed_uint_two_bytes() {
        let mut buf = Vec::new();
        write_compressed_uint(0x80, &mut buf);
        assert_eq!(buf, vec![0x80, 0x80]);
        assert_eq!(compressed_uint_size(0x80), 2);

        buf.clear();
        write_compressed_uint(0x3FFF, &mut buf);
        assert_eq!(buf, vec![0xBF, 0xFF]);
    }

    #[test]
    fn test_compressed_uint_four_bytes() {
        let mut buf = Vec::new();
        write_compressed_uint(0x4000, &mut buf);
        assert_eq!(buf, vec![0xC0, 0x00, 0x40, 0x00]);
        assert_eq!(compressed_uint_size(0x4000), 4);

        buf.clear();
        write_compressed_uint(0x1FFF_FFFF, &mut buf);
        assert_eq!(buf, vec![0xDF, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 4), 0);
        assert_eq!(align_up(1, 4), 4);
        assert_eq!(align_up(4, 4), 4);
        assert_eq!(align_up(513, 512), 1024);
        assert_eq!(align_up(8192, 8192), 8192);
    }

    #[test]
    fn test_hash_string_deterministic() {
        assert_eq!(hash_string("hello"), hash_string("hello"));
        assert_ne!(hash_string("hello"), hash_string("world"));
    }

    #[test]
    fn test_hash_blob_deterministic() {
        assert_eq!(hash_blob(&[1, 2, 3]), hash_blob(&[1, 2, 3]));
        assert_ne!(hash_blob(&[1, 2, 3]), hash_blob(&[4, 5, 6]));
    }

    #[test]
    fn test_hash_guid_deterministic() {
        assert_eq!(hash_guid(&[1u8; 16]), hash_guid(&[1u8; 16]));
        assert_ne!(hash_guid(&[1u8; 16]), hash_guid(&[2u8; 16]));
    }
}
