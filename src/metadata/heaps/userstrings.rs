use rustc_hash::FxHashMap;

use crate::{
    metadata::heaps::StreamBuffer,
    utils::{compressed_uint_size, hash_string, write_compressed_uint},
    Result,
};

/// The `#US` heap: UTF-16 string literals referenced by `ldstr` tokens.
///
/// Entries follow ECMA-335 II.24.2.4: a compressed length covering the UTF-16
/// bytes plus one trailing marker byte, then the little-endian code units, then
/// the marker. The marker is 1 when any code unit needs special handling
/// (anything outside plain printable ASCII), otherwise 0.
pub struct UserStringsHeap {
    buffer: StreamBuffer,
    cache: FxHashMap<u64, u32>,
}

/// Code units that force the trailing marker byte to 1 (ECMA-335 II.24.2.4).
fn needs_marker(unit: u16) -> bool {
    matches!(unit, 0x01..=0x08 | 0x0E..=0x1F | 0x27 | 0x2D | 0x7F) || unit >= 0x80
}

/// Encodes a literal as little-endian UTF-16 followed by the marker byte.
fn encode_entry(value: &str) -> Vec<u8> {
    let mut marker = 0u8;
    let mut encoded = Vec::with_capacity(value.len() * 2 + 1);
    for unit in value.encode_utf16() {
        encoded.extend_from_slice(&unit.to_le_bytes());
        if needs_marker(unit) {
            marker = 1;
        }
    }
    encoded.push(marker);
    encoded
}

impl UserStringsHeap {
    /// Creates a heap holding only the empty entry at offset 0.
    pub fn new() -> Result<Self> {
        let mut buffer = StreamBuffer::new();
        buffer.write(&[0])?;
        Ok(UserStringsHeap {
            buffer,
            cache: FxHashMap::default(),
        })
    }

    /// Interns a string literal and returns its heap offset.
    ///
    /// The offset forms the low 24 bits of the `ldstr` token; the same string
    /// always yields the same offset. On a cache hash hit the stored entry is
    /// verified and a mismatch panics, as in the other heaps.
    pub fn intern(&mut self, value: &str) -> Result<u32> {
        let key = hash_string(value);
        if let Some(&offset) = self.cache.get(&key) {
            self.verify_entry(offset, value);
            return Ok(offset);
        }

        let encoded = encode_entry(value);
        let mut prefix = Vec::new();
        #[allow(clippy::cast_possible_truncation)]
        write_compressed_uint(encoded.len() as u32, &mut prefix);

        let offset = self.buffer.write(&prefix)?;
        self.buffer.write(&encoded)?;
        self.cache.insert(key, offset);
        Ok(offset)
    }

    fn verify_entry(&self, offset: u32, value: &str) {
        let encoded = encode_entry(value);
        let bytes = self.buffer.bytes();
        #[allow(clippy::cast_possible_truncation)]
        let pos = offset as usize + compressed_uint_size(encoded.len() as u32);
        assert!(
            bytes[pos..pos + encoded.len()] == encoded[..],
            "user string heap cache corrupted at offset {offset}"
        );
    }

    /// Current heap length in bytes.
    #[must_use]
    pub fn len(&self) -> u32 {
        self.buffer.len()
    }

    /// Pads the heap to a 4-byte boundary for serialization.
    pub fn align4(&mut self) -> Result<()> {
        self.buffer.align4()
    }

    /// The raw heap bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        self.buffer.bytes()
    }

    /// Drops the interning cache; the heap contents stay valid.
    pub fn release_cache(&mut self) {
        self.cache = FxHashMap::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_entry() -> Result<()> {
        let mut heap = UserStringsHeap::new()?;
        let offset = heap.intern("Hi")? as usize;
        // Length 5 = 4 UTF-16 bytes + marker, marker 0 for plain ASCII.
        assert_eq!(
            &heap.bytes()[offset..offset + 6],
            &[0x05, b'H', 0x00, b'i', 0x00, 0x00]
        );
        Ok(())
    }

    #[test]
    fn test_marker_set_for_non_ascii() -> Result<()> {
        let mut heap = UserStringsHeap::new()?;
        let offset = heap.intern("\u{e9}")? as usize;
        let entry = &heap.bytes()[offset..offset + 4];
        assert_eq!(entry[0], 0x03);
        assert_eq!(&entry[1..3], &0x00E9u16.to_le_bytes());
        assert_eq!(entry[3], 0x01);
        Ok(())
    }

    #[test]
    fn test_marker_set_for_control_chars() -> Result<()> {
        let mut heap = UserStringsHeap::new()?;
        let offset = heap.intern("a\tb")? as usize;
        // Tab (0x09) is not in the special set; newline (0x0A) is not either,
        // but 0x08 (backspace) is.
        assert_eq!(heap.bytes()[offset + 7], 0x00);

        let offset = heap.intern("a\u{8}b")? as usize;
        assert_eq!(heap.bytes()[offset + 7], 0x01);
        Ok(())
    }

    #[test]
    fn test_interning_dedups() -> Result<()> {
        let mut heap = UserStringsHeap::new()?;
        let a = heap.intern("hello")?;
        let b = heap.intern("world")?;
        assert_eq!(heap.intern("hello")?, a);
        assert_ne!(a, b);
        Ok(())
    }

    #[test]
    fn test_cache_hit_checks_stored_payload() -> Result<()> {
        let mut heap = UserStringsHeap::new()?;
        let a = heap.intern("log")?;
        let b = heap.intern("login")?;
        assert_ne!(a, b);

        // The repeat lookup goes through the cache; the stored UTF-16 bytes
        // and marker must match the literal exactly.
        assert_eq!(heap.intern("log")?, a);
        assert_eq!(heap.intern("login")?, b);
        Ok(())
    }

    #[test]
    fn test_empty_heap_starts_with_null_entry() -> Result<()> {
        let heap = UserStringsHeap::new()?;
        assert_eq!(heap.len(), 1);
        assert_eq!(heap.bytes()[0], 0);
        Ok(())
    }
}
