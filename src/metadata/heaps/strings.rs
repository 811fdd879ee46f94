use rustc_hash::FxHashMap;

use crate::{
    metadata::heaps::StreamBuffer,
    utils::hash_string,
    Result,
};

/// The `#Strings` heap: null-terminated UTF-8 names, interned by content.
///
/// Offset 0 always holds the empty string so rows can use 0 for "no name".
/// Interning is keyed by a content hash; on a hash hit the stored bytes are
/// compared and a mismatch panics, since a corrupted cache would silently
/// produce a corrupt image.
pub struct StringsHeap {
    buffer: StreamBuffer,
    cache: FxHashMap<u64, u32>,
}

impl StringsHeap {
    /// Creates a heap holding only the empty string at offset 0.
    pub fn new() -> Result<Self> {
        let mut buffer = StreamBuffer::new();
        buffer.write(&[0])?;
        Ok(StringsHeap {
            buffer,
            cache: FxHashMap::default(),
        })
    }

    /// Interns `value` and returns its heap offset.
    ///
    /// The same string always returns the same offset.
    pub fn intern(&mut self, value: &str) -> Result<u32> {
        if value.is_empty() {
            return Ok(0);
        }
        let key = hash_string(value);
        if let Some(&offset) = self.cache.get(&key) {
            self.verify_entry(offset, value);
            return Ok(offset);
        }
        let offset = self.buffer.write(value.as_bytes())?;
        self.buffer.write(&[0])?;
        self.cache.insert(key, offset);
        Ok(offset)
    }

    fn verify_entry(&self, offset: u32, value: &str) {
        let bytes = self.buffer.bytes();
        let pos = offset as usize;
        let end = pos + value.len();
        // Full entry including the terminator, so a longer stored string that
        // merely starts with `value` does not pass.
        assert!(
            &bytes[pos..end] == value.as_bytes() && bytes[end] == 0,
            "string heap cache corrupted at offset {offset}"
        );
    }

    /// Current heap length in bytes.
    #[must_use]
    pub fn len(&self) -> u32 {
        self.buffer.len()
    }

    /// Returns true when only the empty entry is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.len() <= 1
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
