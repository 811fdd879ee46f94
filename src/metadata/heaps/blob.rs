use rustc_hash::FxHashMap;

use crate::{
    metadata::heaps::StreamBuffer,
    utils::{compressed_uint_size, hash_blob, write_compressed_uint},
    Result,
};

/// The `#Blob` heap: length-prefixed binary entries, interned by payload.
///
/// Each entry is an ECMA-335 compressed length followed by the payload bytes;
/// the returned offset points at the length prefix, which is what table rows
/// store. Offset 0 holds the empty blob.
pub struct BlobHeap {
    buffer: StreamBuffer,
    cache: FxHashMap<u64, u32>,
}

impl BlobHeap {
    /// Creates a heap holding only the empty blob at offset 0.
    pub fn new() -> Result<Self> {
        let mut buffer = StreamBuffer::new();
        buffer.write(&[0])?;
        Ok(BlobHeap {
            buffer,
            cache: FxHashMap::default(),
        })
    }

    /// Interns `payload` and returns the offset of its length prefix.
    ///
    /// The same payload always returns the same offset. On a cache hash hit
    /// the stored bytes are verified; a mismatch panics rather than emit a
    /// corrupt heap.
    pub fn intern(&mut self, payload: &[u8]) -> Result<u32> {
        if payload.is_empty() {
            return Ok(0);
        }
        let key = hash_blob(payload);
        if let Some(&offset) = self.cache.get(&key) {
            self.verify_entry(offset, payload);
            return Ok(offset);
        }

        let mut prefix = Vec::new();
        #[allow(clippy::cast_possible_truncation)]
        write_compressed_uint(payload.len() as u32, &mut prefix);

        let offset = self.buffer.write(&prefix)?;
        self.buffer.write(payload)?;
        self.cache.insert(key, offset);
        Ok(offset)
    }

    /// Appends raw bytes without a length prefix and without interning.
    ///
    /// Used for pre-encoded data that already carries its own framing.
    pub fn append_raw(&mut self, bytes: &[u8]) -> Result<u32> {
        self.buffer.write(bytes)
    }

    fn verify_entry(&self, offset: u32, payload: &[u8]) {
        let bytes = self.buffer.bytes();
        #[allow(clippy::cast_possible_truncation)]
        let pos = offset as usize + compressed_uint_size(payload.len() as u32);
        assert!(
            &bytes[pos..pos + payload.len()] == payload,
            "blob heap cache corrupted at offset {offset}"
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
