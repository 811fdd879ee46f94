use rustc_hash::FxHashMap;

use uguid::Guid;

use crate::{utils::hash_guid, Error, Result};

/// The `#GUID` heap: raw 16-byte entries, referenced by 1-based index.
///
/// Unlike the byte-offset heaps, GUID columns store the ordinal of the entry
/// (1 for the first GUID). Index 0 means "no GUID".
pub struct GuidHeap {
    entries: Vec<[u8; 16]>,
    cache: FxHashMap<u64, u32>,
}

impl GuidHeap {
    /// Creates an empty heap.
    #[must_use]
    pub fn new() -> Self {
        GuidHeap {
            entries: Vec::new(),
            cache: FxHashMap::default(),
        }
    }

    /// Adds a GUID and returns its 1-based index.
    ///
    /// Duplicate GUIDs return the index of the existing entry.
    pub fn add(&mut self, guid: Guid) -> Result<u32> {
        let bytes = guid.to_bytes();
        let key = hash_guid(&bytes);
        if let Some(&index) = self.cache.get(&key) {
            assert!(
                self.entries[index as usize - 1] == bytes,
                "guid heap cache corrupted at index {index}"
            );
            return Ok(index);
        }
        self.entries
            .try_reserve(1)
            .map_err(|_| Error::AllocationFailed(16))?;
        self.entries.push(bytes);
        #[allow(clippy::cast_possible_truncation)]
        let index = self.entries.len() as u32;
        self.cache.insert(key, index);
        Ok(index)
    }

    /// Number of GUIDs stored.
    #[must_use]
    pub fn count(&self) -> u32 {
        #[allow(clippy::cast_possible_truncation)]
        {
            self.entries.len() as u32
        }
    }

    /// Heap size in bytes (16 per entry).
    #[must_use]
    pub fn len(&self) -> u32 {
        self.count() * 16
    }

    /// Returns true when no GUIDs are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The raw heap bytes in index order.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.entries.len() * 16);
        for entry in &self.entries {
            out.extend_from_slice(entry);
        }
        out
    }

    /// Drops the interning cache; the heap contents stay valid.
    pub fn release_cache(&mut self) {
        self.cache = FxHashMap::default();
    }
}

impl Default for GuidHeap {
    fn default() -> Self {
        GuidHeap::new()
    }
}
