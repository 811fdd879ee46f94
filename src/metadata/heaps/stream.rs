use crate::{Error, Result};

/// A growable byte buffer backing one metadata stream.
///
/// All heaps and the raw code/resource streams are built on this buffer. Growth
/// goes through `try_reserve` so an allocation failure surfaces as
/// [`Error::AllocationFailed`] instead of aborting the process.
pub struct StreamBuffer {
    data: Vec<u8>,
}

impl StreamBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        StreamBuffer { data: Vec::new() }
    }

    /// Appends `bytes` and returns the offset they were written at.
    pub fn write(&mut self, bytes: &[u8]) -> Result<u32> {
        let offset = self.len();
        self.data
            .try_reserve(bytes.len())
            .map_err(|_| Error::AllocationFailed(bytes.len()))?;
        self.data.extend_from_slice(bytes);
        Ok(offset)
    }

    /// Appends `count` zero bytes and returns the offset of the first one.
    pub fn write_zero(&mut self, count: usize) -> Result<u32> {
        let offset = self.len();
        self.data
            .try_reserve(count)
            .map_err(|_| Error::AllocationFailed(count))?;
        self.data.resize(self.data.len() + count, 0);
        Ok(offset)
    }

    /// Pads the buffer with zeros up to the next 4-byte boundary.
    pub fn align4(&mut self) -> Result<()> {
        let rem = self.data.len() % 4;
        if rem != 0 {
            self.write_zero(4 - rem)?;
        }
        Ok(())
    }

    /// Current length in bytes.
    #[must_use]
    pub fn len(&self) -> u32 {
        #[allow(clippy::cast_possible_truncation)]
        {
            self.data.len() as u32
        }
    }

    /// Returns true when nothing has been written yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Read access to the buffered bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Mutable access to the buffered bytes, used by the fixup pass to patch
    /// token sites in place.
    #[must_use]
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl Default for StreamBuffer {
    fn default() -> Self {
        StreamBuffer::new()
    }
}
