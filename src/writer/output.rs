//! Dual-mode output sink for the serialized image.
//!
//! The final file size is known before any byte is written, so the sink is
//! either a file of that exact size mapped into memory, or a zero-filled
//! `Vec<u8>`. File-backed output is cleaned up on drop unless it was
//! finalized, so an interrupted write never leaves a truncated image behind.

use std::path::{Path, PathBuf};

use memmap2::{MmapMut, MmapOptions};

use crate::{Error, Result};

enum OutputBacking {
    /// File-backed memory mapping.
    File {
        mmap: MmapMut,
        target_path: PathBuf,
    },
    /// In-memory buffer, extracted without copying by [`Output::into_vec`].
    Memory { data: Vec<u8> },
}

/// A fixed-size output buffer, file-backed or in-memory.
pub struct Output {
    backing: OutputBacking,
    finalized: bool,
}

impl Output {
    /// Creates a file of exactly `size` bytes at `target_path` and maps it.
    ///
    /// # Errors
    /// Returns [`Error::MmapFailed`] when the file cannot be created, sized
    /// or mapped.
    pub fn create<P: AsRef<Path>>(target_path: P, size: usize) -> Result<Self> {
        let target_path = target_path.as_ref().to_path_buf();

        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&target_path)
            .map_err(|e| Error::MmapFailed(format!("failed to create target file: {e}")))?;

        file.set_len(size as u64)
            .map_err(|e| Error::MmapFailed(format!("failed to set file size: {e}")))?;

        let mmap = unsafe {
            MmapOptions::new()
                .map_mut(&file)
                .map_err(|e| Error::MmapFailed(format!("failed to create memory mapping: {e}")))?
        };

        Ok(Output {
            backing: OutputBacking::File { mmap, target_path },
            finalized: false,
        })
    }

    /// Creates a zero-filled in-memory buffer of `size` bytes.
    #[must_use]
    pub fn create_in_memory(size: usize) -> Self {
        Output {
            backing: OutputBacking::Memory {
                data: vec![0u8; size],
            },
            finalized: false,
        }
    }

    /// Returns true when the output has no file backing.
    #[must_use]
    pub fn is_in_memory(&self) -> bool {
        matches!(self.backing, OutputBacking::Memory { .. })
    }

    /// Read access to the whole buffer.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        match &self.backing {
            OutputBacking::File { mmap, .. } => &mmap[..],
            OutputBacking::Memory { data } => &data[..],
        }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        match &mut self.backing {
            OutputBacking::File { mmap, .. } => &mut mmap[..],
            OutputBacking::Memory { data } => &mut data[..],
        }
    }

    /// Total buffer size in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.as_slice().len()
    }

    /// Writes `data` at `offset`, bounds-checked.
    ///
    /// # Errors
    /// Returns [`Error::MmapFailed`] when the write would run past the end of
    /// the buffer.
    pub fn write_at(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        let end = offset + data.len();
        let len = self.size();
        if end > len {
            return Err(Error::MmapFailed(format!(
                "write would exceed buffer size: offset={offset}, len={}, buffer_size={len}",
                data.len()
            )));
        }
        self.as_mut_slice()[offset..end].copy_from_slice(data);
        Ok(())
    }

    /// Writes a little-endian `u16` at `offset`.
    pub fn write_u16_le_at(&mut self, offset: usize, value: u16) -> Result<()> {
        self.write_at(offset, &value.to_le_bytes())
    }

    /// Writes a little-endian `u32` at `offset`.
    pub fn write_u32_le_at(&mut self, offset: usize, value: u32) -> Result<()> {
        self.write_at(offset, &value.to_le_bytes())
    }

    fn flush(&mut self) -> Result<()> {
        match &mut self.backing {
            OutputBacking::File { mmap, .. } => mmap
                .flush()
                .map_err(|e| Error::MmapFailed(format!("failed to flush memory mapping: {e}"))),
            OutputBacking::Memory { .. } => Ok(()),
        }
    }

    /// Flushes and keeps a file-backed output at its target path.
    ///
    /// # Errors
    /// Returns [`Error::MmapFailed`] when the flush fails or when the output
    /// is in-memory; in-memory outputs end with [`Output::into_vec`].
    pub fn finalize(mut self) -> Result<()> {
        match &mut self.backing {
            OutputBacking::File { mmap, .. } => {
                mmap.flush().map_err(|e| {
                    Error::MmapFailed(format!("failed to flush memory mapping: {e}"))
                })?;
                self.finalized = true;
                Ok(())
            }
            OutputBacking::Memory { .. } => Err(Error::MmapFailed(
                "cannot finalize in-memory output to a file; use into_vec()".to_string(),
            )),
        }
    }

    /// Extracts the bytes, consuming the output.
    ///
    /// Zero-copy for in-memory outputs; file-backed outputs are copied out of
    /// the mapping and the file stays on disk un-finalized.
    pub fn into_vec(mut self) -> Result<Vec<u8>> {
        let backing = std::mem::replace(
            &mut self.backing,
            OutputBacking::Memory { data: Vec::new() },
        );
        self.finalized = true;
        match backing {
            OutputBacking::Memory { data } => Ok(data),
            OutputBacking::File { mmap, .. } => Ok(mmap[..].to_vec()),
        }
    }

    /// Target path of a file-backed output, `None` for in-memory.
    #[must_use]
    pub fn target_path(&self) -> Option<&Path> {
        match &self.backing {
            OutputBacking::File { target_path, .. } => Some(target_path.as_path()),
            OutputBacking::Memory { .. } => None,
        }
    }
}

impl Drop for Output {
    fn drop(&mut self) {
        if !self.finalized {
            let _ = self.flush();
            // Remove the incomplete file so a failed write never leaves a
            // half-written image at the target path.
            if let OutputBacking::File { target_path, .. } = &self.backing {
                let _ = std::fs::remove_file(target_path);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{fs::File, io::Read};
    use tempfile::tempdir;

    #[test]
    fn test_file_creation() {
        let temp_dir = tempdir().unwrap();
        let target_path = temp_dir.path().join("test.bin");

        let output = Output::create(&target_path, 1024).unwrap();
        assert_eq!(output.size(), 1024);
        assert!(!output.is_in_memory());
        assert_eq!(output.target_path().unwrap(), target_path);
    }

    #[test]
    fn test_write_operations() {
        let temp_dir = tempdir().unwrap();
        let target_path = temp_dir.path().join("test.bin");

        let mut output = Output::create(&target_path, 1024).unwrap();
        output.write_at(0, b"MZ").unwrap();
        output.write_u16_le_at(2, 0x0090).unwrap();
        output.write_u32_le_at(4, 0x12345678).unwrap();

        let slice = output.as_slice();
        assert_eq!(&slice[0..2], b"MZ");
        assert_eq!(&slice[2..4], &[0x90, 0x00]);
        assert_eq!(&slice[4..8], &[0x78, 0x56, 0x34, 0x12]);
    }

    #[test]
    fn test_bounds_checking() {
        let mut output = Output::create_in_memory(10);
        assert!(output.write_at(8, b"too long").is_err());
        assert!(output.write_u32_le_at(8, 1).is_err());
        assert!(output.write_at(2, b"fits").is_ok());
    }

    #[test]
    fn test_finalize_keeps_file() {
        let temp_dir = tempdir().unwrap();
        let target_path = temp_dir.path().join("test.bin");

        {
            let mut output = Output::create(&target_path, 16).unwrap();
            output.write_at(0, b"Test content").unwrap();
            output.finalize().unwrap();
        }

        assert!(target_path.exists());
        let mut contents = Vec::new();
        File::open(&target_path)
            .unwrap()
            .read_to_end(&mut contents)
            .unwrap();
        assert_eq!(&contents[0..12], b"Test content");
        assert_eq!(contents.len(), 16);
    }

    #[test]
    fn test_unfinalized_file_is_removed_on_drop() {
        let temp_dir = tempdir().unwrap();
        let target_path = temp_dir.path().join("dropped.bin");

        {
            let mut output = Output::create(&target_path, 16).unwrap();
            output.write_at(0, b"partial").unwrap();
        }

        assert!(!target_path.exists());
    }

    #[test]
    fn test_in_memory_into_vec() {
        let mut output = Output::create_in_memory(64);
        assert!(output.is_in_memory());
        assert!(output.target_path().is_none());

        output.write_at(0, b"data").unwrap();
        let bytes = output.into_vec().unwrap();
        assert_eq!(bytes.len(), 64);
        assert_eq!(&bytes[0..4], b"data");
    }

    #[test]
    fn test_in_memory_finalize_fails() {
        let output = Output::create_in_memory(16);
        assert!(output.finalize().is_err());
    }
}
