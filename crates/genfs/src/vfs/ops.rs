//! VFS operations trait.
//!
//! The read surface shared by backing filesystems, the generated
//! filesystem facade and the scoped views handed to generators.

use async_trait::async_trait;

use super::types::{DirEntry, FileAttr};
use super::VfsResult;

/// Read-only filesystem operations.
///
/// Paths are slash-separated and relative to the filesystem root, which
/// is `"."`.
#[async_trait]
pub trait VfsOps: Send + Sync {
    /// Get file attributes.
    async fn getattr(&self, path: &str) -> VfsResult<FileAttr>;

    /// Read directory entries.
    ///
    /// Returns all entries in the directory, sorted by name.
    async fn readdir(&self, path: &str) -> VfsResult<Vec<DirEntry>>;

    /// Read file contents.
    ///
    /// Reads up to `size` bytes starting at `offset`.
    /// Returns fewer bytes if EOF is reached.
    async fn read(&self, path: &str, offset: u64, size: u32) -> VfsResult<Vec<u8>>;

    /// Check if a path exists.
    async fn exists(&self, path: &str) -> bool {
        self.getattr(path).await.is_ok()
    }

    /// Read entire file contents.
    ///
    /// Reads in chunks of at most `u32::MAX` bytes until the size reported
    /// by `getattr` is reached or a read comes back empty.
    async fn read_all(&self, path: &str) -> VfsResult<Vec<u8>> {
        let attr = self.getattr(path).await?;
        let mut data = Vec::new();
        let mut offset = 0u64;
        while offset < attr.size {
            let chunk = self.read(path, offset, chunk_len(attr.size - offset)).await?;
            if chunk.is_empty() {
                break;
            }
            offset += chunk.len() as u64;
            data.extend_from_slice(&chunk);
        }
        Ok(data)
    }
}

/// Largest single read covering `remaining` bytes.
fn chunk_len(remaining: u64) -> u32 {
    u32::try_from(remaining).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::{VfsError, FILE_PERM};
    use std::sync::Mutex;

    /// A file that answers at most 4 bytes per read.
    struct ShortReads {
        data: Vec<u8>,
        calls: Mutex<Vec<(u64, u32)>>,
    }

    #[async_trait]
    impl VfsOps for ShortReads {
        async fn getattr(&self, _path: &str) -> VfsResult<FileAttr> {
            Ok(FileAttr::file(self.data.len() as u64, FILE_PERM))
        }

        async fn readdir(&self, path: &str) -> VfsResult<Vec<DirEntry>> {
            Err(VfsError::not_a_directory(path))
        }

        async fn read(&self, _path: &str, offset: u64, size: u32) -> VfsResult<Vec<u8>> {
            self.calls.lock().unwrap().push((offset, size));
            let start = (offset as usize).min(self.data.len());
            let end = (start + 4).min(start + size as usize).min(self.data.len());
            Ok(self.data[start..end].to_vec())
        }
    }

    #[tokio::test]
    async fn test_read_all_loops_over_short_reads() {
        let fs = ShortReads {
            data: b"0123456789".to_vec(),
            calls: Mutex::new(Vec::new()),
        };
        assert_eq!(fs.read_all("f").await.unwrap(), b"0123456789");
        assert_eq!(*fs.calls.lock().unwrap(), vec![(0, 10), (4, 6), (8, 2)]);
    }

    #[test]
    fn test_chunk_len_saturates() {
        assert_eq!(chunk_len(10), 10);
        assert_eq!(chunk_len(u64::from(u32::MAX) + 5), u32::MAX);
    }
}
