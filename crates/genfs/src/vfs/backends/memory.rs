//! In-memory filesystem backend.
//!
//! Used as a scratch backing store and for testing. All data is ephemeral.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::vfs::error::{VfsError, VfsResult};
use crate::vfs::ops::VfsOps;
use crate::vfs::path::{self, ROOT};
use crate::vfs::types::{DirEntry, FileAttr, FileType, DIR_PERM, FILE_PERM};

/// Entry in the memory filesystem.
#[derive(Debug, Clone)]
enum Entry {
    File { data: Vec<u8>, attr: FileAttr },
    Directory { attr: FileAttr },
}

impl Entry {
    fn attr(&self) -> &FileAttr {
        match self {
            Entry::File { attr, .. } => attr,
            Entry::Directory { attr } => attr,
        }
    }

    fn kind(&self) -> FileType {
        match self {
            Entry::File { .. } => FileType::File,
            Entry::Directory { .. } => FileType::Directory,
        }
    }
}

/// In-memory filesystem backend.
///
/// Thread-safe via internal `RwLock`. All data is lost when dropped.
#[derive(Debug)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<String, Entry>>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Create a new empty in-memory filesystem.
    pub fn new() -> Self {
        let mut entries = HashMap::new();
        // Root directory always exists
        entries.insert(
            ROOT.to_string(),
            Entry::Directory {
                attr: FileAttr::directory(DIR_PERM),
            },
        );
        Self {
            entries: RwLock::new(entries),
        }
    }

    /// Build a filesystem from `(path, contents)` pairs.
    pub fn with_files<'a>(files: impl IntoIterator<Item = (&'a str, &'a [u8])>) -> VfsResult<Self> {
        let fs = Self::new();
        for (path, data) in files {
            fs.write_file(path, data)?;
        }
        Ok(fs)
    }

    /// Create or replace a file, creating parent directories as needed.
    pub fn write_file(&self, path: &str, data: impl Into<Vec<u8>>) -> VfsResult<()> {
        let normalized = path::clean(path)?;
        if normalized == ROOT {
            return Err(VfsError::is_a_directory(normalized));
        }

        let mut entries = self
            .entries
            .write()
            .map_err(|_| VfsError::other("lock poisoned"))?;
        Self::ensure_parents(&mut entries, &normalized)?;

        if let Some(Entry::Directory { .. }) = entries.get(&normalized) {
            return Err(VfsError::is_a_directory(normalized));
        }
        let data = data.into();
        let attr = FileAttr::file(data.len() as u64, FILE_PERM);
        entries.insert(normalized, Entry::File { data, attr });
        Ok(())
    }

    /// Create a directory (and its parents). Existing directories are kept.
    pub fn mkdir(&self, path: &str) -> VfsResult<()> {
        let normalized = path::clean(path)?;
        let mut entries = self
            .entries
            .write()
            .map_err(|_| VfsError::other("lock poisoned"))?;
        Self::ensure_parents(&mut entries, &normalized)?;

        match entries.get(&normalized) {
            Some(Entry::Directory { .. }) => Ok(()),
            Some(Entry::File { .. }) => Err(VfsError::not_a_directory(normalized)),
            None => {
                entries.insert(
                    normalized,
                    Entry::Directory {
                        attr: FileAttr::directory(DIR_PERM),
                    },
                );
                Ok(())
            }
        }
    }

    /// Remove a file or a directory with everything beneath it.
    pub fn remove(&self, path: &str) -> VfsResult<()> {
        let normalized = path::clean(path)?;
        if normalized == ROOT {
            return Err(VfsError::invalid("cannot remove root"));
        }

        let mut entries = self
            .entries
            .write()
            .map_err(|_| VfsError::other("lock poisoned"))?;
        if entries.remove(&normalized).is_none() {
            return Err(VfsError::not_found(normalized));
        }
        entries.retain(|key, _| path::relative(&normalized, key).is_none());
        Ok(())
    }

    /// Ensure all parent directories exist.
    fn ensure_parents(entries: &mut HashMap<String, Entry>, path: &str) -> VfsResult<()> {
        let mut current = String::from(ROOT);
        let segments: Vec<&str> = path::segments(path).collect();
        for segment in segments.iter().take(segments.len().saturating_sub(1)) {
            current = path::join(&current, segment);
            let entry = entries.entry(current.clone()).or_insert(Entry::Directory {
                attr: FileAttr::directory(DIR_PERM),
            });
            if let Entry::File { .. } = entry {
                return Err(VfsError::not_a_directory(current));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl VfsOps for MemoryBackend {
    async fn getattr(&self, path: &str) -> VfsResult<FileAttr> {
        let normalized = path::clean(path)?;
        let entries = self
            .entries
            .read()
            .map_err(|_| VfsError::other("lock poisoned"))?;

        entries
            .get(&normalized)
            .map(|e| e.attr().clone())
            .ok_or_else(|| VfsError::not_found(normalized))
    }

    async fn readdir(&self, path: &str) -> VfsResult<Vec<DirEntry>> {
        let normalized = path::clean(path)?;
        let entries = self
            .entries
            .read()
            .map_err(|_| VfsError::other("lock poisoned"))?;

        // Verify the path is a directory
        match entries.get(&normalized) {
            Some(Entry::Directory { .. }) => {}
            Some(_) => return Err(VfsError::not_a_directory(normalized)),
            None => return Err(VfsError::not_found(normalized)),
        }

        // Find all direct children
        let mut result: Vec<DirEntry> = entries
            .iter()
            .filter(|(entry_path, _)| {
                entry_path.as_str() != ROOT && path::parent(entry_path) == normalized
            })
            .map(|(entry_path, entry)| DirEntry::new(path::base(entry_path), entry.kind()))
            .collect();

        // Sort for consistent ordering
        result.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(result)
    }

    async fn read(&self, path: &str, offset: u64, size: u32) -> VfsResult<Vec<u8>> {
        let normalized = path::clean(path)?;
        let entries = self
            .entries
            .read()
            .map_err(|_| VfsError::other("lock poisoned"))?;

        match entries.get(&normalized) {
            Some(Entry::File { data, .. }) => {
                let start = (offset as usize).min(data.len());
                let end = (start + size as usize).min(data.len());
                Ok(data[start..end].to_vec())
            }
            Some(Entry::Directory { .. }) => Err(VfsError::is_a_directory(normalized)),
            None => Err(VfsError::not_found(normalized)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_and_read() {
        let fs = MemoryBackend::new();
        fs.write_file("test.txt", "hello world").unwrap();

        let data = fs.read("test.txt", 0, 100).await.unwrap();
        assert_eq!(data, b"hello world");
        assert_eq!(fs.read_all("test.txt").await.unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn test_partial_read() {
        let fs = MemoryBackend::new();
        fs.write_file("test.txt", "hello world").unwrap();

        let data = fs.read("test.txt", 6, 5).await.unwrap();
        assert_eq!(data, b"world");
    }

    #[tokio::test]
    async fn test_mkdir_and_readdir() {
        let fs = MemoryBackend::new();
        fs.mkdir("subdir").unwrap();
        fs.write_file("subdir/file.txt", "").unwrap();
        fs.write_file("root.txt", "").unwrap();

        let entries = fs.readdir(".").await.unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["root.txt", "subdir"]);
        assert!(entries[1].kind.is_dir());

        let subentries = fs.readdir("subdir").await.unwrap();
        assert_eq!(subentries, vec![DirEntry::file("file.txt")]);
    }

    #[tokio::test]
    async fn test_remove_subtree() {
        let fs = MemoryBackend::new();
        fs.write_file("a/b/c.txt", "c").unwrap();
        fs.write_file("ab.txt", "ab").unwrap();

        fs.remove("a").unwrap();
        assert!(!fs.exists("a").await);
        assert!(!fs.exists("a/b/c.txt").await);
        assert!(fs.exists("ab.txt").await);
        assert!(fs.remove("a").unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_auto_create_parents() {
        let fs = MemoryBackend::new();
        fs.write_file("a/b/c/file.txt", "").unwrap();

        assert!(fs.getattr("a").await.unwrap().is_dir());
        assert!(fs.getattr("a/b").await.unwrap().is_dir());
        assert!(fs.getattr("a/b/c").await.unwrap().is_dir());
    }

    #[tokio::test]
    async fn test_file_parent_conflict() {
        let fs = MemoryBackend::new();
        fs.write_file("a", "file").unwrap();
        assert!(matches!(
            fs.write_file("a/b", "x"),
            Err(VfsError::NotADirectory(_))
        ));
    }

    #[tokio::test]
    async fn test_path_normalization() {
        let fs = MemoryBackend::new();
        fs.write_file("/a/b/c.txt", "").unwrap();

        assert!(fs.getattr("a/b/c.txt").await.is_ok());
        assert!(fs.getattr("/a/b/c.txt").await.is_ok());
        assert!(fs.getattr("./a/b/c.txt").await.is_ok());
        assert!(fs.getattr("a/../b").await.unwrap_err().is_invalid());
    }
}
