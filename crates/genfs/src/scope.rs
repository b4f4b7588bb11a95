//! The filesystem view handed to generator callbacks.
//!
//! A [`Scope`] reads exactly like the [`FileSystem`] it wraps, but every
//! open, listing and glob goes through [`Cache::link`](crate::cache::Cache::link)
//! first, recorded against the path being generated. That is the only way
//! dependencies enter the cache; generators never declare them.

use std::sync::Arc;

use async_trait::async_trait;

use crate::entry::Entry;
use crate::fs::{FileSystem, LazyDirEntry};
use crate::pattern::Matcher;
use crate::vfs::path;
use crate::vfs::{DirEntry, FileAttr, VfsError, VfsOps, VfsResult};

/// Paths under generation in one call chain, outermost first.
#[derive(Debug, Clone, Default)]
pub(crate) struct Stack(Vec<String>);

impl Stack {
    pub fn contains(&self, path: &str) -> bool {
        self.0.iter().any(|p| p == path)
    }

    /// Push `path`, failing if it is already being generated.
    pub fn enter(&self, path: &str) -> VfsResult<Stack> {
        if self.contains(path) {
            tracing::warn!(path = %path, stack = ?self.0, "generation cycle");
            return Err(VfsError::Cycle(path.to_string()));
        }
        let mut next = self.0.clone();
        next.push(path.to_string());
        Ok(Stack(next))
    }
}

/// Dependency-recording view of a [`FileSystem`].
#[derive(Clone)]
pub struct Scope {
    fsys: FileSystem,
    from: String,
    stack: Stack,
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("from", &self.from)
            .field("stack", &self.stack)
            .finish()
    }
}

impl Scope {
    pub(crate) fn new(fsys: FileSystem, from: impl Into<String>, stack: Stack) -> Self {
        Self {
            fsys,
            from: from.into(),
            stack,
        }
    }

    /// Path whose generation this view records for.
    pub fn path(&self) -> &str {
        &self.from
    }

    /// The unrecorded filesystem underneath.
    pub fn filesystem(&self) -> &FileSystem {
        &self.fsys
    }

    fn link(&self, to: &[&str]) -> VfsResult<()> {
        self.fsys.cache().link(&self.from, to)?;
        Ok(())
    }

    /// Open `target`, recording it as a dependency.
    ///
    /// The link is recorded even when the open fails, so a path that does
    /// not exist yet still invalidates this generator once it appears.
    pub async fn open(&self, target: &str) -> VfsResult<Entry> {
        let target = path::clean(target)?;
        self.link(&[&target])?;
        self.fsys.resolve(&target, None, &self.stack).await
    }

    /// Open `target` and return its bytes.
    pub async fn read_file(&self, target: &str) -> VfsResult<Vec<u8>> {
        self.open(target).await?.into_bytes()
    }

    /// List `target`, recording it as a dependency.
    ///
    /// Stat calls on the returned entries are recorded too.
    pub async fn read_dir(&self, target: &str) -> VfsResult<Vec<LazyDirEntry>> {
        let target = path::clean(target)?;
        self.link(&[&target])?;
        let source: Arc<dyn VfsOps> = Arc::new(self.clone());
        self.fsys.list(&target, &self.stack, source).await
    }

    /// Paths matching `pattern`.
    ///
    /// The pattern itself is recorded, so a file created later that
    /// matches it invalidates this generator even if nothing matches now.
    pub async fn glob(&self, pattern: &str) -> VfsResult<Vec<String>> {
        self.watch(&[pattern])?;
        self.fsys.glob_with(pattern, &self.stack).await
    }

    /// Record `patterns` as dependencies without reading anything.
    pub fn watch(&self, patterns: &[&str]) -> VfsResult<()> {
        for pattern in patterns {
            Matcher::new(pattern)
                .map_err(|e| VfsError::invalid_path(format!("{pattern}: {e}")))?;
        }
        self.fsys.cache().watch(&self.from, patterns)?;
        Ok(())
    }
}

#[async_trait]
impl VfsOps for Scope {
    async fn getattr(&self, path: &str) -> VfsResult<FileAttr> {
        Ok(self.open(path).await?.attr().clone())
    }

    async fn readdir(&self, path: &str) -> VfsResult<Vec<DirEntry>> {
        Ok(self
            .read_dir(path)
            .await?
            .into_iter()
            .map(|entry| entry.to_dir_entry())
            .collect())
    }

    async fn read(&self, path: &str, offset: u64, size: u32) -> VfsResult<Vec<u8>> {
        let entry = self.open(path).await?;
        Ok(slice(entry.contents()?, offset, size).to_vec())
    }
}

/// The `[offset, offset + size)` window of `bytes`, clamped.
pub(crate) fn slice(bytes: &[u8], offset: u64, size: u32) -> &[u8] {
    let start = (offset as usize).min(bytes.len());
    let end = start.saturating_add(size as usize).min(bytes.len());
    &bytes[start..end]
}
