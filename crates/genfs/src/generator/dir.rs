//! Directory generators and the builder handed to them.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use super::{ExternalGenerator, FileGenerator, FileServer, File, Outcome};
use crate::cache::CacheEntry;
use crate::entry::Entry;
use crate::fs::FileSystem;
use crate::scope::{Scope, Stack};
use crate::vfs::{path, VfsOps, VfsResult};

/// Populates a directory by registering generators beneath it.
#[async_trait]
pub trait DirGenerator: Send + Sync {
    async fn generate_dir(&self, fsys: &Scope, dir: &Dir) -> VfsResult<()>;
}

/// Adapts an async closure into a [`DirGenerator`].
pub struct DirFn<F>(F);

impl<F, Fut> DirFn<F>
where
    F: Fn(Scope, Dir) -> Fut + Send + Sync,
    Fut: Future<Output = VfsResult<()>> + Send,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F, Fut> DirGenerator for DirFn<F>
where
    F: Fn(Scope, Dir) -> Fut + Send + Sync,
    Fut: Future<Output = VfsResult<()>> + Send,
{
    async fn generate_dir(&self, fsys: &Scope, dir: &Dir) -> VfsResult<()> {
        (self.0)(fsys.clone(), dir.clone()).await
    }
}

/// A directory under generation.
///
/// Registration methods take paths relative to the directory; nested
/// generators become visible as soon as they are registered.
#[derive(Clone)]
pub struct Dir {
    fsys: FileSystem,
    path: String,
    target: String,
}

impl std::fmt::Debug for Dir {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dir")
            .field("path", &self.path)
            .field("target", &self.target)
            .finish()
    }
}

impl Dir {
    pub(crate) fn new(fsys: FileSystem, path: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            fsys,
            path: path.into(),
            target: target.into(),
        }
    }

    /// Path of the directory.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Path whose request triggered generation: the directory itself or
    /// a descendant.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Target relative to the directory (`"."` when equal).
    pub fn relative(&self) -> &str {
        path::relative(&self.path, &self.target).unwrap_or(&self.target)
    }

    fn join(&self, rel: &str) -> VfsResult<String> {
        Ok(path::join(&self.path, &path::clean(rel)?))
    }

    /// Register a file generator closure at `rel`.
    pub fn generate_file<F, Fut>(&self, rel: &str, f: F) -> VfsResult<()>
    where
        F: Fn(Scope, File) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = VfsResult<Vec<u8>>> + Send + 'static,
    {
        self.fsys.generate_file(&self.join(rel)?, f)
    }

    /// Register a file generator object at `rel`.
    pub fn file_generator(&self, rel: &str, generator: impl FileGenerator + 'static) -> VfsResult<()> {
        self.fsys.file_generator(&self.join(rel)?, generator)
    }

    /// Register a nested directory generator closure at `rel`.
    pub fn generate_dir<F, Fut>(&self, rel: &str, f: F) -> VfsResult<()>
    where
        F: Fn(Scope, Dir) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = VfsResult<()>> + Send + 'static,
    {
        self.fsys.generate_dir(&self.join(rel)?, f)
    }

    /// Register a nested directory generator object at `rel`.
    pub fn dir_generator(&self, rel: &str, generator: impl DirGenerator + 'static) -> VfsResult<()> {
        self.fsys.dir_generator(&self.join(rel)?, generator)
    }

    /// Register a file server closure at `rel`.
    pub fn serve_file<F, Fut>(&self, rel: &str, f: F) -> VfsResult<()>
    where
        F: Fn(Scope, File) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = VfsResult<Vec<u8>>> + Send + 'static,
    {
        self.fsys.serve_file(&self.join(rel)?, f)
    }

    /// Register a file server object at `rel`.
    pub fn file_server(&self, rel: &str, server: impl FileServer + 'static) -> VfsResult<()> {
        self.fsys.file_server(&self.join(rel)?, server)
    }

    /// Mount another filesystem at `rel`.
    pub fn mount(&self, rel: &str, fsys: Arc<dyn VfsOps>) -> VfsResult<()> {
        self.fsys.mount(&self.join(rel)?, fsys)
    }

    /// Register an external generator closure at `rel`.
    pub fn generate_external<F, Fut>(&self, rel: &str, f: F) -> VfsResult<()>
    where
        F: Fn(Scope, File) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = VfsResult<()>> + Send + 'static,
    {
        self.fsys.generate_external(&self.join(rel)?, f)
    }

    /// Register an external generator object at `rel`.
    pub fn external_generator(
        &self,
        rel: &str,
        generator: impl ExternalGenerator + 'static,
    ) -> VfsResult<()> {
        self.fsys.external_generator(&self.join(rel)?, generator)
    }
}

/// Run a directory generator for `target`.
///
/// For the directory itself a cached listing is served when present.
/// For a descendant the callback always runs, since the descendant may
/// only exist once it has, and the caller resolves the target again.
pub(super) async fn generate(
    generator: &dyn DirGenerator,
    fsys: &FileSystem,
    path: &str,
    target: &str,
    stack: &Stack,
) -> VfsResult<Outcome> {
    let cache = fsys.cache();
    let exact = target == path;
    if exact {
        if let Some(hit) = cache.get(path)? {
            tracing::debug!(path = %path, "cache hit");
            return Ok(Outcome::Entry(hit.to_entry()));
        }
    }

    let stack = stack.enter(path)?;
    let _flight = fsys.single_flight(path).await;
    if exact {
        if let Some(hit) = cache.get(path)? {
            tracing::debug!(path = %path, "cache hit after wait");
            return Ok(Outcome::Entry(hit.to_entry()));
        }
    }

    fsys.clear_links(path)?;
    let scope = Scope::new(fsys.clone(), path, stack);
    let dir = Dir::new(fsys.nested(), path, target);
    generator
        .generate_dir(&scope, &dir)
        .await
        .map_err(|e| e.generating(path))?;

    let entry = Entry::dir(path, fsys.tree_children(path));
    cache.set(path, &CacheEntry::from_entry(&entry))?;

    if exact {
        Ok(Outcome::Entry(entry))
    } else {
        Ok(Outcome::Redispatch)
    }
}
