//! Single-file generators.

use std::future::Future;

use async_trait::async_trait;

use crate::cache::CacheEntry;
use crate::entry::Entry;
use crate::fs::FileSystem;
use crate::scope::{Scope, Stack};
use crate::vfs::path;
use crate::vfs::VfsResult;

/// The file being generated.
///
/// `path` is where the generator is registered; `target` is the path
/// actually requested. They differ only for servers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    path: String,
    target: String,
}

impl File {
    pub(crate) fn new(path: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            target: target.into(),
        }
    }

    /// Registration path of the generator.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Requested path.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Target relative to the registration path (`"."` when equal).
    pub fn relative(&self) -> &str {
        path::relative(&self.path, &self.target).unwrap_or(&self.target)
    }
}

/// Produces the bytes of one file.
#[async_trait]
pub trait FileGenerator: Send + Sync {
    async fn generate_file(&self, fsys: &Scope, file: &File) -> VfsResult<Vec<u8>>;
}

/// Adapts an async closure into a [`FileGenerator`].
pub struct FileFn<F>(F);

impl<F, Fut> FileFn<F>
where
    F: Fn(Scope, File) -> Fut + Send + Sync,
    Fut: Future<Output = VfsResult<Vec<u8>>> + Send,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F, Fut> FileGenerator for FileFn<F>
where
    F: Fn(Scope, File) -> Fut + Send + Sync,
    Fut: Future<Output = VfsResult<Vec<u8>>> + Send,
{
    async fn generate_file(&self, fsys: &Scope, file: &File) -> VfsResult<Vec<u8>> {
        (self.0)(fsys.clone(), file.clone()).await
    }
}

/// Serve `key` from the cache, or run the generator and cache its output.
///
/// `key` is the path the result is cached (and linked) under.
pub(crate) async fn cached<G, Fut>(fsys: &FileSystem, key: &str, stack: &Stack, run: G) -> VfsResult<Entry>
where
    G: FnOnce(Scope) -> Fut,
    Fut: Future<Output = VfsResult<Vec<u8>>>,
{
    let cache = fsys.cache();
    if let Some(hit) = cache.get(key)? {
        tracing::debug!(path = %key, "cache hit");
        return Ok(hit.to_entry());
    }

    let stack = stack.enter(key)?;
    let _flight = fsys.single_flight(key).await;
    // Another caller may have finished while we waited
    if let Some(hit) = cache.get(key)? {
        tracing::debug!(path = %key, "cache hit after wait");
        return Ok(hit.to_entry());
    }

    tracing::debug!(path = %key, "cache miss");
    fsys.clear_links(key)?;
    let scope = Scope::new(fsys.clone(), key, stack);
    let data = run(scope).await.map_err(|e| e.generating(key))?;

    let entry = Entry::file(key, data);
    cache.set(key, &CacheEntry::from_entry(&entry))?;
    Ok(entry)
}

pub(super) async fn generate(
    generator: &dyn FileGenerator,
    fsys: &FileSystem,
    path: &str,
    target: &str,
    stack: &Stack,
) -> VfsResult<Entry> {
    let file = File::new(path, target);
    cached(fsys, path, stack, move |scope| async move {
        generator.generate_file(&scope, &file).await
    })
    .await
}
