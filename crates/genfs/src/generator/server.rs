//! Open namespaces: file servers, external generators and mounts.
//!
//! None of these register descendants ahead of time. A server answers
//! any target beneath its directory; an external generator writes its
//! file into the backing store; a mount forwards to another filesystem.

use std::future::Future;

use async_trait::async_trait;

use super::file::{cached, File};
use crate::entry::Entry;
use crate::fs::{open_from, FileSystem};
use crate::scope::{Scope, Stack};
use crate::vfs::path::{self, ROOT};
use crate::vfs::{VfsError, VfsOps, VfsResult};

/// Answers requests for any file beneath a directory.
#[async_trait]
pub trait FileServer: Send + Sync {
    async fn serve_file(&self, fsys: &Scope, file: &File) -> VfsResult<Vec<u8>>;
}

/// Adapts an async closure into a [`FileServer`].
pub struct ServeFn<F>(F);

impl<F, Fut> ServeFn<F>
where
    F: Fn(Scope, File) -> Fut + Send + Sync,
    Fut: Future<Output = VfsResult<Vec<u8>>> + Send,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F, Fut> FileServer for ServeFn<F>
where
    F: Fn(Scope, File) -> Fut + Send + Sync,
    Fut: Future<Output = VfsResult<Vec<u8>>> + Send,
{
    async fn serve_file(&self, fsys: &Scope, file: &File) -> VfsResult<Vec<u8>> {
        (self.0)(fsys.clone(), file.clone()).await
    }
}

/// Materializes a file in the backing filesystem.
#[async_trait]
pub trait ExternalGenerator: Send + Sync {
    async fn generate_external(&self, fsys: &Scope, file: &File) -> VfsResult<()>;
}

/// Adapts an async closure into an [`ExternalGenerator`].
pub struct ExternalFn<F>(F);

impl<F, Fut> ExternalFn<F>
where
    F: Fn(Scope, File) -> Fut + Send + Sync,
    Fut: Future<Output = VfsResult<()>> + Send,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F, Fut> ExternalGenerator for ExternalFn<F>
where
    F: Fn(Scope, File) -> Fut + Send + Sync,
    Fut: Future<Output = VfsResult<()>> + Send,
{
    async fn generate_external(&self, fsys: &Scope, file: &File) -> VfsResult<()> {
        (self.0)(fsys.clone(), file.clone()).await
    }
}

/// Serve `target` from the server registered at `path`.
///
/// The root of a server is an empty directory: it exists, but its
/// contents cannot be listed. Every target beneath it is cached on its
/// own.
pub(super) async fn serve(
    server: &dyn FileServer,
    fsys: &FileSystem,
    path: &str,
    target: &str,
    stack: &Stack,
) -> VfsResult<Entry> {
    if target == path {
        return Ok(Entry::dir(path, Vec::new()));
    }

    let file = File::new(path, target);
    cached(fsys, target, stack, move |scope| async move {
        server.serve_file(&scope, &file).await
    })
    .await
}

/// Serve `path` from the backing filesystem, running the generator first
/// if the backing filesystem does not have it yet.
pub(super) async fn external(
    generator: &dyn ExternalGenerator,
    fsys: &FileSystem,
    path: &str,
    target: &str,
    stack: &Stack,
) -> VfsResult<Entry> {
    let backing = fsys.backing();
    match open_from(backing.as_ref(), target, target).await {
        Ok(entry) => return Ok(entry),
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e),
    }

    let stack = stack.enter(path)?;
    let _flight = fsys.single_flight(path).await;
    if backing.exists(target).await {
        return open_from(backing.as_ref(), target, target).await;
    }

    fsys.clear_links(path)?;
    let scope = Scope::new(fsys.clone(), path, stack);
    generator
        .generate_external(&scope, &File::new(path, target))
        .await
        .map_err(|e| e.generating(path))?;

    tracing::debug!(path = %path, "external generator wrote backing file");
    open_from(backing.as_ref(), target, target)
        .await
        .map_err(|e| match e {
            e if e.is_not_found() => VfsError::Generate {
                path: path.to_string(),
                source: Box::new(VfsError::other("external generator did not create its file")),
            },
            e => e,
        })
}

/// Forward `target` to the filesystem mounted at `path`.
pub(super) async fn mount(mounted: &dyn VfsOps, path: &str, target: &str) -> VfsResult<Entry> {
    let inner = path::relative(path, target).unwrap_or(ROOT);
    open_from(mounted, inner, target).await
}
