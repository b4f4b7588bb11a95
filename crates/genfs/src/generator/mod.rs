//! Generators: callbacks that materialize paths on demand.
//!
//! A [`Generator`] is the closed set of things a tree node can hold:
//!
//! - [`Generator::File`] - one file, cached by its exact path
//! - [`Generator::Dir`] - a directory whose callback registers children
//! - [`Generator::Server`] - an open namespace answered per target
//! - [`Generator::External`] - a callback that writes the backing store
//! - [`Generator::Mount`] - another filesystem grafted at a directory
//!
//! Each callback kind is a trait so generators can be registered as
//! objects; plain async closures are adapted through [`FileFn`],
//! [`DirFn`], [`ServeFn`] and [`ExternalFn`].

mod dir;
mod file;
mod server;

use std::sync::Arc;

use crate::entry::Entry;
use crate::fs::FileSystem;
use crate::scope::Stack;
use crate::vfs::{VfsOps, VfsResult};

pub use dir::{Dir, DirFn, DirGenerator};
pub use file::{File, FileFn, FileGenerator};
pub use server::{ExternalFn, ExternalGenerator, FileServer, ServeFn};

/// A generator held by a tree node.
#[derive(Clone)]
pub enum Generator {
    File(Arc<dyn FileGenerator>),
    Dir(Arc<dyn DirGenerator>),
    Server(Arc<dyn FileServer>),
    External(Arc<dyn ExternalGenerator>),
    Mount(Arc<dyn VfsOps>),
}

/// Result of running a generator for a target.
pub(crate) enum Outcome {
    /// The target was produced.
    Entry(Entry),
    /// A directory generator ran for a descendant; resolve the target again.
    Redispatch,
}

impl Generator {
    /// Short name of the variant, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Generator::File(_) => "file",
            Generator::Dir(_) => "dir",
            Generator::Server(_) => "server",
            Generator::External(_) => "external",
            Generator::Mount(_) => "mount",
        }
    }

    /// Produce `target` using the generator registered at `path`.
    ///
    /// `stack` holds the paths already under generation in this call
    /// chain.
    pub(crate) async fn generate(
        &self,
        fsys: &FileSystem,
        path: &str,
        target: &str,
        stack: &Stack,
    ) -> VfsResult<Outcome> {
        tracing::debug!(path = %path, target = %target, kind = self.kind(), "generate");
        match self {
            Generator::File(generator) => {
                file::generate(generator.as_ref(), fsys, path, target, stack)
                    .await
                    .map(Outcome::Entry)
            }
            Generator::Dir(generator) => dir::generate(generator.as_ref(), fsys, path, target, stack).await,
            Generator::Server(server) => {
                server::serve(server.as_ref(), fsys, path, target, stack)
                    .await
                    .map(Outcome::Entry)
            }
            Generator::External(generator) => {
                server::external(generator.as_ref(), fsys, path, target, stack)
                    .await
                    .map(Outcome::Entry)
            }
            Generator::Mount(mounted) => server::mount(mounted.as_ref(), path, target)
                .await
                .map(Outcome::Entry),
        }
    }
}
