//! # genfs
//!
//! A lazily generated, dependency-tracked virtual filesystem.
//!
//! Generators are callbacks registered against paths. Nothing runs until
//! a path is opened:
//! - File generators produce one file and are cached by path
//! - Directory generators register further generators beneath them
//! - File servers answer any path under a directory on demand
//! - Mounts and external generators graft other filesystems in
//!
//! Every read a generator performs goes through a [`Scope`], which records
//! it as a link in the [`Cache`]. Invalidating a path deletes it and
//! everything generated from it, so the next open regenerates exactly
//! what changed.

pub mod cache;
pub mod config;
pub mod entry;
pub mod fs;
pub mod generator;
pub mod pattern;
pub mod scope;
pub mod tree;
pub mod vfs;

pub use cache::{Cache, CacheEntry, CacheError, Link, MemoryCache, NullCache, Snapshot, SqliteCache, to_dot};
pub use config::{CacheConfig, ConfigError, GenfsConfig};
pub use entry::{Entry, EntryData};
pub use fs::{FileSystem, LazyDirEntry, Options};
pub use generator::{
    Dir, DirFn, DirGenerator, ExternalFn, ExternalGenerator, File, FileFn, FileGenerator,
    FileServer, Generator, ServeFn,
};
pub use scope::Scope;
pub use vfs::{
    DirEntry, FileAttr, FileType, LocalBackend, MemoryBackend, VfsError, VfsOps, VfsResult,
};
