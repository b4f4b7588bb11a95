//! VFS backends.
//!
//! Backends implement [`VfsOps`](super::VfsOps) for different storage types
//! and serve as the backing filesystem the generated tree overlays.

mod local;
mod memory;

pub use local::LocalBackend;
pub use memory::MemoryBackend;
