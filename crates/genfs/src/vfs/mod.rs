//! Virtual Filesystem abstraction.
//!
//! The read surface every filesystem in this crate speaks:
//!
//! - [`VfsOps`] - Core trait for read operations
//! - [`MemoryBackend`] - In-memory filesystem (scratch space, testing)
//! - [`LocalBackend`] - Local filesystem access (with path security)
//!
//! ## Design Decisions
//!
//! - **Path-based, no inodes**: Operations use slash-separated relative
//!   paths; the root is `"."`.
//! - **Explicit offset/size**: Reads take offset and size without handle
//!   state.
//! - **Not-found is a signal**: [`VfsError::is_not_found`] tells the
//!   generated filesystem to fall through to its next resolver.

pub mod backends;
mod error;
mod ops;
pub mod path;
mod types;

pub use backends::{LocalBackend, MemoryBackend};
pub use error::{VfsError, VfsResult};
pub use ops::VfsOps;
pub use types::{DirEntry, FileAttr, FileType, DIR_PERM, FILE_PERM};
