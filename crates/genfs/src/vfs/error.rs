//! VFS error types.

use std::io;
use thiserror::Error;

use crate::cache::CacheError;

/// VFS error type.
///
/// [`VfsError::NotFound`] doubles as a control-flow signal: the resolver
/// treats it as "try the next source" rather than as a failure.
#[derive(Debug, Error)]
pub enum VfsError {
    /// File or directory not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed path.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Operation unsupported by this kind of node.
    #[error("invalid operation: {0}")]
    Invalid(String),

    /// Expected a directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Expected a file.
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// Path escapes root (security violation).
    #[error("path escapes root: {0}")]
    PathEscapesRoot(String),

    /// A generator transitively opened its own output.
    #[error("generation cycle at {0}")]
    Cycle(String),

    /// A generator callback failed.
    #[error("generating {path}: {source}")]
    Generate {
        path: String,
        #[source]
        source: Box<VfsError>,
    },

    /// Cache read or write failed.
    #[error("cache: {0}")]
    Cache(#[from] CacheError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl VfsError {
    /// Create a NotFound error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create an InvalidPath error.
    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath(path.into())
    }

    /// Create an Invalid error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }

    /// Create a NotADirectory error.
    pub fn not_a_directory(path: impl Into<String>) -> Self {
        Self::NotADirectory(path.into())
    }

    /// Create an IsADirectory error.
    pub fn is_a_directory(path: impl Into<String>) -> Self {
        Self::IsADirectory(path.into())
    }

    /// Create a PathEscapesRoot error.
    pub fn path_escapes_root(path: impl Into<String>) -> Self {
        Self::PathEscapesRoot(path.into())
    }

    /// Create an Other error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Annotate a callback failure with the path under generation.
    ///
    /// Not-found passes through untouched so fallback resolvers still run,
    /// and an error that already carries a path is not wrapped again.
    pub fn generating(self, path: impl Into<String>) -> Self {
        match self {
            e if e.is_not_found() => e,
            e @ (VfsError::Generate { .. } | VfsError::Cycle(_)) => e,
            e => VfsError::Generate {
                path: path.into(),
                source: Box::new(e),
            },
        }
    }

    /// Returns true if this error means the path does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            VfsError::NotFound(_) => true,
            VfsError::Io(e) => e.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// Returns true for errors caused by an unsupported operation.
    pub fn is_invalid(&self) -> bool {
        matches!(self, VfsError::Invalid(_) | VfsError::InvalidPath(_))
    }
}

/// Convert VfsError to std::io::Error for compatibility.
impl From<VfsError> for io::Error {
    fn from(e: VfsError) -> Self {
        match e {
            VfsError::NotFound(msg) => io::Error::new(io::ErrorKind::NotFound, msg),
            VfsError::InvalidPath(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
            VfsError::Invalid(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
            VfsError::NotADirectory(msg) => io::Error::new(io::ErrorKind::NotADirectory, msg),
            VfsError::IsADirectory(msg) => io::Error::new(io::ErrorKind::IsADirectory, msg),
            VfsError::PathEscapesRoot(msg) => {
                io::Error::new(io::ErrorKind::PermissionDenied, msg)
            }
            VfsError::Io(e) => e,
            e => io::Error::other(e.to_string()),
        }
    }
}

/// VFS result type.
pub type VfsResult<T> = Result<T, VfsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generating_wraps_once() {
        let err = VfsError::other("boom").generating("a").generating("b");
        match err {
            VfsError::Generate { path, source } => {
                assert_eq!(path, "a");
                assert!(matches!(*source, VfsError::Other(_)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_generating_keeps_not_found() {
        let err = VfsError::not_found("x").generating("a");
        assert!(err.is_not_found());

        let io_err = VfsError::from(io::Error::from(io::ErrorKind::NotFound)).generating("a");
        assert!(io_err.is_not_found());
    }

    #[test]
    fn test_generating_keeps_cycle() {
        let err = VfsError::Cycle("a".into()).generating("b");
        assert!(matches!(err, VfsError::Cycle(path) if path == "a"));
    }

    #[test]
    fn test_into_io_error() {
        let err: io::Error = VfsError::invalid("readdir on server").into();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
