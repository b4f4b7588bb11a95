//! Generation cache and dependency links.
//!
//! The cache stores generated entries by path and a set of *links*: the
//! edge `(from, to)` records that generating `from` read `to`. Links are
//! literal paths, whatever characters they contain. *Watches* are the
//! pattern form, registered by generators that glob or watch paths that
//! might not exist yet. Deleting a path removes it and, transitively,
//! every cached artifact whose links or watches lead to it.
//!
//! Three tiers implement [`Cache`]:
//!
//! - [`NullCache`] - caches nothing, every read regenerates
//! - [`MemoryCache`] - concurrent in-process maps
//! - [`SqliteCache`] - durable `files`/`links` tables

mod graph;
mod memory;
mod sqlite;

use std::collections::{HashSet, VecDeque};
use std::time::SystemTime;

use thiserror::Error;

use crate::entry::{Entry, EntryData};
use crate::pattern::Matcher;
use crate::vfs::{DirEntry, FileType};

pub use graph::to_dot;
pub use memory::MemoryCache;
pub use sqlite::SqliteCache;

/// Cache error type.
#[derive(Debug, Error)]
pub enum CacheError {
    /// SQLite failure.
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A directory listing could not be encoded or decoded.
    #[error("encoding: {0}")]
    Encode(#[from] postcard::Error),

    /// A watched pattern does not compile.
    #[error("pattern: {0}")]
    Pattern(#[from] glob::PatternError),
}

/// Cache result type.
pub type CacheResult<T> = Result<T, CacheError>;

/// A cached generated entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub path: String,
    pub data: EntryData,
    /// Full mode integer, type bits included.
    pub mode: u32,
    /// Generation time, served as the entry's mtime on every hit.
    pub mtime: SystemTime,
}

impl CacheEntry {
    /// Capture an opened entry.
    pub fn from_entry(entry: &Entry) -> Self {
        Self {
            path: entry.path().to_string(),
            data: entry.data().clone(),
            mode: entry.attr().mode(),
            mtime: entry.attr().mtime,
        }
    }

    /// Rebuild an entry for serving.
    pub fn to_entry(&self) -> Entry {
        Entry::new(self.path.clone(), self.data.clone(), Some(self.mode & 0o7777))
            .with_mtime(self.mtime)
    }

    /// Encode for the `files(data, mode)` columns.
    pub fn encode(&self) -> CacheResult<Vec<u8>> {
        Ok(match &self.data {
            EntryData::File(bytes) => bytes.clone(),
            EntryData::Dir(children) => postcard::to_allocvec(children)?,
        })
    }

    /// Decode a `files` row.
    pub fn decode(path: String, data: &[u8], mode: u32, mtime: SystemTime) -> CacheResult<Self> {
        let data = match FileType::from_mode(mode) {
            FileType::Directory => EntryData::Dir(postcard::from_bytes::<Vec<DirEntry>>(data)?),
            _ => EntryData::File(data.to_vec()),
        };
        Ok(Self {
            path,
            data,
            mode,
            mtime,
        })
    }
}

/// A recorded read: generating `from` observed `to`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Link {
    pub from: String,
    pub to: String,
    /// `to` is a watched glob pattern rather than a literal path.
    pub pattern: bool,
}

impl Link {
    pub fn path(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            pattern: false,
        }
    }

    pub fn watch(from: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: pattern.into(),
            pattern: true,
        }
    }
}

/// Point-in-time view of a cache, for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    /// `(path, mode)` for every cached entry, sorted by path.
    pub files: Vec<(String, u32)>,
    /// Every link, sorted.
    pub links: Vec<Link>,
}

/// Generation cache contract.
pub trait Cache: Send + Sync {
    /// Cached entry for `path`, if any.
    fn get(&self, path: &str) -> CacheResult<Option<CacheEntry>>;

    /// Store or replace the entry for `path`.
    fn set(&self, path: &str, entry: &CacheEntry) -> CacheResult<()>;

    /// Record that generating `from` read each of the literal paths `to`.
    fn link(&self, from: &str, to: &[&str]) -> CacheResult<()>;

    /// Record that generating `from` depends on every path matching
    /// `patterns`, existing or not. Fails without recording anything if
    /// a pattern does not compile.
    fn watch(&self, from: &str, patterns: &[&str]) -> CacheResult<()>;

    /// Drop every link and watch recorded from `from`.
    fn unlink(&self, from: &str) -> CacheResult<()>;

    /// Delete `paths` and everything that transitively depends on them.
    ///
    /// Returns the deleted closure, seeds first.
    fn delete(&self, paths: &[&str]) -> CacheResult<Vec<String>>;

    /// Clear all entries and links.
    fn reset(&self) -> CacheResult<()>;

    /// All entries and links.
    fn snapshot(&self) -> CacheResult<Snapshot>;
}

/// Check every pattern up front so a bad one records nothing.
fn check_patterns(patterns: &[&str]) -> CacheResult<()> {
    for pattern in patterns {
        Matcher::new(pattern)?;
    }
    Ok(())
}

/// Compile stored watch patterns, skipping any that no longer compile.
fn compile_stored(patterns: impl IntoIterator<Item = String>) -> Vec<Matcher> {
    patterns
        .into_iter()
        .filter_map(|pattern| match Matcher::new(&pattern) {
            Ok(matcher) => Some(matcher),
            Err(e) => {
                tracing::warn!(pattern = %pattern, error = %e, "skipping stored watch");
                None
            }
        })
        .collect()
}

/// Breadth-first dependency closure.
///
/// `dependents(p)` returns every `from` linked to `p` or watching a
/// pattern that matches it. The visited set keeps cycles finite.
pub(crate) fn closure<F>(seeds: &[&str], mut dependents: F) -> CacheResult<Vec<String>>
where
    F: FnMut(&str) -> CacheResult<Vec<String>>,
{
    let mut visited: HashSet<String> = HashSet::new();
    let mut order = Vec::new();
    let mut frontier: VecDeque<String> = VecDeque::new();

    for seed in seeds {
        if visited.insert(seed.to_string()) {
            order.push(seed.to_string());
            frontier.push_back(seed.to_string());
        }
    }

    while let Some(path) = frontier.pop_front() {
        for from in dependents(&path)? {
            if visited.insert(from.clone()) {
                order.push(from.clone());
                frontier.push_back(from);
            }
        }
    }

    Ok(order)
}

/// Cache that stores nothing.
///
/// Every lookup misses, so every read regenerates. Pass it explicitly
/// where caching is unwanted.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullCache;

impl Cache for NullCache {
    fn get(&self, _path: &str) -> CacheResult<Option<CacheEntry>> {
        Ok(None)
    }

    fn set(&self, _path: &str, _entry: &CacheEntry) -> CacheResult<()> {
        Ok(())
    }

    fn link(&self, _from: &str, _to: &[&str]) -> CacheResult<()> {
        Ok(())
    }

    fn watch(&self, _from: &str, _patterns: &[&str]) -> CacheResult<()> {
        Ok(())
    }

    fn unlink(&self, _from: &str) -> CacheResult<()> {
        Ok(())
    }

    fn delete(&self, paths: &[&str]) -> CacheResult<Vec<String>> {
        Ok(paths.iter().map(|p| p.to_string()).collect())
    }

    fn reset(&self) -> CacheResult<()> {
        Ok(())
    }

    fn snapshot(&self) -> CacheResult<Snapshot> {
        Ok(Snapshot::default())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_codec() {
        let dir = CacheEntry::from_entry(&Entry::dir("d", vec![DirEntry::file("x")]));
        let blob = dir.encode().unwrap();
        let decoded = CacheEntry::decode("d".into(), &blob, dir.mode, dir.mtime).unwrap();
        assert_eq!(decoded, dir);
        assert!(decoded.to_entry().is_dir());

        let file = conformance::file("f", "hi");
        assert_eq!(file.encode().unwrap(), b"hi");
        assert_eq!(file.to_entry().attr().perm, 0o644);
        assert_eq!(file.to_entry().attr().mtime, file.mtime);
    }

    #[test]
    fn test_closure_order() {
        let edges = [("b", "a"), ("c", "a"), ("d", "b")];
        let order = closure(&["a"], |p| {
            Ok(edges
                .iter()
                .filter(|(_, to)| *to == p)
                .map(|(from, _)| from.to_string())
                .collect())
        })
        .unwrap();
        assert_eq!(order, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_null_cache() {
        let cache = NullCache;
        cache.set("a", &conformance::file("a", "a")).unwrap();
        assert_eq!(cache.get("a").unwrap(), None);
        assert_eq!(cache.delete(&["a"]).unwrap(), vec!["a"]);
    }
}
