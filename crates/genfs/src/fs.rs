//! The generated filesystem.
//!
//! [`FileSystem`] overlays registered generators on a backing filesystem.
//! `open` tries four sources in order, moving on only when the previous
//! one reports not-found:
//!
//! 1. a generator registered at exactly the target
//! 2. the backing filesystem
//! 3. a filler directory in the tree (listing synthesized from its children)
//! 4. the closest ancestor directory generator, run for the target
//!
//! Step 4 may register the target as a side effect, in which case
//! resolution starts over, refusing to dispatch to the same node twice.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::future::Future;
use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::cache::Cache;
use crate::config::{ConfigError, GenfsConfig};
use crate::entry::{Entry, EntryData};
use crate::generator::{
    Dir, DirFn, DirGenerator, ExternalFn, ExternalGenerator, File, FileFn, FileGenerator,
    FileServer, Generator, Outcome, ServeFn,
};
use crate::pattern::{self, Matcher};
use crate::scope::{slice, Scope, Stack};
use crate::tree::{Mode, Node, NodeId, Tree};
use crate::vfs::path::{self, ROOT};
use crate::vfs::{DirEntry, FileAttr, FileType, VfsError, VfsOps, VfsResult};

/// Engine behavior switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    /// At most one generator run per uncached path at a time.
    pub single_flight: bool,
    /// Drop a path's recorded links before its generator runs again.
    pub clear_stale_links: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            single_flight: true,
            clear_stale_links: true,
        }
    }
}

struct Inner {
    tree: RwLock<Tree>,
    cache: Arc<dyn Cache>,
    backing: Arc<dyn VfsOps>,
    flights: DashMap<String, Arc<Mutex<()>>>,
    options: Options,
}

/// Lazily generated filesystem over a backing filesystem.
///
/// Cheap to clone; clones share the tree, cache and backing store.
#[derive(Clone)]
pub struct FileSystem {
    inner: Arc<Inner>,
    /// Set on the handle given to directory generators, whose reruns
    /// register the same children again.
    nested: bool,
}

impl std::fmt::Debug for FileSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSystem")
            .field("options", &self.inner.options)
            .finish_non_exhaustive()
    }
}

/// Exclusive right to generate one key.
///
/// Dropping it releases the lock and forgets the key once no other
/// caller is waiting on it.
pub(crate) struct Flight {
    inner: Arc<Inner>,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for Flight {
    fn drop(&mut self) {
        // Release first so only the map and any waiters still hold the lock
        drop(self.guard.take());
        self.inner
            .flights
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// A tree node's fields, copied out so no lock is held while generating.
struct Found {
    id: NodeId,
    path: String,
    mode: Mode,
    generator: Option<Generator>,
}

impl From<&Node> for Found {
    fn from(node: &Node) -> Self {
        Self {
            id: node.id,
            path: node.path.clone(),
            mode: node.mode,
            generator: node.generator.clone(),
        }
    }
}

/// Errors that mean "this source has nothing at that path".
fn is_missing(e: &VfsError) -> bool {
    match e {
        VfsError::NotADirectory(_) => true,
        VfsError::Io(err) => err.kind() == io::ErrorKind::NotADirectory || e.is_not_found(),
        e => e.is_not_found(),
    }
}

/// Open `path` on `ops`, naming the resulting entry `entry_path`.
pub(crate) async fn open_from(ops: &dyn VfsOps, path: &str, entry_path: &str) -> VfsResult<Entry> {
    let attr = ops.getattr(path).await?;
    if attr.is_dir() {
        Ok(Entry::dir(entry_path, ops.readdir(path).await?))
    } else {
        let data = ops.read_all(path).await?;
        Ok(Entry::new(entry_path, EntryData::File(data), Some(attr.perm)))
    }
}

impl FileSystem {
    /// Overlay generators on `backing`, caching into `cache`.
    pub fn new(backing: Arc<dyn VfsOps>, cache: Arc<dyn Cache>) -> Self {
        Self::with_options(backing, cache, Options::default())
    }

    /// Like [`FileSystem::new`] with explicit options.
    pub fn with_options(backing: Arc<dyn VfsOps>, cache: Arc<dyn Cache>, options: Options) -> Self {
        Self {
            inner: Arc::new(Inner {
                tree: RwLock::new(Tree::new()),
                cache,
                backing,
                flights: DashMap::new(),
                options,
            }),
            nested: false,
        }
    }

    /// Build from a loaded configuration, opening the configured cache.
    pub fn with_config(backing: Arc<dyn VfsOps>, config: &GenfsConfig) -> Result<Self, ConfigError> {
        Ok(Self::with_options(backing, config.open_cache()?, config.options()))
    }

    /// The generation cache.
    pub fn cache(&self) -> &Arc<dyn Cache> {
        &self.inner.cache
    }

    /// The backing filesystem.
    pub fn backing(&self) -> &Arc<dyn VfsOps> {
        &self.inner.backing
    }

    pub fn options(&self) -> Options {
        self.inner.options
    }

    /// Handle for registrations made while generating a directory.
    pub(crate) fn nested(&self) -> FileSystem {
        Self {
            inner: Arc::clone(&self.inner),
            nested: true,
        }
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Insert a generator at `path`.
    ///
    /// Replacing an existing generator deletes its cached output and
    /// dependents, unless the registration comes from a directory
    /// generator rerun.
    fn register(&self, path: &str, mode: Mode, generator: Generator) -> VfsResult<()> {
        let path = path::clean(path)?;
        tracing::debug!(path = %path, kind = generator.kind(), "register");
        let replaced = {
            let mut tree = self.inner.tree.write();
            let replaced = tree.find(&path).is_some_and(|node| node.generator.is_some());
            tree.insert(&path, mode, Some(generator));
            replaced
        };
        if replaced && !self.nested {
            let deleted = self.inner.cache.delete(&[&path])?;
            tracing::debug!(path = %path, deleted = deleted.len(), "replaced generator");
        }
        Ok(())
    }

    /// Register a file generator closure at `path`.
    pub fn generate_file<F, Fut>(&self, path: &str, f: F) -> VfsResult<()>
    where
        F: Fn(Scope, File) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = VfsResult<Vec<u8>>> + Send + 'static,
    {
        self.file_generator(path, FileFn::new(f))
    }

    /// Register a file generator object at `path`.
    pub fn file_generator(&self, path: &str, generator: impl FileGenerator + 'static) -> VfsResult<()> {
        self.register(path, Mode::empty(), Generator::File(Arc::new(generator)))
    }

    /// Register a directory generator closure at `path`.
    pub fn generate_dir<F, Fut>(&self, path: &str, f: F) -> VfsResult<()>
    where
        F: Fn(Scope, Dir) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = VfsResult<()>> + Send + 'static,
    {
        self.dir_generator(path, DirFn::new(f))
    }

    /// Register a directory generator object at `path`.
    pub fn dir_generator(&self, path: &str, generator: impl DirGenerator + 'static) -> VfsResult<()> {
        self.register(path, Mode::DIR, Generator::Dir(Arc::new(generator)))
    }

    /// Register a file server closure answering every path beneath `dir`.
    pub fn serve_file<F, Fut>(&self, dir: &str, f: F) -> VfsResult<()>
    where
        F: Fn(Scope, File) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = VfsResult<Vec<u8>>> + Send + 'static,
    {
        self.file_server(dir, ServeFn::new(f))
    }

    /// Register a file server object answering every path beneath `dir`.
    pub fn file_server(&self, dir: &str, server: impl FileServer + 'static) -> VfsResult<()> {
        self.register(dir, Mode::DIR, Generator::Server(Arc::new(server)))
    }

    /// Serve every path beneath `dir` from `fsys`.
    pub fn mount(&self, dir: &str, fsys: Arc<dyn VfsOps>) -> VfsResult<()> {
        self.register(dir, Mode::DIR, Generator::Mount(fsys))
    }

    /// Register an external generator closure at `path`.
    pub fn generate_external<F, Fut>(&self, path: &str, f: F) -> VfsResult<()>
    where
        F: Fn(Scope, File) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = VfsResult<()>> + Send + 'static,
    {
        self.external_generator(path, ExternalFn::new(f))
    }

    /// Register an external generator object at `path`.
    pub fn external_generator(
        &self,
        path: &str,
        generator: impl ExternalGenerator + 'static,
    ) -> VfsResult<()> {
        self.register(path, Mode::empty(), Generator::External(Arc::new(generator)))
    }

    // ========================================================================
    // Reading
    // ========================================================================

    /// Open a file or directory, generating it if needed.
    #[tracing::instrument(skip(self), name = "genfs.open")]
    pub async fn open(&self, path: &str) -> VfsResult<Entry> {
        let target = path::clean(path)?;
        self.resolve(&target, None, &Stack::default()).await
    }

    /// Open a file and return its bytes.
    pub async fn read_file(&self, path: &str) -> VfsResult<Vec<u8>> {
        self.open(path).await?.into_bytes()
    }

    /// List a directory: generated children merged over backing children.
    ///
    /// Entries are sorted by name; a generated entry hides a backing entry
    /// of the same name. Nothing is generated for the children until
    /// [`LazyDirEntry::attr`] is called.
    #[tracing::instrument(skip(self), name = "genfs.read_dir")]
    pub async fn read_dir(&self, path: &str) -> VfsResult<Vec<LazyDirEntry>> {
        let target = path::clean(path)?;
        let source: Arc<dyn VfsOps> = Arc::new(self.clone());
        self.list(&target, &Stack::default(), source).await
    }

    /// Paths matching `pattern`, sorted.
    #[tracing::instrument(skip(self), name = "genfs.glob")]
    pub async fn glob(&self, pattern: &str) -> VfsResult<Vec<String>> {
        self.glob_with(pattern, &Stack::default()).await
    }

    /// Delete `paths` from the cache along with everything generated
    /// from them.
    #[tracing::instrument(skip(self), name = "cache.delete")]
    pub fn invalidate(&self, paths: &[&str]) -> VfsResult<Vec<String>> {
        let cleaned = paths
            .iter()
            .map(|p| path::clean(p))
            .collect::<VfsResult<Vec<_>>>()?;
        let seeds: Vec<&str> = cleaned.iter().map(String::as_str).collect();
        Ok(self.inner.cache.delete(&seeds)?)
    }

    // ========================================================================
    // Resolution
    // ========================================================================

    fn find(&self, path: &str) -> Option<Found> {
        self.inner.tree.read().find(path).map(Found::from)
    }

    fn find_by_prefix(&self, path: &str) -> Option<Found> {
        self.inner.tree.read().find_by_prefix(path).map(Found::from)
    }

    /// Children registered under `path`, empty if it is not in the tree.
    pub(crate) fn tree_children(&self, path: &str) -> Vec<DirEntry> {
        let tree = self.inner.tree.read();
        match tree.find(path) {
            Some(node) => tree.children(node.id),
            None => Vec::new(),
        }
    }

    pub(crate) async fn single_flight(&self, key: &str) -> Option<Flight> {
        if !self.inner.options.single_flight {
            return None;
        }
        let lock = self.inner.flights.entry(key.to_string()).or_default().clone();
        let guard = lock.lock_owned().await;
        Some(Flight {
            inner: Arc::clone(&self.inner),
            key: key.to_string(),
            guard: Some(guard),
        })
    }

    pub(crate) fn clear_links(&self, path: &str) -> VfsResult<()> {
        if self.inner.options.clear_stale_links {
            self.inner.cache.unlink(path)?;
        }
        Ok(())
    }

    /// Resolve a clean `target`.
    ///
    /// `prev` is the node the previous prefix dispatch ran, if any.
    pub(crate) fn resolve<'a>(
        &'a self,
        target: &'a str,
        prev: Option<NodeId>,
        stack: &'a Stack,
    ) -> BoxFuture<'a, VfsResult<Entry>> {
        Box::pin(async move {
            let exact = self.find(target);

            if let Some(node) = &exact {
                if let Some(generator) = &node.generator {
                    match generator.generate(self, &node.path, target, stack).await {
                        Ok(Outcome::Entry(entry)) => return Ok(entry),
                        Ok(Outcome::Redispatch) => {}
                        Err(e) if e.is_not_found() => {}
                        Err(e) => return Err(e),
                    }
                }
            }

            match open_from(self.inner.backing.as_ref(), target, target).await {
                Ok(entry) => {
                    tracing::debug!(path = %target, "served from backing");
                    return Ok(entry);
                }
                Err(e) if is_missing(&e) => {}
                Err(e) => return Err(e),
            }

            if let Some(node) = &exact {
                if node.mode.is_filler() {
                    tracing::debug!(path = %target, "synthesized filler listing");
                    return Ok(Entry::dir(target, self.tree_children(target)));
                }
                return Err(VfsError::not_found(target));
            }

            let Some(node) = self.find_by_prefix(target) else {
                return Err(VfsError::not_found(target));
            };
            let Some(generator) = &node.generator else {
                return Err(VfsError::not_found(target));
            };
            if prev == Some(node.id) || stack.contains(&node.path) {
                return Err(VfsError::not_found(target));
            }

            tracing::debug!(path = %target, node = %node.path, "prefix dispatch");
            match generator.generate(self, &node.path, target, stack).await? {
                Outcome::Entry(entry) => Ok(entry),
                Outcome::Redispatch => self.resolve(target, Some(node.id), stack).await,
            }
        })
    }

    /// The tree's half of a listing; `None` when the tree has nothing there.
    fn tree_listing<'a>(
        &'a self,
        target: &'a str,
        prev: Option<NodeId>,
        stack: &'a Stack,
    ) -> BoxFuture<'a, VfsResult<Option<Vec<DirEntry>>>> {
        Box::pin(async move {
            if let Some(node) = self.find(target) {
                let Some(generator) = &node.generator else {
                    return Ok(Some(self.tree_children(target)));
                };
                return match generator {
                    Generator::Server(_) => Err(VfsError::invalid(format!(
                        "{target} is served on demand and cannot be listed"
                    ))),
                    Generator::File(_) | Generator::External(_) => {
                        Err(VfsError::not_a_directory(target))
                    }
                    // Listing itself from inside its own generator
                    Generator::Dir(_) if stack.contains(&node.path) => {
                        Ok(Some(self.tree_children(target)))
                    }
                    Generator::Dir(_) => match generator.generate(self, &node.path, target, stack).await? {
                        Outcome::Entry(entry) => Ok(Some(entry.read_dir()?.to_vec())),
                        Outcome::Redispatch => Ok(Some(self.tree_children(target))),
                    },
                    Generator::Mount(mounted) => Ok(Some(mounted.readdir(ROOT).await?)),
                };
            }

            let Some(node) = self.find_by_prefix(target) else {
                return Ok(None);
            };
            if prev == Some(node.id) {
                return Ok(None);
            }
            match &node.generator {
                Some(Generator::Server(_)) => Err(VfsError::invalid(format!(
                    "{target} is served on demand and cannot be listed"
                ))),
                Some(Generator::Mount(mounted)) => {
                    let inner = path::relative(&node.path, target).unwrap_or(ROOT);
                    Ok(Some(mounted.readdir(inner).await?))
                }
                Some(generator @ Generator::Dir(_)) if !stack.contains(&node.path) => {
                    generator.generate(self, &node.path, target, stack).await?;
                    self.tree_listing(target, Some(node.id), stack).await
                }
                _ => Ok(None),
            }
        })
    }

    /// Merge the tree and backing listings of a clean `target`.
    ///
    /// Stat calls on tree entries go through `source`.
    pub(crate) async fn list(
        &self,
        target: &str,
        stack: &Stack,
        source: Arc<dyn VfsOps>,
    ) -> VfsResult<Vec<LazyDirEntry>> {
        let tree = match self.tree_listing(target, None, stack).await {
            Ok(listing) => listing,
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };

        let mut missing = None;
        let backing = match self.inner.backing.readdir(target).await {
            Ok(listing) => Some(listing),
            Err(e) if is_missing(&e) => {
                missing = Some(e);
                None
            }
            Err(e) => return Err(e),
        };

        if tree.is_none() && backing.is_none() {
            return Err(missing.unwrap_or_else(|| VfsError::not_found(target)));
        }

        let mut merged = BTreeMap::new();
        for entry in backing.into_iter().flatten() {
            let lazy = LazyDirEntry::new(target, entry, Arc::clone(&self.inner.backing));
            merged.insert(lazy.name.clone(), lazy);
        }
        for entry in tree.into_iter().flatten() {
            let lazy = LazyDirEntry::new(target, entry, Arc::clone(&source));
            merged.insert(lazy.name.clone(), lazy);
        }
        Ok(merged.into_values().collect())
    }

    pub(crate) async fn glob_with(&self, pattern: &str, stack: &Stack) -> VfsResult<Vec<String>> {
        let matcher = Matcher::new(pattern)
            .map_err(|e| VfsError::invalid_path(format!("{pattern}: {e}")))?;
        let depth = if pattern.contains("**") {
            usize::MAX
        } else {
            pattern::expand(pattern)
                .iter()
                .map(|p| path::segments(p).count())
                .max()
                .unwrap_or(0)
        };

        let source: Arc<dyn VfsOps> = Arc::new(self.clone());
        let mut matches = BTreeSet::new();
        for base in pattern::bases(pattern) {
            let mut queue = VecDeque::from([base]);
            while let Some(dir) = queue.pop_front() {
                let entries = match self.list(&dir, stack, Arc::clone(&source)).await {
                    Ok(entries) => entries,
                    Err(e) if e.is_not_found() => continue,
                    Err(e) if e.is_invalid() || is_missing(&e) => {
                        tracing::warn!(dir = %dir, error = %e, "skipping directory during glob");
                        continue;
                    }
                    Err(e) => return Err(e),
                };
                for entry in entries {
                    if matcher.matches(&entry.path) {
                        matches.insert(entry.path.clone());
                    }
                    if entry.is_dir() && path::segments(&entry.path).count() < depth {
                        queue.push_back(entry.path);
                    }
                }
            }
        }
        Ok(matches.into_iter().collect())
    }
}

#[async_trait]
impl VfsOps for FileSystem {
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

/// A directory listing entry whose attributes are computed on demand.
#[derive(Clone)]
pub struct LazyDirEntry {
    name: String,
    kind: FileType,
    path: String,
    source: Arc<dyn VfsOps>,
}

impl std::fmt::Debug for LazyDirEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyDirEntry")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("path", &self.path)
            .finish()
    }
}

impl LazyDirEntry {
    fn new(dir: &str, entry: DirEntry, source: Arc<dyn VfsOps>) -> Self {
        Self {
            path: path::join(dir, &entry.name),
            name: entry.name,
            kind: entry.kind,
            source,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Full path of the entry.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn kind(&self) -> FileType {
        self.kind
    }

    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }

    /// Stat the entry, generating it if needed.
    pub async fn attr(&self) -> VfsResult<FileAttr> {
        self.source.getattr(&self.path).await
    }

    pub fn to_dir_entry(&self) -> DirEntry {
        DirEntry::new(self.name.clone(), self.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::vfs::MemoryBackend;

    fn setup() -> FileSystem {
        FileSystem::new(Arc::new(MemoryBackend::new()), Arc::new(MemoryCache::new()))
    }

    fn waiting_on(fsys: &FileSystem, key: &str) -> usize {
        fsys.inner
            .flights
            .get(key)
            .map(|lock| Arc::strong_count(lock.value()))
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn test_flights_released_after_serving() {
        let fsys = setup();
        fsys.serve_file("s", |_fsys, file| async move {
            Ok(file.target().as_bytes().to_vec())
        })
        .unwrap();

        for i in 0..100 {
            fsys.read_file(&format!("s/{i}.txt")).await.unwrap();
        }
        assert!(fsys.inner.flights.is_empty());

        fsys.cache().reset().unwrap();
        fsys.read_file("s/0.txt").await.unwrap();
        assert!(fsys.inner.flights.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_flight_handed_to_waiter() {
        let fsys = setup();
        let first = fsys.single_flight("a").await.unwrap();

        let waiter = {
            let fsys = fsys.clone();
            tokio::spawn(async move { fsys.single_flight("a").await.is_some() })
        };
        // Map, holder and waiter
        while waiting_on(&fsys, "a") < 3 {
            tokio::task::yield_now().await;
        }

        drop(first);
        assert!(waiter.await.unwrap());
        assert!(fsys.inner.flights.is_empty());
    }

    #[tokio::test]
    async fn test_no_flights_when_disabled() {
        let fsys = FileSystem::with_options(
            Arc::new(MemoryBackend::new()),
            Arc::new(MemoryCache::new()),
            Options {
                single_flight: false,
                ..Options::default()
            },
        );
        assert!(fsys.single_flight("a").await.is_none());
        assert!(fsys.inner.flights.is_empty());
    }
}
