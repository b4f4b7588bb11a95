//! In-process cache tier.
//!
//! Entries and links live in sharded concurrent maps, so readers and
//! writers on different paths do not block each other. Nothing survives
//! the process.

use std::collections::HashSet;

use dashmap::DashMap;

use super::{check_patterns, closure, compile_stored, Cache, CacheEntry, CacheResult, Link, Snapshot};

/// Concurrent in-memory cache.
#[derive(Debug, Default)]
pub struct MemoryCache {
    files: DashMap<String, CacheEntry>,
    /// Links keyed by `to`, holding every `from` that read it.
    links: DashMap<String, HashSet<String>>,
    /// Watches keyed by pattern, holding every `from` that watches it.
    watches: DashMap<String, HashSet<String>>,
}

impl MemoryCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    fn dependents(&self, path: &str) -> CacheResult<Vec<String>> {
        let mut froms: Vec<String> = self
            .links
            .get(path)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();

        let patterns: Vec<String> = self.watches.iter().map(|item| item.key().clone()).collect();
        for matcher in compile_stored(patterns) {
            if !matcher.matches(path) {
                continue;
            }
            if let Some(set) = self.watches.get(matcher.as_str()) {
                froms.extend(set.iter().cloned());
            }
        }

        froms.sort();
        froms.dedup();
        Ok(froms)
    }
}

impl Cache for MemoryCache {
    fn get(&self, path: &str) -> CacheResult<Option<CacheEntry>> {
        Ok(self.files.get(path).map(|entry| entry.value().clone()))
    }

    fn set(&self, path: &str, entry: &CacheEntry) -> CacheResult<()> {
        self.files.insert(path.to_string(), entry.clone());
        Ok(())
    }

    fn link(&self, from: &str, to: &[&str]) -> CacheResult<()> {
        for to in to {
            self.links
                .entry(to.to_string())
                .or_default()
                .insert(from.to_string());
        }
        Ok(())
    }

    fn watch(&self, from: &str, patterns: &[&str]) -> CacheResult<()> {
        check_patterns(patterns)?;
        for pattern in patterns {
            self.watches
                .entry(pattern.to_string())
                .or_default()
                .insert(from.to_string());
        }
        Ok(())
    }

    fn unlink(&self, from: &str) -> CacheResult<()> {
        for map in [&self.links, &self.watches] {
            map.retain(|_, froms| {
                froms.remove(from);
                !froms.is_empty()
            });
        }
        Ok(())
    }

    fn delete(&self, paths: &[&str]) -> CacheResult<Vec<String>> {
        let deleted = closure(paths, |path| self.dependents(path))?;
        for path in &deleted {
            self.files.remove(path);
        }
        {
            let doomed: HashSet<&str> = deleted.iter().map(String::as_str).collect();
            self.links.retain(|to, froms| {
                if doomed.contains(to.as_str()) {
                    return false;
                }
                froms.retain(|from| !doomed.contains(from.as_str()));
                !froms.is_empty()
            });
            self.watches.retain(|_, froms| {
                froms.retain(|from| !doomed.contains(from.as_str()));
                !froms.is_empty()
            });
        }

        tracing::info!(seeds = ?paths, deleted = deleted.len(), "invalidated cache");
        Ok(deleted)
    }

    fn reset(&self) -> CacheResult<()> {
        self.files.clear();
        self.links.clear();
        self.watches.clear();
        tracing::info!("reset memory cache");
        Ok(())
    }

    fn snapshot(&self) -> CacheResult<Snapshot> {
        let mut files: Vec<(String, u32)> = self
            .files
            .iter()
            .map(|item| (item.key().clone(), item.value().mode))
            .collect();
        files.sort();

        let mut links: Vec<Link> = Vec::new();
        for item in self.links.iter() {
            links.extend(item.value().iter().map(|from| Link::path(from, item.key())));
        }
        for item in self.watches.iter() {
            links.extend(item.value().iter().map(|from| Link::watch(from, item.key())));
        }
        links.sort();

        Ok(Snapshot { files, links })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::conformance;
    use std::sync::Arc;

    #[test]
    fn test_get_set() {
        conformance::get_set(&MemoryCache::new());
    }

    #[test]
    fn test_delete_chain() {
        conformance::delete_chain(&MemoryCache::new());
    }

    #[test]
    fn test_delete_cycle() {
        conformance::delete_cycle(&MemoryCache::new());
    }

    #[test]
    fn test_delete_pattern() {
        conformance::delete_pattern(&MemoryCache::new());
    }

    #[test]
    fn test_delete_literal_glob_chars() {
        conformance::delete_literal_glob_chars(&MemoryCache::new());
    }

    #[test]
    fn test_watch_rejects_bad_pattern() {
        conformance::watch_rejects_bad_pattern(&MemoryCache::new());
    }

    #[test]
    fn test_unlink_and_reset() {
        conformance::unlink_and_reset(&MemoryCache::new());
    }

    #[test]
    fn test_skips_stored_pattern_that_does_not_compile() {
        let cache = MemoryCache::new();
        cache.set("a", &conformance::file("a", "a")).unwrap();
        cache.link("a", &["in"]).unwrap();
        cache
            .watches
            .entry("src/a[b".to_string())
            .or_default()
            .insert("b".to_string());

        assert_eq!(cache.delete(&["in"]).unwrap(), vec!["in", "a"]);
    }

    #[test]
    fn test_concurrent_sets() {
        let cache = Arc::new(MemoryCache::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for j in 0..50 {
                        let path = format!("t{i}/f{j}");
                        cache.set(&path, &conformance::file(&path, "x")).unwrap();
                        cache.link(&path, &["shared"]).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(cache.snapshot().unwrap().files.len(), 400);
        assert_eq!(cache.delete(&["shared"]).unwrap().len(), 401);
        assert!(cache.snapshot().unwrap().files.is_empty());
    }
}
