//! SQLite cache tier.
//!
//! `files` holds generated entries; `links` and `watches` hold the
//! dependency edges on literal paths and on glob patterns. Every mutating operation runs in one transaction so
//! the tables never disagree; reads go straight to the connection.

use std::path::Path;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use rusqlite::{params, Connection, Transaction};

use super::{check_patterns, closure, compile_stored, Cache, CacheEntry, CacheResult, Link, Snapshot};
use crate::pattern::Matcher;

const SCHEMA: &str = r#"
-- Generated entries (directories hold an encoded child list)
CREATE TABLE IF NOT EXISTS files (
    path TEXT PRIMARY KEY,
    data BLOB,
    mode INTEGER,
    mtime INTEGER
);

-- Dependency edges: generating from_path read to_path
CREATE TABLE IF NOT EXISTS links (
    from_path TEXT,
    to_path TEXT,
    PRIMARY KEY (from_path, to_path)
);
CREATE INDEX IF NOT EXISTS idx_links_to ON links(to_path);

-- Pattern edges: generating from_path depends on any path matching pattern
CREATE TABLE IF NOT EXISTS watches (
    from_path TEXT,
    pattern TEXT,
    PRIMARY KEY (from_path, pattern)
);
"#;

/// Nanoseconds since the epoch, saturating.
fn to_nanos(time: SystemTime) -> i64 {
    time.duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

fn from_nanos(nanos: i64) -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_nanos(u64::try_from(nanos).unwrap_or(0))
}

/// Durable cache backed by SQLite.
pub struct SqliteCache {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteCache").finish_non_exhaustive()
    }
}

impl SqliteCache {
    /// Open or create a cache database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> CacheResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> CacheResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn dependents(tx: &Transaction<'_>, patterns: &[Matcher], path: &str) -> CacheResult<Vec<String>> {
        let mut links = tx.prepare_cached("SELECT from_path FROM links WHERE to_path = ?1")?;
        let mut watches = tx.prepare_cached("SELECT from_path FROM watches WHERE pattern = ?1")?;

        let mut froms = Vec::new();
        for from in links.query_map(params![path], |row| row.get::<_, String>(0))? {
            froms.push(from?);
        }
        for matcher in patterns.iter().filter(|m| m.matches(path)) {
            let rows = watches.query_map(params![matcher.as_str()], |row| row.get::<_, String>(0))?;
            for from in rows {
                froms.push(from?);
            }
        }

        froms.sort();
        froms.dedup();
        Ok(froms)
    }

    fn watch_patterns(tx: &Transaction<'_>) -> CacheResult<Vec<Matcher>> {
        let mut stmt = tx.prepare("SELECT DISTINCT pattern FROM watches")?;
        let patterns = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(compile_stored(patterns))
    }
}

impl Cache for SqliteCache {
    fn get(&self, path: &str) -> CacheResult<Option<CacheEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT data, mode, mtime FROM files WHERE path = ?1")?;

        let mut rows = stmt.query(params![path])?;
        if let Some(row) = rows.next()? {
            let data: Vec<u8> = row.get::<_, Option<Vec<u8>>>(0)?.unwrap_or_default();
            let mode: u32 = row.get(1)?;
            let mtime = from_nanos(row.get::<_, Option<i64>>(2)?.unwrap_or(0));
            Ok(Some(CacheEntry::decode(path.to_string(), &data, mode, mtime)?))
        } else {
            Ok(None)
        }
    }

    fn set(&self, path: &str, entry: &CacheEntry) -> CacheResult<()> {
        let data = entry.encode()?;
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT OR REPLACE INTO files (path, data, mode, mtime) VALUES (?1, ?2, ?3, ?4)",
            params![path, data, entry.mode, to_nanos(entry.mtime)],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn link(&self, from: &str, to: &[&str]) -> CacheResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt =
                tx.prepare_cached("INSERT OR IGNORE INTO links (from_path, to_path) VALUES (?1, ?2)")?;
            for to in to {
                stmt.execute(params![from, to])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn watch(&self, from: &str, patterns: &[&str]) -> CacheResult<()> {
        check_patterns(patterns)?;
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt =
                tx.prepare_cached("INSERT OR IGNORE INTO watches (from_path, pattern) VALUES (?1, ?2)")?;
            for pattern in patterns {
                stmt.execute(params![from, pattern])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn unlink(&self, from: &str) -> CacheResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM links WHERE from_path = ?1", params![from])?;
        tx.execute("DELETE FROM watches WHERE from_path = ?1", params![from])?;
        tx.commit()?;
        Ok(())
    }

    fn delete(&self, paths: &[&str]) -> CacheResult<Vec<String>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let patterns = Self::watch_patterns(&tx)?;
        let deleted = closure(paths, |path| Self::dependents(&tx, &patterns, path))?;
        {
            let mut files = tx.prepare_cached("DELETE FROM files WHERE path = ?1")?;
            let mut links =
                tx.prepare_cached("DELETE FROM links WHERE from_path = ?1 OR to_path = ?1")?;
            let mut watches = tx.prepare_cached("DELETE FROM watches WHERE from_path = ?1")?;
            for path in &deleted {
                files.execute(params![path])?;
                links.execute(params![path])?;
                watches.execute(params![path])?;
            }
        }
        tx.commit()?;

        tracing::info!(seeds = ?paths, deleted = deleted.len(), "invalidated cache");
        Ok(deleted)
    }

    fn reset(&self) -> CacheResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute_batch("DELETE FROM files; DELETE FROM links; DELETE FROM watches;")?;
        tx.commit()?;
        tracing::info!("reset sqlite cache");
        Ok(())
    }

    fn snapshot(&self) -> CacheResult<Snapshot> {
        let conn = self.conn.lock();

        let mut stmt = conn.prepare("SELECT path, mode FROM files ORDER BY path")?;
        let files = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stmt = conn.prepare(
            "SELECT from_path, to_path, 0 FROM links UNION ALL SELECT from_path, pattern, 1 FROM watches",
        )?;
        let mut links = stmt
            .query_map([], |row| {
                Ok(Link {
                    from: row.get(0)?,
                    to: row.get(1)?,
                    pattern: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        links.sort();

        Ok(Snapshot { files, links })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::conformance;
    use tempfile::TempDir;

    #[test]
    fn test_get_set() {
        conformance::get_set(&SqliteCache::in_memory().unwrap());
    }

    #[test]
    fn test_delete_chain() {
        conformance::delete_chain(&SqliteCache::in_memory().unwrap());
    }

    #[test]
    fn test_delete_cycle() {
        conformance::delete_cycle(&SqliteCache::in_memory().unwrap());
    }

    #[test]
    fn test_delete_pattern() {
        conformance::delete_pattern(&SqliteCache::in_memory().unwrap());
    }

    #[test]
    fn test_delete_literal_glob_chars() {
        conformance::delete_literal_glob_chars(&SqliteCache::in_memory().unwrap());
    }

    #[test]
    fn test_watch_rejects_bad_pattern() {
        conformance::watch_rejects_bad_pattern(&SqliteCache::in_memory().unwrap());
    }

    #[test]
    fn test_unlink_and_reset() {
        conformance::unlink_and_reset(&SqliteCache::in_memory().unwrap());
    }

    #[test]
    fn test_skips_stored_pattern_that_does_not_compile() {
        let cache = SqliteCache::in_memory().unwrap();
        cache.set("a", &conformance::file("a", "a")).unwrap();
        cache.link("a", &["in"]).unwrap();
        cache
            .conn
            .lock()
            .execute(
                "INSERT INTO watches (from_path, pattern) VALUES ('b', 'src/a[b')",
                [],
            )
            .unwrap();

        assert_eq!(cache.delete(&["in"]).unwrap(), vec!["in", "a"]);
    }

    #[test]
    fn test_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("cache.db");

        {
            let cache = SqliteCache::open(&db_path).unwrap();
            cache.set("a", &conformance::file("a", "generated")).unwrap();
            cache.set("b", &conformance::file("b", "input")).unwrap();
            cache.link("a", &["b"]).unwrap();
        }

        let cache = SqliteCache::open(&db_path).unwrap();
        assert_eq!(cache.get("a").unwrap(), Some(conformance::file("a", "generated")));
        assert_eq!(cache.delete(&["b"]).unwrap(), vec!["b", "a"]);
        assert_eq!(cache.get("a").unwrap(), None);
    }
}
