//! Engine configuration, loaded from RON.
//!
//! ```ron
//! (
//!     cache: Sqlite(path: "bud/cache.db"),
//!     single_flight: true,
//!     clear_stale_links: true,
//! )
//! ```
//!
//! Every field is optional; omitted fields take their defaults.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;

use crate::cache::{Cache, CacheError, MemoryCache, NullCache, SqliteCache};
use crate::fs::Options;

/// Error type for config loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON parse error: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("cache: {0}")]
    Cache(#[from] CacheError),
}

/// Which cache tier to use.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub enum CacheConfig {
    /// Cache nothing.
    Disabled,
    /// In-process cache.
    #[default]
    Memory,
    /// SQLite database at `path`.
    Sqlite { path: PathBuf },
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GenfsConfig {
    pub cache: CacheConfig,
    pub single_flight: bool,
    pub clear_stale_links: bool,
}

impl Default for GenfsConfig {
    fn default() -> Self {
        let options = Options::default();
        Self {
            cache: CacheConfig::default(),
            single_flight: options.single_flight,
            clear_stale_links: options.clear_stale_links,
        }
    }
}

impl GenfsConfig {
    /// Parse a RON document.
    pub fn from_ron(text: &str) -> Result<Self, ConfigError> {
        Ok(ron::from_str(text)?)
    }

    /// Read and parse a RON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_ron(&text)
    }

    /// Open the configured cache tier.
    pub fn open_cache(&self) -> Result<Arc<dyn Cache>, ConfigError> {
        let cache: Arc<dyn Cache> = match &self.cache {
            CacheConfig::Disabled => Arc::new(NullCache),
            CacheConfig::Memory => Arc::new(MemoryCache::new()),
            CacheConfig::Sqlite { path } => {
                tracing::info!(path = %path.display(), "opening sqlite cache");
                Arc::new(SqliteCache::open(path)?)
            }
        };
        Ok(cache)
    }

    /// Engine switches from this config.
    pub fn options(&self) -> Options {
        Options {
            single_flight: self.single_flight,
            clear_stale_links: self.clear_stale_links,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = GenfsConfig::from_ron("()").unwrap();
        assert_eq!(config, GenfsConfig::default());
        assert_eq!(config.cache, CacheConfig::Memory);
        assert!(config.single_flight);
        assert!(config.clear_stale_links);
    }

    #[test]
    fn test_parse_sqlite() {
        let config = GenfsConfig::from_ron(
            r#"(cache: Sqlite(path: "out/cache.db"), single_flight: false)"#,
        )
        .unwrap();
        assert_eq!(
            config.cache,
            CacheConfig::Sqlite {
                path: PathBuf::from("out/cache.db")
            }
        );
        assert!(!config.single_flight);
        assert!(config.clear_stale_links);
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(
            GenfsConfig::from_ron("(cache: Redis)"),
            Err(ConfigError::Ron(_))
        ));
    }

    #[test]
    fn test_open_cache() {
        let dir = TempDir::new().unwrap();
        let config = GenfsConfig {
            cache: CacheConfig::Sqlite {
                path: dir.path().join("cache.db"),
            },
            ..GenfsConfig::default()
        };
        let cache = config.open_cache().unwrap();
        cache.link("a", &["b"]).unwrap();
        assert_eq!(cache.snapshot().unwrap().links.len(), 1);

        let null = GenfsConfig {
            cache: CacheConfig::Disabled,
            ..GenfsConfig::default()
        };
        assert!(null.open_cache().unwrap().snapshot().unwrap().links.is_empty());
    }

    #[test]
    fn test_load_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("genfs.ron");
        std::fs::write(&path, "(cache: Disabled)").unwrap();
        assert_eq!(GenfsConfig::load(&path).unwrap().cache, CacheConfig::Disabled);
        assert!(matches!(
            GenfsConfig::load(dir.path().join("missing.ron")),
            Err(ConfigError::Io(_))
        ));
    }
}
