//! genfs - inspect and maintain a generation cache.
//!
//! Cache commands (`dump`, `invalidate`, `reset`, `show`) work directly on
//! a SQLite cache file. Filesystem commands (`ls`, `cat`) read a local
//! directory through the engine, using the cache selected by `--config`.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use genfs::{Cache, EntryData, FileSystem, GenfsConfig, LocalBackend, SqliteCache, to_dot};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "genfs")]
#[command(about = "Inspect and maintain a genfs generation cache")]
struct Cli {
    /// Engine configuration (RON); used by ls and cat
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the cache as a Graphviz digraph
    Dump {
        #[arg(long)]
        db: PathBuf,
    },
    /// Delete paths and everything generated from them
    Invalidate {
        #[arg(long)]
        db: PathBuf,
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Clear every entry and link
    Reset {
        #[arg(long)]
        db: PathBuf,
    },
    /// Print a cached entry
    Show {
        #[arg(long)]
        db: PathBuf,
        path: String,
    },
    /// List a directory through the engine
    Ls {
        #[arg(long, default_value = ".")]
        root: PathBuf,
        #[arg(default_value = ".")]
        path: String,
    },
    /// Print a file through the engine
    Cat {
        #[arg(long, default_value = ".")]
        root: PathBuf,
        path: String,
    },
}

fn open_db(db: &Path) -> Result<SqliteCache> {
    SqliteCache::open(db).with_context(|| format!("opening cache {}", db.display()))
}

fn open_fs(root: PathBuf, config: Option<&Path>) -> Result<FileSystem> {
    let config = match config {
        Some(path) => GenfsConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => GenfsConfig::default(),
    };
    let backing = Arc::new(LocalBackend::new(root));
    Ok(FileSystem::with_config(backing, &config)?)
}

async fn run(cli: Cli, out: &mut impl Write) -> Result<()> {
    match cli.command {
        Command::Dump { db } => {
            let snapshot = open_db(&db)?.snapshot()?;
            write!(out, "{}", to_dot(&snapshot))?;
        }
        Command::Invalidate { db, paths } => {
            let seeds: Vec<&str> = paths.iter().map(String::as_str).collect();
            for path in open_db(&db)?.delete(&seeds)? {
                writeln!(out, "{path}")?;
            }
        }
        Command::Reset { db } => {
            open_db(&db)?.reset()?;
            tracing::info!(db = %db.display(), "cache reset");
        }
        Command::Show { db, path } => {
            let entry = open_db(&db)?
                .get(&path)?
                .with_context(|| format!("{path} is not cached"))?;
            match entry.data {
                EntryData::File(bytes) => out.write_all(&bytes)?,
                EntryData::Dir(children) => {
                    for child in children {
                        let suffix = if child.kind.is_dir() { "/" } else { "" };
                        writeln!(out, "{}{suffix}", child.name)?;
                    }
                }
            }
        }
        Command::Ls { root, path } => {
            let fsys = open_fs(root, cli.config.as_deref())?;
            for entry in fsys.read_dir(&path).await? {
                let suffix = if entry.is_dir() { "/" } else { "" };
                writeln!(out, "{}{suffix}", entry.name())?;
            }
        }
        Command::Cat { root, path } => {
            let fsys = open_fs(root, cli.config.as_deref())?;
            out.write_all(&fsys.read_file(&path).await?)?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let mut stdout = std::io::stdout().lock();
    match run(cli, &mut stdout).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use genfs::{CacheEntry, Entry, VfsOps};
    use tempfile::TempDir;

    async fn exec(args: &[&str]) -> Result<String> {
        let cli = Cli::try_parse_from(std::iter::once("genfs").chain(args.iter().copied()))?;
        let mut out = Vec::new();
        run(cli, &mut out).await?;
        Ok(String::from_utf8(out)?)
    }

    fn seeded_db(dir: &TempDir) -> PathBuf {
        let db = dir.path().join("cache.db");
        let cache = SqliteCache::open(&db).unwrap();
        cache
            .set("bud/main.go", &CacheEntry::from_entry(&Entry::file("bud/main.go", b"package main".to_vec())))
            .unwrap();
        cache
            .set("bud/view.go", &CacheEntry::from_entry(&Entry::file("bud/view.go", b"package view".to_vec())))
            .unwrap();
        cache.link("bud/main.go", &["bud/view.go"]).unwrap();
        cache.watch("bud/view.go", &["view/**/*.svelte"]).unwrap();
        db
    }

    #[tokio::test]
    async fn test_dump() {
        let dir = TempDir::new().unwrap();
        let db = seeded_db(&dir);
        let dot = exec(&["dump", "--db", db.to_str().unwrap()]).await.unwrap();
        assert!(dot.starts_with("digraph genfs {"));
        assert!(dot.contains("\"bud/main.go\" -> \"bud/view.go\";"));
        assert!(dot.contains("\"bud/view.go\" -> \"view/**/*.svelte\" [style=dashed];"));
    }

    #[tokio::test]
    async fn test_invalidate_and_show() {
        let dir = TempDir::new().unwrap();
        let db = seeded_db(&dir);
        let db = db.to_str().unwrap();

        assert_eq!(exec(&["show", "--db", db, "bud/main.go"]).await.unwrap(), "package main");

        let deleted = exec(&["invalidate", "--db", db, "view/index.svelte"]).await.unwrap();
        assert_eq!(deleted, "view/index.svelte\nbud/view.go\nbud/main.go\n");
        assert!(exec(&["show", "--db", db, "bud/main.go"]).await.is_err());
    }

    #[tokio::test]
    async fn test_reset() {
        let dir = TempDir::new().unwrap();
        let db = seeded_db(&dir);
        exec(&["reset", "--db", db.to_str().unwrap()]).await.unwrap();
        let dot = exec(&["dump", "--db", db.to_str().unwrap()]).await.unwrap();
        assert_eq!(dot, "digraph genfs {\n}\n");
    }

    #[tokio::test]
    async fn test_ls_and_cat() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("go.mod"), "module app").unwrap();
        let root = dir.path().to_str().unwrap();

        assert_eq!(exec(&["ls", "--root", root]).await.unwrap(), "go.mod\nsrc/\n");
        assert_eq!(exec(&["cat", "--root", root, "go.mod"]).await.unwrap(), "module app");
        assert!(exec(&["cat", "--root", root, "missing"]).await.is_err());
    }

    #[tokio::test]
    async fn test_config_selects_cache() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        let config = dir.path().join("genfs.ron");
        std::fs::write(&config, "(cache: Disabled, single_flight: false)").unwrap();

        let out = exec(&[
            "--config",
            config.to_str().unwrap(),
            "cat",
            "--root",
            dir.path().to_str().unwrap(),
            "a.txt",
        ])
        .await
        .unwrap();
        assert_eq!(out, "a");

        let fsys = open_fs(dir.path().to_path_buf(), Some(config.as_path())).unwrap();
        assert!(!fsys.options().single_flight);
        assert!(fsys.backing().exists("a.txt").await);
    }
}
