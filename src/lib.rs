//! # cowkv
//!
//! An embedded, single-file, crash-safe ordered key-value store.
//!
//! ## Architecture
//!
//! The engine is composed of small, layered components:
//!
//! - **Page layer** (`page`): fixed-size page buffers and the slotted
//!   node format
//! - **Storage layer** (`storage`): positional file I/O, the pager, and
//!   the meta page
//! - **Transactions** (`tx`): copy-on-write workspaces with atomic
//!   commit via a meta-page root swap
//!
//! A single writer and any number of readers run concurrently under a
//! reader-writer lock. Commits write data pages and sync before swapping
//! the root in the meta page and syncing again, so a crash at any point
//! leaves either the old tree or the new one, never a mix.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use cowkv::{Config, Db};
//!
//! let db = Db::open(Config::new("my.db"))?;
//!
//! db.update(|tx| tx.put(b"hello", b"world"))?;
//!
//! let value = db.view(|tx| tx.get(b"hello"))?;
//! assert_eq!(value, b"world");
//! ```

pub mod error;
pub mod page;
pub mod storage;
pub mod tx;
pub mod types;

pub use error::{Result, StoreError};
pub use storage::{FileIo, StdFileIo};
pub use tx::Tx;
pub use types::{PageId, PAGE_SIZE};

use crate::page::{Node, PageBuf};
use crate::storage::{Meta, Pager};
use crate::types::NodeType;
use parking_lot::RwLock;
use std::path::PathBuf;
use tracing::debug;

/// Database configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the database file
    pub path: PathBuf,
    /// Whether commits fsync before returning (default: true).
    /// Disabling trades durability for bulk-load speed.
    pub sync_on_commit: bool,
}

impl Config {
    /// Create a new configuration with default settings
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            sync_on_commit: true,
        }
    }

    /// Set whether commits fsync before returning
    pub fn sync_on_commit(mut self, enabled: bool) -> Self {
        self.sync_on_commit = enabled;
        self
    }
}

struct DbInner {
    pager: Pager,
    meta: Meta,
    root: PageId,
}

/// Main database handle.
///
/// All access goes through scoped transactions: [`Db::update`] for
/// writes, [`Db::view`] for reads. The handle can be shared across
/// threads; updates are serialized, views run in parallel.
pub struct Db {
    inner: RwLock<DbInner>,
    config: Config,
}

/// Database statistics
#[derive(Debug, Clone)]
pub struct DbStats {
    /// Total number of pages in the file
    pub page_count: u32,
    /// Height of the B-tree
    pub tree_height: usize,
}

impl Db {
    /// Open or create a database at the configured path
    pub fn open(config: Config) -> Result<Self> {
        let pager = Pager::open(&config.path)?;
        Self::from_pager(config, pager)
    }

    /// Open a database over a caller-supplied I/O implementation.
    ///
    /// Used to interpose fault-injection harnesses between the pager
    /// and the file; `open` is the standard path.
    pub fn open_with(config: Config, io: Box<dyn FileIo>) -> Result<Self> {
        let pager = Pager::with_io(io)?;
        Self::from_pager(config, pager)
    }

    fn from_pager(config: Config, pager: Pager) -> Result<Self> {
        let inner = if pager.page_count() == 0 {
            // Fresh file: meta pointing at an empty leaf in page 1.
            let meta = Meta::new(1);
            let mut buf = PageBuf::new();
            meta.serialize(&mut buf);
            pager.write(PageId::META, &buf)?;
            pager.write(PageId::new(1), Node::new(NodeType::Leaf).as_bytes())?;
            pager.sync()?;

            debug!(path = %config.path.display(), "db.open.bootstrap");
            DbInner {
                pager,
                meta,
                root: PageId::new(1),
            }
        } else {
            let buf = pager.read(PageId::META)?;
            let meta = Meta::deserialize(&buf);
            meta.validate()?;

            debug!(path = %config.path.display(), root = meta.root, "db.open.existing");
            DbInner {
                root: PageId::new(meta.root),
                pager,
                meta,
            }
        };

        Ok(Self {
            inner: RwLock::new(inner),
            config,
        })
    }

    /// Run a writable transaction.
    ///
    /// Takes the writer lock for the duration of the closure and the
    /// commit. The transaction commits if the closure returns `Ok` and
    /// rolls back if it returns `Err` or panics.
    pub fn update<T>(&self, f: impl FnOnce(&mut Tx) -> Result<T>) -> Result<T> {
        let mut inner = self.inner.write();
        let mut tx = Tx::begin(
            &inner.pager,
            inner.meta,
            inner.root,
            true,
            self.config.sync_on_commit,
        );

        let value = f(&mut tx)?;
        let new_root = tx.commit()?;

        inner.root = new_root;
        inner.meta.root = new_root.value();
        Ok(value)
    }

    /// Run a read-only transaction.
    ///
    /// Takes the reader lock; any number of views proceed in parallel,
    /// each seeing the root as of the moment it began.
    pub fn view<T>(&self, f: impl FnOnce(&Tx) -> Result<T>) -> Result<T> {
        let inner = self.inner.read();
        let tx = Tx::begin(
            &inner.pager,
            inner.meta,
            inner.root,
            false,
            self.config.sync_on_commit,
        );
        f(&tx)
    }

    /// Get statistics about the database
    pub fn stats(&self) -> Result<DbStats> {
        let inner = self.inner.read();
        let tx = Tx::begin(
            &inner.pager,
            inner.meta,
            inner.root,
            false,
            self.config.sync_on_commit,
        );
        Ok(DbStats {
            page_count: inner.pager.page_count(),
            tree_height: tx.height()?,
        })
    }

    /// Flush and release the file handle
    pub fn close(self) -> Result<()> {
        self.inner.into_inner().pager.sync()
    }
}
