//! Database - the context that ties catalog, log and buffer pool together.

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::buffer::BufferPool;
use crate::catalog::Catalog;
use crate::common::{Result, StorageConfig};
use crate::recovery::{LogFile, LogService};
use crate::storage::HeapFile;

/// An open database.
///
/// Owns the table catalog, the log file and the buffer pool. Everything a
/// transaction needs is reached through this value, so several independent
/// databases can live in one process.
///
/// # Example
/// ```no_run
/// use heapstore::{Database, Permissions, StorageConfig, TransactionId, Tuple};
///
/// let db = Database::open(StorageConfig::default(), "wal.log").unwrap();
/// let table = db.add_table("users.dat", "users", 8).unwrap();
///
/// let tid = TransactionId::next();
/// let mut tuple = Tuple::from_i32s(&[1, 42]);
/// db.buffer_pool().insert_tuple(tid, table, &mut tuple).unwrap();
/// db.buffer_pool().transaction_complete(tid, true).unwrap();
/// ```
pub struct Database {
    config: StorageConfig,
    catalog: Arc<Catalog>,
    log: Arc<LogFile>,
    buffer_pool: Arc<BufferPool>,
}

impl Database {
    /// Open a database whose log lives at `log_path`.
    ///
    /// # Errors
    /// `Error::Config` for an invalid configuration, or an I/O error if the
    /// log cannot be opened.
    pub fn open<P: AsRef<Path>>(config: StorageConfig, log_path: P) -> Result<Self> {
        config.validate()?;

        let catalog = Arc::new(Catalog::new());
        let log = Arc::new(LogFile::open(log_path)?);
        let buffer_pool = Arc::new(Self::build_pool(&config, &catalog, &log)?);
        debug!(pool_pages = config.pool_pages, page_size = config.page_size, "database.open");

        Ok(Self {
            config,
            catalog,
            log,
            buffer_pool,
        })
    }

    fn build_pool(config: &StorageConfig, catalog: &Arc<Catalog>, log: &Arc<LogFile>) -> Result<BufferPool> {
        let log: Arc<dyn LogService> = Arc::clone(log) as Arc<dyn LogService>;
        BufferPool::new(config, Arc::clone(catalog), log)
    }

    /// Open (or create) a heap file with this database's page size and
    /// register it. Returns the table id.
    pub fn add_table<P: AsRef<Path>>(&self, path: P, name: &str, tuple_size: usize) -> Result<u32> {
        let file = HeapFile::open(path, tuple_size, self.config.page_size)?;
        Ok(self.catalog.add_table(Arc::new(file), name))
    }

    /// Replace the buffer pool with an empty one caching `pool_pages` pages.
    ///
    /// Cached pages and held locks of the old pool are dropped without being
    /// written.
    pub fn reset_buffer_pool(&mut self, pool_pages: usize) -> Result<Arc<BufferPool>> {
        let config = StorageConfig {
            pool_pages,
            ..self.config.clone()
        };
        self.buffer_pool = Arc::new(Self::build_pool(&config, &self.catalog, &self.log)?);
        self.config = config;
        Ok(Arc::clone(&self.buffer_pool))
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn buffer_pool(&self) -> &Arc<BufferPool> {
        &self.buffer_pool
    }

    pub fn log(&self) -> &Arc<LogFile> {
        &self.log
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("config", &self.config)
            .field("catalog", &self.catalog)
            .field("buffer_pool", &self.buffer_pool)
            .finish()
    }
}
