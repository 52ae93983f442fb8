//! Configuration for heapstore.

use std::time::Duration;

use super::error::{Error, Result};

/// Default size of a page in bytes (4KB).
///
/// Page N of a heap file lives at byte offset `N × page_size`, so the page
/// size is fixed for the lifetime of a database.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Default number of pages the buffer pool may cache.
pub const DEFAULT_POOL_PAGES: usize = 50;

/// Default bound on how long `get_page` waits for a page lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(1000);

/// Smallest page size we accept. Must fit a bitmap byte plus one tuple.
pub const MIN_PAGE_SIZE: usize = 64;

/// Storage engine configuration.
///
/// # Example
/// ```
/// use heapstore::StorageConfig;
/// use std::time::Duration;
///
/// let config = StorageConfig::new(16)
///     .with_page_size(1024)
///     .with_lock_timeout(Duration::from_millis(200));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Page size in bytes.
    pub page_size: usize,
    /// Maximum number of pages held by the buffer pool.
    pub pool_pages: usize,
    /// How long a transaction waits for a page lock before it is aborted.
    pub lock_timeout: Duration,
    /// Abort lock waiters that close a cycle in the wait-for graph.
    pub deadlock_detection: bool,
}

impl StorageConfig {
    /// Creates a configuration caching at most `pool_pages` pages.
    pub fn new(pool_pages: usize) -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            pool_pages,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            deadlock_detection: true,
        }
    }

    /// Sets the page size.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Sets the lock wait bound.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Enables or disables wait-for graph deadlock detection.
    pub fn with_deadlock_detection(mut self, enabled: bool) -> Self {
        self.deadlock_detection = enabled;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.pool_pages == 0 {
            return Err(Error::config("pool_pages must be > 0"));
        }
        if self.page_size < MIN_PAGE_SIZE {
            return Err(Error::config(format!(
                "page_size must be >= {MIN_PAGE_SIZE}"
            )));
        }
        if self.page_size > u32::MAX as usize {
            return Err(Error::config("page_size must fit in u32"));
        }
        Ok(())
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_PAGES)
    }
}
