//! Buffer Pool - the transactional page cache.
//!
//! The [`BufferPool`] provides:
//! - Page caching between heap files and transactions
//! - Page-level Shared/Exclusive locking on every access
//! - No-steal eviction of least recently used clean pages
//! - Force-at-commit and in-place rollback at abort

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace, warn};

use crate::buffer::replacer::LruReplacer;
use crate::buffer::BufferPoolStats;
use crate::catalog::Catalog;
use crate::common::{Error, PageId, Permissions, Result, StorageConfig, TransactionId};
use crate::concurrency::LockManager;
use crate::recovery::LogService;
use crate::storage::page::{HeapPage, Tuple};

/// The single live instance of a cached page.
pub type SharedPage = Arc<RwLock<HeapPage>>;

/// Caches up to `capacity` pages on behalf of transactions.
///
/// # Architecture
/// ```text
/// ┌─────────────────────────────────────────────────────────────┐
/// │                         BufferPool                          │
/// │  ┌───────────────────┐  ┌────────────────────────────────┐  │
/// │  │ pages             │  │ replacer (admission mutex)     │  │
/// │  │ PageId → Arc<     │  │ LruReplacer: recency order     │  │
/// │  │   RwLock<HeapPage>│  │ of the cached page ids         │  │
/// │  └───────────────────┘  └────────────────────────────────┘  │
/// │  ┌───────────────────┐  ┌──────────────┐  ┌─────────────┐   │
/// │  │ lock_manager      │  │ catalog      │  │ log         │   │
/// │  │ S/X page locks    │  │ → HeapFile   │  │ WAL records │   │
/// │  └───────────────────┘  └──────────────┘  └─────────────┘   │
/// └─────────────────────────────────────────────────────────────┘
/// ```
///
/// # Thread Safety
/// - `replacer`: `Mutex` - serializes lookup, eviction and admission, so
///   the map and the recency order always agree
/// - `pages`: `RwLock` - written only under the admission mutex
/// - each page: `RwLock` latch, taken last
/// - `stats`: atomic counters
///
/// Lock order is admission mutex, then page map, then page latch. Nothing
/// takes the map or the admission mutex while holding a page latch.
///
/// # Policy
/// No-steal: a dirty page is never evicted, so uncommitted data never
/// reaches a heap file. Force: commit writes every page the transaction
/// dirtied before releasing its locks.
pub struct BufferPool {
    capacity: usize,
    page_size: usize,
    lock_timeout: Duration,

    pages: RwLock<HashMap<PageId, SharedPage>>,
    replacer: Mutex<LruReplacer>,

    lock_manager: LockManager,
    catalog: Arc<Catalog>,
    log: Arc<dyn LogService>,

    stats: BufferPoolStats,
}

impl BufferPool {
    /// Create a buffer pool over the tables of `catalog`.
    ///
    /// # Errors
    /// `Error::Config` if the configuration is invalid.
    pub fn new(config: &StorageConfig, catalog: Arc<Catalog>, log: Arc<dyn LogService>) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            capacity: config.pool_pages,
            page_size: config.page_size,
            lock_timeout: config.lock_timeout,
            pages: RwLock::new(HashMap::with_capacity(config.pool_pages)),
            replacer: Mutex::new(LruReplacer::with_capacity(config.pool_pages)),
            lock_manager: LockManager::with_deadlock_detection(config.deadlock_detection),
            catalog,
            log,
            stats: BufferPoolStats::new(),
        })
    }

    // ========================================================================
    // Public API: Fetch pages
    // ========================================================================

    /// Fetch a page on behalf of `tid`, locking it first.
    ///
    /// `ReadOnly` takes a Shared lock, `ReadWrite` an Exclusive one. The
    /// call blocks until the lock is granted.
    ///
    /// # Errors
    /// - `Error::TransactionAborted` if the lock wait timed out or would
    ///   deadlock. The transaction has already been aborted: its dirty pages
    ///   are reverted and its locks released.
    /// - `Error::AllPagesDirty` if the pool is full of dirty pages
    /// - `Error::PageNotFound` / `Error::TableNotFound` if the page doesn't
    ///   exist. The lock stays held.
    pub fn get_page(&self, tid: TransactionId, page_id: PageId, perm: Permissions) -> Result<SharedPage> {
        let acquired = self
            .lock_manager
            .acquire(page_id, tid, perm.lock_mode(), self.lock_timeout);

        if let Err(e) = acquired {
            if e.is_abort() {
                if let Err(revert) = self.transaction_complete(tid, false) {
                    warn!(%tid, error = %revert, "buffer_pool.abort_failed");
                }
            }
            return Err(e);
        }

        self.fetch(page_id)
    }

    /// Insert a tuple into a table on behalf of `tid`.
    ///
    /// The modified page is marked dirty by `tid` and kept in the cache.
    pub fn insert_tuple(&self, tid: TransactionId, table_id: u32, tuple: &mut Tuple) -> Result<()> {
        let file = self.catalog.database_file(table_id)?;
        let pages = file.insert_tuple(self, tid, tuple)?;
        self.admit_dirty(tid, pages)
    }

    /// Delete a stored tuple on behalf of `tid`.
    pub fn delete_tuple(&self, tid: TransactionId, tuple: &Tuple) -> Result<()> {
        let rid = tuple.record_id().ok_or(Error::MissingRecordId)?;
        let file = self.catalog.database_file(rid.page_id.table_id)?;
        let pages = file.delete_tuple(self, tid, tuple)?;
        self.admit_dirty(tid, pages)
    }

    // ========================================================================
    // Public API: Transaction completion
    // ========================================================================

    /// Commit or abort `tid`, then release all of its locks.
    ///
    /// Commit writes every page `tid` dirtied (log record first) and makes
    /// the current contents the new before-image. Abort reloads those pages
    /// from their heap files into the live cached instances.
    ///
    /// A page whose commit write fails is reverted instead, and a page that
    /// cannot be reverted is dropped from the cache. Locks are released
    /// either way; the first failure is returned.
    pub fn transaction_complete(&self, tid: TransactionId, commit: bool) -> Result<()> {
        let mut first_err = None;

        for page_id in self.lock_manager.pages_locked_by(tid) {
            let Some(page) = self.cached(page_id) else {
                continue;
            };

            if commit {
                match self.commit_page(&page, tid) {
                    Ok(()) => continue,
                    Err(e) => {
                        // The page was not made durable: roll it back like an abort.
                        warn!(%tid, table = page_id.table_id, page = page_id.page_number, error = %e, "buffer_pool.commit_page_failed");
                        first_err.get_or_insert(e);
                    }
                }
            }

            if let Err(e) = self.revert_page(&page, tid) {
                // Nobody may see the changes once the locks go, so drop the page.
                warn!(%tid, table = page_id.table_id, page = page_id.page_number, error = %e, "buffer_pool.revert_failed");
                self.discard_page(page_id);
                first_err.get_or_insert(e);
            }
        }

        let released = self.lock_manager.release_all(tid);
        if commit && first_err.is_none() {
            BufferPoolStats::bump(&self.stats.commits);
        } else {
            BufferPoolStats::bump(&self.stats.aborts);
        }
        debug!(%tid, commit, released, "buffer_pool.transaction_complete");

        first_err.map_or(Ok(()), Err)
    }

    /// Release one page lock before the transaction ends.
    ///
    /// Breaks two-phase locking; only safe for pages the transaction has
    /// neither read nor modified.
    pub fn unsafe_release_page(&self, tid: TransactionId, page_id: PageId) {
        self.lock_manager.release(page_id, tid);
    }

    /// Does `tid` hold a lock on `page_id`?
    pub fn holds_lock(&self, tid: TransactionId, page_id: PageId) -> bool {
        self.lock_manager.holds_lock(page_id, tid)
    }

    // ========================================================================
    // Public API: Flush and discard
    // ========================================================================

    /// Write every dirty cached page to its heap file.
    ///
    /// This writes uncommitted data too, so it bypasses no-steal; use it at
    /// shutdown or in tests.
    pub fn flush_all_pages(&self) -> Result<()> {
        let pages: Vec<SharedPage> = self.pages.read().values().cloned().collect();
        for page in pages {
            self.flush_page(&mut page.write())?;
        }
        Ok(())
    }

    /// Write the cached pages dirtied by `tid`.
    pub fn flush_pages(&self, tid: TransactionId) -> Result<()> {
        for page_id in self.lock_manager.pages_locked_by(tid) {
            if let Some(page) = self.cached(page_id) {
                let mut guard = page.write();
                if guard.dirtier() == Some(tid) {
                    self.flush_page(&mut guard)?;
                }
            }
        }
        Ok(())
    }

    /// Drop a page from the cache without writing it.
    pub fn discard_page(&self, page_id: PageId) {
        let mut replacer = self.replacer.lock();
        replacer.remove(page_id);
        if self.pages.write().remove(&page_id).is_some() {
            debug!(table = page_id.table_id, page = page_id.page_number, "buffer_pool.discard");
        }
    }

    // ========================================================================
    // Public API: Stats and info
    // ========================================================================

    /// Maximum number of cached pages.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Number of pages currently cached.
    pub fn cached_pages(&self) -> usize {
        self.pages.read().len()
    }

    pub fn is_cached(&self, page_id: PageId) -> bool {
        self.pages.read().contains_key(&page_id)
    }

    pub fn stats(&self) -> &BufferPoolStats {
        &self.stats
    }

    pub fn lock_manager(&self) -> &LockManager {
        &self.lock_manager
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    // ========================================================================
    // Internal: Core fetch logic
    // ========================================================================

    fn cached(&self, page_id: PageId) -> Option<SharedPage> {
        self.pages.read().get(&page_id).cloned()
    }

    /// Serve a page from the cache, or load it, evicting if the pool is full.
    fn fetch(&self, page_id: PageId) -> Result<SharedPage> {
        let mut replacer = self.replacer.lock();

        if let Some(page) = self.cached(page_id) {
            replacer.touch(page_id);
            BufferPoolStats::bump(&self.stats.cache_hits);
            trace!(table = page_id.table_id, page = page_id.page_number, "buffer_pool.hit");
            return Ok(page);
        }

        BufferPoolStats::bump(&self.stats.cache_misses);
        let file = self.catalog.database_file(page_id.table_id)?;

        // Read before evicting, so a missing page costs no cached one.
        let page = Arc::new(RwLock::new(file.read_page(page_id)?));
        BufferPoolStats::bump(&self.stats.pages_read);

        if self.cached_pages() >= self.capacity {
            self.evict_page(&mut replacer)?;
        }

        self.pages.write().insert(page_id, Arc::clone(&page));
        replacer.touch(page_id);
        debug!(table = page_id.table_id, page = page_id.page_number, "buffer_pool.load");
        Ok(page)
    }

    /// Mark pages returned by a heap file dirty and make sure each is the
    /// cached instance.
    fn admit_dirty(&self, tid: TransactionId, pages: Vec<SharedPage>) -> Result<()> {
        let mut replacer = self.replacer.lock();

        for page in pages {
            let page_id = {
                let mut guard = page.write();
                guard.mark_dirty(Some(tid));
                guard.page_id()
            };

            match self.cached(page_id) {
                Some(current) if Arc::ptr_eq(&current, &page) => {}
                current => {
                    if current.is_none() && self.cached_pages() >= self.capacity {
                        self.evict_page(&mut replacer)?;
                    }
                    self.pages.write().insert(page_id, page);
                }
            }
            replacer.touch(page_id);
        }
        Ok(())
    }

    // ========================================================================
    // Internal: Eviction
    // ========================================================================

    /// Evict the least recently used clean page.
    ///
    /// Pages whose latch is held are skipped.
    fn evict_page(&self, replacer: &mut LruReplacer) -> Result<()> {
        let victim = {
            let pages = self.pages.read();
            replacer.iter_lru().find(|page_id| match pages.get(page_id) {
                Some(page) => page.try_read().is_some_and(|p| !p.is_dirty()),
                None => true,
            })
        };

        let Some(victim) = victim else {
            return Err(Error::AllPagesDirty {
                capacity: self.capacity,
            });
        };

        replacer.remove(victim);
        self.pages.write().remove(&victim);
        BufferPoolStats::bump(&self.stats.evictions);
        debug!(table = victim.table_id, page = victim.page_number, "buffer_pool.evict");
        Ok(())
    }

    // ========================================================================
    // Internal: Writing and reverting pages
    // ========================================================================

    /// Log and write a dirty page, then mark it clean.
    fn flush_page(&self, page: &mut HeapPage) -> Result<()> {
        let Some(dirtier) = page.dirtier() else {
            return Ok(());
        };
        let page_id = page.page_id();
        let file = self.catalog.database_file(page_id.table_id)?;

        self.log
            .log_write(dirtier, page_id, page.before_image_data(), page.page_data())?;
        self.log.force()?;
        file.write_page(page)?;

        page.mark_dirty(None);
        BufferPoolStats::bump(&self.stats.pages_written);
        debug!(table = page_id.table_id, page = page_id.page_number, tid = %dirtier, "buffer_pool.flush");
        Ok(())
    }

    fn commit_page(&self, page: &SharedPage, tid: TransactionId) -> Result<()> {
        let mut guard = page.write();
        if guard.dirtier() == Some(tid) {
            self.flush_page(&mut guard)?;
        }
        guard.set_before_image();
        Ok(())
    }

    /// Reload the last durable contents into the live page.
    fn revert_page(&self, page: &SharedPage, tid: TransactionId) -> Result<()> {
        let mut guard = page.write();
        if guard.dirtier() != Some(tid) {
            return Ok(());
        }

        let page_id = guard.page_id();
        let file = self.catalog.database_file(page_id.table_id)?;
        let data = file.read_page_data(page_id)?;
        guard.restore(&data);
        BufferPoolStats::bump(&self.stats.pages_read);
        debug!(table = page_id.table_id, page = page_id.page_number, %tid, "buffer_pool.revert");
        Ok(())
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("capacity", &self.capacity)
            .field("page_size", &self.page_size)
            .field("cached_pages", &self.cached_pages())
            .field("lock_timeout", &self.lock_timeout)
            .finish()
    }
}
