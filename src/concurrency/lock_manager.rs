//! Page-level lock manager.
//!
//! Each page has a registry of lock holders in one of three states:
//!
//! ```text
//!   empty ──S──▶ all-shared {T1:S, T2:S, ...}
//!     │              │ sole holder asks X (upgrade in place)
//!     └──────X──────▶ exclusive {T:X}  (re-entrant for T only)
//! ```
//!
//! [`LockManager::try_acquire`] applies that state machine without
//! blocking. [`LockManager::acquire`] waits on the page's condition
//! variable until a release makes the grant possible, the deadline passes,
//! or waiting would close a cycle in the wait-for graph.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace, warn};

use super::wait_for::WaitForGraph;
use crate::common::{AbortReason, Error, LockMode, PageId, Result, TransactionId};

/// Holders of one page, plus the transactions blocked on it.
struct LockEntry {
    holders: Vec<(TransactionId, LockMode)>,
    /// Transactions parked on `cond`, one slot per waiting thread. The
    /// entry outlives its last holder while anyone waits, so waiters never
    /// sleep on a discarded condvar.
    waiting: Vec<TransactionId>,
    cond: Arc<Condvar>,
}

/// Outcome of a successful grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Grant {
    New,
    Upgraded,
    AlreadyHeld,
}

impl LockEntry {
    fn new() -> Self {
        Self {
            holders: Vec::new(),
            waiting: Vec::new(),
            cond: Arc::new(Condvar::new()),
        }
    }

    fn mode_of(&self, tid: TransactionId) -> Option<LockMode> {
        self.holders
            .iter()
            .find(|(holder, _)| *holder == tid)
            .map(|&(_, mode)| mode)
    }

    fn try_grant(&mut self, tid: TransactionId, mode: LockMode) -> Option<Grant> {
        let held = self.mode_of(tid);

        if self.holders.is_empty() {
            self.holders.push((tid, mode));
            return Some(Grant::New);
        }

        match mode {
            LockMode::Shared => {
                if held.is_some() {
                    // Re-entrant: a shared request never weakens an X lock.
                    return Some(Grant::AlreadyHeld);
                }
                if self.holders[0].1 == LockMode::Shared {
                    self.holders.push((tid, LockMode::Shared));
                    return Some(Grant::New);
                }
                None
            }
            LockMode::Exclusive => {
                if self.holders.len() != 1 || held.is_none() {
                    return None;
                }
                if held == Some(LockMode::Exclusive) {
                    return Some(Grant::AlreadyHeld);
                }
                self.holders[0].1 = LockMode::Exclusive;
                Some(Grant::Upgraded)
            }
        }
    }

    /// Holders that stand between `tid` and the lock.
    fn blockers(&self, tid: TransactionId) -> impl Iterator<Item = TransactionId> + '_ {
        self.holders
            .iter()
            .map(|&(holder, _)| holder)
            .filter(move |holder| *holder != tid)
    }

    fn release(&mut self, tid: TransactionId) -> bool {
        match self.holders.iter().position(|(holder, _)| *holder == tid) {
            Some(idx) => {
                self.holders.remove(idx);
                true
            }
            None => false,
        }
    }

    fn is_unused(&self) -> bool {
        self.holders.is_empty() && self.waiting.is_empty()
    }
}

#[derive(Default)]
struct LockTable {
    entries: HashMap<PageId, LockEntry>,
    /// Pages each transaction currently holds a lock on.
    touched: HashMap<TransactionId, HashSet<PageId>>,
    wait_for: WaitForGraph,
}

impl LockTable {
    fn try_grant(&mut self, page_id: PageId, tid: TransactionId, mode: LockMode) -> Option<Grant> {
        let entry = self.entries.entry(page_id).or_insert_with(LockEntry::new);
        let grant = entry.try_grant(tid, mode);
        if grant == Some(Grant::New) {
            // Parked waiters now also wait for the new holder.
            for &waiter in entry.waiting.iter().filter(|&&w| w != tid) {
                self.wait_for.add_wait(waiter, tid);
            }
        }
        if grant.is_some() {
            self.touched.entry(tid).or_default().insert(page_id);
        } else if entry.is_unused() {
            self.entries.remove(&page_id);
        }
        grant
    }

    fn release(&mut self, page_id: PageId, tid: TransactionId) -> bool {
        let released = match self.entries.get_mut(&page_id) {
            Some(entry) => {
                let released = entry.release(tid);
                if released {
                    entry.cond.notify_all();
                }
                if entry.is_unused() {
                    self.entries.remove(&page_id);
                }
                released
            }
            None => false,
        };

        if let Some(pages) = self.touched.get_mut(&tid) {
            pages.remove(&page_id);
            if pages.is_empty() {
                self.touched.remove(&tid);
            }
        }
        released
    }
}

/// Statistics about the lock manager.
#[derive(Debug, Default)]
pub struct LockStats {
    /// Locks granted (new holders).
    pub acquisitions: AtomicU64,
    /// Shared locks upgraded in place to exclusive.
    pub upgrades: AtomicU64,
    /// Requests that had to wait at least once.
    pub waits: AtomicU64,
    /// Waits that ran past their deadline.
    pub timeouts: AtomicU64,
    /// Waits refused because they would deadlock.
    pub deadlocks: AtomicU64,
    /// Locks released.
    pub releases: AtomicU64,
}

impl LockStats {
    fn record(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Grants, upgrades and releases page locks on behalf of transactions.
///
/// # Thread Safety
/// All state lives in one `Mutex<LockTable>`: the per-page registries, the
/// transaction → pages-touched map, and the wait-for graph. Each registry
/// entry owns a `Condvar` that waiters park on with that mutex.
pub struct LockManager {
    table: Mutex<LockTable>,
    deadlock_detection: bool,
    stats: LockStats,
}

impl LockManager {
    /// Creates a lock manager with deadlock detection enabled.
    pub fn new() -> Self {
        Self::with_deadlock_detection(true)
    }

    /// Creates a lock manager, choosing whether waits run cycle detection.
    pub fn with_deadlock_detection(deadlock_detection: bool) -> Self {
        Self {
            table: Mutex::new(LockTable::default()),
            deadlock_detection,
            stats: LockStats::default(),
        }
    }

    // ========================================================================
    // Acquire
    // ========================================================================

    /// Try to take a lock without blocking.
    ///
    /// Returns `false` if another transaction's lock is incompatible.
    pub fn try_acquire(&self, page_id: PageId, tid: TransactionId, mode: LockMode) -> bool {
        let mut table = self.table.lock();
        let grant = table.try_grant(page_id, tid, mode);
        self.record_grant(page_id, tid, mode, grant);
        grant.is_some()
    }

    /// Take a lock, waiting up to `timeout` for conflicting holders to leave.
    ///
    /// # Errors
    /// `Error::TransactionAborted` with [`AbortReason::Timeout`] when the
    /// deadline passes, or [`AbortReason::Deadlock`] when waiting would close
    /// a cycle. The caller owns aborting the transaction.
    pub fn acquire(
        &self,
        page_id: PageId,
        tid: TransactionId,
        mode: LockMode,
        timeout: Duration,
    ) -> Result<()> {
        let deadline = Instant::now().checked_add(timeout);
        let mut table = self.table.lock();

        let grant = table.try_grant(page_id, tid, mode);
        if grant.is_some() {
            self.record_grant(page_id, tid, mode, grant);
            return Ok(());
        }

        LockStats::record(&self.stats.waits);
        debug!(table = page_id.table_id, page = page_id.page_number, %tid, %mode, "lock.wait");

        let cond = {
            let entry = table.entries.entry(page_id).or_insert_with(LockEntry::new);
            entry.waiting.push(tid);
            Arc::clone(&entry.cond)
        };

        let outcome = loop {
            if self.deadlock_detection {
                let blockers: Vec<TransactionId> = table
                    .entries
                    .get(&page_id)
                    .map(|entry| entry.blockers(tid).collect())
                    .unwrap_or_default();
                table.wait_for.set_waits(tid, blockers);

                if let Some(cycle) = table.wait_for.find_cycle(tid) {
                    warn!(
                        table = page_id.table_id,
                        page = page_id.page_number,
                        %tid,
                        cycle = ?cycle,
                        "lock.deadlock"
                    );
                    LockStats::record(&self.stats.deadlocks);
                    break Err(AbortReason::Deadlock);
                }
            }

            let timed_out = match deadline {
                Some(deadline) => cond.wait_until(&mut table, deadline).timed_out(),
                None => {
                    cond.wait(&mut table);
                    false
                }
            };

            let grant = table.try_grant(page_id, tid, mode);
            if grant.is_some() {
                self.record_grant(page_id, tid, mode, grant);
                break Ok(());
            }
            if timed_out || deadline.is_some_and(|d| Instant::now() >= d) {
                warn!(
                    table = page_id.table_id,
                    page = page_id.page_number,
                    %tid,
                    timeout_ms = timeout.as_millis() as u64,
                    "lock.timeout"
                );
                LockStats::record(&self.stats.timeouts);
                break Err(AbortReason::Timeout);
            }
        };

        table.wait_for.clear_waits(tid);
        if let Some(entry) = table.entries.get_mut(&page_id) {
            if let Some(idx) = entry.waiting.iter().position(|w| *w == tid) {
                entry.waiting.swap_remove(idx);
            }
            if entry.is_unused() {
                table.entries.remove(&page_id);
            }
        }

        outcome.map_err(|reason| Error::TransactionAborted { tid, reason })
    }

    fn record_grant(&self, page_id: PageId, tid: TransactionId, mode: LockMode, grant: Option<Grant>) {
        match grant {
            Some(Grant::New) => LockStats::record(&self.stats.acquisitions),
            Some(Grant::Upgraded) => LockStats::record(&self.stats.upgrades),
            Some(Grant::AlreadyHeld) | None => return,
        }
        trace!(table = page_id.table_id, page = page_id.page_number, %tid, %mode, "lock.granted");
    }

    // ========================================================================
    // Release
    // ========================================================================

    /// Release `tid`'s lock on one page and wake its waiters.
    ///
    /// Only this page leaves the transaction's touched set; its other locks
    /// stay tracked. Returns whether a lock was held.
    pub fn release(&self, page_id: PageId, tid: TransactionId) -> bool {
        let released = self.table.lock().release(page_id, tid);
        if released {
            LockStats::record(&self.stats.releases);
        }
        released
    }

    /// Release every lock held by `tid` and forget the transaction.
    ///
    /// Returns the number of locks released.
    pub fn release_all(&self, tid: TransactionId) -> usize {
        let mut table = self.table.lock();
        let pages = table.touched.remove(&tid).unwrap_or_default();

        let mut count = 0;
        for page_id in pages {
            if table.release(page_id, tid) {
                count += 1;
            }
        }
        table.wait_for.remove_txn(tid);

        self.stats.releases.fetch_add(count as u64, Ordering::Relaxed);
        count
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Does `tid` hold any lock on `page_id`?
    pub fn holds_lock(&self, page_id: PageId, tid: TransactionId) -> bool {
        self.lock_mode(page_id, tid).is_some()
    }

    /// Mode of `tid`'s lock on `page_id`, if any.
    pub fn lock_mode(&self, page_id: PageId, tid: TransactionId) -> Option<LockMode> {
        self.table
            .lock()
            .entries
            .get(&page_id)
            .and_then(|entry| entry.mode_of(tid))
    }

    /// Pages `tid` holds locks on, in page order.
    pub fn pages_locked_by(&self, tid: TransactionId) -> Vec<PageId> {
        let mut pages: Vec<PageId> = self
            .table
            .lock()
            .touched
            .get(&tid)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        pages.sort_unstable();
        pages
    }

    /// Number of pages with a live registry entry.
    pub fn locked_page_count(&self) -> usize {
        self.table.lock().entries.len()
    }

    /// Number of transactions holding at least one lock.
    pub fn txn_count(&self) -> usize {
        self.table.lock().touched.len()
    }

    pub fn stats(&self) -> &LockStats {
        &self.stats
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LockManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockManager")
            .field("locked_pages", &self.locked_page_count())
            .field("txn_count", &self.txn_count())
            .field("deadlock_detection", &self.deadlock_detection)
            .finish()
    }
}
