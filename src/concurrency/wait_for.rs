//! Deadlock detection using a wait-for graph.
//!
//! The graph tracks which transactions are waiting for which:
//! ```text
//! T1 waits for T2:  T1 -> T2
//! T2 waits for T3:  T2 -> T3
//! T3 waits for T1:  T3 -> T1 (cycle = deadlock!)
//! ```
//!
//! The lock manager refreshes a waiter's edges every time it (re)starts
//! waiting, under the lock table mutex. Whichever waiter closes a cycle
//! sees it first and is the one aborted.

use std::collections::{HashMap, HashSet};

use crate::common::TransactionId;

/// Waiter -> set of holders it is waiting for.
#[derive(Debug, Default)]
pub struct WaitForGraph {
    edges: HashMap<TransactionId, HashSet<TransactionId>>,
}

impl WaitForGraph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the set of transactions `waiter` is waiting for.
    pub fn set_waits(&mut self, waiter: TransactionId, holders: impl IntoIterator<Item = TransactionId>) {
        let holders: HashSet<TransactionId> = holders.into_iter().filter(|h| *h != waiter).collect();
        if holders.is_empty() {
            self.edges.remove(&waiter);
        } else {
            self.edges.insert(waiter, holders);
        }
    }

    /// Adds one edge to `waiter`'s existing set.
    pub fn add_wait(&mut self, waiter: TransactionId, holder: TransactionId) {
        if waiter != holder {
            self.edges.entry(waiter).or_default().insert(holder);
        }
    }

    /// Removes the outgoing edges of `waiter`.
    pub fn clear_waits(&mut self, waiter: TransactionId) {
        self.edges.remove(&waiter);
    }

    /// Removes a transaction and every edge pointing at it.
    pub fn remove_txn(&mut self, tid: TransactionId) {
        self.edges.remove(&tid);
        self.edges.retain(|_, holders| {
            holders.remove(&tid);
            !holders.is_empty()
        });
    }

    /// Is `waiter` currently waiting for `holder`?
    pub fn is_waiting_for(&self, waiter: TransactionId, holder: TransactionId) -> bool {
        self.edges
            .get(&waiter)
            .is_some_and(|holders| holders.contains(&holder))
    }

    /// Number of transactions with outgoing edges.
    pub fn waiter_count(&self) -> usize {
        self.edges.len()
    }

    /// Finds a cycle that passes through `start`.
    ///
    /// Returns the cycle as a path beginning at `start`, e.g. `[T1, T2, T3]`
    /// for `T1 -> T2 -> T3 -> T1`.
    pub fn find_cycle(&self, start: TransactionId) -> Option<Vec<TransactionId>> {
        let mut visited = HashSet::new();
        let mut path = vec![start];
        if self.dfs(start, start, &mut visited, &mut path) {
            Some(path)
        } else {
            None
        }
    }

    fn dfs(
        &self,
        start: TransactionId,
        current: TransactionId,
        visited: &mut HashSet<TransactionId>,
        path: &mut Vec<TransactionId>,
    ) -> bool {
        let Some(holders) = self.edges.get(&current) else {
            return false;
        };

        // Sorted so the reported cycle is deterministic.
        let mut next: Vec<TransactionId> = holders.iter().copied().collect();
        next.sort_unstable();

        for holder in next {
            if holder == start {
                return true;
            }
            if visited.insert(holder) {
                path.push(holder);
                if self.dfs(start, holder, visited, path) {
                    return true;
                }
                path.pop();
            }
        }
        false
    }
}
