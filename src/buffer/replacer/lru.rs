//! LRU (Least Recently Used) recency tracker.
//!
//! Records page-touch order for the buffer pool. It only orders pages; the
//! pool decides which of them may be evicted (clean pages only).

use std::collections::HashMap;

use crate::common::PageId;

const NIL: usize = usize::MAX;

struct Node {
    page_id: PageId,
    prev: usize,
    next: usize,
}

/// Doubly-linked recency list over page ids.
///
/// Nodes live in a slab (`Vec<Node>`) linked by index, with a `HashMap`
/// from page id to slot, so `touch` and `remove` are O(1).
///
/// ```text
///  head (most recent)                      tail (least recent)
///  [P7] <-> [P2] <-> [P9] <-> ... <-> [P1]
///                                      ^ iter_lru() starts here
/// ```
pub struct LruReplacer {
    nodes: Vec<Node>,
    /// Slots of removed nodes, reused before growing the slab.
    free: Vec<usize>,
    index: HashMap<PageId, usize>,
    head: usize,
    tail: usize,
}

impl LruReplacer {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create an empty tracker with room for `capacity` pages.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(capacity),
            free: Vec::new(),
            index: HashMap::with_capacity(capacity),
            head: NIL,
            tail: NIL,
        }
    }

    /// Record an access: insert the page, or move it to the front.
    pub fn touch(&mut self, page_id: PageId) {
        if let Some(&slot) = self.index.get(&page_id) {
            if slot != self.head {
                self.unlink(slot);
                self.push_front(slot);
            }
            return;
        }

        let node = Node {
            page_id,
            prev: NIL,
            next: NIL,
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = node;
                slot
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        };
        self.index.insert(page_id, slot);
        self.push_front(slot);
    }

    /// Forget a page. Returns whether it was tracked.
    pub fn remove(&mut self, page_id: PageId) -> bool {
        match self.index.remove(&page_id) {
            Some(slot) => {
                self.unlink(slot);
                self.free.push(slot);
                true
            }
            None => false,
        }
    }

    /// Scan from least to most recently touched.
    pub fn iter_lru(&self) -> LruIter<'_> {
        LruIter {
            replacer: self,
            cursor: self.tail,
        }
    }

    #[inline]
    pub fn contains(&self, page_id: PageId) -> bool {
        self.index.contains_key(&page_id)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    fn unlink(&mut self, slot: usize) {
        let (prev, next) = (self.nodes[slot].prev, self.nodes[slot].next);

        if prev == NIL {
            self.head = next;
        } else {
            self.nodes[prev].next = next;
        }

        if next == NIL {
            self.tail = prev;
        } else {
            self.nodes[next].prev = prev;
        }

        self.nodes[slot].prev = NIL;
        self.nodes[slot].next = NIL;
    }

    fn push_front(&mut self, slot: usize) {
        self.nodes[slot].prev = NIL;
        self.nodes[slot].next = self.head;

        if self.head == NIL {
            self.tail = slot;
        } else {
            self.nodes[self.head].prev = slot;
        }
        self.head = slot;
    }
}

impl Default for LruReplacer {
    fn default() -> Self {
        Self::new()
    }
}

/// Tail-to-head iterator returned by [`LruReplacer::iter_lru`].
pub struct LruIter<'a> {
    replacer: &'a LruReplacer,
    cursor: usize,
}

impl Iterator for LruIter<'_> {
    type Item = PageId;

    fn next(&mut self) -> Option<PageId> {
        if self.cursor == NIL {
            return None;
        }
        let node = &self.replacer.nodes[self.cursor];
        self.cursor = node.prev;
        Some(node.page_id)
    }
}
