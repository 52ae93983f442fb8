//! Recency tracking for eviction.
//!
//! Currently implements:
//! - [`LruReplacer`] - O(1) least-recently-used ordering over page ids

mod lru;

pub use lru::{LruIter, LruReplacer};
