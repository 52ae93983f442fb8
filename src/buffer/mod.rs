//! Buffer pool management.
//!
//! The buffer pool is the in-memory cache between transactions and heap
//! files. Every page access goes through it and is covered by a page lock.
//!
//! # Components
//! - [`BufferPool`] - The transactional page cache
//! - [`SharedPage`] - The single live instance of a cached page
//! - [`BufferPoolStats`] - Performance statistics
//! - [`replacer`] - Recency tracking for eviction

mod buffer_pool;
pub mod replacer;
mod stats;

pub use buffer_pool::{BufferPool, SharedPage};
pub use stats::{BufferPoolStats, StatsSnapshot};
