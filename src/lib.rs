//! heapstore - an embedded page store with a transactional buffer pool.
//!
//! # Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                           Database                              │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │               Buffer Pool (buffer/)                      │   │
//! │  │   get_page · insert/delete tuple · transaction_complete  │   │
//! │  │   no-steal LRU eviction · force at commit                │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │          ↓                    ↓                     ↓           │
//! │  ┌────────────────┐  ┌──────────────────┐  ┌────────────────┐  │
//! │  │ concurrency/   │  │ catalog/         │  │ recovery/      │  │
//! │  │ S/X page locks │  │ table id → file  │  │ write-ahead    │  │
//! │  │ wait-for graph │  │                  │  │ log            │  │
//! │  └────────────────┘  └──────────────────┘  └────────────────┘  │
//! │                               ↓                                 │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │               Storage Layer (storage/)                   │   │
//! │  │          HeapFile + HeapPage + Tuple/RecordId            │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//! - [`common`] - Shared primitives (PageId, TransactionId, Error, config)
//! - [`storage`] - Heap files and page formats
//! - [`concurrency`] - Page lock manager and deadlock detection
//! - [`buffer`] - Buffer pool and LRU recency tracking
//! - [`recovery`] - Write-ahead log
//! - [`catalog`] - Table registry
//!
//! # Quick Start
//! ```no_run
//! use heapstore::{Database, Permissions, PageId, StorageConfig, TransactionId};
//!
//! let db = Database::open(StorageConfig::default(), "wal.log").unwrap();
//! let table = db.add_table("users.dat", "users", 8).unwrap();
//!
//! let tid = TransactionId::next();
//! let _page = db
//!     .buffer_pool()
//!     .get_page(tid, PageId::new(table, 0), Permissions::ReadOnly);
//! db.buffer_pool().transaction_complete(tid, true).unwrap();
//! ```

pub mod buffer;
pub mod catalog;
pub mod common;
pub mod concurrency;
mod database;
pub mod recovery;
pub mod storage;

// Re-export commonly used items at crate root for convenience
pub use common::config::DEFAULT_PAGE_SIZE;
pub use common::{
    AbortReason, Error, LockMode, PageId, Permissions, Result, StorageConfig, TransactionId,
};

pub use buffer::{BufferPool, BufferPoolStats, SharedPage, StatsSnapshot};
pub use catalog::Catalog;
pub use concurrency::LockManager;
pub use database::Database;
pub use recovery::{LogFile, LogService, NoLog};
pub use storage::page::{HeapPage, RecordId, Tuple};
pub use storage::HeapFile;
