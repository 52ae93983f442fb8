//! Common types and utilities shared across heapstore.
//!
//! This module contains fundamental primitives used throughout the codebase:
//! - Configuration constants and [`StorageConfig`]
//! - Error types
//! - Identifiers (PageId, TransactionId) and lock modes

pub mod config;
pub mod error;
mod page_id;
mod transaction_id;

pub use config::StorageConfig;
pub use error::{AbortReason, Error, Result};
pub use page_id::PageId;
pub use transaction_id::{LockMode, Permissions, TransactionId};
