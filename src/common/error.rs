//! Error types for heapstore.

use std::fmt;

use thiserror::Error;

use super::{PageId, TransactionId};

/// Convenient Result type alias.
///
/// Instead of writing `Result<T, Error>` everywhere, we can write `Result<T>`.
/// This is a common Rust pattern (see `std::io::Result`).
pub type Result<T> = std::result::Result<T, Error>;

/// Why the engine aborted a transaction on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// A page lock was not granted within the configured bound.
    Timeout,
    /// Waiting for the lock would have closed a cycle in the wait-for graph.
    Deadlock,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Timeout => write!(f, "lock wait timed out"),
            AbortReason::Deadlock => write!(f, "deadlock detected"),
        }
    }
}

/// All possible errors in heapstore.
///
/// By having a single error type, we make error handling consistent
/// across the storage, locking, and logging layers.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from page store or log file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Requested page does not exist on disk.
    #[error("{page_id} not found")]
    PageNotFound { page_id: PageId },

    /// No table with this id is registered in the catalog.
    #[error("table {table_id} not found")]
    TableNotFound { table_id: u32 },

    /// No table with this name is registered in the catalog.
    #[error("table {name:?} not found")]
    TableNameNotFound { name: String },

    /// The engine aborted the transaction; its locks are already released.
    #[error("transaction {tid} aborted: {reason}")]
    TransactionAborted {
        tid: TransactionId,
        reason: AbortReason,
    },

    /// Every cached page is dirty, so nothing can be evicted (no-steal).
    #[error("cannot evict: all {capacity} cached pages are dirty")]
    AllPagesDirty { capacity: usize },

    /// The page has no empty slot.
    #[error("{page_id} is full")]
    PageFull { page_id: PageId },

    /// The slot a tuple points at is empty or out of range.
    #[error("no tuple in slot {slot} of {page_id}")]
    TupleNotFound { page_id: PageId, slot: u16 },

    /// The tuple has never been stored and carries no record id.
    #[error("tuple has no record id")]
    MissingRecordId,

    /// The tuple belongs to a different table than the one asked to store it.
    #[error("tuple belongs to table {actual}, not table {expected}")]
    WrongTable { expected: u32, actual: u32 },

    /// The tuple payload does not match the table's fixed tuple size.
    #[error("tuple is {actual} bytes, table expects {expected}")]
    TupleSizeMismatch { expected: usize, actual: usize },

    /// On-disk data failed validation.
    #[error("corrupted data: {message}")]
    Corrupted { message: String },

    /// Invalid configuration.
    #[error("configuration error: {message}")]
    Config { message: String },
}

impl Error {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
        }
    }

    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Error::Corrupted {
            message: message.into(),
        }
    }

    /// Returns true if the engine aborted the transaction.
    pub fn is_abort(&self) -> bool {
        matches!(self, Error::TransactionAborted { .. })
    }

    /// Returns true for "no such page" outcomes.
    pub fn is_page_not_found(&self) -> bool {
        matches!(self, Error::PageNotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::PageNotFound {
            page_id: PageId::new(7, 42),
        };
        assert_eq!(format!("{}", err), "Page(7:42) not found");

        let err = Error::AllPagesDirty { capacity: 3 };
        assert_eq!(
            format!("{}", err),
            "cannot evict: all 3 cached pages are dirty"
        );
    }

    #[test]
    fn test_abort_display_and_kind() {
        let err = Error::TransactionAborted {
            tid: TransactionId::new(9),
            reason: AbortReason::Timeout,
        };
        assert!(err.is_abort());
        assert!(!err.is_page_not_found());
        assert_eq!(format!("{}", err), "transaction Txn(9) aborted: lock wait timed out");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();

        match err {
            Error::Io(_) => {} // Success
            _ => panic!("Expected Io error"),
        }
        assert!(!Error::config("x").is_abort());
    }
}
