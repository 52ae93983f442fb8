//! Recovery - the write-ahead log consulted at commit time.
//!
//! - [`LogService`] - What the buffer pool needs from a log
//! - [`LogFile`] - Append-only log file with checksummed update records
//! - [`NoLog`] - A log that discards everything

mod log;

pub use log::{LogFile, LogRecord, LogService, NoLog};
