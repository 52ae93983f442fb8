//! Storage layer - heap files and page formats.
//!
//! This module handles persistent storage:
//! - [`HeapFile`] - Per-table page store and tuple operations
//! - [`page`] - Page types and layouts

mod heap_file;
pub mod page;

pub use heap_file::{HeapFile, HeapFileIterator};
