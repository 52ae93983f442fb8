//! Page types and layout.
//!
//! This module contains:
//! - [`HeapPage`] - A page of fixed-size tuple slots with dirty tracking
//! - [`Tuple`] - A fixed-size row payload
//! - [`RecordId`] - The page and slot a stored tuple occupies

mod heap_page;
mod tuple;

pub use heap_page::HeapPage;
pub use tuple::{RecordId, Tuple};
