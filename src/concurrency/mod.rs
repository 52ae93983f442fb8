//! Concurrency control - page-level two-phase locking.
//!
//! - [`LockManager`] - Shared/Exclusive page locks with bounded waits
//! - [`WaitForGraph`] - Cycle detection over blocked transactions

mod lock_manager;
mod wait_for;

pub use lock_manager::{LockManager, LockStats};
pub use wait_for::WaitForGraph;
