//! Concurrency layer for Folio
//!
//! This crate implements the named, cross-process locking discipline every
//! store mutation runs under:
//! - LockManager: reentrant `synchronized(names, body)` over advisory file locks
//! - LockGuard: RAII release of one acquired name

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod lock;

pub use lock::{is_lock_marker, lock_marker_name, LockGuard, LockManager};
