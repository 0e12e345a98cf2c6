//! Primitives layer for Folio
//!
//! Builds on the record store:
//! - **Index**: secondary key → ids mapping kept in step with store events,
//!   with ordered paging and full rebuild
//! - **Cache**: read-through memoization of store reads
//!
//! ## Design Principle: Observers, Not Owners
//!
//! An index never writes records. It subscribes to the store's lifecycle
//! events at construction and persists its own state through the store under
//! a hidden id, so any number of processes can keep the same index current
//! as long as each binds it to its store instance.
//!
//! ```rust,ignore
//! use folio_primitives::{Cache, Index};
//!
//! let store = Arc::new(RecordStore::open(path)?);
//! let by_type = Index::new(Arc::clone(&store), "type", "type")?;
//! store.create(&json!({"type": "user"}))?;
//! let users = by_type.load("user")?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod index;
pub mod key;

pub use cache::Cache;
pub use index::Index;
pub use key::{KeyOrder, KeyQuery, KeySpec};
