//! Storage layer for Folio
//!
//! This crate provides the record store and everything it embeds:
//! - RecordStore: one-file-per-record CRUD with crash-safe writes
//! - EventBus: priority-ordered lifecycle events for observers
//! - StoreConfig: `_folio.toml` configuration
//! - Layout: physical paths, fan-out directories and enumeration

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod events;
pub mod layout;
pub mod store;

pub use config::{StoreConfig, CONFIG_FILE_NAME};
pub use events::{Event, EventBus, EventNames, Handler, HandlerId};
pub use layout::Layout;
pub use store::{Filter, RecordStore};
