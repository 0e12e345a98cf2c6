//! FolioDB - embedded file-per-record document store
//!
//! Every record is one file holding a serialized document, addressed by a
//! string or auto-incremented integer id. Secondary indices subscribe to the
//! store's lifecycle events and keep themselves current; a memoizing cache
//! wraps reads.
//!
//! # Quick Start
//!
//! ```ignore
//! use foliodb::prelude::*;
//! use std::sync::Arc;
//!
//! let store = Arc::new(RecordStore::open("/path/to/data")?);
//! let by_type = Index::new(Arc::clone(&store), "type", "type")?;
//!
//! let id = store.create(&json!({"type": "user", "name": "ann"}))?;
//! assert_eq!(by_type.find("user")?, vec![id]);
//! ```
//!
//! # Architecture
//!
//! - [`folio_core`]: ids, documents, codecs and the error type
//! - [`folio_concurrency`]: named, reentrant, cross-process locks
//! - [`folio_storage`]: the record store, its event bus and configuration
//! - [`folio_primitives`]: indices and the cache
//!
//! Several processes may open the same directory; writes to one id and
//! maintenance of one index are serialized through advisory file locks.

pub use folio_concurrency::{LockGuard, LockManager};
pub use folio_core::{
    codec_by_name, is_hidden, is_valid_id, Codec, Document, Error, JsonCodec, MsgPackCodec,
    RecordId, Result, HIDDEN_MARKER,
};
pub use folio_primitives::{Cache, Index, KeyOrder, KeyQuery, KeySpec};
pub use folio_storage::{
    Event, EventBus, EventNames, Filter, HandlerId, Layout, RecordStore, StoreConfig,
    CONFIG_FILE_NAME,
};

/// Lifecycle event names fired by the store
pub mod events {
    pub use folio_storage::events::{
        BEFORE_DELETE, BEFORE_LOAD, BEFORE_SAVE, DELETED, LOADED, REPAIR, SAVED,
    };
}

/// Everything needed for everyday use
pub mod prelude {
    pub use crate::{
        Cache, Document, Error, Event, Filter, Index, KeyQuery, KeySpec, RecordId, RecordStore,
        Result, StoreConfig,
    };
    pub use serde_json::json;
}
