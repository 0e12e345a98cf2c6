//! RecordStore: one file per record
//!
//! ## Design
//!
//! Every record is a single file named by its id under the store root (or
//! under fan-out directories, see [`Layout`]). The payload is the codec's
//! encoding of the document. There is no versioning: `save` fully replaces
//! the previous content.
//!
//! ## Write Path
//!
//! `save` runs under the lock named after the id:
//!
//! ```text
//! 1. trigger beforeSave   (a handler error aborts the write)
//! 2. encode document
//! 3. IF bytes equal the file on disk: touch mtime, done
//! 4. write hidden temp file, optional fsync
//! 5. rename temp file over the record (atomic replace)
//! 6. trigger saved
//! ```
//!
//! A crash leaves either the old or the new content, plus at most a hidden
//! temp file that enumeration never reports.
//!
//! ## Hidden Ids
//!
//! Ids starting with `_` are bookkeeping: they are skipped by `each_id` and
//! `find`, and never fire lifecycle events. Index state is persisted under a
//! hidden id, which is what stops an index write from re-triggering the
//! index.
//!
//! ## Read Isolation
//!
//! `load` takes no lock. A read racing a write of the same id sees either
//! the old or the new file thanks to the rename, but a read racing a delete
//! may or may not see the record.

use crate::config::{StoreConfig, CONFIG_FILE_NAME};
use crate::events::{
    Event, EventBus, EventNames, HandlerId, BEFORE_DELETE, BEFORE_LOAD, BEFORE_SAVE, DELETED,
    LOADED, REPAIR, SAVED,
};
use crate::layout::Layout;
use folio_concurrency::{is_lock_marker, LockManager};
use folio_core::{Codec, Document, Error, RecordId, Result};
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Write};
use std::ops::ControlFlow;
use std::path::Path;
use std::time::SystemTime;
use tracing::{debug, info};

/// Name of the auto-increment counter record and of the lock guarding it
const AUTO_COUNTER: &str = "_auto";

/// Selection used by [`RecordStore::find`] and [`RecordStore::first`]
pub enum Filter {
    /// Field-by-field equality
    ///
    /// An object matches documents carrying every listed field with an equal
    /// value; a missing field is a non-match. Any other value must equal the
    /// whole document.
    Equals(Document),
    /// Arbitrary predicate over the full document
    Predicate(Box<dyn Fn(&Document) -> bool + Send + Sync>),
}

impl Filter {
    /// Equality filter, usually built with `serde_json::json!`
    pub fn equals(fields: Document) -> Self {
        Filter::Equals(fields)
    }

    /// Predicate filter
    pub fn predicate<F>(predicate: F) -> Self
    where
        F: Fn(&Document) -> bool + Send + Sync + 'static,
    {
        Filter::Predicate(Box::new(predicate))
    }

    /// Does `document` pass this filter?
    pub fn matches(&self, document: &Document) -> bool {
        match self {
            Filter::Predicate(predicate) => predicate(document),
            Filter::Equals(Document::Object(fields)) => fields
                .iter()
                .all(|(key, expected)| document.get(key) == Some(expected)),
            Filter::Equals(expected) => document == expected,
        }
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Equals(fields) => f.debug_tuple("Equals").field(fields).finish(),
            Filter::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

impl From<Document> for Filter {
    fn from(fields: Document) -> Self {
        Filter::Equals(fields)
    }
}

/// File-based document store
///
/// Owns its lock manager and event bus; nothing is process-global, so two
/// `RecordStore` values on the same directory behave like two processes.
///
/// # Example
///
/// ```ignore
/// use folio_storage::RecordStore;
/// use serde_json::json;
///
/// let store = RecordStore::open("/path/to/data")?;
/// let id = store.create(&json!({"type": "user"}))?;
/// assert_eq!(store.load(&id)?, Some(json!({"type": "user"})));
/// store.delete(&id)?;
/// ```
pub struct RecordStore {
    layout: Layout,
    config: StoreConfig,
    codec: Box<dyn Codec>,
    locks: LockManager,
    events: EventBus,
}

impl RecordStore {
    /// Open (or create) a store at `path`
    ///
    /// Writes a default `_folio.toml` on first open, otherwise honours the
    /// existing one.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let root = path.as_ref();
        fs::create_dir_all(root)?;

        let config_path = root.join(CONFIG_FILE_NAME);
        StoreConfig::write_default_if_missing(&config_path)?;
        let config = StoreConfig::from_file(&config_path)?;
        let codec = config.codec()?;
        Ok(Self::assemble(root, config, codec))
    }

    /// Open a store at `path`, persisting `config` as its configuration
    pub fn open_with_config<P: AsRef<Path>>(path: P, config: StoreConfig) -> Result<Self> {
        let codec = config.codec()?;
        Self::open_with_codec(path, config, codec)
    }

    /// Open a store with a caller-supplied codec
    pub fn open_with_codec<P: AsRef<Path>>(
        path: P,
        config: StoreConfig,
        codec: Box<dyn Codec>,
    ) -> Result<Self> {
        let root = path.as_ref();
        fs::create_dir_all(root)?;
        config.write_to_file(&root.join(CONFIG_FILE_NAME))?;
        Ok(Self::assemble(root, config, codec))
    }

    fn assemble(root: &Path, config: StoreConfig, codec: Box<dyn Codec>) -> Self {
        info!(
            target: "folio::store",
            path = %root.display(),
            fanout = config.fanout,
            codec = codec.name(),
            "Store opened"
        );
        Self {
            layout: Layout::new(root, config.fanout),
            locks: LockManager::new(root),
            events: EventBus::new(),
            config,
            codec,
        }
    }

    /// Store root directory
    pub fn path(&self) -> &Path {
        self.layout.root()
    }

    /// Active configuration
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Physical layout (paths, fan-out)
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Event bus of this store
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Lock manager of this store
    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    // ========== Records ==========

    /// Create a record under the next auto-increment id
    ///
    /// The counter lives in the hidden record `_auto` as `{"next": n}` and is
    /// read, bumped and written under the `_auto` lock, so concurrent
    /// creators never hand out the same id.
    pub fn create(&self, document: &Document) -> Result<RecordId> {
        let counter = RecordId::from(AUTO_COUNTER);
        self.synchronized([AUTO_COUNTER], || {
            let next = if self.exists(&counter) {
                self.load_field(&counter, "next")?
                    .and_then(|next| next.as_u64())
                    .ok_or_else(|| {
                        Error::Corruption(format!(
                            "auto-increment counter '{}' has no numeric 'next'",
                            AUTO_COUNTER
                        ))
                    })?
            } else {
                1
            };

            self.save(&counter, &json!({ "next": next + 1 }))?;
            let id = RecordId::from(next);
            self.save(&id, document)?;

            debug!(target: "folio::store", id = %id, "Record created");
            Ok(id)
        })
    }

    /// Write `document` as the full content of `id`
    ///
    /// Fires `beforeSave` and `saved` unless the id is hidden. Byte-identical
    /// content is not rewritten; only the modification time is refreshed.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidId`] for ids that are not valid file names or that
    /// name a lock marker, any error returned by a handler, and I/O errors
    /// from the write.
    pub fn save(&self, id: impl Into<RecordId>, document: &Document) -> Result<()> {
        let id = id.into();
        ensure_valid(&id)?;

        self.synchronized([id.as_str()], || {
            self.trigger_for(BEFORE_SAVE, &id, Some(document))?;
            let bytes = self.codec.encode(document)?;
            self.put(&id, &bytes)?;
            self.trigger_for(SAVED, &id, Some(document))
        })
    }

    /// Load the document stored under `id`
    ///
    /// Invalid and missing ids yield `None`. Fires `beforeLoad` and `loaded`
    /// unless the id is hidden.
    ///
    /// # Errors
    ///
    /// [`Error::Decode`] if the stored bytes are malformed.
    pub fn load(&self, id: impl Into<RecordId>) -> Result<Option<Document>> {
        let id = id.into();
        if !id.is_valid() {
            return Ok(None);
        }

        self.trigger_for(BEFORE_LOAD, &id, None)?;
        let document = match self.read(&id)? {
            Some(bytes) => Some(
                self.codec
                    .decode(&bytes)
                    .map_err(|message| Error::decode(id.as_str(), message))?,
            ),
            None => None,
        };
        self.trigger_for(LOADED, &id, document.as_ref())?;
        Ok(document)
    }

    /// Load one top-level field of `id`
    ///
    /// `None` if the record or the field is missing.
    pub fn load_field(&self, id: impl Into<RecordId>, key: &str) -> Result<Option<Document>> {
        Ok(self
            .load(id)?
            .and_then(|document| document.get(key).cloned()))
    }

    /// Load several ids, keeping the input order
    pub fn load_many<I, T>(&self, ids: I) -> Result<Vec<(RecordId, Option<Document>)>>
    where
        I: IntoIterator<Item = T>,
        T: Into<RecordId>,
    {
        ids.into_iter()
            .map(|id| {
                let id = id.into();
                let document = self.load(&id)?;
                Ok((id, document))
            })
            .collect()
    }

    /// Remove `id`
    ///
    /// Returns whether a file was removed; a missing record is not an error.
    /// Fires `beforeDelete` and `deleted` unless the id is hidden.
    pub fn delete(&self, id: impl Into<RecordId>) -> Result<bool> {
        let id = id.into();
        ensure_valid(&id)?;

        self.synchronized([id.as_str()], || {
            self.trigger_for(BEFORE_DELETE, &id, None)?;
            let removed = match fs::remove_file(self.layout.path_for(id.as_str())) {
                Ok(()) => true,
                Err(e) if e.kind() == io::ErrorKind::NotFound => false,
                Err(e) => return Err(e.into()),
            };
            self.trigger_for(DELETED, &id, None)?;
            debug!(target: "folio::store", id = %id, removed, "Record deleted");
            Ok(removed)
        })
    }

    /// Remove several ids, keeping the input order
    pub fn delete_many<I, T>(&self, ids: I) -> Result<Vec<(RecordId, bool)>>
    where
        I: IntoIterator<Item = T>,
        T: Into<RecordId>,
    {
        ids.into_iter()
            .map(|id| {
                let id = id.into();
                let removed = self.delete(&id)?;
                Ok((id, removed))
            })
            .collect()
    }

    /// Is there a record file for `id`? Fires no events.
    pub fn exists(&self, id: impl Into<RecordId>) -> bool {
        let id = id.into();
        id.is_valid() && self.layout.path_for(id.as_str()).is_file()
    }

    // ========== Queries ==========

    /// All records passing `filter`, keyed by id
    pub fn find(&self, filter: &Filter) -> Result<BTreeMap<RecordId, Document>> {
        let mut results = BTreeMap::new();
        self.each_id(|id| {
            if let Some(document) = self.load(&id)? {
                if filter.matches(&document) {
                    results.insert(id, document);
                }
            }
            Ok(ControlFlow::Continue(()))
        })?;
        Ok(results)
    }

    /// First record passing `filter`, in enumeration order
    pub fn first(&self, filter: &Filter) -> Result<Option<Document>> {
        let mut found = None;
        self.each_id(|id| {
            if let Some(document) = self.load(&id)? {
                if filter.matches(&document) {
                    found = Some(document);
                    return Ok(ControlFlow::Break(()));
                }
            }
            Ok(ControlFlow::Continue(()))
        })?;
        Ok(found)
    }

    /// Visit every non-hidden id; `Break` stops the enumeration
    pub fn each_id<F>(&self, mut visitor: F) -> Result<()>
    where
        F: FnMut(RecordId) -> Result<ControlFlow<()>>,
    {
        self.layout.walk(&mut |name| visitor(RecordId::from(name)))?;
        Ok(())
    }

    /// Every non-hidden id, in enumeration order
    pub fn ids(&self) -> Result<Vec<RecordId>> {
        let mut ids = Vec::new();
        self.each_id(|id| {
            ids.push(id);
            Ok(ControlFlow::Continue(()))
        })?;
        Ok(ids)
    }

    /// Ask subscribers to rebuild derived state (fires `repair`)
    pub fn repair(&self) -> Result<()> {
        info!(target: "folio::store", path = %self.path().display(), "Repair requested");
        self.trigger(REPAIR, None, None)
    }

    // ========== Events ==========

    /// Register a handler, see [`EventBus::on`]
    pub fn on<F>(&self, events: impl Into<EventNames>, handler: F, priority: i32) -> Result<HandlerId>
    where
        F: Fn(&Event<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.events.on(events, handler, priority)
    }

    /// Remove handlers, see [`EventBus::off`]
    pub fn off(&self, events: impl Into<EventNames>, handler: Option<HandlerId>) {
        self.events.off(events, handler)
    }

    /// Remove one registration from every event
    pub fn off_handler(&self, handler: HandlerId) {
        self.events.off_handler(handler)
    }

    /// Fire `name` with this store as the source
    pub fn trigger(
        &self,
        name: &str,
        id: Option<&RecordId>,
        document: Option<&Document>,
    ) -> Result<()> {
        self.events.trigger(&Event {
            store: self,
            name,
            id,
            document,
        })
    }

    /// Fire a lifecycle event unless `id` is hidden
    fn trigger_for(&self, name: &str, id: &RecordId, document: Option<&Document>) -> Result<()> {
        if id.is_hidden() {
            return Ok(());
        }
        self.trigger(name, Some(id), document)
    }

    // ========== Synchronization ==========

    /// Run `body` holding the named locks, see [`LockManager::synchronized`]
    pub fn synchronized<I, S, T, F>(&self, names: I, body: F) -> Result<T>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        F: FnOnce() -> Result<T>,
    {
        self.locks.synchronized(names, body)
    }

    // ========== IO ==========

    /// Raw bytes of `id`, `None` if there is no record file
    fn read(&self, id: &RecordId) -> Result<Option<Vec<u8>>> {
        read_existing(&self.layout.path_for(id.as_str()))
    }

    /// Replace the file of `id` with `bytes`; false if content was unchanged
    fn put(&self, id: &RecordId, bytes: &[u8]) -> Result<bool> {
        let path = self.layout.path_for(id.as_str());

        if read_existing(&path)?.as_deref() == Some(bytes) {
            File::options()
                .write(true)
                .open(&path)?
                .set_modified(SystemTime::now())?;
            self.apply_mode(&path)?;
            debug!(target: "folio::store", id = %id, "Content unchanged, touched");
            return Ok(false);
        }

        if self.layout.fanout() > 0 {
            fs::create_dir_all(self.layout.dir_for(id.as_str()))?;
        }

        let tmp_path = self.layout.temp_path_for(id.as_str());
        let written = (|| -> io::Result<()> {
            let mut file = File::create(&tmp_path)?;
            file.write_all(bytes)?;
            if self.config.sync_writes {
                file.sync_all()?;
            }
            Ok(())
        })();
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }

        self.apply_mode(&tmp_path)?;
        fs::rename(&tmp_path, &path)?;
        debug!(target: "folio::store", id = %id, bytes = bytes.len(), "Record written");
        Ok(true)
    }

    #[cfg(unix)]
    fn apply_mode(&self, path: &Path) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;
        if let Some(mode) = self.config.file_mode {
            fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn apply_mode(&self, _path: &Path) -> Result<()> {
        Ok(())
    }
}

impl fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordStore")
            .field("path", &self.path())
            .field("fanout", &self.layout.fanout())
            .field("codec", &self.codec.name())
            .field("events", &self.events)
            .finish()
    }
}

/// Ids a record write may target: valid file names other than lock markers
fn ensure_valid(id: &RecordId) -> Result<()> {
    if id.is_valid() && !is_lock_marker(id.as_str()) {
        Ok(())
    } else {
        Err(Error::InvalidId(id.to_string()))
    }
}

fn read_existing(path: &Path) -> Result<Option<Vec<u8>>> {
    if !path.is_file() {
        return Ok(None);
    }
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
