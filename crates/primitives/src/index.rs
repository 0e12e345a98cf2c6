//! Index: self-maintaining secondary index over a record store
//!
//! ## Design
//!
//! An index maps keys derived from documents to the ids carrying them. It
//! keeps two structures:
//!
//! - **forward map**: key → ids, in insertion order within a key, with keys
//!   kept sorted (natural string order or a custom [`KeyOrder`])
//! - **inverse map**: id → (key → offset of the id in that key's list)
//!
//! The inverse map makes an update cost proportional to the keys that
//! changed: an id's old entries are found by offset instead of by scanning.
//! For every inverse entry the forward list holds the id at exactly that
//! offset, and every forward entry has its inverse entry. Removing an id
//! from a list re-bases the offsets of the ids after it.
//!
//! ## Maintenance
//!
//! Construction subscribes the index to the store's `saved`, `deleted` and
//! `repair` events. Every maintenance operation runs under the lock
//! `<name>_index`, re-reads the persisted state, applies the change and
//! persists again only if something changed, so concurrent processes never
//! observe a half-applied update.
//!
//! ## Persistence
//!
//! State is saved through the store's own `save` under the hidden id
//! `_<name>_index` as `{name, type: "index", map, inverse}`. The id is hidden,
//! so persisting never re-triggers the index.
//!
//! An inconsistency between the two maps (e.g. after a crash of a foreign
//! writer mid-update) is reported as [`Error::Corruption`] when touched and
//! is only repaired by [`Index::rebuild`] or `RecordStore::repair`.

use crate::key::{KeyOrder, KeyQuery, KeySpec};
use folio_core::{is_valid_id, Document, Error, RecordId, Result};
use folio_storage::events::{DELETED, REPAIR, SAVED};
use folio_storage::{Event, HandlerId, RecordStore};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::ops::ControlFlow;
use std::sync::{Arc, Weak};
use tracing::{debug, info};

/// Persisted form of an index
///
/// B-tree maps give a deterministic encoding, so re-persisting an unchanged
/// index is collapsed to a touch by the store.
#[derive(Debug, Serialize, Deserialize)]
struct IndexRecord {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    map: BTreeMap<String, Vec<RecordId>>,
    #[serde(default)]
    inverse: BTreeMap<RecordId, BTreeMap<String, usize>>,
}

/// In-memory forward and inverse maps
#[derive(Debug, Default, Clone, PartialEq)]
struct IndexState {
    forward: Vec<(String, Vec<RecordId>)>,
    inverse: HashMap<RecordId, HashMap<String, usize>>,
}

impl IndexState {
    fn position(
        &self,
        key: &str,
        order: &dyn Fn(&str, &str) -> Ordering,
    ) -> std::result::Result<usize, usize> {
        self.forward
            .binary_search_by(|(probe, _)| order(probe.as_str(), key))
    }

    fn ids(&self, key: &str, order: &dyn Fn(&str, &str) -> Ordering) -> Option<&[RecordId]> {
        self.position(key, order)
            .ok()
            .map(|pos| self.forward[pos].1.as_slice())
    }

    /// Append `id` to the list of `key`
    fn insert(&mut self, key: &str, id: &RecordId, order: &dyn Fn(&str, &str) -> Ordering) {
        let pos = match self.position(key, order) {
            Ok(pos) => pos,
            Err(pos) => {
                self.forward.insert(pos, (key.to_string(), Vec::new()));
                pos
            }
        };
        let list = &mut self.forward[pos].1;
        list.push(id.clone());
        let offset = list.len() - 1;
        self.inverse
            .entry(id.clone())
            .or_default()
            .insert(key.to_string(), offset);
    }

    /// Splice `id` out of the list of `key` and drop its inverse entry
    fn remove(
        &mut self,
        key: &str,
        id: &RecordId,
        order: &dyn Fn(&str, &str) -> Ordering,
    ) -> Result<()> {
        let offset = self
            .inverse
            .get(id)
            .and_then(|keys| keys.get(key))
            .copied()
            .ok_or_else(|| inconsistent(id, key))?;
        let pos = self
            .position(key, order)
            .map_err(|_| inconsistent(id, key))?;

        let list = &self.forward[pos].1;
        if list.get(offset) != Some(id) {
            return Err(inconsistent(id, key));
        }
        // every id after the splice point must sit where its inverse entry
        // says before any offset is shifted
        for (at, later) in list.iter().enumerate().skip(offset + 1) {
            let recorded = self.inverse.get(later).and_then(|keys| keys.get(key)).copied();
            if recorded != Some(at) {
                return Err(inconsistent(later, key));
            }
        }

        let list = &mut self.forward[pos].1;
        list.remove(offset);

        for later in &list[offset..] {
            if let Some(slot) = self
                .inverse
                .get_mut(later)
                .and_then(|keys| keys.get_mut(key))
            {
                *slot -= 1;
            }
        }
        if list.is_empty() {
            self.forward.remove(pos);
        }

        if let Some(keys) = self.inverse.get_mut(id) {
            keys.remove(key);
            if keys.is_empty() {
                self.inverse.remove(id);
            }
        }
        Ok(())
    }

    /// Make `keys` the exact key set of `id`; true if anything changed
    fn update(
        &mut self,
        id: &RecordId,
        keys: &[String],
        order: &dyn Fn(&str, &str) -> Ordering,
    ) -> Result<bool> {
        let stale: Vec<String> = self
            .inverse
            .get(id)
            .map(|old| old.keys().filter(|key| !keys.contains(key)).cloned().collect())
            .unwrap_or_default();
        let fresh: Vec<&String> = keys
            .iter()
            .filter(|key| {
                !self
                    .inverse
                    .get(id)
                    .map_or(false, |old| old.contains_key(key.as_str()))
            })
            .collect();
        let changed = !stale.is_empty() || !fresh.is_empty();

        for key in &stale {
            self.remove(key, id, order)?;
        }
        for key in fresh {
            self.insert(key, id, order);
        }
        Ok(changed)
    }

    fn sort(&mut self, order: &dyn Fn(&str, &str) -> Ordering) {
        self.forward
            .sort_by(|(a, _), (b, _)| order(a.as_str(), b.as_str()));
    }

    fn from_record(record: IndexRecord, order: &dyn Fn(&str, &str) -> Ordering) -> Self {
        let mut state = IndexState {
            forward: record.map.into_iter().collect(),
            inverse: record
                .inverse
                .into_iter()
                .map(|(id, keys)| (id, keys.into_iter().collect()))
                .collect(),
        };
        // the codec gives no ordering guarantee
        state.sort(order);
        state
    }

    fn to_record(&self, name: &str) -> IndexRecord {
        IndexRecord {
            name: name.to_string(),
            kind: "index".to_string(),
            map: self.forward.iter().cloned().collect(),
            inverse: self
                .inverse
                .iter()
                .map(|(id, keys)| {
                    (
                        id.clone(),
                        keys.iter().map(|(k, v)| (k.clone(), *v)).collect(),
                    )
                })
                .collect(),
        }
    }
}

fn inconsistent(id: &RecordId, key: &str) -> Error {
    Error::Corruption(format!(
        "index entry for id '{}' under key '{}' is inconsistent; rebuild the index",
        id, key
    ))
}

fn natural_order(a: &str, b: &str) -> Ordering {
    a.cmp(b)
}

struct IndexInner {
    store: Arc<RecordStore>,
    name: String,
    spec: KeySpec,
    order: Option<KeyOrder>,
    /// `None` until first restored from storage
    state: Mutex<Option<IndexState>>,
    subscriptions: Mutex<Vec<HandlerId>>,
}

impl Drop for IndexInner {
    fn drop(&mut self) {
        for handler in self.subscriptions.get_mut().drain(..) {
            self.store.off_handler(handler);
        }
    }
}

/// Secondary index bound to a record store
///
/// Cloning yields another handle to the same index. When the last handle is
/// dropped the index unsubscribes from the store.
///
/// # Example
///
/// ```ignore
/// use folio_primitives::Index;
///
/// let by_type = Index::new(Arc::clone(&store), "type", "type")?;
/// store.create(&json!({"type": "user"}))?;
/// assert_eq!(by_type.find("user")?.len(), 1);
/// ```
#[derive(Clone)]
pub struct Index {
    inner: Arc<IndexInner>,
}

impl Index {
    /// Create an index named `name` keyed by `spec`, in natural key order
    ///
    /// # Errors
    ///
    /// [`Error::InvalidId`] if `name` cannot be used in a record id.
    pub fn new(store: Arc<RecordStore>, name: &str, spec: impl Into<KeySpec>) -> Result<Self> {
        Self::build(store, name, spec.into(), None)
    }

    /// Create an index whose keys are ordered by `order`
    pub fn with_order<F>(
        store: Arc<RecordStore>,
        name: &str,
        spec: impl Into<KeySpec>,
        order: F,
    ) -> Result<Self>
    where
        F: Fn(&str, &str) -> Ordering + Send + Sync + 'static,
    {
        Self::build(store, name, spec.into(), Some(Arc::new(order)))
    }

    fn build(
        store: Arc<RecordStore>,
        name: &str,
        spec: KeySpec,
        order: Option<KeyOrder>,
    ) -> Result<Self> {
        if !is_valid_id(name) {
            return Err(Error::InvalidId(name.to_string()));
        }

        let inner = Arc::new(IndexInner {
            store: Arc::clone(&store),
            name: name.to_string(),
            spec,
            order,
            state: Mutex::new(None),
            subscriptions: Mutex::new(Vec::new()),
        });

        let handlers = [
            store.on(SAVED, on_saved(Arc::downgrade(&inner)), 0)?,
            store.on(DELETED, on_deleted(Arc::downgrade(&inner)), 0)?,
            store.on(REPAIR, on_repair(Arc::downgrade(&inner)), 0)?,
        ];
        inner.subscriptions.lock().extend(handlers);

        debug!(target: "folio::index", index = name, "Index bound to store");
        Ok(Index { inner })
    }

    /// Index name
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Store this index observes
    pub fn store(&self) -> &Arc<RecordStore> {
        &self.inner.store
    }

    /// Hidden id the index state is persisted under
    pub fn state_id(&self) -> RecordId {
        RecordId::hidden(&format!("{}_index", self.inner.name))
    }

    fn lock_name(&self) -> String {
        format!("{}_index", self.inner.name)
    }

    fn order(&self) -> &(dyn Fn(&str, &str) -> Ordering + Send + Sync) {
        match &self.inner.order {
            Some(order) => order.as_ref(),
            None => &natural_order,
        }
    }

    // ========== Maintenance ==========

    /// Re-index `id` with the keys of `document`
    ///
    /// Unchanged keys keep their slot, dropped keys are spliced out, new keys
    /// are appended. Persists only if something changed.
    ///
    /// A document yielding no key removes the id from the index instead of
    /// leaving it alone: skipping the update would keep the id listed under a
    /// key its document no longer carries, and the index would no longer
    /// match a rebuild.
    pub fn update(&self, id: &RecordId, document: &Document) -> Result<()> {
        let keys = self.inner.spec.keys(document);
        self.apply(|state| {
            let changed = state.update(id, &keys, self.order())?;
            if changed {
                self.persist(state)?;
            }
            Ok(())
        })
    }

    /// Remove every entry of `id`
    pub fn delete(&self, id: &RecordId) -> Result<()> {
        self.apply(|state| {
            let changed = state.update(id, &[], self.order())?;
            if changed {
                self.persist(state)?;
            }
            Ok(())
        })
    }

    /// Recompute the whole index from the store and persist it once
    pub fn rebuild(&self) -> Result<()> {
        let store = Arc::clone(&self.inner.store);
        store.synchronized([self.lock_name()], || {
            let mut state = IndexState::default();
            let mut records = 0usize;
            store.each_id(|id| {
                if let Some(document) = store.load(&id)? {
                    let keys = self.inner.spec.keys(&document);
                    state.update(&id, &keys, self.order())?;
                    records += 1;
                }
                Ok(ControlFlow::Continue(()))
            })?;

            self.persist(&mut state)?;
            info!(
                target: "folio::index",
                index = %self.inner.name,
                records,
                keys = state.forward.len(),
                "Index rebuilt"
            );
            *self.inner.state.lock() = Some(state);
            Ok(())
        })
    }

    /// Discard in-memory state and re-read it from storage
    pub fn reload(&self) -> Result<()> {
        let state = self.restore()?;
        *self.inner.state.lock() = Some(state);
        Ok(())
    }

    /// Run `op` on freshly restored state under the index lock
    fn apply<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&mut IndexState) -> Result<T>,
    {
        self.inner.store.synchronized([self.lock_name()], || {
            let mut state = self.restore()?;
            let result = op(&mut state);
            // keep what is on disk when the operation failed half way
            if result.is_ok() {
                *self.inner.state.lock() = Some(state);
            }
            result
        })
    }

    fn restore(&self) -> Result<IndexState> {
        let state_id = self.state_id();
        match self.inner.store.load(&state_id)? {
            Some(document) => {
                let record: IndexRecord = serde_json::from_value(document).map_err(|e| {
                    Error::Corruption(format!("index state '{}' is malformed: {}", state_id, e))
                })?;
                Ok(IndexState::from_record(record, self.order()))
            }
            None => Ok(IndexState::default()),
        }
    }

    fn persist(&self, state: &mut IndexState) -> Result<()> {
        state.sort(self.order());
        let record = state.to_record(&self.inner.name);
        let document = serde_json::to_value(&record)
            .map_err(|e| Error::SerializationError(e.to_string()))?;
        self.inner.store.save(self.state_id(), &document)?;
        debug!(
            target: "folio::index",
            index = %self.inner.name,
            keys = state.forward.len(),
            ids = state.inverse.len(),
            "Index persisted"
        );
        Ok(())
    }

    /// Read access to the state, restoring it on first use
    fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&IndexState) -> T,
    {
        if let Some(state) = self.inner.state.lock().as_ref() {
            return Ok(f(state));
        }
        let restored = self.restore()?;
        let mut guard = self.inner.state.lock();
        Ok(f(guard.get_or_insert(restored)))
    }

    // ========== Queries ==========

    /// Ids under a key, or under every key a predicate accepts (in key order)
    pub fn find(&self, query: impl Into<KeyQuery>) -> Result<Vec<RecordId>> {
        let query = query.into();
        self.read(|state| match &query {
            KeyQuery::Key(key) => state
                .ids(key, self.order())
                .map(<[RecordId]>::to_vec)
                .unwrap_or_default(),
            KeyQuery::Matching(predicate) => state
                .forward
                .iter()
                .filter(|(key, _)| predicate(key))
                .flat_map(|(_, ids)| ids.iter().cloned())
                .collect(),
        })
    }

    /// First id of the first matching key
    pub fn first(&self, query: impl Into<KeyQuery>) -> Result<Option<RecordId>> {
        let query = query.into();
        self.read(|state| match &query {
            KeyQuery::Key(key) => state
                .ids(key, self.order())
                .and_then(|ids| ids.first().cloned()),
            KeyQuery::Matching(predicate) => state
                .forward
                .iter()
                .filter(|(key, _)| predicate(key))
                .find_map(|(_, ids)| ids.first().cloned()),
        })
    }

    /// Ids of the keys in `[offset, offset + length)`, in key order
    ///
    /// Pages over keys, not ids: one key may contribute several ids.
    /// `None` runs to the last key.
    pub fn slice(&self, offset: usize, length: Option<usize>) -> Result<Vec<RecordId>> {
        self.read(|state| {
            state
                .forward
                .iter()
                .skip(offset)
                .take(length.unwrap_or(usize::MAX))
                .flat_map(|(_, ids)| ids.iter().cloned())
                .collect()
        })
    }

    /// Keys in index order
    pub fn keys(&self) -> Result<Vec<String>> {
        self.read(|state| state.forward.iter().map(|(key, _)| key.clone()).collect())
    }

    /// Number of keys
    pub fn len(&self) -> Result<usize> {
        self.read(|state| state.forward.len())
    }

    /// True when no key is indexed
    pub fn is_empty(&self) -> Result<bool> {
        self.read(|state| state.forward.is_empty())
    }

    /// [`Index::find`], resolved through the store
    pub fn load(&self, query: impl Into<KeyQuery>) -> Result<Vec<(RecordId, Option<Document>)>> {
        let ids = self.find(query)?;
        self.inner.store.load_many(ids)
    }

    /// [`Index::first`], resolved through the store
    pub fn load_first(&self, query: impl Into<KeyQuery>) -> Result<Option<Document>> {
        match self.first(query)? {
            Some(id) => self.inner.store.load(id),
            None => Ok(None),
        }
    }

    /// [`Index::slice`], resolved through the store
    pub fn load_slice(
        &self,
        offset: usize,
        length: Option<usize>,
    ) -> Result<Vec<(RecordId, Option<Document>)>> {
        let ids = self.slice(offset, length)?;
        self.inner.store.load_many(ids)
    }
}

impl fmt::Debug for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Index")
            .field("name", &self.inner.name)
            .field("spec", &self.inner.spec)
            .field("custom_order", &self.inner.order.is_some())
            .finish()
    }
}

// ========== Store Subscriptions ==========
//
// Handlers hold the index weakly: the store owns the closures, the index
// owns the store, and nothing owns the index but its handles.

fn on_saved(index: Weak<IndexInner>) -> impl Fn(&Event<'_>) -> Result<()> + Send + Sync + 'static {
    move |event: &Event<'_>| match (index.upgrade(), event.id, event.document) {
        (Some(inner), Some(id), Some(document)) => Index { inner }.update(id, document),
        _ => Ok(()),
    }
}

fn on_deleted(index: Weak<IndexInner>) -> impl Fn(&Event<'_>) -> Result<()> + Send + Sync + 'static {
    move |event: &Event<'_>| match (index.upgrade(), event.id) {
        (Some(inner), Some(id)) => Index { inner }.delete(id),
        _ => Ok(()),
    }
}

fn on_repair(index: Weak<IndexInner>) -> impl Fn(&Event<'_>) -> Result<()> + Send + Sync + 'static {
    move |_: &Event<'_>| match index.upgrade() {
        Some(inner) => Index { inner }.rebuild(),
        None => Ok(()),
    }
}
