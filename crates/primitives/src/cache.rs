//! Read-through memoizing cache over a record store
//!
//! The cache sits beside the store, not in its event chain: writes made
//! after an entry was memoized are not observed until the entry is
//! invalidated. Missing records are memoized too, as seen-but-absent.

use folio_core::{Document, RecordId, Result};
use folio_storage::RecordStore;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Memoizing reader
///
/// The first [`Cache::each`] materializes every record of the store and marks
/// the cache complete; later calls iterate the memoized entries only.
pub struct Cache {
    store: Arc<RecordStore>,
    entries: Mutex<BTreeMap<RecordId, Option<Document>>>,
    complete: AtomicBool,
}

impl Cache {
    /// Empty cache over `store`
    pub fn new(store: Arc<RecordStore>) -> Self {
        Self {
            store,
            entries: Mutex::new(BTreeMap::new()),
            complete: AtomicBool::new(false),
        }
    }

    /// Store read through
    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    /// Memoized document of `id`, loading it on first access
    pub fn load(&self, id: impl Into<RecordId>) -> Result<Option<Document>> {
        let id = id.into();
        if let Some(entry) = self.entries.lock().get(&id) {
            return Ok(entry.clone());
        }

        let document = self.store.load(&id)?;
        self.entries.lock().insert(id, document.clone());
        Ok(document)
    }

    /// [`Cache::load`] for several ids, keeping the input order
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

    /// Visit every memoized entry in id order
    ///
    /// Runs a full store scan the first time only, so records created later
    /// are visited only once loaded individually.
    pub fn each<F>(&self, mut visitor: F) -> Result<()>
    where
        F: FnMut(&RecordId, Option<&Document>),
    {
        if !self.complete.load(Ordering::Acquire) {
            self.materialize()?;
        }

        let snapshot = self.entries.lock().clone();
        for (id, document) in &snapshot {
            visitor(id, document.as_ref());
        }
        Ok(())
    }

    fn materialize(&self) -> Result<()> {
        let mut loaded = 0usize;
        self.store.each_id(|id| {
            self.load(id)?;
            loaded += 1;
            Ok(ControlFlow::Continue(()))
        })?;
        self.complete.store(true, Ordering::Release);
        debug!(target: "folio::cache", records = loaded, "Cache materialized");
        Ok(())
    }

    /// Forget the entry of `id`; the next load reads the store again
    pub fn invalidate(&self, id: impl Into<RecordId>) {
        let id = id.into();
        self.entries.lock().remove(&id);
    }

    /// Forget every entry and reset the complete flag
    pub fn clear(&self) {
        self.entries.lock().clear();
        self.complete.store(false, Ordering::Release);
    }

    /// Has [`Cache::each`] materialized the whole store?
    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::Acquire)
    }

    /// Number of memoized entries, absent records included
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True when nothing is memoized
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("entries", &self.len())
            .field("complete", &self.is_complete())
            .finish()
    }
}
