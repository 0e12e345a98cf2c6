//! Named, reentrant, cross-process locks
//!
//! Every lock name maps to a hidden marker file `_<name>_lock` in the lock
//! directory. Acquiring a name takes an exclusive advisory lock on that file
//! (`flock` on Unix, `LockFileEx` on Windows), blocking until the current
//! holder releases it. There is no timeout: callers needing bounded waits
//! must wrap calls themselves.
//!
//! ## Reentrancy
//!
//! A name is held by a call stack, not by a handle. While a thread holds a
//! name, nested `synchronized` calls on that name neither re-acquire nor
//! release it; only the outermost call does. This is what lets index
//! maintenance (lock `<index>_index`) and its persistence run from inside a
//! store `save` that already holds the record's lock.
//!
//! Holdership is tracked per thread. Another thread of the same process
//! wanting a held name opens its own handle on the marker, so it blocks
//! exactly like a contender in a different process.
//!
//! ## Ordering
//!
//! Names are deduplicated and acquired in sorted order, so two callers
//! locking overlapping sets always contend on the same first name instead of
//! deadlocking.

use folio_core::{is_valid_id, Error, Result, HIDDEN_MARKER};
use fs2::FileExt;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::thread::{self, ThreadId};
use tracing::{debug, warn};

/// File name of the marker backing lock `name`
pub fn lock_marker_name(name: &str) -> String {
    format!("{}{}{}", HIDDEN_MARKER, name, LOCK_SUFFIX)
}

const LOCK_SUFFIX: &str = "_lock";

/// Is `file_name` the marker of some lock?
///
/// Record writes must never replace or unlink a marker: a new inode renamed
/// over it would let a holder of the old file and a locker of the new one
/// enter the same body.
pub fn is_lock_marker(file_name: &str) -> bool {
    file_name
        .strip_prefix(HIDDEN_MARKER)
        .and_then(|rest| rest.strip_suffix(LOCK_SUFFIX))
        .map_or(false, |name| !name.is_empty())
}

/// Reentrant named lock manager for one store directory
#[derive(Debug)]
pub struct LockManager {
    dir: PathBuf,
    /// Names currently held by this manager, and the thread holding each
    held: Mutex<HashMap<String, ThreadId>>,
}

/// One acquired name; releases on drop
///
/// The in-process holder entry is removed before the file lock is released,
/// so a thread woken by the unlock never sees a stale holder.
#[derive(Debug)]
pub struct LockGuard<'a> {
    manager: &'a LockManager,
    name: String,
    file: File,
}

impl LockManager {
    /// Create a lock manager placing markers in `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            held: Mutex::new(HashMap::new()),
        }
    }

    /// Directory holding the marker files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the marker file for `name`
    pub fn marker_path(&self, name: &str) -> PathBuf {
        self.dir.join(lock_marker_name(name))
    }

    /// Does the calling thread currently hold `name`?
    pub fn is_held(&self, name: &str) -> bool {
        self.held.lock().get(name) == Some(&thread::current().id())
    }

    /// Run `body` while holding every lock in `names`
    ///
    /// Names already held by the calling thread are skipped: they are neither
    /// re-acquired nor released here. Every name acquired by this call is
    /// released before returning, whether `body` succeeds, fails or panics.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Synchronization`] naming the first lock whose marker
    /// could not be opened or locked. Locks acquired earlier in the same call
    /// are released before the error is returned. Errors from `body` are
    /// returned unchanged.
    pub fn synchronized<I, S, T, F>(&self, names: I, body: F) -> Result<T>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        F: FnOnce() -> Result<T>,
    {
        let wanted: BTreeSet<String> = names
            .into_iter()
            .map(|name| name.as_ref().to_string())
            .filter(|name| !self.is_held(name))
            .collect();

        let mut guards = Vec::with_capacity(wanted.len());
        for name in wanted {
            // on failure, `guards` drops and releases everything taken so far
            guards.push(self.acquire(name)?);
        }

        let result = body();

        while let Some(guard) = guards.pop() {
            drop(guard);
        }

        result
    }

    /// Block until `name` is locked by the calling thread
    fn acquire(&self, name: String) -> Result<LockGuard<'_>> {
        if !is_valid_id(&name) {
            return Err(Error::synchronization(
                name,
                io::Error::new(io::ErrorKind::InvalidInput, "invalid lock name"),
            ));
        }

        let path = self.marker_path(&name);
        let file = match OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
        {
            Ok(file) => file,
            Err(e) => return Err(Error::synchronization(name, e)),
        };

        if let Err(e) = file.lock_exclusive() {
            return Err(Error::synchronization(name, e));
        }

        debug!(target: "folio::lock", name = %name, "Lock acquired");
        self.held.lock().insert(name.clone(), thread::current().id());

        Ok(LockGuard {
            manager: self,
            name,
            file,
        })
    }
}

impl LockGuard<'_> {
    /// Name of the held lock
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.manager.held.lock().remove(&self.name);
        if let Err(e) = FileExt::unlock(&self.file) {
            // closing the handle below releases the lock regardless
            warn!(target: "folio::lock", name = %self.name, error = %e, "Explicit unlock failed");
        }
        debug!(target: "folio::lock", name = %self.name, "Lock released");
    }
}
