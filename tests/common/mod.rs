//! Shared test utilities for the integration suites.
//!
//! Import via `mod common;` from any test's main.rs.

#![allow(dead_code)]

use foliodb::prelude::*;
use std::path::Path;
use std::sync::{Arc, Once};
use tempfile::TempDir;

static INIT_TRACING: Once = Once::new();

/// Route `tracing` output to the test harness
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

// ============================================================================
// TestStore - store on a private temp directory
// ============================================================================

/// Record store rooted in a temp directory that lives as long as the wrapper
pub struct TestStore {
    pub store: Arc<RecordStore>,
    pub dir: TempDir,
}

impl TestStore {
    /// Store with the default configuration
    pub fn new() -> Self {
        init_tracing();
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let store = RecordStore::open(dir.path()).expect("Failed to open test store");
        TestStore {
            store: Arc::new(store),
            dir,
        }
    }

    /// Store with an explicit configuration
    pub fn with_config(config: StoreConfig) -> Self {
        init_tracing();
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let store =
            RecordStore::open_with_config(dir.path(), config).expect("Failed to open test store");
        TestStore {
            store: Arc::new(store),
            dir,
        }
    }

    /// A second, independent instance on the same directory
    pub fn reopen(&self) -> Arc<RecordStore> {
        Arc::new(RecordStore::open(self.dir.path()).expect("Failed to reopen test store"))
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Shared handle for binding indices and caches
    pub fn handle(&self) -> Arc<RecordStore> {
        Arc::clone(&self.store)
    }
}

/// Ids in sorted order, for comparisons that ignore enumeration order
pub fn sorted(mut ids: Vec<RecordId>) -> Vec<RecordId> {
    ids.sort();
    ids
}

/// Record ids from literals
pub fn ids(raw: &[&str]) -> Vec<RecordId> {
    raw.iter().map(|id| RecordId::from(*id)).collect()
}
