//! Physical layout of a store directory
//!
//! Without fan-out every record lives directly in the root as a file named
//! by its id. With a fan-out of N, the first N characters of the id become
//! nested directories: id `abcd` with N = 2 is stored at `a/b/abcd`. Ids
//! shorter than N use as many levels as they have characters. Fan-out only
//! changes paths; ids and the hidden-id rule are untouched.
//!
//! A directory level is the character itself when it is alphanumeric, and
//! otherwise `%` followed by the hex bytes of its UTF-8 encoding, so `a.b`
//! lives at `a/%2E/a.b` and `_auto` at `%5F/a/_auto`. Levels therefore never
//! collapse (`.`), never look hidden (`_`) and never clash with the escape
//! character itself (`%25`).

use folio_core::{is_hidden, Result, HIDDEN_MARKER};
use std::fs;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Maps ids to paths under one store root
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
    fanout: usize,
}

impl Layout {
    /// Layout rooted at `root` with `fanout` directory levels
    pub fn new(root: impl Into<PathBuf>, fanout: usize) -> Self {
        Self {
            root: root.into(),
            fanout,
        }
    }

    /// Store root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Configured fan-out depth
    pub fn fanout(&self) -> usize {
        self.fanout
    }

    /// Directory that holds the file for `id`
    pub fn dir_for(&self, id: &str) -> PathBuf {
        let mut dir = self.root.clone();
        for c in id.chars().take(self.fanout) {
            dir.push(fanout_segment(c));
        }
        dir
    }

    /// Full path of the file for `id`
    pub fn path_for(&self, id: &str) -> PathBuf {
        self.dir_for(id).join(id)
    }

    /// Scratch file a new version of `id` is written to before the rename
    ///
    /// Hidden, so a crash between write and rename never surfaces it as a
    /// record.
    pub fn temp_path_for(&self, id: &str) -> PathBuf {
        self.dir_for(id)
            .join(format!("{}~{}.tmp", HIDDEN_MARKER, id))
    }

    /// Visit every non-hidden id stored under the root
    ///
    /// Enumeration order is directory order and carries no guarantee.
    /// Returns `Break` if the visitor stopped early.
    pub fn walk<F>(&self, visitor: &mut F) -> Result<ControlFlow<()>>
    where
        F: FnMut(String) -> Result<ControlFlow<()>>,
    {
        self.walk_dir(&self.root, 0, visitor)
    }

    fn walk_dir<F>(&self, dir: &Path, depth: usize, visitor: &mut F) -> Result<ControlFlow<()>>
    where
        F: FnMut(String) -> Result<ControlFlow<()>>,
    {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(raw) => {
                    warn!(target: "folio::store", name = ?raw, "Skipping non UTF-8 directory entry");
                    continue;
                }
            };
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                if depth < self.fanout {
                    if let ControlFlow::Break(()) = self.walk_dir(&entry.path(), depth + 1, visitor)? {
                        return Ok(ControlFlow::Break(()));
                    }
                }
                continue;
            }

            if is_hidden(&name) {
                continue;
            }
            // a file only counts as a record where the layout would put it
            if self.dir_for(&name) != dir {
                continue;
            }
            if let ControlFlow::Break(()) = visitor(name)? {
                return Ok(ControlFlow::Break(()));
            }
        }
        Ok(ControlFlow::Continue(()))
    }
}

/// Directory name for one fan-out character
fn fanout_segment(c: char) -> String {
    if c.is_alphanumeric() {
        return c.to_string();
    }
    let mut buf = [0u8; 4];
    c.encode_utf8(&mut buf)
        .bytes()
        .map(|byte| format!("%{:02X}", byte))
        .collect()
}
