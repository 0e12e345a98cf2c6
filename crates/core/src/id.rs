//! Record identifiers
//!
//! A record id is an opaque string. Two rules are load-bearing for the
//! rest of the system:
//!
//! - **Validity**: an id must not be empty, `.` or `..`, and must not contain
//!   any of `/ ? * : ; { } \`. Ids become file names, so these rules keep every
//!   record inside the store root.
//! - **Hidden ids**: an id whose first character is [`HIDDEN_MARKER`] is
//!   bookkeeping (auto-increment counter, index state, lock markers, config).
//!   Hidden records are never enumerated and never fire lifecycle events.
//!   Index persistence depends on this: an index writes its own state through
//!   the normal save path, and only the hidden prefix stops that write from
//!   re-triggering the index.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// First character of every hidden id
pub const HIDDEN_MARKER: char = '_';

/// Characters that may never appear in an id
const RESERVED_CHARS: &[char] = &['/', '?', '*', ':', ';', '{', '}', '\\'];

/// Is this id hidden from enumeration and events?
pub fn is_hidden(id: &str) -> bool {
    id.starts_with(HIDDEN_MARKER)
}

/// Is this id usable as a record file name?
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty() && id != "." && id != ".." && !id.contains(RESERVED_CHARS)
}

/// Identifier of one record
///
/// Ids are strings; auto-incremented ids are the decimal rendering of a
/// `u64` and can be recovered with [`RecordId::as_u64`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Wrap a string as an id (no validation)
    pub fn new(id: impl Into<String>) -> Self {
        RecordId(id.into())
    }

    /// Hidden id `_<name>`
    pub fn hidden(name: &str) -> Self {
        RecordId(format!("{}{}", HIDDEN_MARKER, name))
    }

    /// Borrow the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse a numeric id
    pub fn as_u64(&self) -> Option<u64> {
        self.0.parse().ok()
    }

    /// See [`is_hidden`]
    pub fn is_hidden(&self) -> bool {
        is_hidden(&self.0)
    }

    /// See [`is_valid_id`]
    pub fn is_valid(&self) -> bool {
        is_valid_id(&self.0)
    }

    /// Unwrap into the owned string
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RecordId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for RecordId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RecordId {
    fn from(id: &str) -> Self {
        RecordId(id.to_string())
    }
}

impl From<String> for RecordId {
    fn from(id: String) -> Self {
        RecordId(id)
    }
}

impl From<&String> for RecordId {
    fn from(id: &String) -> Self {
        RecordId(id.clone())
    }
}

impl From<&RecordId> for RecordId {
    fn from(id: &RecordId) -> Self {
        id.clone()
    }
}

impl From<u64> for RecordId {
    fn from(id: u64) -> Self {
        RecordId(id.to_string())
    }
}

impl PartialEq<str> for RecordId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for RecordId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}
