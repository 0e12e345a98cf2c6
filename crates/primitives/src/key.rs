//! Index key derivation and key queries
//!
//! Index keys are strings. A [`KeySpec`] turns a document into zero or more
//! keys; a [`KeyQuery`] selects keys when reading an index. Both are tagged
//! variants resolved once at the call site.

use folio_core::Document;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Custom key ordering for an index
pub type KeyOrder = Arc<dyn Fn(&str, &str) -> Ordering + Send + Sync>;

/// How an index derives keys from a document
#[derive(Clone)]
pub enum KeySpec {
    /// Keys come from one top-level field
    ///
    /// Strings are used as-is, numbers and booleans by their JSON text, and
    /// an array contributes one key per scalar element. Missing fields,
    /// `null` and objects yield no key.
    Field(String),
    /// Keys are computed by a closure; an empty vector means no key
    Derived(Arc<dyn Fn(&Document) -> Vec<String> + Send + Sync>),
}

impl KeySpec {
    /// Key spec reading one field
    pub fn field(name: impl Into<String>) -> Self {
        KeySpec::Field(name.into())
    }

    /// Key spec computed by `derive`
    pub fn derived<F>(derive: F) -> Self
    where
        F: Fn(&Document) -> Vec<String> + Send + Sync + 'static,
    {
        KeySpec::Derived(Arc::new(derive))
    }

    /// Distinct keys of `document`, in first-seen order
    pub fn keys(&self, document: &Document) -> Vec<String> {
        let raw = match self {
            KeySpec::Field(name) => document.get(name).map(value_keys).unwrap_or_default(),
            KeySpec::Derived(derive) => derive(document),
        };

        let mut keys: Vec<String> = Vec::with_capacity(raw.len());
        for key in raw {
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        keys
    }
}

impl fmt::Debug for KeySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySpec::Field(name) => f.debug_tuple("Field").field(name).finish(),
            KeySpec::Derived(_) => f.write_str("Derived(..)"),
        }
    }
}

impl From<&str> for KeySpec {
    fn from(field: &str) -> Self {
        KeySpec::field(field)
    }
}

impl From<String> for KeySpec {
    fn from(field: String) -> Self {
        KeySpec::Field(field)
    }
}

fn scalar_key(value: &Document) -> Option<String> {
    match value {
        Document::String(s) => Some(s.clone()),
        Document::Number(n) => Some(n.to_string()),
        Document::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn value_keys(value: &Document) -> Vec<String> {
    match value {
        Document::Array(items) => items.iter().filter_map(scalar_key).collect(),
        other => scalar_key(other).into_iter().collect(),
    }
}

/// Key selection for index reads
pub enum KeyQuery {
    /// Exactly this key
    Key(String),
    /// Every key the predicate accepts
    Matching(Box<dyn Fn(&str) -> bool + Send + Sync>),
}

impl KeyQuery {
    /// Query by predicate over keys
    pub fn matching<F>(predicate: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        KeyQuery::Matching(Box::new(predicate))
    }
}

impl fmt::Debug for KeyQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyQuery::Key(key) => f.debug_tuple("Key").field(key).finish(),
            KeyQuery::Matching(_) => f.write_str("Matching(..)"),
        }
    }
}

impl From<&str> for KeyQuery {
    fn from(key: &str) -> Self {
        KeyQuery::Key(key.to_string())
    }
}

impl From<String> for KeyQuery {
    fn from(key: String) -> Self {
        KeyQuery::Key(key)
    }
}

impl From<&String> for KeyQuery {
    fn from(key: &String) -> Self {
        KeyQuery::Key(key.clone())
    }
}
