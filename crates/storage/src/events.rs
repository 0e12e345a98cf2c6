//! Priority-ordered publish/subscribe embedded in every store
//!
//! Handlers for one event are grouped by priority. A trigger runs groups
//! from highest priority to lowest and, inside a group, in registration
//! order. Handlers run synchronously on the triggering thread; the first
//! handler error aborts the remaining handlers and is returned to whoever
//! triggered the event.
//!
//! The handler table is copied out of the lock before any handler runs, so
//! handlers may register or remove handlers, and may call back into the
//! store, without deadlocking. Such changes apply from the next trigger.

use crate::store::RecordStore;
use folio_core::{Document, Error, RecordId, Result};
use parking_lot::RwLock;
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Fired before a non-hidden record is written
pub const BEFORE_SAVE: &str = "beforeSave";
/// Fired after a non-hidden record is written
pub const SAVED: &str = "saved";
/// Fired before a non-hidden record is read
pub const BEFORE_LOAD: &str = "beforeLoad";
/// Fired after a non-hidden record is read and decoded
pub const LOADED: &str = "loaded";
/// Fired before a non-hidden record is removed
pub const BEFORE_DELETE: &str = "beforeDelete";
/// Fired after a non-hidden record is removed
pub const DELETED: &str = "deleted";
/// Fired by `RecordStore::repair`; subscribers rebuild derived state
pub const REPAIR: &str = "repair";

/// One delivered event
///
/// `id` is absent for store-wide events such as `repair`. `document` is the
/// value about to be or just written for save events, the decoded value for
/// `loaded` (absent if the record does not exist), and absent for
/// `beforeLoad` and delete events.
#[derive(Clone, Copy)]
pub struct Event<'a> {
    /// Store the event originated from
    pub store: &'a RecordStore,
    /// Event name
    pub name: &'a str,
    /// Record the event is about
    pub id: Option<&'a RecordId>,
    /// Record payload, where applicable
    pub document: Option<&'a Document>,
}

impl fmt::Debug for Event<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("store", &self.store.path())
            .field("name", &self.name)
            .field("id", &self.id)
            .field("document", &self.document)
            .finish()
    }
}

/// Event handler callback
pub type Handler = Arc<dyn Fn(&Event<'_>) -> Result<()> + Send + Sync>;

/// Token identifying one `on` registration, used to remove it again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// One or more event names
///
/// Built from a single string (split on whitespace and commas, so
/// `"beforeSave saved"` and `"saved,deleted"` both name two events) or from
/// a pre-split sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventNames(Vec<String>);

impl EventNames {
    /// Names in the order given
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// True when no name was given
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for EventNames {
    fn from(names: &str) -> Self {
        EventNames(
            names
                .split(|c: char| c.is_whitespace() || c == ',')
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }
}

impl From<String> for EventNames {
    fn from(names: String) -> Self {
        EventNames::from(names.as_str())
    }
}

impl From<&[&str]> for EventNames {
    fn from(names: &[&str]) -> Self {
        EventNames(names.iter().map(|name| name.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for EventNames {
    fn from(names: [&str; N]) -> Self {
        EventNames::from(&names[..])
    }
}

impl From<Vec<&str>> for EventNames {
    fn from(names: Vec<&str>) -> Self {
        EventNames::from(&names[..])
    }
}

impl From<Vec<String>> for EventNames {
    fn from(names: Vec<String>) -> Self {
        EventNames(names)
    }
}

#[derive(Clone)]
struct Registration {
    id: HandlerId,
    handler: Handler,
}

/// Priority groups for one event, highest priority first
type Groups = BTreeMap<Reverse<i32>, Vec<Registration>>;

/// Handler table owned by one store
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<HashMap<String, Groups>>,
    next_id: AtomicU64,
}

impl EventBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for every event in `events` at `priority`
    ///
    /// Higher priorities run earlier. The returned id removes the
    /// registration from all of those events at once.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandler`] if `events` names no event.
    pub fn on<F>(&self, events: impl Into<EventNames>, handler: F, priority: i32) -> Result<HandlerId>
    where
        F: Fn(&Event<'_>) -> Result<()> + Send + Sync + 'static,
    {
        let events = events.into();
        if events.is_empty() {
            return Err(Error::InvalidHandler(
                "handler must be bound to at least one event".to_string(),
            ));
        }

        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let handler: Handler = Arc::new(handler);

        let mut table = self.handlers.write();
        for name in events.iter() {
            table
                .entry(name.to_string())
                .or_default()
                .entry(Reverse(priority))
                .or_default()
                .push(Registration {
                    id,
                    handler: Arc::clone(&handler),
                });
        }
        Ok(id)
    }

    /// Remove handlers from `events`
    ///
    /// With `None`, every handler of those events is removed; with a handler
    /// id, only that registration.
    pub fn off(&self, events: impl Into<EventNames>, handler: Option<HandlerId>) {
        let events = events.into();
        let mut table = self.handlers.write();
        for name in events.iter() {
            match handler {
                None => {
                    table.remove(name);
                }
                Some(id) => {
                    if let Some(groups) = table.get_mut(name) {
                        remove_from_groups(groups, id);
                        if groups.is_empty() {
                            table.remove(name);
                        }
                    }
                }
            }
        }
    }

    /// Remove a registration from every event it is bound to
    pub fn off_handler(&self, handler: HandlerId) {
        let mut table = self.handlers.write();
        table.retain(|_, groups| {
            remove_from_groups(groups, handler);
            !groups.is_empty()
        });
    }

    /// Number of registrations for `event`
    pub fn handler_count(&self, event: &str) -> usize {
        self.handlers
            .read()
            .get(event)
            .map(|groups| groups.values().map(Vec::len).sum())
            .unwrap_or(0)
    }

    /// Run every handler of `event.name`, highest priority first
    ///
    /// # Errors
    ///
    /// Returns the first handler error; later handlers do not run.
    pub fn trigger(&self, event: &Event<'_>) -> Result<()> {
        let snapshot: Vec<Handler> = match self.handlers.read().get(event.name) {
            Some(groups) => groups
                .values()
                .flatten()
                .map(|registration| Arc::clone(&registration.handler))
                .collect(),
            None => return Ok(()),
        };

        trace!(target: "folio::events", name = event.name, id = ?event.id, handlers = snapshot.len(), "Trigger");
        for handler in snapshot {
            handler(event)?;
        }
        Ok(())
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = self.handlers.read();
        let mut counts: Vec<(&String, usize)> = table
            .iter()
            .map(|(name, groups)| (name, groups.values().map(Vec::len).sum()))
            .collect();
        counts.sort();
        f.debug_struct("EventBus").field("handlers", &counts).finish()
    }
}

fn remove_from_groups(groups: &mut Groups, id: HandlerId) {
    groups.retain(|_, registrations| {
        registrations.retain(|registration| registration.id != id);
        !registrations.is_empty()
    });
}
