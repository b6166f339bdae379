//! Executor extension points.
//!
//! Two distinct events fire: after a source row is fetched, and after a
//! transform produced an entity. Listeners are optional and purely
//! observational;
//! the executor ignores nothing they do and awaits nothing from them.

use crate::core::value::Record;

/// A point in the per-row execution where listeners are notified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    /// A source row was fetched, before id extraction.
    PostFetchRow,
    /// The transform produced an entity for a row. Skipped rows (a `None`
    /// transform result) do not fire this event.
    PostTransformRow,
}

/// Observer for executor events.
pub trait EventListener: Send {
    /// Called with the event and the source row it concerns.
    fn on_event(&mut self, event: EngineEvent, migration: &str, row: &Record);
}
