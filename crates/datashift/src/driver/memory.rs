//! In-memory source and destination drivers.
//!
//! Used by the engine's own tests and for simulation runs where a migration
//! definition's locators are overridden to point at seeded fixtures. The
//! destination is backed by shared state so a re-instantiated driver (e.g.
//! the reference store resolving another migration's destination) sees the
//! same entities.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::config::MigrationDefinition;
use crate::core::ids::{extract_ids, IdField, IdKind, IdTuple, IdValue};
use crate::core::value::Record;
use crate::error::{MigrateError, Result};

use super::{DestinationDriver, SourceDriver};

/// In-memory source driver: a seeded, finite, forward-only row queue.
#[derive(Debug, Default)]
pub struct MemorySource {
    rows: VecDeque<Record>,
    total: u64,
}

impl MemorySource {
    /// Create a source seeded with the given rows.
    pub fn with_rows(rows: Vec<Record>) -> Self {
        Self {
            total: rows.len() as u64,
            rows: rows.into(),
        }
    }
}

#[async_trait]
impl SourceDriver for MemorySource {
    async fn configure(&mut self, _definition: &MigrationDefinition) -> Result<()> {
        Ok(())
    }

    async fn count(&mut self) -> Result<u64> {
        Ok(self.total)
    }

    async fn next_row(&mut self) -> Result<Option<Record>> {
        Ok(self.rows.pop_front())
    }
}

/// Shared backing state of a [`MemoryDestination`].
#[derive(Debug, Default)]
pub struct DestinationState {
    /// Entities in insertion order, keyed by destination id tuple.
    entities: Vec<(IdTuple, Record)>,
    /// Sequence for driver-assigned ids.
    sequence: u64,
    /// Number of write calls, for test assertions.
    pub write_calls: usize,
    /// Number of flush calls, for test assertions.
    pub flush_calls: usize,
}

impl DestinationState {
    /// Look up an entity by id tuple.
    pub fn entity(&self, ids: &IdTuple) -> Option<&Record> {
        self.entities
            .iter()
            .find(|(tuple, _)| tuple == ids)
            .map(|(_, record)| record)
    }

    /// All current id tuples in insertion order.
    pub fn ids(&self) -> Vec<IdTuple> {
        self.entities.iter().map(|(tuple, _)| tuple.clone()).collect()
    }

    /// Number of stored entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Check if the destination holds no entities.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Seed an entity directly (test setup for pre-existing destinations).
    pub fn seed(&mut self, ids: IdTuple, mut record: Record) {
        ids.apply_to(&mut record);
        self.entities.push((ids, record));
    }
}

/// In-memory destination driver over a shared entity store.
///
/// Missing destination id fields are assigned from a per-store sequence on
/// write: integer fields get the next sequence number, string fields get
/// `"seq-<n>"`.
#[derive(Debug, Clone, Default)]
pub struct MemoryDestination {
    backing: Arc<Mutex<DestinationState>>,
    id_fields: Vec<IdField>,
    stub_support: bool,
}

impl MemoryDestination {
    /// Create a destination over fresh backing state with stub support.
    pub fn new() -> Self {
        Self {
            backing: Arc::default(),
            id_fields: Vec::new(),
            stub_support: true,
        }
    }

    /// Create a destination over existing backing state.
    pub fn with_backing(backing: Arc<Mutex<DestinationState>>) -> Self {
        Self {
            backing,
            id_fields: Vec::new(),
            stub_support: true,
        }
    }

    /// Disable stub support (for drivers modeling append-only targets).
    #[must_use]
    pub fn without_stub_support(mut self) -> Self {
        self.stub_support = false;
        self
    }

    /// Handle on the shared backing state, for seeding and assertions.
    pub fn backing(&self) -> Arc<Mutex<DestinationState>> {
        Arc::clone(&self.backing)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DestinationState> {
        // Lock poisoning only happens after a panic in another holder;
        // propagate the panic rather than limp on.
        self.backing.lock().expect("destination state poisoned")
    }
}

#[async_trait]
impl DestinationDriver for MemoryDestination {
    async fn configure(&mut self, definition: &MigrationDefinition) -> Result<()> {
        self.id_fields = definition.destination_id_fields.clone();
        Ok(())
    }

    fn supports_stubs(&self) -> bool {
        self.stub_support
    }

    async fn existing_ids(&mut self) -> Result<Vec<IdTuple>> {
        Ok(self.lock().ids())
    }

    async fn read(&mut self, ids: &IdTuple) -> Result<Option<Record>> {
        Ok(self.lock().entity(ids).cloned())
    }

    async fn write(&mut self, mut entity: Record) -> Result<Option<IdTuple>> {
        if self.id_fields.is_empty() {
            return Err(MigrateError::driver(
                "memory destination used before configure()",
            ));
        }

        let mut state = self.lock();
        state.write_calls += 1;

        // Assign ids the entity lacks from the sequence.
        for field in &self.id_fields {
            if !entity.has(&field.name) {
                state.sequence += 1;
                let assigned = match field.kind {
                    IdKind::Int => IdValue::Int(state.sequence as i64),
                    IdKind::Str => IdValue::Str(format!("seq-{}", state.sequence)),
                };
                entity.set(field.name.clone(), crate::core::value::Value::from(assigned));
            }
        }

        let ids = extract_ids("memory-destination", &entity, &self.id_fields)?;
        if let Some(slot) = state.entities.iter_mut().find(|(tuple, _)| *tuple == ids) {
            slot.1 = entity;
        } else {
            state.entities.push((ids.clone(), entity));
        }
        Ok(Some(ids))
    }

    async fn flush(&mut self) -> Result<()> {
        self.lock().flush_calls += 1;
        Ok(())
    }
}
