//! Driver abstractions for sources and destinations.
//!
//! This module defines the contracts the engine depends on:
//!
//! - [`SourceDriver`]: finite, forward-only source row stream
//! - [`DestinationDriver`]: entity reads/writes keyed by id tuples
//! - [`DriverRegistry`]: name- and URI-scheme-indexed driver lookup
//!
//! Concrete format drivers (CSV, SQL, YAML trees, ORM entities) live in the
//! embedding application; [`memory`] ships in-memory drivers used by tests
//! and simulation runs.

pub mod memory;
pub mod registry;

pub use memory::{MemoryDestination, MemorySource};
pub use registry::{DriverInfo, DriverRegistry};

use async_trait::async_trait;

use crate::config::MigrationDefinition;
use crate::core::ids::IdTuple;
use crate::core::value::Record;
use crate::error::Result;

/// Read source rows for one migration.
///
/// The row stream is finite and forward-only; it is not restartable.
/// Re-iterating requires obtaining and configuring a fresh driver instance
/// from the registry.
#[async_trait]
pub trait SourceDriver: Send {
    /// Configure the driver for a migration (locator, id fields).
    async fn configure(&mut self, definition: &MigrationDefinition) -> Result<()>;

    /// Total row count, used only for progress reporting.
    async fn count(&mut self) -> Result<u64>;

    /// Produce the next row, or `None` when the stream is exhausted.
    async fn next_row(&mut self) -> Result<Option<Record>>;

    /// Drop internal buffers under memory pressure.
    async fn free_memory(&mut self) {}
}

/// Read and write destination entities for one migration.
#[async_trait]
pub trait DestinationDriver: Send {
    /// Configure the driver for a migration (locator, id fields).
    async fn configure(&mut self, definition: &MigrationDefinition) -> Result<()>;

    /// Whether this driver can persist stub entities (forward references).
    fn supports_stubs(&self) -> bool {
        false
    }

    /// Identities present in the destination right now. Snapshotted before a
    /// run to detect orphans afterwards.
    async fn existing_ids(&mut self) -> Result<Vec<IdTuple>>;

    /// Read one entity by its destination ids, or `None` if absent.
    async fn read(&mut self, ids: &IdTuple) -> Result<Option<Record>>;

    /// Read the entities for a set of destination id tuples.
    ///
    /// Default implementation issues one [`read`](Self::read) per tuple;
    /// drivers with batch access override it.
    async fn read_multiple(&mut self, ids: &[IdTuple]) -> Result<Vec<Record>> {
        let mut entities = Vec::with_capacity(ids.len());
        for tuple in ids {
            if let Some(entity) = self.read(tuple).await? {
                entities.push(entity);
            }
        }
        Ok(entities)
    }

    /// Write one entity, returning its destination ids (None when the driver
    /// cannot determine them until a flush).
    async fn write(&mut self, entity: Record) -> Result<Option<IdTuple>>;

    /// Flush buffered writes so assigned ids become visible.
    async fn flush(&mut self) -> Result<()>;

    /// Drop internal buffers under memory pressure.
    async fn free_memory(&mut self) {}
}
