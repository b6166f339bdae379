//! Mapping store trait and in-memory backend.
//!
//! The [`MappingStore`] trait defines the interface for persisting
//! source/destination id correspondences. Implementations:
//!
//! - **PostgreSQL**: `PgMappingStore` in `pg.rs` (production)
//! - **Memory**: [`MemoryMappingStore`] (tests, simulation runs)
//!
//! # Design Pattern
//!
//! This is a Strategy: the identity mapper works with `Box<dyn MappingStore>`
//! without knowing the concrete backend.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::core::ids::{IdKind, IdTuple, IdValue};
use crate::error::{MigrateError, Result};

/// Status of one mapping row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingStatus {
    /// The row was produced by an actual migration pass.
    Migrated,
    /// The row maps a placeholder entity written for a forward reference;
    /// a later pass overwrites it with `Migrated`.
    Stub,
}

/// Convert a MappingStatus to its stored string representation.
pub fn status_to_str(status: MappingStatus) -> &'static str {
    match status {
        MappingStatus::Migrated => "migrated",
        MappingStatus::Stub => "stub",
    }
}

/// Parse a MappingStatus from its stored string representation.
pub fn str_to_status(s: &str) -> Result<MappingStatus> {
    match s {
        "migrated" => Ok(MappingStatus::Migrated),
        "stub" => Ok(MappingStatus::Stub),
        _ => Err(MigrateError::Mapping(format!("Invalid mapping status: {}", s))),
    }
}

/// One id column of a mapping table.
#[derive(Debug, Clone)]
pub struct MappingColumn {
    /// Column name (e.g. `source_id`, `dest_identifier`).
    pub column: String,
    /// The id field this column stores.
    pub field: String,
    /// Declared kind, governing the column type.
    pub kind: IdKind,
}

/// Derived shape of one migration's mapping table.
///
/// Built by the identity mapper from a migration definition and its naming
/// cache; the store only ever sees derived, SQL-safe names.
#[derive(Debug, Clone)]
pub struct MappingTableSpec {
    /// Derived table name.
    pub table: String,
    /// Columns holding the source id tuple (nullable: orphan re-writes
    /// record all-null source ids).
    pub source_columns: Vec<MappingColumn>,
    /// Columns holding the destination id tuple; together they form the
    /// primary key.
    pub dest_columns: Vec<MappingColumn>,
}

impl MappingTableSpec {
    /// Pull this spec's source column values out of an id tuple. A field
    /// absent from the tuple reads as NULL.
    pub fn source_values<'a>(&'a self, ids: &'a IdTuple) -> Vec<(&'a MappingColumn, IdValue)> {
        Self::values(&self.source_columns, ids)
    }

    /// Pull this spec's destination column values out of an id tuple.
    pub fn dest_values<'a>(&'a self, ids: &'a IdTuple) -> Vec<(&'a MappingColumn, IdValue)> {
        Self::values(&self.dest_columns, ids)
    }

    fn values<'a>(columns: &'a [MappingColumn], ids: &'a IdTuple) -> Vec<(&'a MappingColumn, IdValue)> {
        columns
            .iter()
            .map(|col| {
                let value = ids.get(&col.field).cloned().unwrap_or(IdValue::Null);
                (col, value)
            })
            .collect()
    }
}

/// Trait for mapping persistence backends.
#[async_trait]
pub trait MappingStore: Send + Sync {
    /// Ensure the mapping table exists with the spec's columns and indexes.
    ///
    /// This is the "conform" step: create-or-extend, idempotent, invoked
    /// lazily the first time a mapping is written for a migration.
    async fn conform(&self, spec: &MappingTableSpec) -> Result<()>;

    /// Upsert one mapping row.
    ///
    /// Looks up by exact, NULL-safe equality over all source and destination
    /// id columns; a match updates `updated` and `status` in place, anything
    /// else inserts (replacing a row holding the same destination tuple, as
    /// the destination tuple is the primary key).
    async fn upsert(
        &self,
        spec: &MappingTableSpec,
        source: &IdTuple,
        dest: &IdTuple,
        status: MappingStatus,
    ) -> Result<()>;

    /// Point lookup of destination ids by source ids. Fails with
    /// [`MigrateError::NoMapping`] when no row matches or the table does not
    /// exist yet.
    async fn dest_by_source(&self, spec: &MappingTableSpec, source: &IdTuple) -> Result<IdTuple>;

    /// Mirror lookup of source ids by destination ids.
    async fn source_by_dest(&self, spec: &MappingTableSpec, dest: &IdTuple) -> Result<IdTuple>;

    /// Get the backend type name for logging/debugging.
    fn backend_type(&self) -> &'static str;
}

// Lets callers keep a handle on a store they hand to the mapper.
#[async_trait]
impl<S: MappingStore + ?Sized> MappingStore for std::sync::Arc<S> {
    async fn conform(&self, spec: &MappingTableSpec) -> Result<()> {
        (**self).conform(spec).await
    }

    async fn upsert(
        &self,
        spec: &MappingTableSpec,
        source: &IdTuple,
        dest: &IdTuple,
        status: MappingStatus,
    ) -> Result<()> {
        (**self).upsert(spec, source, dest, status).await
    }

    async fn dest_by_source(&self, spec: &MappingTableSpec, source: &IdTuple) -> Result<IdTuple> {
        (**self).dest_by_source(spec, source).await
    }

    async fn source_by_dest(&self, spec: &MappingTableSpec, dest: &IdTuple) -> Result<IdTuple> {
        (**self).source_by_dest(spec, dest).await
    }

    fn backend_type(&self) -> &'static str {
        (**self).backend_type()
    }
}

/// One stored mapping row (memory backend).
#[derive(Debug, Clone)]
pub struct MappingRow {
    pub source: IdTuple,
    pub dest: IdTuple,
    pub status: MappingStatus,
    pub updated: DateTime<Utc>,
}

/// In-memory mapping store.
///
/// Mirrors the PostgreSQL backend's semantics: per-table row sets with
/// primary-key behavior on the destination tuple and monotonically
/// increasing `updated` timestamps.
#[derive(Debug, Default)]
pub struct MemoryMappingStore {
    tables: Mutex<HashMap<String, Vec<MappingRow>>>,
}

impl MemoryMappingStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot a table's rows, for test assertions.
    pub fn rows(&self, table: &str) -> Vec<MappingRow> {
        self.tables
            .lock()
            .expect("mapping tables poisoned")
            .get(table)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl MappingStore for MemoryMappingStore {
    async fn conform(&self, spec: &MappingTableSpec) -> Result<()> {
        self.tables
            .lock()
            .expect("mapping tables poisoned")
            .entry(spec.table.clone())
            .or_default();
        Ok(())
    }

    async fn upsert(
        &self,
        spec: &MappingTableSpec,
        source: &IdTuple,
        dest: &IdTuple,
        status: MappingStatus,
    ) -> Result<()> {
        let mut tables = self.tables.lock().expect("mapping tables poisoned");
        let rows = tables.entry(spec.table.clone()).or_default();
        let now = Utc::now();

        if let Some(row) = rows
            .iter_mut()
            .find(|row| row.source == *source && row.dest == *dest)
        {
            // Clock resolution can tie on back-to-back upserts; keep the
            // timestamp strictly increasing.
            row.updated = if now > row.updated {
                now
            } else {
                row.updated + Duration::microseconds(1)
            };
            row.status = status;
            return Ok(());
        }

        // Destination tuple is the primary key.
        rows.retain(|row| row.dest != *dest);
        rows.push(MappingRow {
            source: source.clone(),
            dest: dest.clone(),
            status,
            updated: now,
        });
        Ok(())
    }

    async fn dest_by_source(&self, spec: &MappingTableSpec, source: &IdTuple) -> Result<IdTuple> {
        let tables = self.tables.lock().expect("mapping tables poisoned");
        tables
            .get(&spec.table)
            .and_then(|rows| rows.iter().find(|row| row.source == *source))
            .map(|row| row.dest.clone())
            .ok_or_else(|| MigrateError::no_mapping(&spec.table, source))
    }

    async fn source_by_dest(&self, spec: &MappingTableSpec, dest: &IdTuple) -> Result<IdTuple> {
        let tables = self.tables.lock().expect("mapping tables poisoned");
        tables
            .get(&spec.table)
            .and_then(|rows| rows.iter().find(|row| row.dest == *dest))
            .map(|row| row.source.clone())
            .ok_or_else(|| MigrateError::no_mapping(&spec.table, dest))
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}
