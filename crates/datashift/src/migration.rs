//! The user-supplied migration contract.
//!
//! A migration couples an immutable [`MigrationDefinition`] with the
//! business logic turning one source row into one destination entity. The
//! engine owns everything else: streaming, identity mapping, stub flushing,
//! orphan detection.

use async_trait::async_trait;

use crate::config::MigrationDefinition;
use crate::core::ids::IdTuple;
use crate::core::value::Record;
use crate::driver::{DestinationDriver, SourceDriver};
use crate::error::Result;
use crate::refstore::ReferenceStore;

/// User-supplied per-migration business logic.
#[async_trait]
pub trait Migration: Send + Sync {
    /// The migration's declarative metadata.
    fn definition(&self) -> &MigrationDefinition;

    /// Configure the resolved source driver. The default hands the driver
    /// this migration's definition; override to add driver-specific setup.
    async fn configure_source(&self, driver: &mut dyn SourceDriver) -> Result<()> {
        driver.configure(self.definition()).await
    }

    /// Configure the resolved destination driver.
    async fn configure_destination(&self, driver: &mut dyn DestinationDriver) -> Result<()> {
        driver.configure(self.definition()).await
    }

    /// The entity a transform starts from when no prior mapping exists (or
    /// the mapped entity is gone from the destination).
    fn default_result(&self) -> Record {
        Record::new()
    }

    /// Turn a source row and the (existing or default) destination entity
    /// into the entity to write. Returning `None` skips the row: no write,
    /// no mapping, pending stubs discarded.
    async fn transform(
        &self,
        row: &Record,
        entity: Record,
        ctx: &mut TransformContext<'_>,
    ) -> Result<Option<Record>>;
}

/// Engine services available to a running transform.
pub struct TransformContext<'a> {
    references: &'a mut ReferenceStore,
}

impl<'a> TransformContext<'a> {
    pub(crate) fn new(references: &'a mut ReferenceStore) -> Self {
        Self { references }
    }

    /// Fetch another migration's already-written entity (or a stub for it,
    /// when `allow_stub` is set and the target driver supports stubs).
    pub async fn reference(
        &mut self,
        migration: &str,
        source_ids: &IdTuple,
        allow_stub: bool,
    ) -> Result<Record> {
        self.references.get(migration, source_ids, allow_stub).await
    }
}
