//! Drives one migration end to end.
//!
//! The executor consumes the source driver's row stream in order, resolves
//! any prior mapping for each row, invokes the migration's transform, flushes
//! pending stubs, writes the result, records the mapping, and reports
//! progress through the output port. After the stream is exhausted it
//! computes the orphan set (destination identities no processed row claimed)
//! and hands the orphan entities back to the caller; disposition is the
//! caller's call via [`Executor::write_orphans`] and
//! [`Executor::ask_about_orphans`].

pub mod memory;

pub use memory::{MemoryGuard, MemoryProbe, ProcessMemoryProbe};

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::MigrationDefinition;
use crate::core::ids::{extract_ids, IdTuple};
use crate::core::value::Record;
use crate::driver::{DestinationDriver, SourceDriver};
use crate::error::{MigrateError, Result};
use crate::events::{EngineEvent, EventListener};
use crate::mapper::{IdentityMapper, MappingStatus, PendingStub};
use crate::migration::{Migration, TransformContext};
use crate::output::{OutputPort, Severity};
use crate::refstore::ReferenceStore;

/// Executes single migrations against resolved drivers.
pub struct Executor {
    mapper: Arc<IdentityMapper>,
    output: Arc<dyn OutputPort>,
    guard: Option<MemoryGuard>,
    listeners: Vec<Box<dyn EventListener>>,
}

impl Executor {
    /// Create an executor over the shared mapper and output port.
    pub fn new(mapper: Arc<IdentityMapper>, output: Arc<dyn OutputPort>) -> Self {
        Self {
            mapper,
            output,
            guard: None,
            listeners: Vec::new(),
        }
    }

    /// Enforce a memory ceiling between rows.
    pub fn with_memory_guard(mut self, guard: MemoryGuard) -> Self {
        self.guard = Some(guard);
        self
    }

    /// Attach a listener for row events.
    pub fn add_listener(&mut self, listener: Box<dyn EventListener>) {
        self.listeners.push(listener);
    }

    /// Run one migration to completion.
    ///
    /// Returns the orphan entities: destination entities whose identities
    /// existed before the run but were not produced by any processed row.
    pub async fn execute(
        &mut self,
        migration: &Arc<dyn Migration>,
        source: &mut dyn SourceDriver,
        destination: &mut dyn DestinationDriver,
        references: &mut ReferenceStore,
    ) -> Result<Vec<Record>> {
        let definition = migration.definition().clone();
        let total = source.count().await?;
        self.output.start(&definition.name, total);

        let existing: HashSet<IdTuple> = destination.existing_ids().await?.into_iter().collect();
        debug!(
            "Migration '{}': {} rows, {} existing destination entities",
            definition.name,
            total,
            existing.len()
        );

        let mut new_ids: HashSet<IdTuple> = HashSet::new();
        let mut count: u64 = 0;

        while let Some(row) = source.next_row().await? {
            count += 1;
            self.emit(EngineEvent::PostFetchRow, &definition.name, &row);

            let source_ids = extract_ids(&definition.name, &row, &definition.source_id_fields)?;
            let entity = self
                .prior_entity(migration.as_ref(), &definition, &source_ids, destination)
                .await?;

            let result = {
                let mut ctx = TransformContext::new(references);
                match migration.transform(&row, entity, &mut ctx).await {
                    Ok(result) => result,
                    Err(err) => {
                        self.output.message(
                            &format!(
                                "Transform failed in '{}' for source ids {}: {}",
                                definition.name, source_ids, err
                            ),
                            Severity::Error,
                        );
                        return Err(err);
                    }
                }
            };

            match result {
                Some(entity) => {
                    self.emit(EngineEvent::PostTransformRow, &definition.name, &entity);

                    let dest_ids = match self
                        .write_row(&definition, &source_ids, entity, references, destination)
                        .await
                    {
                        Ok(dest_ids) => dest_ids,
                        Err(err) => {
                            self.output.message(
                                &format!(
                                    "Write failed in '{}' for source ids {}: {}",
                                    definition.name, source_ids, err
                                ),
                                Severity::Error,
                            );
                            return Err(err);
                        }
                    };
                    new_ids.insert(dest_ids.clone());
                    self.output.write_progress(count, &source_ids, Some(&dest_ids));
                }
                None => {
                    // Skipped row: abandon anything the transform stubbed.
                    let abandoned = self.mapper.take_stubs();
                    if !abandoned.is_empty() {
                        debug!(
                            "Row {} of '{}' skipped, discarding {} pending stubs",
                            count,
                            definition.name,
                            abandoned.len()
                        );
                    }
                    self.output.write_progress(count, &source_ids, None);
                }
            }

            if let Some(guard) = &mut self.guard {
                guard.ensure_capacity(references, source, destination).await?;
            }
        }

        self.output.finish();

        let mut orphan_ids: Vec<IdTuple> = existing
            .into_iter()
            .filter(|ids| !new_ids.contains(ids))
            .collect();
        orphan_ids.sort();

        if orphan_ids.is_empty() {
            return Ok(Vec::new());
        }
        info!(
            "Migration '{}' left {} orphaned destination entities",
            definition.name,
            orphan_ids.len()
        );
        destination.read_multiple(&orphan_ids).await
    }

    /// Re-write orphan entities unchanged, with mappings whose source ids are
    /// all null so later runs still recognize them as destination-only truth.
    pub async fn write_orphans(
        &self,
        migration: &Arc<dyn Migration>,
        orphans: &[Record],
        destination: &mut dyn DestinationDriver,
    ) -> Result<()> {
        let definition = migration.definition();
        let null_source = IdTuple::nulls(&definition.source_id_fields);
        for orphan in orphans {
            let fallback =
                extract_ids(&definition.name, orphan, &definition.destination_id_fields).ok();
            let assigned = destination.write(orphan.clone()).await?;
            let dest_ids = resolve_written_ids(definition, assigned, fallback)?;
            self.mapper
                .add_mapping(definition, &null_source, &dest_ids, MappingStatus::Migrated)
                .await?;
        }
        if !orphans.is_empty() {
            destination.flush().await?;
            info!(
                "Kept {} orphaned entities in '{}'",
                orphans.len(),
                definition.name
            );
        }
        Ok(())
    }

    /// Interactive orphan reconciliation.
    ///
    /// Asks once whether to keep all, remove all, or decide per entity.
    /// Keeping delegates to [`write_orphans`](Self::write_orphans); removal
    /// writes nothing, leaving the entities absent.
    pub async fn ask_about_orphans(
        &self,
        migration: &Arc<dyn Migration>,
        orphans: &[Record],
        destination: &mut dyn DestinationDriver,
    ) -> Result<()> {
        if orphans.is_empty() {
            return Ok(());
        }
        let definition = migration.definition();
        let choice = self.output.ask(
            &format!(
                "{} orphaned entities found in '{}'. What should happen to them?",
                orphans.len(),
                definition.name
            ),
            &["keep all", "remove all", "decide per entity"],
            0,
        );
        match choice {
            0 => self.write_orphans(migration, orphans, destination).await,
            1 => {
                self.output.message(
                    &format!("Removed {} orphaned entities", orphans.len()),
                    Severity::Info,
                );
                Ok(())
            }
            _ => {
                let mut kept = Vec::new();
                for orphan in orphans {
                    let label = extract_ids(
                        &definition.name,
                        orphan,
                        &definition.destination_id_fields,
                    )
                    .map(|ids| ids.to_string())
                    .unwrap_or_else(|_| format!("{:?}", orphan));
                    let keep = self
                        .output
                        .ask(&format!("Keep orphan {}?", label), &["keep", "remove"], 0);
                    if keep == 0 {
                        kept.push(orphan.clone());
                    }
                }
                self.write_orphans(migration, &kept, destination).await
            }
        }
    }

    /// Flush pending stubs, write the transformed entity, and record its
    /// Migrated mapping. Returns the destination ids.
    async fn write_row(
        &self,
        definition: &MigrationDefinition,
        source_ids: &IdTuple,
        entity: Record,
        references: &mut ReferenceStore,
        destination: &mut dyn DestinationDriver,
    ) -> Result<IdTuple> {
        let stubs = self.mapper.take_stubs();
        // Stubbed ids must be visible to later rows, so the row is flushed
        // even when the migration does not ask for it.
        let flush_row = definition.flush || !stubs.is_empty();
        for stub in stubs {
            self.flush_stub(stub, references).await?;
        }

        let fallback =
            extract_ids(&definition.name, &entity, &definition.destination_id_fields).ok();
        let assigned = destination.write(entity).await?;
        if flush_row {
            destination.flush().await?;
        }
        let dest_ids = resolve_written_ids(definition, assigned, fallback)?;

        self.mapper
            .add_mapping(definition, source_ids, &dest_ids, MappingStatus::Migrated)
            .await?;
        Ok(dest_ids)
    }

    async fn prior_entity(
        &self,
        migration: &dyn Migration,
        definition: &MigrationDefinition,
        source_ids: &IdTuple,
        destination: &mut dyn DestinationDriver,
    ) -> Result<Record> {
        match self
            .mapper
            .dest_ids_from_source_ids(definition, source_ids)
            .await
        {
            Ok(dest_ids) => Ok(destination
                .read(&dest_ids)
                .await?
                .unwrap_or_else(|| migration.default_result())),
            Err(err) if err.is_no_mapping() => Ok(migration.default_result()),
            Err(err) => Err(err),
        }
    }

    /// Write one pending stub to its target migration's destination and
    /// record the Stub-status mapping, so the assigned ids are resolvable
    /// before the real entity is migrated.
    async fn flush_stub(&self, stub: PendingStub, references: &mut ReferenceStore) -> Result<()> {
        let target = references.migrations().get(&stub.migration)?;
        let definition = target.definition().clone();

        let fallback =
            extract_ids(&definition.name, &stub.entity, &definition.destination_id_fields).ok();
        let driver = references.destination_for(&stub.migration).await?;
        let assigned = driver.write(stub.entity).await?;
        driver.flush().await?;
        let dest_ids = resolve_written_ids(&definition, assigned, fallback)?;

        debug!(
            "Flushed stub for '{}' {} -> {}",
            stub.migration, stub.source_ids, dest_ids
        );
        self.mapper
            .add_mapping(&definition, &stub.source_ids, &dest_ids, MappingStatus::Stub)
            .await
    }

    fn emit(&mut self, event: EngineEvent, migration: &str, row: &Record) {
        for listener in &mut self.listeners {
            listener.on_event(event, migration, row);
        }
    }
}

/// Destination ids of a written entity: what the driver assigned, or the id
/// fields the entity itself carried.
fn resolve_written_ids(
    definition: &MigrationDefinition,
    assigned: Option<IdTuple>,
    fallback: Option<IdTuple>,
) -> Result<IdTuple> {
    assigned.or(fallback).ok_or_else(|| {
        MigrateError::driver(format!(
            "destination driver for '{}' reported no ids for a written entity",
            definition.name
        ))
    })
}
