//! Identity mapping between source and destination ids.
//!
//! The [`IdentityMapper`] persists, per migration, which destination entity
//! each source row produced, so repeated runs update rather than duplicate.
//! It also manages stub placeholder entities for forward references. Storage
//! is pluggable through [`MappingStore`]:
//!
//! - [`naming`]: table/column name derivation (memoized per mapper)
//! - [`store`]: store trait, status type, in-memory backend
//! - [`pg`]: PostgreSQL backend

pub mod naming;
pub mod pg;
pub mod store;

pub use pg::PgMappingStore;
pub use store::{MappingStatus, MappingStore, MappingTableSpec, MemoryMappingStore};

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

use crate::config::MigrationDefinition;
use crate::core::ids::IdTuple;
use crate::core::value::Record;
use crate::error::Result;

use naming::NameCache;
use store::MappingColumn;

/// Strategy filling a stub entity with arbitrary valid values.
///
/// A stub must satisfy the destination's non-nullable fields so it can be
/// persisted despite being empty of real data; only the embedding
/// application knows the destination schema, so the strategy is injected.
pub trait StubBuilder: Send + Sync {
    /// Build a placeholder entity for a not-yet-migrated row of `definition`.
    fn build(&self, definition: &MigrationDefinition, source_ids: &IdTuple) -> Record;
}

/// Default stub strategy: an empty record.
///
/// Leaves destination id fields unset so the destination driver assigns
/// fresh ids on write. Sufficient for destinations without further
/// non-nullable fields.
#[derive(Debug, Default)]
pub struct DefaultStubBuilder;

impl StubBuilder for DefaultStubBuilder {
    fn build(&self, _definition: &MigrationDefinition, _source_ids: &IdTuple) -> Record {
        Record::new()
    }
}

/// A stub created during the current row's processing, awaiting flush.
#[derive(Debug, Clone)]
pub struct PendingStub {
    /// Name of the migration the stub belongs to.
    pub migration: String,
    /// Source ids the stub stands in for.
    pub source_ids: IdTuple,
    /// The placeholder entity.
    pub entity: Record,
}

/// Persists source-id/destination-id correspondences per migration.
pub struct IdentityMapper {
    store: Box<dyn MappingStore>,
    stub_builder: Box<dyn StubBuilder>,
    naming: Mutex<NameCache>,
    /// Mapping keys whose table has been conformed this process.
    conformed: AsyncMutex<HashSet<String>>,
    /// Stubs created since the last purge, deduplicated per
    /// (migration, sorted source id tuple).
    stubs: Mutex<BTreeMap<(String, IdTuple), PendingStub>>,
}

impl IdentityMapper {
    /// Create a mapper over a store with the default stub strategy.
    pub fn new(store: Box<dyn MappingStore>) -> Self {
        Self::with_stub_builder(store, Box::new(DefaultStubBuilder))
    }

    /// Create a mapper with an injected stub strategy.
    pub fn with_stub_builder(store: Box<dyn MappingStore>, stub_builder: Box<dyn StubBuilder>) -> Self {
        Self {
            store,
            stub_builder,
            naming: Mutex::new(NameCache::new()),
            conformed: AsyncMutex::new(HashSet::new()),
            stubs: Mutex::new(BTreeMap::new()),
        }
    }

    /// Derive the mapping table spec for a migration definition.
    pub fn table_spec(&self, definition: &MigrationDefinition) -> MappingTableSpec {
        let mut naming = self.naming.lock().expect("name cache poisoned");
        let table = naming.table_name(definition.mapping_key()).to_string();
        let source_columns = definition
            .source_id_fields
            .iter()
            .map(|f| MappingColumn {
                column: naming.column_name("source", &f.name).to_string(),
                field: f.name.clone(),
                kind: f.kind,
            })
            .collect();
        let dest_columns = definition
            .destination_id_fields
            .iter()
            .map(|f| MappingColumn {
                column: naming.column_name("dest", &f.name).to_string(),
                field: f.name.clone(),
                kind: f.kind,
            })
            .collect();
        MappingTableSpec {
            table,
            source_columns,
            dest_columns,
        }
    }

    /// Upsert a mapping row, lazily conforming the mapping table first.
    pub async fn add_mapping(
        &self,
        definition: &MigrationDefinition,
        source_ids: &IdTuple,
        dest_ids: &IdTuple,
        status: MappingStatus,
    ) -> Result<()> {
        let spec = self.table_spec(definition);
        self.conform_once(definition.mapping_key(), &spec).await?;
        self.store.upsert(&spec, source_ids, dest_ids, status).await
    }

    /// Look up the destination ids previously recorded for source ids.
    pub async fn dest_ids_from_source_ids(
        &self,
        definition: &MigrationDefinition,
        source_ids: &IdTuple,
    ) -> Result<IdTuple> {
        let spec = self.table_spec(definition);
        self.store.dest_by_source(&spec, source_ids).await
    }

    /// Look up the source ids previously recorded for destination ids.
    pub async fn source_ids_from_dest_ids(
        &self,
        definition: &MigrationDefinition,
        dest_ids: &IdTuple,
    ) -> Result<IdTuple> {
        let spec = self.table_spec(definition);
        self.store.source_by_dest(&spec, dest_ids).await
    }

    /// Create (or return the already-pending) stub entity for a forward
    /// reference to `definition`'s row identified by `source_ids`.
    ///
    /// Deduplicated per (migration, sorted source id tuple) for the stub's
    /// pending lifetime: repeated requests during one row share the entity.
    pub fn create_stub(&self, definition: &MigrationDefinition, source_ids: &IdTuple) -> Record {
        let mut stubs = self.stubs.lock().expect("pending stubs poisoned");
        let key = (definition.name.clone(), source_ids.clone());
        stubs
            .entry(key)
            .or_insert_with(|| {
                debug!(
                    "Creating stub for '{}' with ids {}",
                    definition.name, source_ids
                );
                PendingStub {
                    migration: definition.name.clone(),
                    source_ids: source_ids.clone(),
                    entity: self.stub_builder.build(definition, source_ids),
                }
            })
            .entity
            .clone()
    }

    /// Return and clear the stubs created since the last purge. Called once
    /// per processed row by the executor.
    pub fn take_stubs(&self) -> Vec<PendingStub> {
        let mut stubs = self.stubs.lock().expect("pending stubs poisoned");
        std::mem::take(&mut *stubs).into_values().collect()
    }

    /// The backend storing the mappings.
    pub fn backend_type(&self) -> &'static str {
        self.store.backend_type()
    }

    async fn conform_once(&self, mapping_key: &str, spec: &MappingTableSpec) -> Result<()> {
        let mut conformed = self.conformed.lock().await;
        if !conformed.contains(mapping_key) {
            debug!(
                "Conforming mapping table '{}' for '{}'",
                spec.table, mapping_key
            );
            self.store.conform(spec).await?;
            conformed.insert(mapping_key.to_string());
        }
        Ok(())
    }
}
