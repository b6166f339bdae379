//! End-to-end engine scenarios over the in-memory drivers and mapping store.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use datashift::driver::memory::DestinationState;
use datashift::mapper::store::MappingRow;
use datashift::{
    DestinationDriver, DriverInfo, DriverRegistry, EngineConfig, Executor, IdField, IdTuple,
    IdentityMapper, MemoryDestination, MemoryGuard, MemoryMappingStore, MemoryProbe, MemorySource,
    MigrateError, Migration, MigrationDefinition, MigrationRegistry, MappingStatus, Orchestrator,
    OrphanMode, OutputPort, Record, ReferenceStore, Result, Severity, SourceDriver, StubBuilder,
    TransformContext, Value,
};

/// Capture engine tracing in test output; later calls are no-ops.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("datashift=debug")
        .with_test_writer()
        .try_init();
}

/// Output port with scripted `ask` answers, recording everything.
#[derive(Default)]
struct ScriptedOutput {
    answers: Mutex<VecDeque<usize>>,
    prompts: Mutex<Vec<String>>,
    progress: Mutex<Vec<(u64, IdTuple, Option<IdTuple>)>>,
    messages: Mutex<Vec<(String, Severity)>>,
}

impl ScriptedOutput {
    fn with_answers(answers: Vec<usize>) -> Self {
        Self {
            answers: Mutex::new(answers.into()),
            ..Self::default()
        }
    }

    fn prompt_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

impl OutputPort for ScriptedOutput {
    fn start(&self, _migration: &str, _total: u64) {}

    fn write_progress(&self, count: u64, source_ids: &IdTuple, dest_ids: Option<&IdTuple>) {
        self.progress
            .lock()
            .unwrap()
            .push((count, source_ids.clone(), dest_ids.cloned()));
    }

    fn finish(&self) {}

    fn message(&self, text: &str, severity: Severity) {
        self.messages.lock().unwrap().push((text.to_string(), severity));
    }

    fn ask(&self, prompt: &str, _choices: &[&str], default: usize) -> usize {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.answers.lock().unwrap().pop_front().unwrap_or(default)
    }
}

fn definition(name: &str) -> MigrationDefinition {
    MigrationDefinition {
        name: name.into(),
        group: "default".into(),
        source: format!("{name}-src://in"),
        destination: format!("{name}-dst://out"),
        source_driver: None,
        destination_driver: None,
        source_id_fields: vec![IdField::int("id")],
        destination_id_fields: vec![IdField::str("identifier")],
        depends_on: vec![],
        flush: false,
        extends: None,
    }
}

/// Appends "-migrated" to the row's `field` value.
struct AppendMigration {
    definition: MigrationDefinition,
}

#[async_trait]
impl Migration for AppendMigration {
    fn definition(&self) -> &MigrationDefinition {
        &self.definition
    }

    async fn transform(
        &self,
        row: &Record,
        mut entity: Record,
        _ctx: &mut TransformContext<'_>,
    ) -> Result<Option<Record>> {
        if let Some(Value::Str(s)) = row.get("field") {
            entity.set("field", format!("{s}-migrated"));
        }
        Ok(Some(entity))
    }
}

/// Copies the row's `identifier` into the entity, so destination identities
/// are controlled by the fixture rows.
struct PassthroughMigration {
    definition: MigrationDefinition,
}

#[async_trait]
impl Migration for PassthroughMigration {
    fn definition(&self) -> &MigrationDefinition {
        &self.definition
    }

    async fn transform(
        &self,
        row: &Record,
        mut entity: Record,
        _ctx: &mut TransformContext<'_>,
    ) -> Result<Option<Record>> {
        if let Some(v) = row.get("identifier") {
            entity.set("identifier", v.clone());
        }
        Ok(Some(entity))
    }
}

/// Skips every row whose `skip` field is set.
struct SkippingMigration {
    definition: MigrationDefinition,
}

#[async_trait]
impl Migration for SkippingMigration {
    fn definition(&self) -> &MigrationDefinition {
        &self.definition
    }

    async fn transform(
        &self,
        row: &Record,
        mut entity: Record,
        _ctx: &mut TransformContext<'_>,
    ) -> Result<Option<Record>> {
        if row.has("skip") {
            return Ok(None);
        }
        if let Some(v) = row.get("field") {
            entity.set("field", v.clone());
        }
        Ok(Some(entity))
    }
}

/// References the `category` migration's entity for each row, allowing stubs.
struct ProductMigration {
    definition: MigrationDefinition,
}

#[async_trait]
impl Migration for ProductMigration {
    fn definition(&self) -> &MigrationDefinition {
        &self.definition
    }

    async fn transform(
        &self,
        row: &Record,
        mut entity: Record,
        ctx: &mut TransformContext<'_>,
    ) -> Result<Option<Record>> {
        let category_id = row.get("category_id").and_then(Value::as_int).unwrap_or(0);
        let category = ctx
            .reference("category", &IdTuple::new().with("id", category_id), true)
            .await?;
        entity.set(
            "category_ref",
            category.get("identifier").cloned().unwrap_or(Value::Null),
        );
        if let Some(v) = row.get("field") {
            entity.set("field", v.clone());
        }
        Ok(Some(entity))
    }
}

/// Stub strategy filling the destination id so references see a usable key.
struct IdentifierStubBuilder;

impl StubBuilder for IdentifierStubBuilder {
    fn build(&self, _definition: &MigrationDefinition, source_ids: &IdTuple) -> Record {
        Record::new().with("identifier", format!("stub-{source_ids}"))
    }
}

struct Harness {
    store: Arc<MemoryMappingStore>,
    mapper: Arc<IdentityMapper>,
    migrations: Arc<MigrationRegistry>,
    drivers: Arc<DriverRegistry>,
    output: Arc<ScriptedOutput>,
}

impl Harness {
    fn new(
        migrations: Vec<Arc<dyn Migration>>,
        destinations: Vec<(&str, Arc<Mutex<DestinationState>>)>,
        output: ScriptedOutput,
    ) -> Self {
        Self::with_stub_builder(migrations, destinations, output, None)
    }

    fn with_stub_builder(
        migrations: Vec<Arc<dyn Migration>>,
        destinations: Vec<(&str, Arc<Mutex<DestinationState>>)>,
        output: ScriptedOutput,
        stub_builder: Option<Box<dyn StubBuilder>>,
    ) -> Self {
        init_tracing();
        let store = Arc::new(MemoryMappingStore::new());
        let mapper = Arc::new(match stub_builder {
            Some(builder) => IdentityMapper::with_stub_builder(Box::new(store.clone()), builder),
            None => IdentityMapper::new(Box::new(store.clone())),
        });

        let mut registry = MigrationRegistry::new();
        for migration in migrations {
            registry.register(migration);
        }

        let mut drivers = DriverRegistry::new();
        for (name, backing) in destinations {
            let scheme = format!("{name}-dst");
            let backing = backing.clone();
            drivers.register_destination(
                DriverInfo::new(format!("{name}-dst"), &[scheme.as_str()]),
                move || Box::new(MemoryDestination::with_backing(backing.clone())) as Box<dyn DestinationDriver>,
            );
        }

        Self {
            store,
            mapper,
            migrations: Arc::new(registry),
            drivers: Arc::new(drivers),
            output: Arc::new(output),
        }
    }

    fn references(&self) -> ReferenceStore {
        ReferenceStore::new(
            self.mapper.clone(),
            self.migrations.clone(),
            self.drivers.clone(),
        )
    }

    fn executor(&self) -> Executor {
        Executor::new(self.mapper.clone(), self.output.clone())
    }

    fn mapping_rows(&self, table: &str) -> Vec<MappingRow> {
        self.store.rows(table)
    }
}

async fn configured_destination(
    backing: &Arc<Mutex<DestinationState>>,
    def: &MigrationDefinition,
) -> MemoryDestination {
    let mut dest = MemoryDestination::with_backing(backing.clone());
    dest.configure(def).await.unwrap();
    dest
}

fn row(id: i64, field: &str) -> Record {
    Record::new().with("id", id).with("field", field)
}

#[tokio::test]
async fn test_first_run_maps_then_second_run_updates() {
    let migration: Arc<dyn Migration> = Arc::new(AppendMigration {
        definition: definition("product"),
    });
    let backing = MemoryDestination::new().backing();
    let harness = Harness::new(
        vec![migration.clone()],
        vec![("product", backing.clone())],
        ScriptedOutput::default(),
    );
    let mut executor = harness.executor();
    let mut references = harness.references();
    let def = migration.definition().clone();

    let mut source = MemorySource::with_rows(vec![row(1, "data")]);
    let mut dest = configured_destination(&backing, &def).await;
    let orphans = executor
        .execute(&migration, &mut source, &mut dest, &mut references)
        .await
        .unwrap();
    assert!(orphans.is_empty());

    let dest_ids = IdTuple::new().with("identifier", "seq-1");
    {
        let state = backing.lock().unwrap();
        assert_eq!(state.len(), 1);
        let entity = state.entity(&dest_ids).unwrap();
        assert_eq!(entity.get("field"), Some(&Value::Str("data-migrated".into())));
    }

    let rows = harness.mapping_rows("products");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].source, IdTuple::new().with("id", 1i64));
    assert_eq!(rows[0].dest, dest_ids);
    assert_eq!(rows[0].status, MappingStatus::Migrated);
    let first_updated = rows[0].updated;

    // Second run over the same source updates instead of duplicating.
    let mut source = MemorySource::with_rows(vec![row(1, "data")]);
    let mut dest = configured_destination(&backing, &def).await;
    let orphans = executor
        .execute(&migration, &mut source, &mut dest, &mut references)
        .await
        .unwrap();
    assert!(orphans.is_empty());

    assert_eq!(backing.lock().unwrap().len(), 1);
    let rows = harness.mapping_rows("products");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].dest, dest_ids);
    assert!(rows[0].updated > first_updated);
}

#[tokio::test]
async fn test_orphans_are_the_exact_set_difference() {
    let migration: Arc<dyn Migration> = Arc::new(PassthroughMigration {
        definition: definition("product"),
    });
    let backing = MemoryDestination::new().backing();
    for identifier in ["a", "b", "c"] {
        backing.lock().unwrap().seed(
            IdTuple::new().with("identifier", identifier),
            Record::new().with("field", "old"),
        );
    }
    let harness = Harness::new(
        vec![migration.clone()],
        vec![("product", backing.clone())],
        ScriptedOutput::default(),
    );
    let mut executor = harness.executor();
    let mut references = harness.references();
    let def = migration.definition().clone();

    let mut source = MemorySource::with_rows(vec![
        Record::new().with("id", 1i64).with("identifier", "a"),
        Record::new().with("id", 3i64).with("identifier", "c"),
    ]);
    let mut dest = configured_destination(&backing, &def).await;
    let orphans = executor
        .execute(&migration, &mut source, &mut dest, &mut references)
        .await
        .unwrap();

    assert_eq!(orphans.len(), 1);
    assert_eq!(orphans[0].get("identifier"), Some(&Value::Str("b".into())));
}

#[tokio::test]
async fn test_write_orphans_writes_once_with_null_source_ids() {
    let migration: Arc<dyn Migration> = Arc::new(PassthroughMigration {
        definition: definition("product"),
    });
    let backing = MemoryDestination::new().backing();
    let harness = Harness::new(
        vec![migration.clone()],
        vec![("product", backing.clone())],
        ScriptedOutput::default(),
    );
    let executor = harness.executor();
    let def = migration.definition().clone();

    let orphan = Record::new().with("identifier", "b").with("field", "old");
    let mut dest = configured_destination(&backing, &def).await;
    executor
        .write_orphans(&migration, &[orphan], &mut dest)
        .await
        .unwrap();

    assert_eq!(backing.lock().unwrap().write_calls, 1);
    let rows = harness.mapping_rows("products");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].source, IdTuple::nulls(&[IdField::int("id")]));
    assert_eq!(rows[0].dest, IdTuple::new().with("identifier", "b"));
    assert_eq!(rows[0].status, MappingStatus::Migrated);
}

#[tokio::test]
async fn test_ask_about_orphans_keep_all() {
    let migration: Arc<dyn Migration> = Arc::new(PassthroughMigration {
        definition: definition("product"),
    });
    let backing = MemoryDestination::new().backing();
    let harness = Harness::new(
        vec![migration.clone()],
        vec![("product", backing.clone())],
        ScriptedOutput::with_answers(vec![0]),
    );
    let executor = harness.executor();
    let def = migration.definition().clone();

    let orphans = vec![
        Record::new().with("identifier", "a"),
        Record::new().with("identifier", "b"),
    ];
    let mut dest = configured_destination(&backing, &def).await;
    executor
        .ask_about_orphans(&migration, &orphans, &mut dest)
        .await
        .unwrap();

    assert_eq!(harness.output.prompt_count(), 1);
    assert_eq!(backing.lock().unwrap().write_calls, 2);
    assert_eq!(harness.mapping_rows("products").len(), 2);
}

#[tokio::test]
async fn test_ask_about_orphans_remove_all() {
    let migration: Arc<dyn Migration> = Arc::new(PassthroughMigration {
        definition: definition("product"),
    });
    let backing = MemoryDestination::new().backing();
    let harness = Harness::new(
        vec![migration.clone()],
        vec![("product", backing.clone())],
        ScriptedOutput::with_answers(vec![1]),
    );
    let executor = harness.executor();
    let def = migration.definition().clone();

    let orphans = vec![Record::new().with("identifier", "a")];
    let mut dest = configured_destination(&backing, &def).await;
    executor
        .ask_about_orphans(&migration, &orphans, &mut dest)
        .await
        .unwrap();

    assert_eq!(harness.output.prompt_count(), 1);
    assert_eq!(backing.lock().unwrap().write_calls, 0);
    assert!(harness.mapping_rows("products").is_empty());
}

#[tokio::test]
async fn test_ask_about_orphans_per_entity() {
    let migration: Arc<dyn Migration> = Arc::new(PassthroughMigration {
        definition: definition("product"),
    });
    let backing = MemoryDestination::new().backing();
    // decide per entity, keep the first, remove the second
    let harness = Harness::new(
        vec![migration.clone()],
        vec![("product", backing.clone())],
        ScriptedOutput::with_answers(vec![2, 0, 1]),
    );
    let executor = harness.executor();
    let def = migration.definition().clone();

    let orphans = vec![
        Record::new().with("identifier", "a"),
        Record::new().with("identifier", "b"),
    ];
    let mut dest = configured_destination(&backing, &def).await;
    executor
        .ask_about_orphans(&migration, &orphans, &mut dest)
        .await
        .unwrap();

    assert_eq!(harness.output.prompt_count(), 3);
    assert_eq!(backing.lock().unwrap().write_calls, 1);
    let rows = harness.mapping_rows("products");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].dest, IdTuple::new().with("identifier", "a"));
}

#[tokio::test]
async fn test_skipped_row_leaves_no_trace() {
    let migration: Arc<dyn Migration> = Arc::new(SkippingMigration {
        definition: definition("product"),
    });
    let backing = MemoryDestination::new().backing();
    let harness = Harness::new(
        vec![migration.clone()],
        vec![("product", backing.clone())],
        ScriptedOutput::default(),
    );
    let mut executor = harness.executor();
    let mut references = harness.references();
    let def = migration.definition().clone();

    let mut source = MemorySource::with_rows(vec![
        Record::new().with("id", 1i64).with("skip", true),
        row(2, "data"),
    ]);
    let mut dest = configured_destination(&backing, &def).await;
    executor
        .execute(&migration, &mut source, &mut dest, &mut references)
        .await
        .unwrap();

    // Only the non-skipped row left anything behind.
    assert_eq!(backing.lock().unwrap().write_calls, 1);
    let rows = harness.mapping_rows("products");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].source, IdTuple::new().with("id", 2i64));
    assert!(harness.mapper.take_stubs().is_empty());

    // Progress reported the skipped row with no destination ids.
    let progress = harness.output.progress.lock().unwrap();
    assert_eq!(progress.len(), 2);
    assert!(progress[0].2.is_none());
    assert!(progress[1].2.is_some());
}

#[tokio::test]
async fn test_missing_id_field_fails_the_run() {
    let migration: Arc<dyn Migration> = Arc::new(AppendMigration {
        definition: definition("product"),
    });
    let backing = MemoryDestination::new().backing();
    let harness = Harness::new(
        vec![migration.clone()],
        vec![("product", backing.clone())],
        ScriptedOutput::default(),
    );
    let mut executor = harness.executor();
    let mut references = harness.references();
    let def = migration.definition().clone();

    let mut source = MemorySource::with_rows(vec![Record::new().with("field", "no id here")]);
    let mut dest = configured_destination(&backing, &def).await;
    let err = executor
        .execute(&migration, &mut source, &mut dest, &mut references)
        .await
        .unwrap_err();
    assert!(matches!(err, MigrateError::NoIdSet { .. }));
}

/// Destination that rejects every write.
struct FailingDestination;

#[async_trait]
impl DestinationDriver for FailingDestination {
    async fn configure(&mut self, _definition: &MigrationDefinition) -> Result<()> {
        Ok(())
    }

    async fn existing_ids(&mut self) -> Result<Vec<IdTuple>> {
        Ok(Vec::new())
    }

    async fn read(&mut self, _ids: &IdTuple) -> Result<Option<Record>> {
        Ok(None)
    }

    async fn write(&mut self, _entity: Record) -> Result<Option<IdTuple>> {
        Err(MigrateError::driver("disk full"))
    }

    async fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_write_error_is_reported_with_source_ids() {
    let migration: Arc<dyn Migration> = Arc::new(AppendMigration {
        definition: definition("product"),
    });
    let harness = Harness::new(vec![migration.clone()], vec![], ScriptedOutput::default());
    let mut executor = harness.executor();
    let mut references = harness.references();

    let mut source = MemorySource::with_rows(vec![row(1, "data")]);
    let mut dest = FailingDestination;
    let err = executor
        .execute(&migration, &mut source, &mut dest, &mut references)
        .await
        .unwrap_err();
    assert!(matches!(err, MigrateError::Driver(_)));

    // The operator sees which row failed, not just the error text.
    let messages = harness.output.messages.lock().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].1, Severity::Error);
    assert!(messages[0].0.contains("(id=1)"));
    assert!(messages[0].0.contains("disk full"));

    // Nothing was mapped for the failed row.
    assert!(harness.mapping_rows("products").is_empty());
}

#[tokio::test]
async fn test_forward_reference_persists_a_stub() {
    let product: Arc<dyn Migration> = Arc::new(ProductMigration {
        definition: definition("product"),
    });
    let category: Arc<dyn Migration> = Arc::new(AppendMigration {
        definition: definition("category"),
    });
    let product_backing = MemoryDestination::new().backing();
    let category_backing = MemoryDestination::new().backing();
    let harness = Harness::with_stub_builder(
        vec![product.clone(), category.clone()],
        vec![
            ("product", product_backing.clone()),
            ("category", category_backing.clone()),
        ],
        ScriptedOutput::default(),
        Some(Box::new(IdentifierStubBuilder)),
    );
    let mut executor = harness.executor();
    let mut references = harness.references();
    let def = product.definition().clone();

    let mut source =
        MemorySource::with_rows(vec![row(1, "widget").with("category_id", 7i64)]);
    let mut dest = configured_destination(&product_backing, &def).await;
    executor
        .execute(&product, &mut source, &mut dest, &mut references)
        .await
        .unwrap();

    // The stub was written to the category destination and mapped as Stub.
    let stub_dest = IdTuple::new().with("identifier", "stub-(id=7)");
    {
        let state = category_backing.lock().unwrap();
        assert_eq!(state.len(), 1);
        assert!(state.entity(&stub_dest).is_some());
        assert!(state.flush_calls >= 1);
    }
    let rows = harness.mapping_rows("categories");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].source, IdTuple::new().with("id", 7i64));
    assert_eq!(rows[0].dest, stub_dest);
    assert_eq!(rows[0].status, MappingStatus::Stub);

    // The row itself was flushed even though the migration did not ask.
    {
        let state = product_backing.lock().unwrap();
        assert_eq!(state.len(), 1);
        assert!(state.flush_calls >= 1);
    }
    let entity = {
        let state = product_backing.lock().unwrap();
        let product_ids = state.ids();
        state.entity(&product_ids[0]).cloned().unwrap()
    };
    assert_eq!(
        entity.get("category_ref"),
        Some(&Value::Str("stub-(id=7)".into()))
    );
}

#[tokio::test]
async fn test_same_stub_within_a_row_then_fresh_after_purge() {
    let harness = Harness::new(vec![], vec![], ScriptedOutput::default());
    let def = definition("category");

    let ids = IdTuple::new().with("id", 7i64);
    let first = harness.mapper.create_stub(&def, &ids);
    let second = harness.mapper.create_stub(&def, &ids);
    assert_eq!(first, second);
    assert_eq!(harness.mapper.take_stubs().len(), 1);

    harness.mapper.create_stub(&def, &ids);
    assert_eq!(harness.mapper.take_stubs().len(), 1);
}

/// Probe replaying fixed readings, holding the last one.
struct SequenceProbe(VecDeque<u64>);

impl MemoryProbe for SequenceProbe {
    fn used_bytes(&mut self) -> u64 {
        if self.0.len() > 1 {
            self.0.pop_front().unwrap()
        } else {
            *self.0.front().unwrap()
        }
    }
}

#[tokio::test]
async fn test_memory_reclaim_recovers_below_ceiling() {
    let migration: Arc<dyn Migration> = Arc::new(AppendMigration {
        definition: definition("product"),
    });
    let backing = MemoryDestination::new().backing();
    let harness = Harness::new(
        vec![migration.clone()],
        vec![("product", backing.clone())],
        ScriptedOutput::default(),
    );
    // 900 trips the 800 ceiling; freeing the reference cache gets back to 700.
    let guard = MemoryGuard::with_probe(
        Box::new(SequenceProbe(VecDeque::from(vec![900, 700]))),
        1000,
        0.8,
    );
    let mut executor = harness.executor().with_memory_guard(guard);
    let mut references = harness.references();
    let def = migration.definition().clone();

    let mut source = MemorySource::with_rows(vec![row(1, "data")]);
    let mut dest = configured_destination(&backing, &def).await;
    executor
        .execute(&migration, &mut source, &mut dest, &mut references)
        .await
        .unwrap();
    assert_eq!(backing.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_exhausted_reclaim_aborts_with_out_of_memory() {
    let migration: Arc<dyn Migration> = Arc::new(AppendMigration {
        definition: definition("product"),
    });
    let backing = MemoryDestination::new().backing();
    let harness = Harness::new(
        vec![migration.clone()],
        vec![("product", backing.clone())],
        ScriptedOutput::default(),
    );
    let guard = MemoryGuard::with_probe(
        Box::new(SequenceProbe(VecDeque::from(vec![1000]))),
        1000,
        0.8,
    );
    let mut executor = harness.executor().with_memory_guard(guard);
    let mut references = harness.references();
    let def = migration.definition().clone();

    let mut source = MemorySource::with_rows(vec![row(1, "data")]);
    let mut dest = configured_destination(&backing, &def).await;
    let err = executor
        .execute(&migration, &mut source, &mut dest, &mut references)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        MigrateError::OutOfMemory { used: 1000, limit: 1000 }
    ));
}

#[tokio::test]
async fn test_orchestrator_runs_dependencies_in_order() {
    init_tracing();
    let category: Arc<dyn Migration> = Arc::new(AppendMigration {
        definition: definition("category"),
    });
    let mut product_def = definition("product");
    product_def.depends_on = vec!["category".into()];
    let product: Arc<dyn Migration> = Arc::new(AppendMigration {
        definition: product_def,
    });

    let store = Arc::new(MemoryMappingStore::new());
    let mapper = Arc::new(IdentityMapper::new(Box::new(store.clone())));
    let mut registry = MigrationRegistry::new();
    registry.register(category);
    registry.register(product);

    let category_backing = MemoryDestination::new().backing();
    let product_backing = MemoryDestination::new().backing();
    let mut drivers = DriverRegistry::new();
    for (name, backing, rows) in [
        ("category", category_backing.clone(), vec![row(1, "toys")]),
        (
            "product",
            product_backing.clone(),
            vec![row(1, "ball"), row(2, "kite")],
        ),
    ] {
        let source_scheme = format!("{name}-src");
        drivers.register_source(
            DriverInfo::new(source_scheme.clone(), &[source_scheme.as_str()]),
            move || Box::new(MemorySource::with_rows(rows.clone())) as Box<dyn SourceDriver>,
        );
        let dest_scheme = format!("{name}-dst");
        drivers.register_destination(
            DriverInfo::new(dest_scheme.clone(), &[dest_scheme.as_str()]),
            move || Box::new(MemoryDestination::with_backing(backing.clone())) as Box<dyn DestinationDriver>,
        );
    }

    let output = Arc::new(ScriptedOutput::default());
    let orchestrator = Orchestrator::new(
        Arc::new(registry),
        Arc::new(drivers),
        mapper,
        output,
        EngineConfig::default(),
    )
    .with_orphan_mode(OrphanMode::Keep);

    let report = orchestrator.run(&["product".to_string()]).await.unwrap();

    assert!(report.success());
    assert_eq!(report.implied, vec!["category".to_string()]);
    assert_eq!(report.migrations.len(), 2);
    assert_eq!(report.migrations[0].migration, "category");
    assert_eq!(report.migrations[0].rows, 1);
    assert_eq!(report.migrations[1].migration, "product");
    assert_eq!(report.migrations[1].rows, 2);
    assert_eq!(report.migrations[1].skipped, 0);

    assert_eq!(category_backing.lock().unwrap().len(), 1);
    assert_eq!(product_backing.lock().unwrap().len(), 2);
    assert_eq!(store.rows("categories").len(), 1);
    assert_eq!(store.rows("products").len(), 2);

    assert!(report.to_json().unwrap().contains("\"migrations\""));
}
