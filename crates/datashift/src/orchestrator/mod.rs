//! Batch coordination across migrations.
//!
//! The orchestrator ties the engine together: it resolves the requested
//! migrations into a dependency-satisfying order, resolves and configures
//! drivers for each, runs the executor, disposes of orphans per the
//! configured policy, and produces a run report.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::{EngineConfig, MigrationDefinition};
use crate::core::value::Record;
use crate::driver::registry::DriverRegistry;
use crate::driver::{DestinationDriver, SourceDriver};
use crate::error::Result;
use crate::events::{EngineEvent, EventListener};
use crate::executor::{Executor, MemoryGuard};
use crate::mapper::IdentityMapper;
use crate::migration::Migration;
use crate::output::{OutputPort, Severity};
use crate::refstore::ReferenceStore;
use crate::registry::MigrationRegistry;

/// What happens to orphaned destination entities after a migration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OrphanMode {
    /// Re-write them unchanged with null-source mappings.
    Keep,
    /// Leave them absent.
    Remove,
    /// Ask the operator through the output port.
    Ask,
}

/// Per-migration outcome in a [`RunReport`].
#[derive(Debug, Clone, Serialize)]
pub struct MigrationRunStats {
    pub migration: String,
    pub rows: u64,
    pub written: u64,
    pub skipped: u64,
    pub orphans: u64,
    pub duration_ms: u64,
}

/// Outcome of one orchestrated run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Migrations pulled in purely as dependencies.
    pub implied: Vec<String>,
    pub migrations: Vec<MigrationRunStats>,
    /// Name of the migration a failed run stopped in.
    pub failed_migration: Option<String>,
    pub error: Option<String>,
}

impl RunReport {
    /// Whether every migration ran to completion.
    pub fn success(&self) -> bool {
        self.failed_migration.is_none()
    }

    /// Serialize the report for machine consumers.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Counts rows flowing through the executor's event hooks.
struct RowCounter {
    fetched: Arc<AtomicU64>,
    transformed: Arc<AtomicU64>,
}

impl EventListener for RowCounter {
    fn on_event(&mut self, event: EngineEvent, _migration: &str, _row: &Record) {
        match event {
            EngineEvent::PostFetchRow => self.fetched.fetch_add(1, Ordering::Relaxed),
            EngineEvent::PostTransformRow => self.transformed.fetch_add(1, Ordering::Relaxed),
        };
    }
}

/// Runs batches of migrations in dependency order.
pub struct Orchestrator {
    migrations: Arc<MigrationRegistry>,
    drivers: Arc<DriverRegistry>,
    mapper: Arc<IdentityMapper>,
    output: Arc<dyn OutputPort>,
    engine: EngineConfig,
    orphan_mode: OrphanMode,
    /// Locator overrides for simulation runs, keyed by migration name.
    source_overrides: HashMap<String, String>,
    destination_overrides: HashMap<String, String>,
}

impl Orchestrator {
    pub fn new(
        migrations: Arc<MigrationRegistry>,
        drivers: Arc<DriverRegistry>,
        mapper: Arc<IdentityMapper>,
        output: Arc<dyn OutputPort>,
        engine: EngineConfig,
    ) -> Self {
        Self {
            migrations,
            drivers,
            mapper,
            output,
            engine,
            orphan_mode: OrphanMode::Keep,
            source_overrides: HashMap::new(),
            destination_overrides: HashMap::new(),
        }
    }

    /// Set the orphan disposition policy (default: keep).
    pub fn with_orphan_mode(mut self, mode: OrphanMode) -> Self {
        self.orphan_mode = mode;
        self
    }

    /// Redirect a migration's source locator, e.g. at a fixture for a
    /// simulation run.
    pub fn override_source(&mut self, migration: impl Into<String>, locator: impl Into<String>) {
        self.source_overrides.insert(migration.into(), locator.into());
    }

    /// Redirect a migration's destination locator.
    pub fn override_destination(
        &mut self,
        migration: impl Into<String>,
        locator: impl Into<String>,
    ) {
        self.destination_overrides
            .insert(migration.into(), locator.into());
    }

    /// Run the requested migrations (plus their dependencies) to completion.
    ///
    /// Execution errors stop the batch and are recorded in the report rather
    /// than returned; `Err` is reserved for resolution failures before any
    /// migration ran.
    pub async fn run(&self, requested: &[String]) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!("Run {} starting: {}", run_id, requested.join(", "));

        let resolution = self.migrations.resolve_dependencies(requested)?;
        if !resolution.implied.is_empty() {
            self.output.message(
                &format!(
                    "Also running dependencies: {}",
                    resolution.implied.join(", ")
                ),
                Severity::Info,
            );
        }

        let fetched = Arc::new(AtomicU64::new(0));
        let transformed = Arc::new(AtomicU64::new(0));

        let mut references = ReferenceStore::new(
            self.mapper.clone(),
            self.migrations.clone(),
            self.drivers.clone(),
        );
        let mut executor = Executor::new(self.mapper.clone(), self.output.clone())
            .with_memory_guard(MemoryGuard::new(
                self.engine.get_memory_limit_bytes(),
                self.engine.get_memory_threshold(),
            ));
        executor.add_listener(Box::new(RowCounter {
            fetched: fetched.clone(),
            transformed: transformed.clone(),
        }));

        let mut report = RunReport {
            run_id,
            started_at,
            finished_at: started_at,
            implied: resolution.implied,
            migrations: Vec::new(),
            failed_migration: None,
            error: None,
        };

        for migration in &resolution.ordered {
            let name = migration.definition().name.clone();
            let fetched_before = fetched.load(Ordering::Relaxed);
            let transformed_before = transformed.load(Ordering::Relaxed);
            let clock = Instant::now();

            match self
                .run_one(migration, &mut executor, &mut references)
                .await
            {
                Ok(orphans) => {
                    let rows = fetched.load(Ordering::Relaxed) - fetched_before;
                    let written = transformed.load(Ordering::Relaxed) - transformed_before;
                    report.migrations.push(MigrationRunStats {
                        migration: name,
                        rows,
                        written,
                        skipped: rows - written,
                        orphans: orphans as u64,
                        duration_ms: clock.elapsed().as_millis() as u64,
                    });
                }
                Err(err) => {
                    error!("Run {} failed in '{}': {}", run_id, name, err.format_detailed());
                    report.failed_migration = Some(name);
                    report.error = Some(err.to_string());
                    break;
                }
            }
        }

        report.finished_at = Utc::now();
        info!(
            "Run {} finished: {} migrations, success={}",
            run_id,
            report.migrations.len(),
            report.success()
        );
        Ok(report)
    }

    /// Execute a single migration and dispose of its orphans. Returns the
    /// orphan count.
    async fn run_one(
        &self,
        migration: &Arc<dyn Migration>,
        executor: &mut Executor,
        references: &mut ReferenceStore,
    ) -> Result<usize> {
        let definition = self.effective_definition(migration.definition());

        let mut source = self.drivers.source_for(&definition)?;
        migration.configure_source(source.as_mut()).await?;
        let mut destination = self.drivers.destination_for(&definition)?;
        migration.configure_destination(destination.as_mut()).await?;
        if self.is_overridden(&definition.name) {
            // Point the drivers at the overridden locators; the migration's
            // own configure hooks saw the original definition.
            source.configure(&definition).await?;
            destination.configure(&definition).await?;
        }

        let orphans = executor
            .execute(migration, source.as_mut(), destination.as_mut(), references)
            .await?;

        if !orphans.is_empty() {
            match self.orphan_mode {
                OrphanMode::Keep => {
                    executor
                        .write_orphans(migration, &orphans, destination.as_mut())
                        .await?;
                }
                OrphanMode::Remove => {
                    self.output.message(
                        &format!(
                            "Removed {} orphaned entities from '{}'",
                            orphans.len(),
                            definition.name
                        ),
                        Severity::Info,
                    );
                }
                OrphanMode::Ask => {
                    executor
                        .ask_about_orphans(migration, &orphans, destination.as_mut())
                        .await?;
                }
            }
        }

        Ok(orphans.len())
    }

    fn effective_definition(&self, definition: &MigrationDefinition) -> MigrationDefinition {
        let mut effective = definition.clone();
        if let Some(locator) = self.source_overrides.get(&definition.name) {
            effective = effective.with_source_locator(locator);
        }
        if let Some(locator) = self.destination_overrides.get(&definition.name) {
            effective = effective.with_destination_locator(locator);
        }
        effective
    }

    fn is_overridden(&self, migration: &str) -> bool {
        self.source_overrides.contains_key(migration)
            || self.destination_overrides.contains_key(migration)
    }
}

