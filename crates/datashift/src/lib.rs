//! datashift - heterogeneous record migration engine
//!
//! Streams rows out of a source of one shape, runs them through
//! user-supplied transforms, and writes entities into a destination of a
//! different shape, while a persistent identity mapping ties source ids to
//! destination ids across runs. Repeated runs update previously migrated
//! entities instead of duplicating them, forward references are satisfied
//! with stub entities, and destination entities no run re-produced are
//! detected as orphans and reconciled.
//!
//! # Architecture
//!
//! - **Config**: engine limits and declarative migration definitions
//! - **Drivers**: pluggable source streams and destination entity stores,
//!   resolved by name or locator scheme
//! - **Identity Mapper**: persistent source-id to destination-id mapping
//!   with stub bookkeeping
//! - **Reference Store**: cached cross-migration entity lookups
//! - **Executor**: the per-migration row loop, orphan detection, memory
//!   ceiling enforcement
//! - **Orchestrator**: dependency-ordered batch runs with reports

pub mod config;
pub mod core;
pub mod driver;
pub mod error;
pub mod events;
pub mod executor;
pub mod mapper;
pub mod migration;
pub mod orchestrator;
pub mod output;
pub mod refstore;
pub mod registry;

pub use config::{Config, EngineConfig, MigrationDefinition, SystemResources};
pub use crate::core::ids::{extract_ids, IdField, IdKind, IdTuple, IdValue};
pub use crate::core::value::{Record, Value};
pub use driver::{
    DestinationDriver, DriverInfo, DriverRegistry, MemoryDestination, MemorySource, SourceDriver,
};
pub use error::{MigrateError, Result};
pub use events::{EngineEvent, EventListener};
pub use executor::{Executor, MemoryGuard, MemoryProbe};
pub use mapper::{
    IdentityMapper, MappingStatus, MappingStore, MemoryMappingStore, PgMappingStore, StubBuilder,
};
pub use migration::{Migration, TransformContext};
pub use orchestrator::{MigrationRunStats, Orchestrator, OrphanMode, RunReport};
pub use output::{LogOutput, OutputPort, Severity};
pub use refstore::ReferenceStore;
pub use registry::{MigrationRegistry, Resolution};
