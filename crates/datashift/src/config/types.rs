//! Configuration type definitions with auto-tuning based on system resources.

use serde::{Deserialize, Serialize};
use sysinfo::System;
use tracing::info;

use crate::core::ids::IdField;

/// System resource information for auto-tuning.
#[derive(Debug, Clone)]
pub struct SystemResources {
    /// Total RAM in bytes.
    pub total_memory_bytes: u64,
    /// Number of CPU cores.
    pub cpu_cores: usize,
}

impl SystemResources {
    /// Detect system resources.
    pub fn detect() -> Self {
        let mut sys = System::new_all();
        sys.refresh_all();

        Self {
            total_memory_bytes: sys.total_memory(),
            cpu_cores: sys.cpus().len(),
        }
    }

    /// Log detected system resources.
    pub fn log(&self) {
        info!(
            "System resources: {:.1} GB RAM, {} CPU cores",
            self.total_memory_bytes as f64 / (1024.0 * 1024.0 * 1024.0),
            self.cpu_cores
        );
    }
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Engine behavior configuration.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Declarative migration definitions (transforms are registered in code).
    #[serde(default)]
    pub migrations: Vec<MigrationDefinition>,
}

impl Config {
    /// Apply auto-tuned defaults based on system resources.
    /// Only fills in values that weren't explicitly set in the config file.
    pub fn with_auto_tuning(mut self) -> Self {
        let resources = SystemResources::detect();
        resources.log();
        self.engine = self.engine.with_auto_tuning(&resources);
        self
    }
}

/// Engine behavior configuration.
/// Fields use Option<T> to distinguish between "not set" (use auto-tuned
/// default) and "explicitly set" (use provided value).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Memory ceiling in bytes. Auto-tuned to total system RAM if not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_limit_bytes: Option<u64>,

    /// Fraction of the ceiling at which cache reclamation starts
    /// (default: 0.8).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_threshold: Option<f64>,
}

impl EngineConfig {
    /// Apply auto-tuned defaults based on system resources.
    /// Only fills in values that are None (not explicitly set).
    pub fn with_auto_tuning(mut self, resources: &SystemResources) -> Self {
        if self.memory_limit_bytes.is_none() {
            self.memory_limit_bytes = Some(resources.total_memory_bytes);
        }

        info!(
            "Auto-tuned config: memory_limit_bytes={}, memory_threshold={}",
            self.get_memory_limit_bytes(),
            self.get_memory_threshold(),
        );

        self
    }

    // Accessor methods that return the effective value (with fallback
    // defaults), for configs that haven't been auto-tuned yet.

    pub fn get_memory_limit_bytes(&self) -> u64 {
        // 1 GiB fallback when neither configured nor auto-tuned
        self.memory_limit_bytes.unwrap_or(1024 * 1024 * 1024)
    }

    pub fn get_memory_threshold(&self) -> f64 {
        self.memory_threshold.unwrap_or(0.8)
    }
}

/// Immutable per-migration metadata.
///
/// Created once at startup by the embedding application and treated as
/// read-only during execution. Locator overrides for simulation runs go
/// through the explicit `with_*_locator` builders, which produce a new
/// definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationDefinition {
    /// Unique human-readable migration identifier.
    pub name: String,

    /// Group this migration belongs to (default: "default").
    #[serde(default = "default_group")]
    pub group: String,

    /// Source locator (URI-style, e.g. "csv:///data/products.csv").
    pub source: String,

    /// Destination locator.
    pub destination: String,

    /// Explicit source driver name; when absent the driver is resolved from
    /// the source locator's scheme.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_driver: Option<String>,

    /// Explicit destination driver name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_driver: Option<String>,

    /// Ordered id fields read from each source row.
    pub source_id_fields: Vec<IdField>,

    /// Ordered id fields identifying each destination entity.
    pub destination_id_fields: Vec<IdField>,

    /// Identifiers of migrations that must run before this one.
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Flush the destination driver after every write.
    #[serde(default)]
    pub flush: bool,

    /// Identifier of another migration whose mapping table this one shares
    /// (multi-pass transforms over the same entities).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,
}

impl MigrationDefinition {
    /// The identifier selecting this migration's mapping table: the extended
    /// migration's identifier when `extends` is set, else its own name.
    pub fn mapping_key(&self) -> &str {
        self.extends.as_deref().unwrap_or(&self.name)
    }

    /// Replace the source locator (simulation runs).
    #[must_use]
    pub fn with_source_locator(mut self, locator: impl Into<String>) -> Self {
        self.source = locator.into();
        self
    }

    /// Replace the destination locator (simulation runs).
    #[must_use]
    pub fn with_destination_locator(mut self, locator: impl Into<String>) -> Self {
        self.destination = locator.into();
        self
    }
}

fn default_group() -> String {
    "default".to_string()
}
