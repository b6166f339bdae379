//! Error types for the migration engine.

use thiserror::Error;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A source row is missing one of the migration's declared id fields.
    /// Fatal for the row and the run.
    #[error("Row is missing declared id field '{field}' for migration '{migration}'")]
    NoIdSet { migration: String, field: String },

    /// No mapping row exists for the given id tuple. Recoverable: the
    /// executor falls back to the migration's default result, the reference
    /// store falls back to stub creation.
    #[error("No mapping found for '{migration}' with ids {ids}")]
    NoMapping { migration: String, ids: String },

    /// A migration identifier does not name a registered migration.
    #[error("Migration '{0}' is not registered")]
    NonexistentMigration(String),

    /// A driver name does not name a registered driver.
    #[error("No {role} driver registered under name '{name}'")]
    NonexistentDriver { role: &'static str, name: String },

    /// No registered driver claims the locator's URI scheme.
    #[error("No {role} driver supports scheme '{scheme}'")]
    NoDriverForScheme { role: &'static str, scheme: String },

    /// More than one registered driver claims the same URI scheme; the
    /// migration definition must name one explicitly.
    #[error("Multiple {role} drivers claim scheme '{scheme}': {candidates}")]
    UnclearDriver {
        role: &'static str,
        scheme: String,
        candidates: String,
    },

    /// Declared migration dependencies form a cycle.
    #[error("Circular migration dependency: {0}")]
    CircularDependency(String),

    /// Memory usage stayed at or above the configured threshold after all
    /// reclamation hooks ran. Unrecoverable; aborts the run.
    #[error("Out of memory: {used} bytes used of {limit} byte limit after freeing caches")]
    OutOfMemory { used: u64, limit: u64 },

    /// A source or destination locator could not be parsed as a URI.
    #[error("Cannot parse locator '{0}' as a URI")]
    BadUri(String),

    /// Driver-level read/write failure.
    #[error("Driver error: {0}")]
    Driver(String),

    /// Mapping store failure (schema conform, upsert, lookup).
    #[error("Mapping store error: {0}")]
    Mapping(String),

    /// Mapping store database error.
    #[error("Mapping store database error: {0}")]
    Pg(#[from] tokio_postgres::Error),

    /// Mapping store pool error.
    #[error("Mapping store pool error: {0}")]
    Pool(String),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MigrateError {
    /// Create a NoMapping error from a migration id and a displayable id set.
    pub fn no_mapping(migration: impl Into<String>, ids: impl std::fmt::Display) -> Self {
        MigrateError::NoMapping {
            migration: migration.into(),
            ids: ids.to_string(),
        }
    }

    /// Create a NoIdSet error for a missing id field.
    pub fn no_id_set(migration: impl Into<String>, field: impl Into<String>) -> Self {
        MigrateError::NoIdSet {
            migration: migration.into(),
            field: field.into(),
        }
    }

    /// Create a Driver error.
    pub fn driver(message: impl Into<String>) -> Self {
        MigrateError::Driver(message.into())
    }

    /// Whether this error is the recoverable missing-mapping case.
    pub fn is_no_mapping(&self) -> bool {
        matches!(self, MigrateError::NoMapping { .. })
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        // Add error chain for wrapped errors
        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

impl From<deadpool_postgres::PoolError> for MigrateError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        MigrateError::Pool(e.to_string())
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
