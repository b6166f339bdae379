//! Configuration validation.

use std::collections::HashSet;

use super::Config;
use crate::error::{MigrateError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    if let Some(t) = config.engine.memory_threshold {
        if !(0.0..=1.0).contains(&t) {
            return Err(MigrateError::Config(format!(
                "engine.memory_threshold must be between 0 and 1, got {}",
                t
            )));
        }
    }
    if let Some(0) = config.engine.memory_limit_bytes {
        return Err(MigrateError::Config(
            "engine.memory_limit_bytes must be at least 1".into(),
        ));
    }

    let mut names = HashSet::new();
    for def in &config.migrations {
        if def.name.is_empty() {
            return Err(MigrateError::Config("migration name is required".into()));
        }
        if !names.insert(def.name.as_str()) {
            return Err(MigrateError::Config(format!(
                "duplicate migration name '{}'",
                def.name
            )));
        }
        if def.source.is_empty() {
            return Err(MigrateError::Config(format!(
                "migration '{}': source locator is required",
                def.name
            )));
        }
        if def.destination.is_empty() {
            return Err(MigrateError::Config(format!(
                "migration '{}': destination locator is required",
                def.name
            )));
        }
        if def.source_id_fields.is_empty() {
            return Err(MigrateError::Config(format!(
                "migration '{}': at least one source id field is required",
                def.name
            )));
        }
        if def.destination_id_fields.is_empty() {
            return Err(MigrateError::Config(format!(
                "migration '{}': at least one destination id field is required",
                def.name
            )));
        }
        if def.extends.as_deref() == Some(def.name.as_str()) {
            return Err(MigrateError::Config(format!(
                "migration '{}' cannot extend itself",
                def.name
            )));
        }
    }

    Ok(())
}
