//! Driver registry with name and URI-scheme lookup.
//!
//! Drivers register a factory together with a typed [`DriverInfo`]
//! declaration. Lookup happens either by the stable driver name (when a
//! migration definition names one explicitly) or by the scheme of the
//! migration's locator. A scheme claimed by more than one driver is an
//! error, forcing the definition to disambiguate.

use std::collections::HashMap;

use crate::config::MigrationDefinition;
use crate::error::{MigrateError, Result};

use super::{DestinationDriver, SourceDriver};

/// Static metadata a driver declares at registration.
#[derive(Debug, Clone)]
pub struct DriverInfo {
    /// Stable driver name (e.g. "csv", "memory").
    pub name: String,

    /// URI schemes this driver claims (e.g. ["csv", "file"]).
    pub schemes: Vec<String>,
}

impl DriverInfo {
    /// Create driver metadata.
    pub fn new(name: impl Into<String>, schemes: &[&str]) -> Self {
        Self {
            name: name.into(),
            schemes: schemes.iter().map(|s| s.to_string()).collect(),
        }
    }
}

type SourceFactory = Box<dyn Fn() -> Box<dyn SourceDriver> + Send + Sync>;
type DestinationFactory = Box<dyn Fn() -> Box<dyn DestinationDriver> + Send + Sync>;

/// Registry of source and destination driver factories.
#[derive(Default)]
pub struct DriverRegistry {
    sources: HashMap<String, (DriverInfo, SourceFactory)>,
    destinations: HashMap<String, (DriverInfo, DestinationFactory)>,
}

impl DriverRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source driver factory.
    pub fn register_source<F>(&mut self, info: DriverInfo, factory: F)
    where
        F: Fn() -> Box<dyn SourceDriver> + Send + Sync + 'static,
    {
        self.sources
            .insert(info.name.clone(), (info, Box::new(factory)));
    }

    /// Register a destination driver factory.
    pub fn register_destination<F>(&mut self, info: DriverInfo, factory: F)
    where
        F: Fn() -> Box<dyn DestinationDriver> + Send + Sync + 'static,
    {
        self.destinations
            .insert(info.name.clone(), (info, Box::new(factory)));
    }

    /// Instantiate a source driver by its registered name.
    pub fn source_by_name(&self, name: &str) -> Result<Box<dyn SourceDriver>> {
        self.sources
            .get(name)
            .map(|(_, factory)| factory())
            .ok_or_else(|| MigrateError::NonexistentDriver {
                role: "source",
                name: name.to_string(),
            })
    }

    /// Instantiate a destination driver by its registered name.
    pub fn destination_by_name(&self, name: &str) -> Result<Box<dyn DestinationDriver>> {
        self.destinations
            .get(name)
            .map(|(_, factory)| factory())
            .ok_or_else(|| MigrateError::NonexistentDriver {
                role: "destination",
                name: name.to_string(),
            })
    }

    /// Instantiate the source driver claiming the locator's scheme.
    pub fn source_for_scheme(&self, locator: &str) -> Result<Box<dyn SourceDriver>> {
        let scheme = parse_scheme(locator)?;
        let candidates: Vec<&str> = self
            .sources
            .values()
            .filter(|(info, _)| info.schemes.iter().any(|s| s == scheme))
            .map(|(info, _)| info.name.as_str())
            .collect();
        let name = pick_single("source", scheme, &candidates)?;
        self.source_by_name(name)
    }

    /// Instantiate the destination driver claiming the locator's scheme.
    pub fn destination_for_scheme(&self, locator: &str) -> Result<Box<dyn DestinationDriver>> {
        let scheme = parse_scheme(locator)?;
        let candidates: Vec<&str> = self
            .destinations
            .values()
            .filter(|(info, _)| info.schemes.iter().any(|s| s == scheme))
            .map(|(info, _)| info.name.as_str())
            .collect();
        let name = pick_single("destination", scheme, &candidates)?;
        self.destination_by_name(name)
    }

    /// Resolve the source driver for a migration: explicit driver name
    /// first, locator scheme otherwise.
    pub fn source_for(&self, definition: &MigrationDefinition) -> Result<Box<dyn SourceDriver>> {
        match &definition.source_driver {
            Some(name) => self.source_by_name(name),
            None => self.source_for_scheme(&definition.source),
        }
    }

    /// Resolve the destination driver for a migration.
    pub fn destination_for(
        &self,
        definition: &MigrationDefinition,
    ) -> Result<Box<dyn DestinationDriver>> {
        match &definition.destination_driver {
            Some(name) => self.destination_by_name(name),
            None => self.destination_for_scheme(&definition.destination),
        }
    }
}

/// Extract the scheme from a URI-style locator.
fn parse_scheme(locator: &str) -> Result<&str> {
    let scheme = locator
        .split_once("://")
        .map(|(scheme, _)| scheme)
        .ok_or_else(|| MigrateError::BadUri(locator.to_string()))?;
    if scheme.is_empty() {
        return Err(MigrateError::BadUri(locator.to_string()));
    }
    Ok(scheme)
}

fn pick_single<'a>(role: &'static str, scheme: &str, candidates: &[&'a str]) -> Result<&'a str> {
    match candidates {
        [] => Err(MigrateError::NoDriverForScheme {
            role,
            scheme: scheme.to_string(),
        }),
        [single] => Ok(single),
        many => {
            let mut names: Vec<&str> = many.to_vec();
            names.sort_unstable();
            Err(MigrateError::UnclearDriver {
                role,
                scheme: scheme.to_string(),
                candidates: names.join(", "),
            })
        }
    }
}
