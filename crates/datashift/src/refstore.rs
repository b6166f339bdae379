//! Cross-migration entity lookups with a read-through cache.
//!
//! Transforms frequently need an entity written by another migration, for
//! example a product transform attaching the already-migrated category. The
//! reference store resolves source ids to the destination entity via the
//! identity mapper, reads the entity through the target migration's
//! destination driver, and caches the result for the rest of the run.
//!
//! Stub entities are handed out when the mapping is missing, the caller
//! allows it, and the target destination supports stubs. Stubs are never
//! cached: the real entity may arrive later in the run and lookups must
//! pick it up.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::core::ids::IdTuple;
use crate::core::value::Record;
use crate::driver::registry::DriverRegistry;
use crate::driver::DestinationDriver;
use crate::error::{MigrateError, Result};
use crate::mapper::IdentityMapper;
use crate::registry::MigrationRegistry;

/// Read-through cache of entities written by other migrations.
pub struct ReferenceStore {
    mapper: Arc<IdentityMapper>,
    migrations: Arc<MigrationRegistry>,
    drivers: Arc<DriverRegistry>,
    /// Resolved entities, keyed by (migration name, source ids).
    cache: HashMap<(String, IdTuple), Record>,
    /// Configured destination drivers, one per referenced migration.
    destinations: HashMap<String, Box<dyn DestinationDriver>>,
}

impl ReferenceStore {
    /// Create a store backed by the given engine services.
    pub fn new(
        mapper: Arc<IdentityMapper>,
        migrations: Arc<MigrationRegistry>,
        drivers: Arc<DriverRegistry>,
    ) -> Self {
        Self {
            mapper,
            migrations,
            drivers,
            cache: HashMap::new(),
            destinations: HashMap::new(),
        }
    }

    /// Fetch the destination entity another migration wrote for `source_ids`.
    ///
    /// When no mapping exists yet and `allow_stub` is set, a stub entity is
    /// registered with the mapper and returned instead, provided the target
    /// migration's destination supports stubs.
    pub async fn get(
        &mut self,
        migration: &str,
        source_ids: &IdTuple,
        allow_stub: bool,
    ) -> Result<Record> {
        let key = (migration.to_string(), source_ids.clone());
        if let Some(entity) = self.cache.get(&key) {
            trace!("Reference cache hit for '{}' {}", migration, source_ids);
            return Ok(entity.clone());
        }

        let target = self.migrations.get(migration)?;
        let definition = target.definition().clone();

        let dest_ids = match self
            .mapper
            .dest_ids_from_source_ids(&definition, source_ids)
            .await
        {
            Ok(ids) => ids,
            Err(err) if err.is_no_mapping() && allow_stub => {
                return self.stub(migration, source_ids).await;
            }
            Err(err) => return Err(err),
        };

        let driver = self.destination_for(migration).await?;
        match driver.read(&dest_ids).await? {
            Some(entity) => {
                self.cache.insert(key, entity.clone());
                Ok(entity)
            }
            // Mapped but gone from the destination: treat like a missing
            // mapping so callers can fall back to a stub.
            None if allow_stub => self.stub(migration, source_ids).await,
            None => Err(MigrateError::no_mapping(migration, source_ids)),
        }
    }

    /// The configured destination driver for a migration, instantiating and
    /// configuring it on first use.
    pub async fn destination_for(&mut self, migration: &str) -> Result<&mut dyn DestinationDriver> {
        if !self.destinations.contains_key(migration) {
            let target = self.migrations.get(migration)?;
            let mut driver = self.drivers.destination_for(target.definition())?;
            target.configure_destination(driver.as_mut()).await?;
            debug!("Opened destination for referenced migration '{}'", migration);
            self.destinations.insert(migration.to_string(), driver);
        }
        match self.destinations.get_mut(migration) {
            Some(driver) => Ok(driver.as_mut()),
            None => Err(MigrateError::driver(format!(
                "destination driver for '{migration}' was not retained"
            ))),
        }
    }

    /// The migration registry backing lookups.
    pub fn migrations(&self) -> &Arc<MigrationRegistry> {
        &self.migrations
    }

    /// Drop the entity cache and ask held drivers to trim theirs.
    pub async fn free_memory(&mut self) {
        let dropped = self.cache.len();
        self.cache.clear();
        for driver in self.destinations.values_mut() {
            driver.free_memory().await;
        }
        debug!("Reference store dropped {} cached entities", dropped);
    }

    async fn stub(&mut self, migration: &str, source_ids: &IdTuple) -> Result<Record> {
        let target = self.migrations.get(migration)?;
        let definition = target.definition().clone();

        let driver = self.destination_for(migration).await?;
        if !driver.supports_stubs() {
            return Err(MigrateError::no_mapping(migration, source_ids));
        }

        let entity = self.mapper.create_stub(&definition, source_ids);
        debug!("Handing out stub for '{}' {}", migration, source_ids);
        Ok(entity)
    }
}
