//! Migration registry and dependency resolution.
//!
//! Holds every known migration keyed by identifier and resolves a run order
//! satisfying declared dependencies via topological sort. Migrations pulled
//! in purely as dependencies (not explicitly requested) are reported back to
//! the caller so the front-end can tell the operator.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::error::{MigrateError, Result};
use crate::migration::Migration;

/// Result of dependency resolution.
pub struct Resolution {
    /// Migrations in a dependency-satisfying run order.
    pub ordered: Vec<Arc<dyn Migration>>,

    /// Names pulled in purely as dependencies of the requested set.
    pub implied: Vec<String>,
}

/// Registry of all known migrations.
#[derive(Default)]
pub struct MigrationRegistry {
    migrations: HashMap<String, Arc<dyn Migration>>,
    /// Registration order, for deterministic resolution output.
    order: Vec<String>,
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Visiting,
    Done,
}

impl MigrationRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a migration under its definition's name.
    pub fn register(&mut self, migration: Arc<dyn Migration>) {
        let name = migration.definition().name.clone();
        if self.migrations.insert(name.clone(), migration).is_none() {
            self.order.push(name);
        }
    }

    /// Look up a migration by identifier.
    pub fn get(&self, name: &str) -> Result<Arc<dyn Migration>> {
        self.migrations
            .get(name)
            .cloned()
            .ok_or_else(|| MigrateError::NonexistentMigration(name.to_string()))
    }

    /// All migrations in a group, in registration order.
    pub fn by_group(&self, group: &str) -> Vec<Arc<dyn Migration>> {
        self.order
            .iter()
            .filter_map(|name| self.migrations.get(name))
            .filter(|m| m.definition().group == group)
            .cloned()
            .collect()
    }

    /// All registered names, in registration order.
    pub fn names(&self) -> &[String] {
        &self.order
    }

    /// Resolve a run order for the requested migrations, pulling in their
    /// declared dependencies.
    pub fn resolve_dependencies(&self, requested: &[String]) -> Result<Resolution> {
        let mut marks: HashMap<String, Mark> = HashMap::new();
        let mut path: Vec<String> = Vec::new();
        let mut ordered: Vec<Arc<dyn Migration>> = Vec::new();

        for name in requested {
            self.visit(name, &mut marks, &mut path, &mut ordered)?;
        }

        let implied: Vec<String> = ordered
            .iter()
            .map(|m| m.definition().name.clone())
            .filter(|name| !requested.contains(name))
            .collect();

        if !implied.is_empty() {
            debug!("Dependencies pulled in: {}", implied.join(", "));
        }

        Ok(Resolution { ordered, implied })
    }

    fn visit(
        &self,
        name: &str,
        marks: &mut HashMap<String, Mark>,
        path: &mut Vec<String>,
        ordered: &mut Vec<Arc<dyn Migration>>,
    ) -> Result<()> {
        match marks.get(name) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                let mut cycle = path.clone();
                cycle.push(name.to_string());
                return Err(MigrateError::CircularDependency(cycle.join(" -> ")));
            }
            None => {}
        }

        let migration = self.get(name)?;
        marks.insert(name.to_string(), Mark::Visiting);
        path.push(name.to_string());

        for dep in &migration.definition().depends_on {
            self.visit(dep, marks, path, ordered)?;
        }

        path.pop();
        marks.insert(name.to_string(), Mark::Done);
        ordered.push(migration);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MigrationDefinition;
    use crate::core::ids::IdField;
    use crate::core::value::Record;
    use crate::migration::TransformContext;
    use async_trait::async_trait;

    struct Fixture {
        definition: MigrationDefinition,
    }

    #[async_trait]
    impl Migration for Fixture {
        fn definition(&self) -> &MigrationDefinition {
            &self.definition
        }

        async fn transform(
            &self,
            _row: &Record,
            entity: Record,
            _ctx: &mut TransformContext<'_>,
        ) -> crate::error::Result<Option<Record>> {
            Ok(Some(entity))
        }
    }

    fn fixture(name: &str, group: &str, depends_on: &[&str]) -> Arc<dyn Migration> {
        Arc::new(Fixture {
            definition: MigrationDefinition {
                name: name.into(),
                group: group.into(),
                source: "memory://in".into(),
                destination: "memory://out".into(),
                source_driver: None,
                destination_driver: None,
                source_id_fields: vec![IdField::int("id")],
                destination_id_fields: vec![IdField::int("id")],
                depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
                flush: false,
                extends: None,
            },
        })
    }

    fn names(resolution: &Resolution) -> Vec<String> {
        resolution
            .ordered
            .iter()
            .map(|m| m.definition().name.clone())
            .collect()
    }

    #[test]
    fn test_lookup_and_groups() {
        let mut registry = MigrationRegistry::new();
        registry.register(fixture("a", "g1", &[]));
        registry.register(fixture("b", "g2", &[]));

        assert!(registry.get("a").is_ok());
        assert!(matches!(
            registry.get("missing"),
            Err(MigrateError::NonexistentMigration(_))
        ));
        assert_eq!(registry.by_group("g2").len(), 1);
    }

    #[test]
    fn test_dependency_order() {
        let mut registry = MigrationRegistry::new();
        registry.register(fixture("categories", "shop", &[]));
        registry.register(fixture("products", "shop", &["categories"]));
        registry.register(fixture("variants", "shop", &["products"]));

        let resolution = registry
            .resolve_dependencies(&["variants".to_string()])
            .unwrap();
        assert_eq!(names(&resolution), vec!["categories", "products", "variants"]);
        assert_eq!(resolution.implied, vec!["categories", "products"]);
    }

    #[test]
    fn test_requested_migrations_are_not_implied() {
        let mut registry = MigrationRegistry::new();
        registry.register(fixture("a", "g", &[]));
        registry.register(fixture("b", "g", &["a"]));

        let resolution = registry
            .resolve_dependencies(&["a".to_string(), "b".to_string()])
            .unwrap();
        assert_eq!(names(&resolution), vec!["a", "b"]);
        assert!(resolution.implied.is_empty());
    }

    #[test]
    fn test_cycle_detection() {
        let mut registry = MigrationRegistry::new();
        registry.register(fixture("a", "g", &["b"]));
        registry.register(fixture("b", "g", &["a"]));

        let err = registry.resolve_dependencies(&["a".to_string()]).err().unwrap();
        match err {
            MigrateError::CircularDependency(path) => {
                assert!(path.contains("a -> b -> a"));
            }
            other => panic!("expected CircularDependency, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_dependency() {
        let mut registry = MigrationRegistry::new();
        registry.register(fixture("a", "g", &["ghost"]));

        assert!(matches!(
            registry.resolve_dependencies(&["a".to_string()]),
            Err(MigrateError::NonexistentMigration(_))
        ));
    }

    #[test]
    fn test_shared_dependency_runs_once() {
        let mut registry = MigrationRegistry::new();
        registry.register(fixture("base", "g", &[]));
        registry.register(fixture("a", "g", &["base"]));
        registry.register(fixture("b", "g", &["base"]));

        let resolution = registry
            .resolve_dependencies(&["a".to_string(), "b".to_string()])
            .unwrap();
        assert_eq!(names(&resolution), vec!["base", "a", "b"]);
    }
}
