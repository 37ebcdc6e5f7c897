use std::collections::HashMap;
use std::str::FromStr;

use futures::future::BoxFuture;

use crate::error::MigrateError;
use crate::schema::{SchemaAdapter, SchemaError};

/// A migration procedure, run with the adapter for the migration's transaction
pub type Procedure =
    for<'a> fn(&'a mut dyn SchemaAdapter) -> BoxFuture<'a, Result<(), SchemaError>>;

#[derive(Clone, Copy)]
pub struct Migration {
    /// `<number>-<slug>`, e.g. `001-add-soft-delete-fields`
    pub id: &'static str,
    pub description: &'static str,
    pub up: Procedure,
    pub down: Procedure,
    /// Set when `down` intentionally does not fully invert `up`
    pub down_note: Option<&'static str>,
}

impl std::fmt::Debug for Migration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migration")
            .field("id", &self.id)
            .field("description", &self.description)
            .field("down_note", &self.down_note)
            .finish()
    }
}

/// Parsed, sortable form of a migration id
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MigrationId {
    pub number: u32,
    pub slug: String,
}

impl FromStr for MigrationId {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((number, slug)) = s.split_once('-') else {
            return Err(MigrateError::Registry(format!(
                "migration id {:?} must be of the form <number>-<name>",
                s
            )));
        };

        if number.is_empty() || !number.chars().all(|c| c.is_ascii_digit()) {
            return Err(MigrateError::Registry(format!(
                "migration id {:?} must start with a numeric prefix",
                s
            )));
        }

        let number = number.parse::<u32>().map_err(|e| {
            MigrateError::Registry(format!("migration id {:?} has an invalid prefix: {}", s, e))
        })?;

        if slug.is_empty()
            || !slug
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(MigrateError::Registry(format!(
                "migration id {:?} must have a lowercase name made of [a-z0-9-]",
                s
            )));
        }

        Ok(MigrationId {
            number,
            slug: slug.to_string(),
        })
    }
}

/// The ordered set of known migrations
#[derive(Debug, Clone)]
pub struct Registry {
    migrations: Vec<Migration>,
}

impl Registry {
    /// Validates and sorts a set of migrations
    pub fn new(migrations: impl IntoIterator<Item = Migration>) -> Result<Self, MigrateError> {
        let mut parsed = Vec::new();
        let mut seen_numbers: HashMap<u32, &'static str> = HashMap::new();

        for migration in migrations {
            let id = migration.id.parse::<MigrationId>()?;

            if let Some(other) = seen_numbers.insert(id.number, migration.id) {
                if other == migration.id {
                    return Err(MigrateError::Registry(format!(
                        "duplicate migration id {}",
                        migration.id
                    )));
                }

                return Err(MigrateError::Registry(format!(
                    "migrations {} and {} share the same numeric prefix",
                    other, migration.id
                )));
            }

            parsed.push((id, migration));
        }

        parsed.sort_by(|a, b| a.0.cmp(&b.0));

        Ok(Registry {
            migrations: parsed.into_iter().map(|(_, m)| m).collect(),
        })
    }

    /// The application's own migrations
    pub fn builtin() -> Result<Self, MigrateError> {
        Self::new(crate::migrations::MIGRATIONS)
    }

    /// All migrations, ascending by id
    pub fn list(&self) -> &[Migration] {
        &self.migrations
    }

    pub fn get(&self, id: &str) -> Option<&Migration> {
        self.migrations.iter().find(|m| m.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Position of a migration in registry order
    pub fn position(&self, id: &str) -> Option<usize> {
        self.migrations.iter().position(|m| m.id == id)
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_schema: &mut dyn SchemaAdapter) -> BoxFuture<'_, Result<(), SchemaError>> {
        Box::pin(async { Ok(()) })
    }

    fn migration(id: &'static str) -> Migration {
        Migration {
            id,
            description: "test",
            up: noop,
            down: noop,
            down_note: None,
        }
    }

    #[test]
    fn test_sorts_by_numeric_prefix() {
        let registry = Registry::new([
            migration("010-c"),
            migration("002-b"),
            migration("1-a"),
        ])
        .unwrap();

        let ids: Vec<_> = registry.list().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["1-a", "002-b", "010-c"]);
        assert_eq!(registry.position("010-c"), Some(2));
        assert!(registry.contains("002-b"));
        assert!(!registry.contains("003-x"));
    }

    #[test]
    fn test_rejects_duplicates() {
        let err = Registry::new([migration("001-a"), migration("001-a")]).unwrap_err();
        assert!(matches!(err, MigrateError::Registry(ref m) if m.contains("duplicate")));

        let err = Registry::new([migration("001-a"), migration("1-b")]).unwrap_err();
        assert!(matches!(err, MigrateError::Registry(ref m) if m.contains("numeric prefix")));
    }

    #[test]
    fn test_rejects_malformed_ids() {
        for id in ["add-things", "001", "001-", "x01-a", "001-Add", "001-a_b"] {
            let err = Registry::new([migration(id)]).unwrap_err();
            assert_eq!(err.category(), "RegistryError", "id {:?} should be rejected", id);
        }
    }

    #[test]
    fn test_builtin_registry_loads() {
        let registry = Registry::builtin().unwrap();
        let ids: Vec<_> = registry.list().iter().map(|m| m.id).collect();
        assert_eq!(
            ids,
            vec![
                "001-add-soft-delete-fields",
                "002-add-property-type-and-leave-management",
                "003-create-parking-spaces-table",
                "004-update-private-visits-rescheduling",
            ]
        );
    }
}
