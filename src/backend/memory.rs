//! In-process backend
//!
//! Models the schema as a catalog of tables, indexes and enum types and applies the same
//! referential checks PostgreSQL would for the operations migrations use. A transaction
//! works on a copy of the state which replaces the shared state on commit. Raw statements
//! are interpreted for the forms migrations issue (index and enum type DDL) and logged
//! otherwise.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;

use super::{Backend, MigrationTx};
use crate::error::MigrateError;
use crate::ledger::LedgerEntry;
use crate::schema::{
    enum_type_name, ColumnDef, ColumnType, ConstraintDef, ConstraintKind, IndexDef, References,
    SchemaAdapter, SchemaError, TableDef,
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableModel {
    pub columns: IndexMap<String, ColumnDef>,
    pub constraints: BTreeMap<String, ConstraintDef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexModel {
    pub table: String,
    pub def: IndexDef,
}

/// The modelled database schema
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    pub tables: BTreeMap<String, TableModel>,
    pub indexes: BTreeMap<String, IndexModel>,
    pub enum_types: BTreeMap<String, Vec<String>>,
}

fn unquote(ident: &str) -> &str {
    ident.trim().trim_matches('"')
}

impl Catalog {
    fn table(&self, operation: &str, table: &str) -> Result<&TableModel, SchemaError> {
        self.tables
            .get(table)
            .ok_or_else(|| SchemaError::new(operation, format!("relation \"{}\" does not exist", table)))
    }

    fn table_mut(&mut self, operation: &str, table: &str) -> Result<&mut TableModel, SchemaError> {
        self.tables
            .get_mut(table)
            .ok_or_else(|| SchemaError::new(operation, format!("relation \"{}\" does not exist", table)))
    }

    fn check_columns(&self, operation: &str, table: &str, columns: &[String]) -> Result<(), SchemaError> {
        let model = self.table(operation, table)?;
        for column in columns {
            if !model.columns.contains_key(column) {
                return Err(SchemaError::new(
                    operation,
                    format!("column \"{}\" of relation \"{}\" does not exist", column, table),
                ));
            }
        }
        Ok(())
    }

    fn check_references(&self, operation: &str, references: &References) -> Result<(), SchemaError> {
        self.check_columns(operation, &references.table, std::slice::from_ref(&references.column))
    }

    fn create_enum(&mut self, operation: &str, table: &str, column: &str, ty: &ColumnType) -> Result<(), SchemaError> {
        if let ColumnType::Enum(values) = ty {
            let name = enum_type_name(table, column);
            if self.enum_types.contains_key(&name) {
                return Err(SchemaError::new(operation, format!("type \"{}\" already exists", name)));
            }
            self.enum_types.insert(name, values.clone());
        }
        Ok(())
    }

    fn relation_name_taken(&self, name: &str) -> bool {
        self.tables.contains_key(name)
            || self.indexes.contains_key(name)
            || self
                .tables
                .values()
                .any(|t| t.constraints.contains_key(name))
    }

    pub fn add_column(&mut self, table: &str, column: &str, def: ColumnDef) -> Result<(), SchemaError> {
        const OP: &str = "add_column";

        if self.table(OP, table)?.columns.contains_key(column) {
            return Err(SchemaError::new(
                OP,
                format!("column \"{}\" of relation \"{}\" already exists", column, table),
            ));
        }

        if let Some(ref references) = def.references {
            self.check_references(OP, references)?;
        }

        self.create_enum(OP, table, column, &def.ty)?;
        self.table_mut(OP, table)?.columns.insert(column.to_string(), def);
        Ok(())
    }

    pub fn remove_column(&mut self, table: &str, column: &str) -> Result<(), SchemaError> {
        const OP: &str = "remove_column";

        let model = self.table_mut(OP, table)?;
        if model.columns.shift_remove(column).is_none() {
            return Err(SchemaError::new(
                OP,
                format!("column \"{}\" of relation \"{}\" does not exist", column, table),
            ));
        }

        // Dependent indexes and constraints go with the column
        model
            .constraints
            .retain(|_, c| !c.columns().iter().any(|col| col == column));
        self.indexes
            .retain(|_, idx| !(idx.table == table && idx.def.columns.iter().any(|col| col == column)));
        Ok(())
    }

    pub fn create_table(&mut self, table: &str, def: TableDef) -> Result<(), SchemaError> {
        const OP: &str = "create_table";

        if self.relation_name_taken(table) {
            return Err(SchemaError::new(OP, format!("relation \"{}\" already exists", table)));
        }

        for cdef in def.columns.values() {
            if let Some(ref references) = cdef.references {
                let self_reference = references.table == table && def.columns.contains_key(&references.column);
                if !self_reference {
                    self.check_references(OP, references)?;
                }
            }
        }

        for (column, cdef) in def.columns.iter() {
            self.create_enum(OP, table, column, &cdef.ty)?;
        }

        self.tables.insert(
            table.to_string(),
            TableModel {
                columns: def.columns,
                constraints: BTreeMap::new(),
            },
        );
        Ok(())
    }

    pub fn drop_table(&mut self, table: &str) -> Result<(), SchemaError> {
        const OP: &str = "drop_table";

        if !self.tables.contains_key(table) {
            return Ok(());
        }

        for (other, model) in self.tables.iter().filter(|(name, _)| name.as_str() != table) {
            let referenced_by_column = model
                .columns
                .values()
                .any(|c| c.references.as_ref().is_some_and(|r| r.table == table));
            let referenced_by_constraint = model.constraints.values().any(|c| {
                matches!(&c.kind, ConstraintKind::ForeignKey { references, .. } if references.table == table)
            });

            if referenced_by_column || referenced_by_constraint {
                return Err(SchemaError::new(
                    OP,
                    format!(
                        "cannot drop table {} because other objects depend on it (table {})",
                        table, other
                    ),
                ));
            }
        }

        self.tables.remove(table);
        self.indexes.retain(|_, idx| idx.table != table);
        Ok(())
    }

    pub fn add_index(&mut self, table: &str, index: IndexDef) -> Result<(), SchemaError> {
        const OP: &str = "add_index";

        if self.relation_name_taken(&index.name) {
            return Err(SchemaError::new(OP, format!("relation \"{}\" already exists", index.name)));
        }

        self.check_columns(OP, table, &index.columns)?;
        self.indexes.insert(
            index.name.clone(),
            IndexModel {
                table: table.to_string(),
                def: index,
            },
        );
        Ok(())
    }

    pub fn remove_index(&mut self, name: &str) -> Result<(), SchemaError> {
        self.indexes.remove(name);
        Ok(())
    }

    pub fn add_constraint(&mut self, table: &str, constraint: ConstraintDef) -> Result<(), SchemaError> {
        const OP: &str = "add_constraint";

        if self.relation_name_taken(&constraint.name) {
            return Err(SchemaError::new(
                OP,
                format!("relation \"{}\" already exists", constraint.name),
            ));
        }

        self.check_columns(OP, table, constraint.columns())?;
        if let ConstraintKind::ForeignKey { ref references, .. } = constraint.kind {
            self.check_references(OP, references)?;
        }

        self.table_mut(OP, table)?
            .constraints
            .insert(constraint.name.clone(), constraint);
        Ok(())
    }

    pub fn remove_constraint(&mut self, table: &str, name: &str) -> Result<(), SchemaError> {
        const OP: &str = "remove_constraint";

        if self.table_mut(OP, table)?.constraints.remove(name).is_none() {
            return Err(SchemaError::new(
                OP,
                format!("constraint \"{}\" of relation \"{}\" does not exist", name, table),
            ));
        }
        Ok(())
    }

    /// Applies a raw statement. Returns false if the statement is not one the model understands
    pub fn apply_raw(&mut self, stmt: &str) -> Result<bool, SchemaError> {
        const OP: &str = "execute_raw";

        let normalized = stmt.split_whitespace().collect::<Vec<_>>().join(" ");
        let upper = normalized.to_ascii_uppercase();

        if upper.starts_with("CREATE INDEX ") || upper.starts_with("CREATE UNIQUE INDEX ") {
            let unique = upper.starts_with("CREATE UNIQUE INDEX ");
            let Some(on) = upper.find(" ON ") else {
                return Ok(false);
            };
            let header_len = if unique { "CREATE UNIQUE INDEX ".len() } else { "CREATE INDEX ".len() };
            let name = unquote(&normalized[header_len..on]).to_string();
            let rest = &normalized[on + " ON ".len()..];

            let (target, where_clause) = match rest.to_ascii_uppercase().find(" WHERE ") {
                Some(pos) => (&rest[..pos], Some(rest[pos + " WHERE ".len()..].to_string())),
                None => (rest, None),
            };

            let (Some(open), Some(close)) = (target.find('('), target.rfind(')')) else {
                return Ok(false);
            };
            let table = unquote(&target[..open]).to_string();
            let columns = target[open + 1..close]
                .split(',')
                .map(|c| unquote(c).to_string())
                .collect();

            self.add_index(
                &table,
                IndexDef {
                    name,
                    columns,
                    unique,
                    where_clause,
                },
            )
            .map_err(|e| SchemaError::new(OP, e.message))?;
            return Ok(true);
        }

        if let Some(rest) = strip_keyword(&normalized, "DROP INDEX ") {
            let (if_exists, name) = match strip_keyword(rest, "IF EXISTS ") {
                Some(name) => (true, name),
                None => (false, rest),
            };
            let name = unquote(name);
            if self.indexes.remove(name).is_none() && !if_exists {
                return Err(SchemaError::new(OP, format!("index \"{}\" does not exist", name)));
            }
            return Ok(true);
        }

        if let Some(rest) = strip_keyword(&normalized, "DROP TYPE ") {
            let (if_exists, name) = match strip_keyword(rest, "IF EXISTS ") {
                Some(name) => (true, name),
                None => (false, rest),
            };
            let name = unquote(name);

            if !self.enum_types.contains_key(name) {
                if if_exists {
                    return Ok(true);
                }
                return Err(SchemaError::new(OP, format!("type \"{}\" does not exist", name)));
            }

            for (table, model) in self.tables.iter() {
                for (column, def) in model.columns.iter() {
                    if matches!(def.ty, ColumnType::Enum(_)) && enum_type_name(table, column) == name {
                        return Err(SchemaError::new(
                            OP,
                            format!(
                                "cannot drop type {} because column {}.{} depends on it",
                                name, table, column
                            ),
                        ));
                    }
                }
            }

            self.enum_types.remove(name);
            return Ok(true);
        }

        if let Some(rest) = strip_keyword(&normalized, "ALTER TYPE ") {
            let Some(pos) = rest.to_ascii_uppercase().find(" ADD VALUE ") else {
                return Ok(false);
            };
            let name = unquote(&rest[..pos]).to_string();
            let value_part = &rest[pos + " ADD VALUE ".len()..];
            let (if_not_exists, value) = match strip_keyword(value_part, "IF NOT EXISTS ") {
                Some(v) => (true, v),
                None => (false, value_part),
            };
            let value = value.trim().trim_matches('\'').to_string();

            let Some(values) = self.enum_types.get_mut(&name) else {
                return Err(SchemaError::new(OP, format!("type \"{}\" does not exist", name)));
            };

            if values.contains(&value) {
                if if_not_exists {
                    return Ok(true);
                }
                return Err(SchemaError::new(
                    OP,
                    format!("enum label \"{}\" already exists", value),
                ));
            }

            values.push(value);
            return Ok(true);
        }

        Ok(false)
    }
}

/// Case-insensitively strips a leading keyword sequence
fn strip_keyword<'a>(s: &'a str, keyword: &str) -> Option<&'a str> {
    if s.len() >= keyword.len() && s.is_char_boundary(keyword.len()) && s[..keyword.len()].eq_ignore_ascii_case(keyword) {
        Some(&s[keyword.len()..])
    } else {
        None
    }
}

#[derive(Debug, Clone, Default)]
struct State {
    catalog: Catalog,
    /// `None` until the ledger table is first written
    ledger: Option<BTreeMap<String, DateTime<Utc>>>,
    raw_log: Vec<String>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    run_lock: Arc<tokio::sync::Mutex<()>>,
    raw_failures: Mutex<Vec<(String, String)>>,
    unreachable_attempts: AtomicUsize,
    latency: Mutex<Option<Duration>>,
    commit_failure: Mutex<Option<String>>,
    commits: AtomicUsize,
}

fn guard<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A shared in-memory database. Clones refer to the same database
#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Inner>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a pre-existing table
    pub fn with_table(self, name: &str, def: TableDef) -> Self {
        guard(&self.inner.state).catalog.tables.insert(
            name.to_string(),
            TableModel {
                columns: def.columns,
                constraints: BTreeMap::new(),
            },
        );
        self
    }

    /// Seeds a pre-existing enum type
    pub fn with_enum_type(self, name: &str, values: &[&str]) -> Self {
        guard(&self.inner.state)
            .catalog
            .enum_types
            .insert(name.to_string(), values.iter().map(|v| v.to_string()).collect());
        self
    }

    /// Sleeps this long before every schema operation
    pub fn with_latency(self, latency: Duration) -> Self {
        *guard(&self.inner.latency) = Some(latency);
        self
    }

    /// Makes raw statements containing `pattern` fail with `message`
    pub fn fail_raw_containing(&self, pattern: &str, message: &str) {
        guard(&self.inner.raw_failures).push((pattern.to_string(), message.to_string()));
    }

    /// Makes the next commit fail as rejected by the server
    pub fn fail_next_commit(&self, message: &str) {
        *guard(&self.inner.commit_failure) = Some(message.to_string());
    }

    /// Makes the next `attempts` lock/ledger/transaction requests fail as unreachable
    pub fn fail_connections(&self, attempts: usize) {
        self.inner.unreachable_attempts.store(attempts, Ordering::SeqCst);
    }

    /// Writes a ledger entry directly, bypassing any migration
    pub fn insert_ledger_entry(&self, id: &str, applied_at: DateTime<Utc>) {
        guard(&self.inner.state)
            .ledger
            .get_or_insert_with(BTreeMap::new)
            .insert(id.to_string(), applied_at);
    }

    pub fn catalog(&self) -> Catalog {
        guard(&self.inner.state).catalog.clone()
    }

    pub fn ledger_exists(&self) -> bool {
        guard(&self.inner.state).ledger.is_some()
    }

    pub fn ledger_entries(&self) -> Vec<LedgerEntry> {
        entries_of(&guard(&self.inner.state))
    }

    /// Raw statements committed so far, in order
    pub fn raw_log(&self) -> Vec<String> {
        guard(&self.inner.state).raw_log.clone()
    }

    /// Number of committed transactions
    pub fn commit_count(&self) -> usize {
        self.inner.commits.load(Ordering::SeqCst)
    }

    fn check_reachable(&self) -> Result<(), MigrateError> {
        let consumed = self
            .inner
            .unreachable_attempts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));

        match consumed {
            Ok(_) => Err(MigrateError::Connection("database is unreachable".to_string())),
            Err(_) => Ok(()),
        }
    }
}

fn entries_of(state: &State) -> Vec<LedgerEntry> {
    state
        .ledger
        .iter()
        .flatten()
        .map(|(id, at)| LedgerEntry {
            migration_id: id.clone(),
            applied_at: *at,
        })
        .collect()
}

#[async_trait::async_trait]
impl Backend for MemoryBackend {
    type Lock = tokio::sync::OwnedMutexGuard<()>;
    type Tx = MemoryTx;

    async fn lock(&self, timeout: Duration) -> Result<Self::Lock, MigrateError> {
        self.check_reachable()?;

        tokio::time::timeout(timeout, self.inner.run_lock.clone().lock_owned())
            .await
            .map_err(|_| {
                MigrateError::LockContention(format!(
                    "another run holds the migration lock (waited {:?})",
                    timeout
                ))
            })
    }

    async fn unlock(&self, lock: Self::Lock) -> Result<(), MigrateError> {
        drop(lock);
        Ok(())
    }

    async fn applied(&self) -> Result<Vec<LedgerEntry>, MigrateError> {
        self.check_reachable()?;
        Ok(self.ledger_entries())
    }

    async fn begin(&self) -> Result<MemoryTx, MigrateError> {
        self.check_reachable()?;

        let state = guard(&self.inner.state).clone();
        Ok(MemoryTx {
            backend: self.clone(),
            state,
        })
    }
}

/// A transaction over a private copy of the database state
pub struct MemoryTx {
    backend: MemoryBackend,
    state: State,
}

impl MemoryTx {
    async fn delay(&self) {
        let latency = *guard(&self.backend.inner.latency);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait::async_trait]
impl SchemaAdapter for MemoryTx {
    async fn add_column(&mut self, table: &str, column: &str, def: ColumnDef) -> Result<(), SchemaError> {
        self.delay().await;
        self.state.catalog.add_column(table, column, def)
    }

    async fn remove_column(&mut self, table: &str, column: &str) -> Result<(), SchemaError> {
        self.delay().await;
        self.state.catalog.remove_column(table, column)
    }

    async fn create_table(&mut self, table: &str, def: TableDef) -> Result<(), SchemaError> {
        self.delay().await;
        self.state.catalog.create_table(table, def)
    }

    async fn drop_table(&mut self, table: &str) -> Result<(), SchemaError> {
        self.delay().await;
        self.state.catalog.drop_table(table)
    }

    async fn add_index(&mut self, table: &str, index: IndexDef) -> Result<(), SchemaError> {
        self.delay().await;
        self.state.catalog.add_index(table, index)
    }

    async fn remove_index(&mut self, _table: &str, name: &str) -> Result<(), SchemaError> {
        self.delay().await;
        self.state.catalog.remove_index(name)
    }

    async fn add_constraint(&mut self, table: &str, constraint: ConstraintDef) -> Result<(), SchemaError> {
        self.delay().await;
        self.state.catalog.add_constraint(table, constraint)
    }

    async fn remove_constraint(&mut self, table: &str, name: &str) -> Result<(), SchemaError> {
        self.delay().await;
        self.state.catalog.remove_constraint(table, name)
    }

    async fn execute_raw(&mut self, sql: &str) -> Result<(), SchemaError> {
        self.delay().await;

        let failure = guard(&self.backend.inner.raw_failures)
            .iter()
            .find(|(pattern, _)| sql.contains(pattern.as_str()))
            .map(|(_, message)| message.clone());
        if let Some(message) = failure {
            return Err(SchemaError::new("execute_raw", message));
        }

        for stmt in sql.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            if !self.state.catalog.apply_raw(stmt)? {
                log::debug!("execute_raw: statement not modelled: {}", stmt);
            }
            self.state.raw_log.push(stmt.to_string());
        }

        Ok(())
    }
}

#[async_trait::async_trait]
impl MigrationTx for MemoryTx {
    async fn record_applied(&mut self, id: &str) -> Result<(), MigrateError> {
        let ledger = self.state.ledger.get_or_insert_with(BTreeMap::new);
        if ledger.contains_key(id) {
            return Err(MigrateError::DuplicateEntry(id.to_string()));
        }

        ledger.insert(id.to_string(), Utc::now());
        Ok(())
    }

    async fn record_reverted(&mut self, id: &str) -> Result<(), MigrateError> {
        let removed = self.state.ledger.as_mut().and_then(|l| l.remove(id));
        if removed.is_none() {
            return Err(MigrateError::NotFound(id.to_string()));
        }

        Ok(())
    }

    async fn commit(self) -> Result<(), MigrateError> {
        self.backend.check_reachable()?;

        if let Some(message) = guard(&self.backend.inner.commit_failure).take() {
            return Err(MigrateError::Database(message));
        }

        *guard(&self.backend.inner.state) = self.state;
        self.backend.inner.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self) -> Result<(), MigrateError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DefaultValue, ReferentialAction};

    fn users() -> TableDef {
        TableDef::new().column("id", ColumnDef::new(ColumnType::Uuid).primary_key())
    }

    #[test]
    fn test_catalog_column_rules() {
        let mut catalog = Catalog::default();
        catalog.create_table("users", users()).unwrap();

        let deleted_by = ColumnDef::new(ColumnType::Uuid).references(
            References::new("users", "id").on_delete(ReferentialAction::SetNull),
        );
        catalog.add_column("users", "deleted_by", deleted_by.clone()).unwrap();

        let err = catalog.add_column("users", "deleted_by", deleted_by).unwrap_err();
        assert!(err.message.contains("already exists"));

        let err = catalog
            .add_column("missing", "x", ColumnDef::new(ColumnType::Text))
            .unwrap_err();
        assert_eq!(err.message, "relation \"missing\" does not exist");

        let err = catalog.remove_column("users", "nope").unwrap_err();
        assert_eq!(err.operation, "remove_column");
    }

    #[test]
    fn test_enum_columns_create_named_types() {
        let mut catalog = Catalog::default();
        catalog.create_table("buildings", users()).unwrap();
        catalog
            .add_column(
                "buildings",
                "property_type",
                ColumnDef::new(ColumnType::enumeration(&["COMMERCIAL", "RESIDENTIAL"]))
                    .not_null()
                    .default(DefaultValue::Value("COMMERCIAL".into())),
            )
            .unwrap();
        assert!(catalog.enum_types.contains_key("enum_buildings_property_type"));

        // Still in use
        let err = catalog
            .apply_raw("DROP TYPE IF EXISTS \"enum_buildings_property_type\"")
            .unwrap_err();
        assert!(err.message.contains("depends on it"));

        catalog.remove_column("buildings", "property_type").unwrap();
        assert!(catalog.enum_types.contains_key("enum_buildings_property_type"));
        assert!(catalog
            .apply_raw("DROP TYPE IF EXISTS \"enum_buildings_property_type\"")
            .unwrap());
        assert!(catalog.enum_types.is_empty());
    }

    #[test]
    fn test_raw_index_statements() {
        let mut catalog = Catalog::default();
        catalog
            .create_table(
                "users",
                users().column("deleted_at", ColumnDef::new(ColumnType::Timestamp)),
            )
            .unwrap();

        assert!(catalog
            .apply_raw(
                "
                CREATE INDEX idx_users_deleted_at
                ON users(deleted_at)
                WHERE deleted_at IS NULL"
            )
            .unwrap());

        let idx = &catalog.indexes["idx_users_deleted_at"];
        assert_eq!(idx.table, "users");
        assert_eq!(idx.def.columns, vec!["deleted_at".to_string()]);
        assert_eq!(idx.def.where_clause.as_deref(), Some("deleted_at IS NULL"));

        assert!(catalog.apply_raw("DROP INDEX IF EXISTS idx_users_deleted_at").unwrap());
        assert!(catalog.indexes.is_empty());
        assert!(catalog.apply_raw("DROP INDEX IF EXISTS idx_users_deleted_at").unwrap());
        assert!(catalog.apply_raw("DROP INDEX idx_users_deleted_at").is_err());

        assert!(!catalog.apply_raw("UPDATE users SET deleted_at = NULL").unwrap());
    }

    #[test]
    fn test_alter_type_add_value() {
        let mut catalog = Catalog::default();
        catalog
            .enum_types
            .insert("enum_visits_status".into(), vec!["PENDING".into()]);

        let stmt = "ALTER TYPE \"enum_visits_status\" ADD VALUE IF NOT EXISTS 'RESCHEDULED'";
        assert!(catalog.apply_raw(stmt).unwrap());
        assert!(catalog.apply_raw(stmt).unwrap());
        assert_eq!(
            catalog.enum_types["enum_visits_status"],
            vec!["PENDING".to_string(), "RESCHEDULED".to_string()]
        );

        assert!(catalog
            .apply_raw("ALTER TYPE \"enum_visits_status\" ADD VALUE 'RESCHEDULED'")
            .is_err());
        assert!(catalog
            .apply_raw("ALTER TYPE \"enum_missing\" ADD VALUE 'X'")
            .is_err());
    }

    #[test]
    fn test_drop_table_blocked_by_references() {
        let mut catalog = Catalog::default();
        catalog.create_table("users", users()).unwrap();
        catalog
            .create_table(
                "posts",
                TableDef::new()
                    .column("id", ColumnDef::new(ColumnType::Uuid).primary_key())
                    .column(
                        "author",
                        ColumnDef::new(ColumnType::Uuid).references(References::new("users", "id")),
                    ),
            )
            .unwrap();

        assert!(catalog.drop_table("users").is_err());
        catalog.drop_table("posts").unwrap();
        catalog.drop_table("users").unwrap();
        catalog.drop_table("users").unwrap();
        assert!(catalog.tables.is_empty());
    }

    #[tokio::test]
    async fn test_transaction_isolation() {
        let backend = MemoryBackend::new().with_table("users", users());

        let mut tx = backend.begin().await.unwrap();
        tx.add_column("users", "nickname", ColumnDef::new(ColumnType::Text))
            .await
            .unwrap();
        tx.record_applied("001-a").await.unwrap();
        tx.rollback().await.unwrap();

        assert!(!backend.catalog().tables["users"].columns.contains_key("nickname"));
        assert!(!backend.ledger_exists());

        let mut tx = backend.begin().await.unwrap();
        tx.add_column("users", "nickname", ColumnDef::new(ColumnType::Text))
            .await
            .unwrap();
        tx.record_applied("001-a").await.unwrap();
        tx.commit().await.unwrap();

        assert!(backend.catalog().tables["users"].columns.contains_key("nickname"));
        assert_eq!(backend.ledger_entries().len(), 1);
        assert_eq!(backend.commit_count(), 1);
    }

    #[tokio::test]
    async fn test_ledger_consistency_errors() {
        let backend = MemoryBackend::new();

        let mut tx = backend.begin().await.unwrap();
        let err = tx.record_reverted("001-a").await.unwrap_err();
        assert!(matches!(err, MigrateError::NotFound(ref id) if id == "001-a"));

        tx.record_applied("001-a").await.unwrap();
        let err = tx.record_applied("001-a").await.unwrap_err();
        assert!(matches!(err, MigrateError::DuplicateEntry(ref id) if id == "001-a"));
    }
}
