//! # Schema operations
//!
//! The capability set every migration procedure is written against. Migrations never
//! see a database driver, only a `&mut dyn SchemaAdapter` handed to them by the runner.
//! Every call made through the adapter participates in the transaction the runner opened
//! for that migration.
//!
//! - `SchemaAdapter`: the primitive DDL operations plus raw statement execution
//! - `ColumnDef`/`TableDef`/`IndexDef`/`ConstraintDef`: declarative descriptions of schema objects
//! - `ddl`: renders the above into PostgreSQL statements

pub mod ddl;

use indexmap::IndexMap;
use thiserror::Error;

/// A DDL operation rejected by the database (or by the schema model)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{operation}: {message}")]
pub struct SchemaError {
    pub operation: String,
    pub message: String,
}

impl SchemaError {
    pub fn new(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnType {
    Uuid,
    Text,
    Varchar(u32),
    Boolean,
    Integer,
    Decimal(u8, u8),
    /// Timestamp with time zone
    Timestamp,
    /// Date without a time component
    Date,
    /// Enumerated type, backed by a named type `enum_<table>_<column>`
    Enum(Vec<String>),
}

impl ColumnType {
    pub fn enumeration(values: &[&str]) -> Self {
        ColumnType::Enum(values.iter().map(|v| v.to_string()).collect())
    }
}

/// Column default value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefaultValue {
    /// A string literal, quoted on render
    Value(String),
    Bool(bool),
    /// Raw SQL expression such as `NOW()` or `gen_random_uuid()`
    Sql(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferentialAction {
    Cascade,
    SetNull,
    Restrict,
    NoAction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct References {
    pub table: String,
    pub column: String,
    pub on_update: Option<ReferentialAction>,
    pub on_delete: Option<ReferentialAction>,
}

impl References {
    pub fn new(table: &str, column: &str) -> Self {
        Self {
            table: table.to_string(),
            column: column.to_string(),
            on_update: None,
            on_delete: None,
        }
    }

    pub fn on_update(mut self, action: ReferentialAction) -> Self {
        self.on_update = Some(action);
        self
    }

    pub fn on_delete(mut self, action: ReferentialAction) -> Self {
        self.on_delete = Some(action);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub ty: ColumnType,
    pub nullable: bool,
    pub primary_key: bool,
    pub default: Option<DefaultValue>,
    pub references: Option<References>,
}

impl ColumnDef {
    /// A nullable column of the given type
    pub fn new(ty: ColumnType) -> Self {
        Self {
            ty,
            nullable: true,
            primary_key: false,
            default: None,
            references: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn default(mut self, default: DefaultValue) -> Self {
        self.default = Some(default);
        self
    }

    pub fn references(mut self, references: References) -> Self {
        self.references = Some(references);
        self
    }
}

/// A table definition, columns kept in declaration order
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TableDef {
    pub columns: IndexMap<String, ColumnDef>,
}

impl TableDef {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn column(mut self, name: &str, def: ColumnDef) -> Self {
        self.columns.insert(name.to_string(), def);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDef {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
    /// Raw SQL predicate for a partial index
    pub where_clause: Option<String>,
}

impl IndexDef {
    pub fn new(name: &str, columns: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            unique: false,
            where_clause: None,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn partial(mut self, predicate: &str) -> Self {
        self.where_clause = Some(predicate.to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstraintKind {
    Unique(Vec<String>),
    ForeignKey {
        columns: Vec<String>,
        references: References,
    },
    Check(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstraintDef {
    pub name: String,
    pub kind: ConstraintKind,
}

impl ConstraintDef {
    pub fn unique(name: &str, columns: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            kind: ConstraintKind::Unique(columns.iter().map(|c| c.to_string()).collect()),
        }
    }

    pub fn foreign_key(name: &str, columns: &[&str], references: References) -> Self {
        Self {
            name: name.to_string(),
            kind: ConstraintKind::ForeignKey {
                columns: columns.iter().map(|c| c.to_string()).collect(),
                references,
            },
        }
    }

    pub fn check(name: &str, expr: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: ConstraintKind::Check(expr.to_string()),
        }
    }

    /// Columns the constraint is declared over (empty for checks)
    pub fn columns(&self) -> &[String] {
        match &self.kind {
            ConstraintKind::Unique(cols) => cols,
            ConstraintKind::ForeignKey { columns, .. } => columns,
            ConstraintKind::Check(_) => &[],
        }
    }
}

/// The primitive schema operations available to a migration
///
/// Implementations execute each call inside the transaction the runner opened for the
/// current migration and report failures as `SchemaError`
#[async_trait::async_trait]
pub trait SchemaAdapter: Send {
    async fn add_column(&mut self, table: &str, column: &str, def: ColumnDef) -> Result<(), SchemaError>;

    async fn remove_column(&mut self, table: &str, column: &str) -> Result<(), SchemaError>;

    async fn create_table(&mut self, table: &str, def: TableDef) -> Result<(), SchemaError>;

    /// Drops the table if it exists
    async fn drop_table(&mut self, table: &str) -> Result<(), SchemaError>;

    async fn add_index(&mut self, table: &str, index: IndexDef) -> Result<(), SchemaError>;

    /// Drops the index if it exists
    async fn remove_index(&mut self, table: &str, name: &str) -> Result<(), SchemaError>;

    async fn add_constraint(&mut self, table: &str, constraint: ConstraintDef) -> Result<(), SchemaError>;

    async fn remove_constraint(&mut self, table: &str, name: &str) -> Result<(), SchemaError>;

    /// Executes a raw SQL statement
    async fn execute_raw(&mut self, sql: &str) -> Result<(), SchemaError>;
}

/// Name of the type backing an enum column
pub fn enum_type_name(table: &str, column: &str) -> String {
    format!("enum_{}_{}", table, column)
}
