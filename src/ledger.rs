//! The applied-migrations ledger
//!
//! One row per applied migration, stored in the same database the migrations act on
//! so that ledger writes commit or roll back together with the schema change.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgConnection, Row};

use crate::error::MigrateError;
use crate::registry::MigrationId;
use crate::schema::ddl::quote_ident;

pub const DEFAULT_LEDGER_TABLE: &str = "schema_migrations";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct LedgerEntry {
    pub migration_id: String,
    pub applied_at: DateTime<Utc>,
}

/// Returns the `count` most recently applied entries, most recent first
///
/// Ties on `applied_at` are broken by migration id, highest first.
pub fn most_recent(entries: &[LedgerEntry], count: usize) -> Vec<LedgerEntry> {
    let mut sorted = entries.to_vec();
    sorted.sort_by(|a, b| {
        b.applied_at.cmp(&a.applied_at).then_with(|| {
            match (
                a.migration_id.parse::<MigrationId>(),
                b.migration_id.parse::<MigrationId>(),
            ) {
                (Ok(a), Ok(b)) => b.cmp(&a),
                _ => b.migration_id.cmp(&a.migration_id),
            }
        })
    });
    sorted.truncate(count);
    sorted
}

/// Validates a ledger table name, which is interpolated into SQL
pub fn validate_table_name(name: &str) -> Result<(), MigrateError> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .map(|c| c.is_ascii_lowercase() || c == '_')
        .unwrap_or(false);

    if !valid_start
        || name.len() > 63
        || !name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        return Err(MigrateError::Registry(format!(
            "invalid ledger table name {:?}",
            name
        )));
    }

    Ok(())
}

/// SQL access to the ledger table in PostgreSQL
#[derive(Debug, Clone)]
pub struct PgLedger {
    table: String,
}

impl PgLedger {
    pub fn new(table: &str) -> Result<Self, MigrateError> {
        validate_table_name(table)?;
        Ok(Self {
            table: table.to_string(),
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub async fn exists(&self, conn: &mut PgConnection) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT to_regclass($1) IS NOT NULL AS present")
            .bind(&self.table)
            .fetch_one(conn)
            .await?;

        row.try_get("present")
    }

    /// All entries, or none if the table has not been created yet
    pub async fn entries(&self, conn: &mut PgConnection) -> Result<Vec<LedgerEntry>, sqlx::Error> {
        if !self.exists(&mut *conn).await? {
            return Ok(Vec::new());
        }

        sqlx::query_as(&format!(
            "SELECT migration_id, applied_at FROM {} ORDER BY migration_id",
            quote_ident(&self.table)
        ))
        .fetch_all(conn)
        .await
    }

    pub async fn ensure_table(&self, conn: &mut PgConnection) -> Result<(), sqlx::Error> {
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                migration_id TEXT PRIMARY KEY,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT clock_timestamp()
            )",
            quote_ident(&self.table)
        ))
        .execute(conn)
        .await?;

        Ok(())
    }

    /// `applied_at` is set by the server. `clock_timestamp()` advances within a transaction, `now()` does not
    fn insert_sql(&self) -> String {
        format!(
            "INSERT INTO {} (migration_id, applied_at) VALUES ($1, clock_timestamp()) ON CONFLICT (migration_id) DO NOTHING",
            quote_ident(&self.table)
        )
    }

    /// Inserts an entry, creating the table on first use. Returns false if the id was already present
    pub async fn insert(&self, conn: &mut PgConnection, id: &str) -> Result<bool, sqlx::Error> {
        self.ensure_table(&mut *conn).await?;

        let res = sqlx::query(&self.insert_sql())
            .bind(id)
            .execute(conn)
            .await?;

        Ok(res.rows_affected() == 1)
    }

    /// Deletes an entry. Returns false if there was nothing to delete
    pub async fn delete(&self, conn: &mut PgConnection, id: &str) -> Result<bool, sqlx::Error> {
        if !self.exists(&mut *conn).await? {
            return Ok(false);
        }

        let res = sqlx::query(&format!(
            "DELETE FROM {} WHERE migration_id = $1",
            quote_ident(&self.table)
        ))
        .bind(id)
        .execute(conn)
        .await?;

        Ok(res.rows_affected() == 1)
    }
}
