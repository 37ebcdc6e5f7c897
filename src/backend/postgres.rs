use std::time::Duration;

use sqlx::pool::PoolConnection;
use sqlx::Postgres;
use tokio::time::Instant;

use super::{Backend, MigrationTx};
use crate::error::MigrateError;
use crate::ledger::{LedgerEntry, PgLedger};
use crate::schema::{ddl, ColumnDef, ConstraintDef, IndexDef, SchemaAdapter, SchemaError, TableDef};

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Runs migrations against a PostgreSQL database
#[derive(Debug, Clone)]
pub struct PgBackend {
    pool: sqlx::PgPool,
    ledger: PgLedger,
}

impl PgBackend {
    pub fn new(pool: sqlx::PgPool, ledger_table: &str) -> Result<Self, MigrateError> {
        Ok(Self {
            pool,
            ledger: PgLedger::new(ledger_table)?,
        })
    }

    /// Returns the underlying SQLx Postgres pool
    pub fn get_pool(&self) -> &sqlx::PgPool {
        &self.pool
    }
}

/// A session-level advisory lock, held on a dedicated connection
pub struct PgLock {
    conn: PoolConnection<Postgres>,
}

#[async_trait::async_trait]
impl Backend for PgBackend {
    type Lock = PgLock;
    type Tx = PgMigrationTx;

    async fn lock(&self, timeout: Duration) -> Result<PgLock, MigrateError> {
        let mut conn = self.pool.acquire().await?;

        // Never hand a connection that may still hold the lock back to the pool
        conn.close_on_drop();

        let deadline = Instant::now() + timeout;
        loop {
            let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock(hashtext($1))")
                .bind(self.ledger.table())
                .fetch_one(&mut *conn)
                .await?;

            if acquired {
                log::debug!("Acquired advisory lock for {}", self.ledger.table());
                return Ok(PgLock { conn });
            }

            if Instant::now() >= deadline {
                return Err(MigrateError::LockContention(format!(
                    "another run holds the lock on {} (waited {:?})",
                    self.ledger.table(),
                    timeout
                )));
            }

            tokio::time::sleep(LOCK_POLL_INTERVAL).await;
        }
    }

    async fn unlock(&self, mut lock: PgLock) -> Result<(), MigrateError> {
        sqlx::query("SELECT pg_advisory_unlock(hashtext($1))")
            .bind(self.ledger.table())
            .execute(&mut *lock.conn)
            .await?;

        log::debug!("Released advisory lock for {}", self.ledger.table());
        Ok(())
    }

    async fn applied(&self) -> Result<Vec<LedgerEntry>, MigrateError> {
        let mut conn = self.pool.acquire().await?;
        Ok(self.ledger.entries(&mut conn).await?)
    }

    async fn begin(&self) -> Result<PgMigrationTx, MigrateError> {
        Ok(PgMigrationTx {
            tx: self.pool.begin().await?,
            ledger: self.ledger.clone(),
        })
    }
}

pub struct PgMigrationTx {
    tx: sqlx::Transaction<'static, Postgres>,
    ledger: PgLedger,
}

impl PgMigrationTx {
    async fn run(&mut self, operation: &str, stmts: &[String]) -> Result<(), SchemaError> {
        for stmt in stmts {
            log::debug!("{}: {}", operation, stmt);
            sqlx::query(stmt)
                .execute(&mut *self.tx)
                .await
                .map_err(|e| schema_error(operation, e))?;
        }

        Ok(())
    }
}

fn schema_error(operation: &str, e: sqlx::Error) -> SchemaError {
    match e.as_database_error() {
        Some(db) => match db.code() {
            Some(code) => SchemaError::new(operation, format!("{} (SQLSTATE {})", db.message(), code)),
            None => SchemaError::new(operation, db.message()),
        },
        None => SchemaError::new(operation, e.to_string()),
    }
}

#[async_trait::async_trait]
impl SchemaAdapter for PgMigrationTx {
    async fn add_column(&mut self, table: &str, column: &str, def: ColumnDef) -> Result<(), SchemaError> {
        self.run("add_column", &ddl::add_column(table, column, &def)).await
    }

    async fn remove_column(&mut self, table: &str, column: &str) -> Result<(), SchemaError> {
        self.run("remove_column", &[ddl::remove_column(table, column)]).await
    }

    async fn create_table(&mut self, table: &str, def: TableDef) -> Result<(), SchemaError> {
        self.run("create_table", &ddl::create_table(table, &def)).await
    }

    async fn drop_table(&mut self, table: &str) -> Result<(), SchemaError> {
        self.run("drop_table", &[ddl::drop_table(table)]).await
    }

    async fn add_index(&mut self, table: &str, index: IndexDef) -> Result<(), SchemaError> {
        self.run("add_index", &[ddl::add_index(table, &index)]).await
    }

    async fn remove_index(&mut self, _table: &str, name: &str) -> Result<(), SchemaError> {
        self.run("remove_index", &[ddl::remove_index(name)]).await
    }

    async fn add_constraint(&mut self, table: &str, constraint: ConstraintDef) -> Result<(), SchemaError> {
        self.run("add_constraint", &[ddl::add_constraint(table, &constraint)]).await
    }

    async fn remove_constraint(&mut self, table: &str, name: &str) -> Result<(), SchemaError> {
        self.run("remove_constraint", &[ddl::remove_constraint(table, name)]).await
    }

    async fn execute_raw(&mut self, sql: &str) -> Result<(), SchemaError> {
        log::debug!("execute_raw: {}", sql.trim());

        // raw_sql allows multiple statements in one call
        let conn: &mut sqlx::PgConnection = &mut self.tx;
        sqlx::Executor::execute(conn, sqlx::raw_sql(sql))
            .await
            .map_err(|e| schema_error("execute_raw", e))?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl MigrationTx for PgMigrationTx {
    async fn record_applied(&mut self, id: &str) -> Result<(), MigrateError> {
        if !self.ledger.insert(&mut self.tx, id).await? {
            return Err(MigrateError::DuplicateEntry(id.to_string()));
        }

        Ok(())
    }

    async fn record_reverted(&mut self, id: &str) -> Result<(), MigrateError> {
        if !self.ledger.delete(&mut self.tx, id).await? {
            return Err(MigrateError::NotFound(id.to_string()));
        }

        Ok(())
    }

    async fn commit(self) -> Result<(), MigrateError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<(), MigrateError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::PgPoolOptions;

    fn assert_migration_tx<T: MigrationTx + Send + 'static>() {}

    #[test]
    fn test_transaction_is_a_send_adapter() {
        assert_migration_tx::<PgMigrationTx>();
    }

    #[test]
    fn test_schema_error_without_database_error() {
        let e = schema_error("execute_raw", sqlx::Error::RowNotFound);
        assert_eq!(e.operation, "execute_raw");
        assert!(e.message.contains("no rows"));
    }

    #[tokio::test]
    async fn test_backend_validates_ledger_table() {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/leasing")
            .unwrap();

        let backend = PgBackend::new(pool.clone(), "schema_migrations").unwrap();
        assert_eq!(backend.ledger.table(), "schema_migrations");
        assert!(PgBackend::new(pool, "schema_migrations; drop table users").is_err());
    }
}
