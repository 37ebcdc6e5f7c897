//! # Backends
//!
//! A backend is what the runner drives: it serializes runs with an exclusive lock,
//! reads the ledger, and opens one transaction per migration. The transaction is
//! also the `SchemaAdapter` handed to the migration, so schema changes and the
//! ledger update commit (or roll back) together.
//!
//! - `postgres`: sqlx/PostgreSQL, advisory lock + ledger table
//! - `memory`: an in-process catalog model with the same transactional behaviour

pub mod memory;
pub mod postgres;

use std::time::Duration;

use crate::error::MigrateError;
use crate::ledger::LedgerEntry;
use crate::schema::SchemaAdapter;

#[async_trait::async_trait]
pub trait Backend: Send + Sync {
    /// Held for the duration of a run
    type Lock: Send;

    /// Transaction scope for a single migration
    type Tx: MigrationTx;

    /// Acquires the exclusive migration lock, waiting at most `timeout`
    ///
    /// Fails with `MigrateError::LockContention` if another run still holds it
    async fn lock(&self, timeout: Duration) -> Result<Self::Lock, MigrateError>;

    async fn unlock(&self, lock: Self::Lock) -> Result<(), MigrateError>;

    /// Every ledger entry; an absent ledger table reads as empty
    async fn applied(&self) -> Result<Vec<LedgerEntry>, MigrateError>;

    /// Opens a fresh transaction
    async fn begin(&self) -> Result<Self::Tx, MigrateError>;
}

/// A transaction scope a single migration runs in
#[async_trait::async_trait]
pub trait MigrationTx: SchemaAdapter {
    /// Records a migration as applied, creating the ledger table if needed
    ///
    /// `applied_at` is taken from the database clock, not the caller's
    async fn record_applied(&mut self, id: &str) -> Result<(), MigrateError>;

    /// Removes a migration's ledger entry
    async fn record_reverted(&mut self, id: &str) -> Result<(), MigrateError>;

    async fn commit(self) -> Result<(), MigrateError>;

    async fn rollback(self) -> Result<(), MigrateError>;
}
