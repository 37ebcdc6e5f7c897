use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use serde::Serialize;

use crate::backend::{Backend, MigrationTx};
use crate::error::{Direction, MigrateError};
use crate::ledger::{most_recent, LedgerEntry};
use crate::registry::{Migration, Registry};

#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// How long to wait for another run to release the migration lock
    pub lock_timeout: Duration,
    /// Retries for connection errors raised before any migration starts
    pub connect_retries: u32,
    /// Delay before the first retry, doubled on every further attempt
    pub retry_backoff: Duration,
    /// Roll every migration back instead of committing it
    pub dry_run: bool,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(30),
            connect_retries: 3,
            retry_backoff: Duration::from_millis(500),
            dry_run: false,
        }
    }
}

/// Applied and pending migrations at a point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Status {
    /// Ledger entries, in registry order
    pub applied: Vec<LedgerEntry>,
    /// Registry ids without a ledger entry, in registry order
    pub pending: Vec<String>,
    /// Ledger ids no migration in the registry knows about
    pub orphaned: Vec<String>,
}

/// Applies and reverts the migrations of a registry against a backend
pub struct Runner<B: Backend> {
    backend: B,
    registry: Registry,
    options: RunnerOptions,
}

impl<B: Backend> Runner<B> {
    pub fn new(backend: B, registry: Registry) -> Self {
        Self {
            backend,
            registry,
            options: RunnerOptions::default(),
        }
    }

    pub fn with_options(mut self, options: RunnerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Applies every pending migration up to and including `target`, in order
    ///
    /// Returns the ids that were applied. Stops at the first failure; migrations applied
    /// before it stay committed.
    pub async fn up(&self, target: Option<&str>) -> Result<Vec<String>, MigrateError> {
        if let Some(target) = target {
            if !self.registry.contains(target) {
                return Err(MigrateError::Registry(format!(
                    "unknown target migration {}",
                    target
                )));
            }
        }

        let lock = self.acquire_lock().await?;
        let res = self.up_locked(target).await;
        self.release_lock(lock).await;
        res
    }

    /// Reverts the `steps` most recently applied migrations, most recent first
    pub async fn down(&self, steps: usize) -> Result<Vec<String>, MigrateError> {
        if steps == 0 {
            return Ok(Vec::new());
        }

        let lock = self.acquire_lock().await?;
        let res = self.down_locked(steps).await;
        self.release_lock(lock).await;
        res
    }

    /// Reports applied, pending and orphaned migrations. Takes no lock and writes nothing
    pub async fn status(&self) -> Result<Status, MigrateError> {
        let mut applied = self
            .retrying("read ledger", || self.backend.applied())
            .await?;

        let applied_ids: HashSet<&str> = applied.iter().map(|e| e.migration_id.as_str()).collect();

        let pending = self
            .registry
            .list()
            .iter()
            .filter(|m| !applied_ids.contains(m.id))
            .map(|m| m.id.to_string())
            .collect();

        let orphaned: Vec<String> = applied
            .iter()
            .filter(|e| !self.registry.contains(&e.migration_id))
            .map(|e| e.migration_id.clone())
            .collect();

        applied.retain(|e| self.registry.contains(&e.migration_id));
        applied.sort_by_key(|e| self.registry.position(&e.migration_id));

        Ok(Status {
            applied,
            pending,
            orphaned,
        })
    }

    async fn up_locked(&self, target: Option<&str>) -> Result<Vec<String>, MigrateError> {
        let applied = self
            .retrying("read ledger", || self.backend.applied())
            .await?;
        self.check_orphans(&applied)?;

        let applied_ids: HashSet<&str> = applied.iter().map(|e| e.migration_id.as_str()).collect();
        let limit = match target {
            Some(target) => self.registry.position(target),
            None => None,
        }
        .unwrap_or(usize::MAX);

        let last_applied = self
            .registry
            .list()
            .iter()
            .rposition(|m| applied_ids.contains(m.id));

        let mut pending = Vec::new();
        for (pos, migration) in self.registry.list().iter().enumerate() {
            if applied_ids.contains(migration.id) || pos > limit {
                continue;
            }

            if let Some(last) = last_applied {
                if pos < last {
                    return Err(MigrateError::Registry(format!(
                        "migration {} is pending but the later migration {} is already applied",
                        migration.id,
                        self.registry.list()[last].id
                    )));
                }
            }

            pending.push(migration);
        }

        if pending.is_empty() {
            log::info!("No pending migrations");
            return Ok(Vec::new());
        }

        log::info!("{} pending migration(s)", pending.len());
        self.run_plan(pending, Direction::Up).await
    }

    async fn down_locked(&self, steps: usize) -> Result<Vec<String>, MigrateError> {
        let applied = self
            .retrying("read ledger", || self.backend.applied())
            .await?;

        if applied.len() < steps {
            return Err(MigrateError::InsufficientHistory {
                requested: steps,
                applied: applied.len(),
            });
        }

        // Resolve everything up front so an unknown id reverts nothing
        let targets = most_recent(&applied, steps)
            .into_iter()
            .map(|entry| {
                self.registry.get(&entry.migration_id).ok_or_else(|| {
                    MigrateError::Registry(format!(
                        "cannot revert {}: no such migration in the registry",
                        entry.migration_id
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.run_plan(targets, Direction::Down).await
    }

    /// Runs a plan, one transaction per migration
    async fn run_plan(&self, plan: Vec<&Migration>, direction: Direction) -> Result<Vec<String>, MigrateError> {
        if self.options.dry_run {
            return self.rehearse(plan, direction).await;
        }

        let mut done = Vec::with_capacity(plan.len());
        for migration in plan {
            let mut tx = self
                .backend
                .begin()
                .await
                .map_err(|e| e.in_migration(migration.id, direction))?;

            if let Err(e) = self.execute(&mut tx, migration, direction).await {
                log::error!("{} ({}) failed, rolling back: {}", migration.id, direction, e);
                if let Err(rollback_err) = tx.rollback().await {
                    log::error!("Rollback of {} failed: {}", migration.id, rollback_err);
                }
                return Err(e);
            }

            if let Err(e) = tx.commit().await {
                log::error!("Commit of {} ({}) failed: {}", migration.id, direction, e);
                return Err(e.in_migration(migration.id, direction));
            }

            log::info!("{} ({}) done", migration.id, direction);
            done.push(migration.id.to_string());
        }

        Ok(done)
    }

    /// Runs a whole plan in one transaction that is always rolled back
    async fn rehearse(&self, plan: Vec<&Migration>, direction: Direction) -> Result<Vec<String>, MigrateError> {
        let mut tx = self.backend.begin().await?;

        let mut done = Vec::with_capacity(plan.len());
        for migration in plan {
            if let Err(e) = self.execute(&mut tx, migration, direction).await {
                log::error!("{} ({}) failed during dry run: {}", migration.id, direction, e);
                if let Err(rollback_err) = tx.rollback().await {
                    log::error!("Rollback of dry run failed: {}", rollback_err);
                }
                return Err(e);
            }
            done.push(migration.id.to_string());
        }

        tx.rollback().await?;
        log::info!("Dry run of {} migration(s) ok, rolled back", done.len());
        Ok(done)
    }

    /// Runs one migration procedure and its ledger update inside `tx`
    async fn execute(&self, tx: &mut B::Tx, migration: &Migration, direction: Direction) -> Result<(), MigrateError> {
        let procedure = match direction {
            Direction::Up => {
                log::info!("Applying {}: {}", migration.id, migration.description);
                migration.up
            }
            Direction::Down => {
                log::info!("Reverting {}", migration.id);
                if let Some(note) = migration.down_note {
                    log::warn!("{} is not fully reversible: {}", migration.id, note);
                }
                migration.down
            }
        };

        procedure(&mut *tx)
            .await
            .map_err(|source| MigrateError::SchemaOperation {
                id: migration.id.to_string(),
                direction,
                source,
            })?;

        let recorded = match direction {
            Direction::Up => tx.record_applied(migration.id).await,
            Direction::Down => tx.record_reverted(migration.id).await,
        };

        recorded.map_err(|e| e.in_migration(migration.id, direction))
    }

    fn check_orphans(&self, applied: &[LedgerEntry]) -> Result<(), MigrateError> {
        let orphaned: Vec<&str> = applied
            .iter()
            .map(|e| e.migration_id.as_str())
            .filter(|id| !self.registry.contains(id))
            .collect();

        if !orphaned.is_empty() {
            return Err(MigrateError::Registry(format!(
                "ledger contains migrations missing from the registry: {}",
                orphaned.join(", ")
            )));
        }

        Ok(())
    }

    async fn acquire_lock(&self) -> Result<B::Lock, MigrateError> {
        let lock = self
            .retrying("acquire migration lock", || {
                self.backend.lock(self.options.lock_timeout)
            })
            .await?;

        log::debug!("Migration lock acquired");
        Ok(lock)
    }

    async fn release_lock(&self, lock: B::Lock) {
        // A failed unlock still ends with the lock released once its session closes
        if let Err(e) = self.backend.unlock(lock).await {
            log::warn!("Failed to release migration lock: {}", e);
        }
    }

    /// Retries connection errors with exponential backoff
    async fn retrying<T, F, Fut>(&self, what: &str, mut f: F) -> Result<T, MigrateError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, MigrateError>>,
    {
        let mut attempt = 0;
        loop {
            match f().await {
                Err(e) if e.is_transient() && attempt < self.options.connect_retries => {
                    let delay = backoff_delay(self.options.retry_backoff, attempt);
                    attempt += 1;
                    log::warn!(
                        "{} failed: {}, retrying in {:?} ({}/{})",
                        what,
                        e,
                        delay,
                        attempt,
                        self.options.connect_retries
                    );
                    tokio::time::sleep(delay).await;
                }
                res => return res,
            }
        }
    }
}

/// Longest wait between two retries
const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// `base` doubled `attempt` times, capped at `MAX_RETRY_DELAY`
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.checked_mul(2u32.saturating_pow(attempt))
        .unwrap_or(MAX_RETRY_DELAY)
        .min(MAX_RETRY_DELAY)
}
