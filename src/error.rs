use thiserror::Error;

use crate::schema::SchemaError;

/// Which procedure of a migration was running when it failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Up => write!(f, "up"),
            Direction::Down => write!(f, "down"),
        }
    }
}

#[derive(Error, Debug)]
pub enum MigrateError {
    #[error("registry error: {0}")]
    Registry(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("migration {id} ({direction}) failed: {source}")]
    SchemaOperation {
        id: String,
        direction: Direction,
        #[source]
        source: SchemaError,
    },

    #[error("could not acquire the migration lock: {0}")]
    LockContention(String),

    #[error("cannot revert {requested} migration(s), only {applied} applied")]
    InsufficientHistory { requested: usize, applied: usize },

    #[error("ledger already contains migration {0}")]
    DuplicateEntry(String),

    #[error("ledger has no entry for migration {0}")]
    NotFound(String),

    /// Reported by the server, e.g. a rejected commit or a malformed ledger table
    #[error("database error: {0}")]
    Database(String),

    /// Raised while opening, recording or committing a migration's transaction
    #[error("migration {id} ({direction}) failed: {source}")]
    Transaction {
        id: String,
        direction: Direction,
        #[source]
        source: Box<MigrateError>,
    },
}

impl MigrateError {
    /// Error category name as printed by the command line
    pub fn category(&self) -> &'static str {
        match self {
            MigrateError::Registry(_) => "RegistryError",
            MigrateError::Connection(_) => "ConnectionError",
            MigrateError::SchemaOperation { .. } => "SchemaOperationError",
            MigrateError::LockContention(_) => "LockContentionError",
            MigrateError::InsufficientHistory { .. } => "InsufficientHistoryError",
            MigrateError::DuplicateEntry(_) => "DuplicateEntryError",
            MigrateError::NotFound(_) => "NotFoundError",
            MigrateError::Database(_) => "DatabaseError",
            MigrateError::Transaction { source, .. } => source.category(),
        }
    }

    /// Process exit code for this error category
    pub fn exit_code(&self) -> i32 {
        match self {
            MigrateError::Registry(_) => 2,
            MigrateError::Connection(_) => 3,
            MigrateError::SchemaOperation { .. } => 4,
            MigrateError::LockContention(_) => 5,
            MigrateError::InsufficientHistory { .. } => 6,
            MigrateError::DuplicateEntry(_) => 7,
            MigrateError::NotFound(_) => 8,
            MigrateError::Database(_) => 9,
            MigrateError::Transaction { source, .. } => source.exit_code(),
        }
    }

    /// The migration id this error is attached to, if any
    pub fn migration_id(&self) -> Option<&str> {
        match self {
            MigrateError::SchemaOperation { id, .. } | MigrateError::Transaction { id, .. } => Some(id),
            MigrateError::DuplicateEntry(id) | MigrateError::NotFound(id) => Some(id),
            _ => None,
        }
    }

    pub(crate) fn is_transient(&self) -> bool {
        matches!(self, MigrateError::Connection(_))
    }

    /// Attaches the migration being run, unless the error already names one
    pub(crate) fn in_migration(self, id: &str, direction: Direction) -> Self {
        if self.migration_id().is_some() {
            return self;
        }

        MigrateError::Transaction {
            id: id.to_string(),
            direction,
            source: Box::new(self),
        }
    }
}

/// Maps a sqlx error raised outside of a migration procedure
///
/// Transport and pool failures are connectivity problems, everything else was reported by
/// (or decoded from) the database
impl From<sqlx::Error> for MigrateError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => MigrateError::Connection(e.to_string()),
            _ => MigrateError::Database(e.to_string()),
        }
    }
}
