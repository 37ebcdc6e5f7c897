use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ledger::DEFAULT_LEDGER_TABLE;
use crate::runner::RunnerOptions;
use crate::Error;

/// Command line arguments
#[derive(Parser, Debug, Clone)]
#[clap(name = "leasing-migrate", about = "Applies and reverts schema migrations")]
pub struct CmdArgs {
    /// Path to the config file
    #[clap(long, default_value = "config.yaml")]
    pub config: PathBuf,

    /// Database URL, overrides `meta.postgres_url` from the config file
    #[clap(long)]
    pub database_url: Option<String>,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Apply pending migrations
    Up {
        /// Stop after this migration (inclusive)
        #[clap(long)]
        to: Option<String>,

        /// Run the migrations and roll everything back afterwards
        #[clap(long)]
        dry_run: bool,
    },
    /// Revert the most recently applied migrations
    Down {
        /// Number of migrations to revert
        #[clap(long, default_value = "1")]
        steps: usize,
    },
    /// Show applied and pending migrations
    Status {
        /// Print as JSON
        #[clap(long)]
        json: bool,
    },
}

/// One connection holds the migration lock, the other runs the migrations
pub const MIN_DB_CONNECTIONS: u32 = 2;

#[derive(Serialize, Deserialize, Default, Debug, Clone, PartialEq, Eq)]
pub struct Meta {
    #[serde(default)]
    pub postgres_url: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct MigratorConfig {
    pub ledger_table: String,
    pub lock_timeout_secs: u64,
    pub connect_retries: u32,
    pub retry_backoff_ms: u64,
    /// Max connections that should be made to the database
    pub max_db_connections: u32,
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self {
            ledger_table: DEFAULT_LEDGER_TABLE.to_string(),
            lock_timeout_secs: 30,
            connect_retries: 3,
            retry_backoff_ms: 500,
            max_db_connections: 2,
        }
    }
}

#[derive(Serialize, Deserialize, Default, Debug, Clone, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub meta: Meta,
    #[serde(default)]
    pub migrator: MigratorConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, Error> {
        let file = File::open(path)
            .map_err(|e| format!("{} could not be loaded: {}", path.display(), e))?;

        let cfg: Config = serde_yaml::from_reader(file)?;
        Ok(cfg)
    }

    /// Loads the config for a command line invocation
    ///
    /// A missing config file is only accepted when the database URL is given on the command line
    pub fn from_args(args: &CmdArgs) -> Result<Self, Error> {
        let mut cfg = match (args.config.exists(), &args.database_url) {
            (false, Some(_)) => Config::default(),
            _ => Config::load(&args.config)?,
        };

        if let Some(ref url) = args.database_url {
            cfg.meta.postgres_url = url.clone();
        }

        if cfg.meta.postgres_url.is_empty() {
            return Err("no database url configured, set meta.postgres_url or pass --database-url".into());
        }

        // The migration lock pins one connection for the whole run
        if cfg.migrator.max_db_connections < MIN_DB_CONNECTIONS {
            return Err(format!(
                "migrator.max_db_connections must be at least {}, got {}",
                MIN_DB_CONNECTIONS, cfg.migrator.max_db_connections
            )
            .into());
        }

        Ok(cfg)
    }

    pub fn runner_options(&self, dry_run: bool) -> RunnerOptions {
        RunnerOptions {
            lock_timeout: Duration::from_secs(self.migrator.lock_timeout_secs),
            connect_retries: self.migrator.connect_retries,
            retry_backoff: Duration::from_millis(self.migrator.retry_backoff_ms),
            dry_run,
        }
    }
}
