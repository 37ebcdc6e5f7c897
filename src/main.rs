use clap::Parser;
use leasing_migrate::backend::postgres::PgBackend;
use leasing_migrate::config::{CmdArgs, Command, Config};
use leasing_migrate::{Error, MigrateError, Registry, Runner, Status};
use log::{error, info, warn};
use sqlx::postgres::PgPoolOptions;
use std::io::Write;
use std::time::Duration;

/// Exit code for a run interrupted with Ctrl-C
const INTERRUPTED: i32 = 130;

#[tokio::main]
async fn main() {
    let args = CmdArgs::parse();

    let mut env_builder = env_logger::builder();

    env_builder
        .format(move |buf, record| {
            writeln!(
                buf,
                "({}) {} - {}",
                record.target(),
                record.level(),
                record.args()
            )
        })
        .filter(None, log::LevelFilter::Info)
        .parse_default_env();

    env_builder.init();

    let config = match Config::from_args(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("Config error: {}", e);
            std::process::exit(1);
        }
    };

    let code = tokio::select! {
        code = run(&args, &config) => code,
        _ = tokio::signal::ctrl_c() => {
            // Dropping the run closes its connections, the server rolls back the open transaction
            warn!("Interrupted, the migration in progress was not committed");
            INTERRUPTED
        }
    };

    std::process::exit(code);
}

async fn run(args: &CmdArgs, config: &Config) -> i32 {
    match execute(args, config).await {
        Ok(()) => 0,
        Err(e) => match e.downcast_ref::<MigrateError>() {
            Some(e) => {
                error!("{}: {}", e.category(), e);
                e.exit_code()
            }
            None => {
                error!("Error: {}", e);
                1
            }
        },
    }
}

async fn execute(args: &CmdArgs, config: &Config) -> Result<(), Error> {
    info!("Connecting to database");

    // Connections are opened on first use so the runner's retries cover them
    let pg_pool = PgPoolOptions::new()
        .max_connections(config.migrator.max_db_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect_lazy(&config.meta.postgres_url)
        .map_err(MigrateError::from)?;

    let backend = PgBackend::new(pg_pool.clone(), &config.migrator.ledger_table)?;

    let dry_run = matches!(args.command, Command::Up { dry_run: true, .. });
    let runner = Runner::new(backend, Registry::builtin()?).with_options(config.runner_options(dry_run));

    let res = match args.command {
        Command::Up { ref to, dry_run } => runner.up(to.as_deref()).await.map(|applied| {
            let verb = if dry_run { "Would apply" } else { "Applied" };
            if applied.is_empty() {
                println!("Nothing to apply");
            }
            for id in applied {
                println!("{} {}", verb, id);
            }
        }),
        Command::Down { steps } => runner.down(steps).await.map(|reverted| {
            if reverted.is_empty() {
                println!("Nothing to revert");
            }
            for id in reverted {
                println!("Reverted {}", id);
            }
        }),
        Command::Status { json } => match runner.status().await {
            Ok(status) if json => {
                println!("{}", serde_json::to_string_pretty(&status)?);
                Ok(())
            }
            Ok(status) => {
                print_status(&status);
                Ok(())
            }
            Err(e) => Err(e),
        },
    };

    pg_pool.close().await;

    Ok(res?)
}

fn print_status(status: &Status) {
    println!("Applied ({}):", status.applied.len());
    for entry in status.applied.iter() {
        println!("  {}  {}", entry.migration_id, entry.applied_at.format("%Y-%m-%d %H:%M:%S UTC"));
    }

    println!("Pending ({}):", status.pending.len());
    for id in status.pending.iter() {
        println!("  {}", id);
    }

    if !status.orphaned.is_empty() {
        println!("Unknown to this build ({}):", status.orphaned.len());
        for id in status.orphaned.iter() {
            println!("  {}", id);
        }
    }
}
