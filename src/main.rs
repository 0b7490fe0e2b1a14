//! pg-txn - Main entry point.
//!
//! Opens the configured PostgreSQL pool and runs one maintenance command:
//! `ping`, `migrate` or `config`.

use clap::Parser;
use pg_txn::config::{Command, Config};
use pg_txn::db::{DbClient, migration};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .init();
    }
}

async fn run(config: &Config) -> pg_txn::DbResult<()> {
    match config.command {
        Command::Config => {
            let json = serde_json::to_string_pretty(&config.database)
                .map_err(|e| pg_txn::DbError::internal(e.to_string()))?;
            println!("{}", json);
            Ok(())
        }
        Command::Ping => {
            let client = DbClient::open(&config.database, config.trace_sql).await?;
            client.ping().await?;
            info!(target_url = %config.database.masked_target(), "Database reachable");
            client.close().await
        }
        Command::Migrate => {
            let state = migration::run(&config.database, config.migrations.as_deref()).await?;
            match &state {
                Some(state) => info!(outcome = ?state.outcome(), "Migration complete"),
                None => info!("Migrations disabled or no migration location configured"),
            }
            migration::close(state).await
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse();

    init_tracing(&config);

    info!(
        command = ?config.command,
        "Starting pg-txn v{}",
        env!("CARGO_PKG_VERSION")
    );

    if let Err(e) = run(&config).await {
        error!(error = %e, suggestion = ?e.suggestion(), "Command failed");
        return Err(e.into());
    }

    Ok(())
}
