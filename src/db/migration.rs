//! Startup schema migrations.
//!
//! Migrations run once, before the pool is handed to callers, over a
//! dedicated connection to the same target. The resulting [`MigrationState`]
//! must be released with [`close`] whatever the outcome of the run.

use crate::config::ConnectionConfig;
use crate::error::{DbError, DbResult};
use sqlx::migrate::{Migrate, MigrateError, Migrator};
use sqlx::{Connection, PgConnection};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info, warn};

/// Result of a migration run. Every variant is a success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationOutcome {
    /// This many pending migrations were applied, in ascending version order.
    Applied(usize),
    /// The database was already at the latest version.
    NoChange,
    /// The source holds no migrations, so no version is recorded.
    NoVersion,
}

/// Resources held by the migration engine during the startup pass.
pub struct MigrationState {
    source: Migrator,
    database: PgConnection,
    outcome: MigrationOutcome,
}

impl MigrationState {
    /// Outcome of the run that produced this state.
    pub fn outcome(&self) -> MigrationOutcome {
        self.outcome
    }
}

impl std::fmt::Debug for MigrationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationState")
            .field("migrations", &self.source.iter().count())
            .field("outcome", &self.outcome)
            .finish_non_exhaustive()
    }
}

/// Apply pending migrations found at `location`.
///
/// Returns `Ok(None)` without touching the database when migrations are
/// disabled or no location is given.
pub async fn run(
    config: &ConnectionConfig,
    location: Option<&Path>,
) -> DbResult<Option<MigrationState>> {
    if !config.run_migration {
        debug!("Migrations disabled by configuration");
        return Ok(None);
    }

    let Some(location) = location.filter(|path| !path.as_os_str().is_empty()) else {
        debug!("No migration location supplied");
        return Ok(None);
    };

    info!(location = %location.display(), "Running migrations");

    let source = Migrator::new(location.to_path_buf()).await.map_err(|e| {
        DbError::migration(format!("failed to create migration instance: {}", e))
    })?;

    let mut database = connect(config).await?;

    let outcome = match apply(&source, &mut database).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(error = %e, "Migration failed");
            if let Err(close_err) = database.close().await {
                warn!(error = %close_err, "Failed to close migration database");
            }
            return Err(DbError::migration(format!("failed to run migration: {}", e)));
        }
    };

    info!(outcome = ?outcome, "Migrations finished");

    Ok(Some(MigrationState {
        source,
        database,
        outcome,
    }))
}

/// Open the dedicated migration connection, bounded by the connect timeout.
async fn connect(config: &ConnectionConfig) -> DbResult<PgConnection> {
    let target = config.driver_target();
    let connecting = PgConnection::connect(&target);
    let connected = match config.connect_timeout() {
        Some(limit) => tokio::time::timeout(limit, connecting).await.map_err(|_| {
            DbError::migration(format!(
                "failed to connect for migration: timed out after {}s",
                limit.as_secs()
            ))
        })?,
        None => connecting.await,
    };

    connected.map_err(|e| DbError::migration(format!("failed to connect for migration: {}", e)))
}

async fn apply(
    source: &Migrator,
    database: &mut PgConnection,
) -> Result<MigrationOutcome, MigrateError> {
    let up_versions: Vec<i64> = source
        .iter()
        .filter(|m| !m.migration_type.is_down_migration())
        .map(|m| m.version)
        .collect();

    if up_versions.is_empty() {
        return Ok(MigrationOutcome::NoVersion);
    }

    database.ensure_migrations_table().await?;
    let applied: HashSet<i64> = database
        .list_applied_migrations()
        .await?
        .into_iter()
        .map(|m| m.version)
        .collect();

    let pending = up_versions
        .iter()
        .filter(|version| !applied.contains(version))
        .count();

    if pending == 0 {
        return Ok(MigrationOutcome::NoChange);
    }

    source.run(&mut *database).await?;
    Ok(MigrationOutcome::Applied(pending))
}

/// Release the migration engine's source and database resources.
///
/// A `None` state (migrations never ran) is a no-op.
pub async fn close(state: Option<MigrationState>) -> DbResult<()> {
    let Some(MigrationState {
        source, database, ..
    }) = state
    else {
        return Ok(());
    };

    // The source side is an in-memory migrator; only the database side can fail.
    drop(source);

    database.close().await.map_err(close_failed)?;

    debug!("Migration resources released");
    Ok(())
}

fn close_failed(err: sqlx::Error) -> DbError {
    warn!(error = %err, "Failed to close migration database");
    DbError::migration(format!("failed to close migration db: {}", err))
}
