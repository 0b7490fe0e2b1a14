//! Integration tests for startup migrations.
//!
//! Runs that never reach the database are always executed. Runs against a
//! live PostgreSQL need TEST_POSTGRES_HOST, as in transaction_test.rs.

use clap::Parser;
use pg_txn::ConnectionConfig;
use pg_txn::db::{DbClient, MigrationOutcome, migration};
use std::fs;
use tempfile::TempDir;

#[derive(Parser)]
struct TestArgs {
    #[command(flatten)]
    database: ConnectionConfig,
}

fn test_config() -> Option<ConnectionConfig> {
    let host = match std::env::var("TEST_POSTGRES_HOST") {
        Ok(host) => host,
        Err(_) => {
            eprintln!("Skipping test: TEST_POSTGRES_HOST not set");
            return None;
        }
    };

    let mut config = TestArgs::parse_from(["pg-txn-test"]).database;
    config.host = host;
    config.run_migration = true;
    Some(config)
}

fn migrations_dir() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("1_create_pg_txn_widgets.sql"),
        "CREATE TABLE IF NOT EXISTS pg_txn_widgets (
            id BIGSERIAL PRIMARY KEY,
            name TEXT NOT NULL CONSTRAINT pg_txn_widgets_name_key UNIQUE
        );",
    )
    .unwrap();
    dir
}

#[tokio::test]
async fn test_disabled_migrations_do_not_touch_database() {
    // Unreachable target: a connection attempt would fail the test.
    let config = ConnectionConfig {
        host: "127.0.0.1".to_string(),
        port: 1,
        run_migration: false,
        ..ConnectionConfig::default()
    };
    let dir = migrations_dir();

    let state = migration::run(&config, Some(dir.path())).await.unwrap();
    assert!(state.is_none());
    migration::close(state).await.unwrap();
}

#[tokio::test]
async fn test_unreachable_database_is_migration_error() {
    let config = ConnectionConfig {
        host: "127.0.0.1".to_string(),
        port: 1,
        timeout: 1,
        ..ConnectionConfig::default()
    };
    let dir = migrations_dir();

    let err = migration::run(&config, Some(dir.path())).await.unwrap_err();
    assert!(err.to_string().contains("Migration failed"));
}

#[tokio::test]
async fn test_second_run_reports_no_change() {
    let Some(config) = test_config() else { return };
    let dir = migrations_dir();

    let first = migration::run(&config, Some(dir.path()))
        .await
        .expect("first run failed")
        .expect("migrations enabled");
    assert!(matches!(
        first.outcome(),
        MigrationOutcome::Applied(1) | MigrationOutcome::NoChange
    ));
    migration::close(Some(first)).await.expect("close failed");

    let second = migration::run(&config, Some(dir.path()))
        .await
        .expect("second run failed")
        .expect("migrations enabled");
    assert_eq!(second.outcome(), MigrationOutcome::NoChange);
    migration::close(Some(second)).await.expect("close failed");
}

#[tokio::test]
async fn test_empty_source_reports_no_version() {
    let Some(config) = test_config() else { return };
    let dir = TempDir::new().unwrap();

    let state = migration::run(&config, Some(dir.path()))
        .await
        .expect("run failed")
        .expect("migrations enabled");
    assert_eq!(state.outcome(), MigrationOutcome::NoVersion);
    migration::close(Some(state)).await.expect("close failed");
}

#[tokio::test]
async fn test_connect_migrates_then_hands_out_pool() {
    let Some(config) = test_config() else { return };
    let dir = migrations_dir();

    let client = DbClient::connect(&config, false, Some(dir.path()))
        .await
        .expect("connect failed");

    let exists: bool = sqlx::query_scalar("SELECT to_regclass('pg_txn_widgets') IS NOT NULL")
        .fetch_one(client.pool())
        .await
        .expect("query failed");
    assert!(exists);

    client.close().await.expect("close failed");
}
