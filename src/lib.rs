//! pg-txn Library
//!
//! A managed PostgreSQL client: a pooled connection verified at startup,
//! optional schema migrations, and a transaction executor that always
//! resolves to commit or rollback.

pub mod config;
pub mod db;
pub mod error;

pub use config::ConnectionConfig;
pub use db::{DbClient, TransactionExecutor, constraint_identifier, handler_fn};
pub use error::{DbError, DbResult};
