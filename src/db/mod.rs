//! Database access layer.
//!
//! This module provides:
//! - Connection pool management
//! - Startup schema migrations
//! - Transaction execution with commit/rollback resolution
//! - Constraint-violation classification

pub mod constraint;
pub mod migration;
pub mod pool;
pub mod transaction;

pub use constraint::constraint_identifier;
pub use migration::{MigrationOutcome, MigrationState};
pub use pool::{DbClient, Driver};
pub use transaction::{
    HandlerFn, PgTransaction, TransactionContext, TransactionControl, TransactionExecutor,
    TransactionHandler, TransactionSource, handler_fn,
};
