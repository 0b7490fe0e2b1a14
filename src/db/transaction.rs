//! Transaction execution.
//!
//! [`TransactionExecutor`] begins a transaction, hands it to a
//! [`TransactionHandler`], and resolves it: commit when the handler succeeds,
//! rollback when it fails. Exactly one of commit or rollback is attempted per
//! invocation, unless begin itself failed.
//!
//! The executor is generic over [`TransactionSource`] and
//! [`TransactionControl`], implemented here for `PgPool` and
//! `sqlx::Transaction<'static, Postgres>`.

use crate::db::pool::DbClient;
use crate::error::{DbError, DbResult};
use futures_util::future::BoxFuture;
use sqlx::{PgPool, Postgres};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{Instrument, Span, debug, error, info_span, warn};

/// Transaction type handed to handlers when running against PostgreSQL.
pub type PgTransaction = sqlx::Transaction<'static, Postgres>;

/// Something transactions can be started from.
pub trait TransactionSource: Send + Sync {
    type Transaction: TransactionControl;

    /// Begin a transaction with default options.
    fn begin(&self) -> BoxFuture<'_, Result<Self::Transaction, sqlx::Error>>;

    /// How long `begin` waits for a free connection, when known.
    fn acquire_timeout(&self) -> Option<Duration> {
        None
    }
}

/// Terminal operations of an open transaction.
pub trait TransactionControl: Send + Sized {
    fn commit(self) -> BoxFuture<'static, Result<(), sqlx::Error>>;

    fn rollback(self) -> BoxFuture<'static, Result<(), sqlx::Error>>;
}

impl TransactionSource for PgPool {
    type Transaction = PgTransaction;

    fn begin(&self) -> BoxFuture<'_, Result<PgTransaction, sqlx::Error>> {
        Box::pin(sqlx::Pool::begin(self))
    }

    fn acquire_timeout(&self) -> Option<Duration> {
        Some(self.options().get_acquire_timeout())
    }
}

impl TransactionControl for PgTransaction {
    fn commit(self) -> BoxFuture<'static, Result<(), sqlx::Error>> {
        Box::pin(sqlx::Transaction::commit(self))
    }

    fn rollback(self) -> BoxFuture<'static, Result<(), sqlx::Error>> {
        Box::pin(sqlx::Transaction::rollback(self))
    }
}

/// Per-invocation context passed to handlers.
#[derive(Debug, Clone)]
pub struct TransactionContext {
    id: String,
    timeout: Option<Duration>,
    deadline: Option<Instant>,
}

impl TransactionContext {
    fn new(timeout: Option<Duration>) -> Self {
        Self {
            id: generate_transaction_id(),
            timeout,
            deadline: timeout.map(|t| Instant::now() + t),
        }
    }

    /// Unique identifier of this invocation, also recorded on the tracing span.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Instant after which the invocation is abandoned and rolled back.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline. `None` when there is no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Check whether the deadline has passed.
    pub fn is_expired(&self) -> bool {
        self.remaining().is_some_and(|r| r.is_zero())
    }

    fn timeout_secs(&self) -> u32 {
        self.timeout
            .map_or(0, |t| u32::try_from(t.as_secs()).unwrap_or(u32::MAX))
    }

    /// Await `fut`, giving up with `None` once the deadline passes.
    async fn bounded<F: Future>(&self, fut: F) -> Option<F::Output> {
        match self.deadline {
            Some(deadline) => {
                tokio::time::timeout_at(tokio::time::Instant::from_std(deadline), fut)
                    .await
                    .ok()
            }
            None => Some(fut.await),
        }
    }
}

/// Unit of work run inside a transaction.
pub trait TransactionHandler<Tx>: Send + Sync {
    type Output: Send;

    fn handle<'a>(
        &'a self,
        ctx: &'a TransactionContext,
        tx: &'a mut Tx,
    ) -> BoxFuture<'a, DbResult<Self::Output>>;
}

/// Adapter turning a closure into a [`TransactionHandler`]. See [`handler_fn`].
#[derive(Clone, Copy)]
pub struct HandlerFn<F>(F);

/// Wrap a closure as a transaction handler.
///
/// ```ignore
/// let id: i64 = executor
///     .execute(handler_fn(|_ctx, tx: &mut PgTransaction| {
///         Box::pin(async move {
///             let id = sqlx::query_scalar("INSERT INTO users (email) VALUES ($1) RETURNING id")
///                 .bind("a@example.com")
///                 .fetch_one(&mut **tx)
///                 .await?;
///             Ok(id)
///         })
///     }))
///     .await?;
/// ```
pub fn handler_fn<Tx, T, F>(f: F) -> HandlerFn<F>
where
    F: for<'a> Fn(&'a TransactionContext, &'a mut Tx) -> BoxFuture<'a, DbResult<T>>
        + Send
        + Sync,
{
    HandlerFn(f)
}

impl<Tx, T, F> TransactionHandler<Tx> for HandlerFn<F>
where
    F: for<'a> Fn(&'a TransactionContext, &'a mut Tx) -> BoxFuture<'a, DbResult<T>>
        + Send
        + Sync,
    T: Send,
{
    type Output = T;

    fn handle<'a>(
        &'a self,
        ctx: &'a TransactionContext,
        tx: &'a mut Tx,
    ) -> BoxFuture<'a, DbResult<T>> {
        (self.0)(ctx, tx)
    }
}

/// Runs handlers inside transactions.
///
/// Cheap to clone; holds no state shared between invocations besides the pool.
#[derive(Debug, Clone)]
pub struct TransactionExecutor<S = PgPool> {
    source: S,
    tracing_enabled: bool,
}

impl TransactionExecutor<PgPool> {
    /// Create an executor over the client's pool.
    pub fn new(client: &DbClient, tracing_enabled: bool) -> Self {
        Self::with_source(client.pool().clone(), tracing_enabled)
    }
}

impl<S: TransactionSource> TransactionExecutor<S> {
    /// Create an executor over any transaction source.
    pub fn with_source(source: S, tracing_enabled: bool) -> Self {
        Self {
            source,
            tracing_enabled,
        }
    }

    /// Run `handler` in a transaction and commit or roll back on its result.
    ///
    /// - handler error, rollback ok: the handler's error, unchanged
    /// - handler error, rollback error: [`DbError::RollbackFailed`]
    /// - handler ok, commit error: [`DbError::Commit`]
    ///
    /// Dropping the returned future abandons the transaction; sqlx rolls it
    /// back when the connection returns to the pool.
    pub async fn execute<H>(&self, handler: H) -> DbResult<H::Output>
    where
        H: TransactionHandler<S::Transaction>,
    {
        self.run(TransactionContext::new(None), &handler).await
    }

    /// Like [`execute`](Self::execute), with a deadline covering every step.
    ///
    /// If the deadline passes while the handler runs, the handler is dropped,
    /// the transaction is rolled back and [`DbError::Timeout`] is returned.
    /// A commit or rollback still pending at the deadline is abandoned; sqlx
    /// rolls the dropped transaction back when its connection returns to the pool.
    pub async fn execute_with_timeout<H>(
        &self,
        timeout: Duration,
        handler: H,
    ) -> DbResult<H::Output>
    where
        H: TransactionHandler<S::Transaction>,
    {
        self.run(TransactionContext::new(Some(timeout)), &handler).await
    }

    async fn run<H>(&self, ctx: TransactionContext, handler: &H) -> DbResult<H::Output>
    where
        H: TransactionHandler<S::Transaction>,
    {
        let span = if self.tracing_enabled {
            info_span!(
                "db.transaction",
                transaction_id = %ctx.id,
                outcome = tracing::field::Empty,
            )
        } else {
            Span::none()
        };
        self.resolve(&ctx, handler, &span)
            .instrument(span.clone())
            .await
    }

    async fn resolve<H>(
        &self,
        ctx: &TransactionContext,
        handler: &H,
        span: &Span,
    ) -> DbResult<H::Output>
    where
        H: TransactionHandler<S::Transaction>,
    {
        let mut tx = match ctx.bounded(self.source.begin()).await {
            Some(Ok(tx)) => tx,
            Some(Err(e)) => {
                warn!(transaction_id = %ctx.id, error = %e, "Failed to begin transaction");
                record_outcome(span, "begin_failed");
                return Err(DbError::from_pool(e, self.source.acquire_timeout()));
            }
            None => {
                warn!(transaction_id = %ctx.id, "Timed out beginning transaction");
                record_outcome(span, "begin_failed");
                return Err(DbError::timeout("transaction begin", ctx.timeout_secs()));
            }
        };

        debug!(transaction_id = %ctx.id, "Transaction started");

        let result = match ctx.bounded(handler.handle(ctx, &mut tx)).await {
            Some(result) => result,
            None => Err(DbError::timeout("transaction", ctx.timeout_secs())),
        };

        match result {
            Ok(value) => match ctx.bounded(tx.commit()).await {
                Some(Ok(())) => {
                    debug!(transaction_id = %ctx.id, "Transaction committed");
                    record_outcome(span, "committed");
                    Ok(value)
                }
                Some(Err(e)) => {
                    error!(transaction_id = %ctx.id, error = %e, "Failed to commit transaction");
                    record_outcome(span, "commit_failed");
                    Err(DbError::commit(e))
                }
                None => {
                    error!(transaction_id = %ctx.id, "Timed out committing transaction");
                    record_outcome(span, "commit_failed");
                    Err(DbError::timeout("transaction commit", ctx.timeout_secs()))
                }
            },
            Err(cause) => match ctx.bounded(tx.rollback()).await {
                Some(Ok(())) => {
                    debug!(
                        transaction_id = %ctx.id,
                        error = %cause,
                        "Transaction rolled back"
                    );
                    record_outcome(span, "rolled_back");
                    Err(cause)
                }
                Some(Err(e)) => {
                    error!(
                        transaction_id = %ctx.id,
                        error = %cause,
                        rollback_error = %e,
                        "Failed to roll back transaction"
                    );
                    record_outcome(span, "rollback_failed");
                    Err(DbError::rollback_failed(cause, DbError::from(e)))
                }
                None => {
                    error!(
                        transaction_id = %ctx.id,
                        error = %cause,
                        "Timed out rolling back transaction"
                    );
                    record_outcome(span, "rollback_failed");
                    Err(DbError::rollback_failed(
                        cause,
                        DbError::timeout("transaction rollback", ctx.timeout_secs()),
                    ))
                }
            },
        }
    }
}

/// Record the terminal state on the executor's span. No-op when tracing is off.
fn record_outcome(span: &Span, outcome: &'static str) {
    span.record("outcome", outcome);
}

/// Generate a unique transaction ID.
fn generate_transaction_id() -> String {
    format!("tx_{}", uuid::Uuid::new_v4().simple())
}
