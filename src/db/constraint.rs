//! Constraint-violation classification.
//!
//! Callers use [`constraint_identifier`] after a failed transaction to learn
//! which uniqueness, foreign-key or check rule was broken without parsing
//! error text.

use crate::error::DbError;
use sqlx::error::DatabaseError;
use std::error::Error as StdError;

/// Failure shapes that can carry a constraint name.
enum FailureShape<'a> {
    /// Raw driver error, as returned by sqlx before any conversion.
    Driver(&'a dyn DatabaseError),
    /// Driver error already converted into [`DbError::Database`].
    Converted(Option<&'a str>),
    /// Work failure whose rollback also failed; classified by the work failure.
    Compound(&'a DbError),
    Unrecognized,
}

fn classify<'a>(err: &'a (dyn StdError + 'static)) -> FailureShape<'a> {
    if let Some(err) = err.downcast_ref::<sqlx::Error>() {
        return match err {
            sqlx::Error::Database(db_err) => FailureShape::Driver(&**db_err),
            _ => FailureShape::Unrecognized,
        };
    }

    match err.downcast_ref::<DbError>() {
        Some(DbError::Database { constraint, .. }) => FailureShape::Converted(constraint.as_deref()),
        Some(DbError::RollbackFailed { cause, .. }) => FailureShape::Compound(&**cause),
        _ => FailureShape::Unrecognized,
    }
}

/// Extract the name of the violated constraint from a failure.
///
/// Returns an empty string when the failure is not a recognized
/// constraint-violation shape.
pub fn constraint_identifier(err: &(dyn StdError + 'static)) -> String {
    match classify(err) {
        FailureShape::Driver(db_err) => db_err.constraint().unwrap_or_default().to_string(),
        FailureShape::Converted(constraint) => constraint.unwrap_or_default().to_string(),
        FailureShape::Compound(cause) => constraint_identifier(cause),
        FailureShape::Unrecognized => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::error::ErrorKind;
    use std::borrow::Cow;

    /// Stand-in for a server error reported by the driver.
    #[derive(Debug)]
    struct ServerError {
        constraint: Option<&'static str>,
    }

    impl std::fmt::Display for ServerError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "duplicate key value violates unique constraint")
        }
    }

    impl StdError for ServerError {}

    impl DatabaseError for ServerError {
        fn message(&self) -> &str {
            "duplicate key value violates unique constraint"
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            Some(Cow::Borrowed("23505"))
        }

        fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
            self
        }

        fn constraint(&self) -> Option<&str> {
            self.constraint
        }

        fn kind(&self) -> ErrorKind {
            ErrorKind::UniqueViolation
        }
    }

    fn driver_error(constraint: Option<&'static str>) -> sqlx::Error {
        sqlx::Error::Database(Box::new(ServerError { constraint }))
    }

    #[test]
    fn test_driver_shape() {
        let err = driver_error(Some("users_email_key"));
        assert_eq!(constraint_identifier(&err), "users_email_key");
    }

    #[test]
    fn test_converted_shape() {
        let err: DbError = driver_error(Some("users_email_key")).into();
        assert!(err.is_unique_violation());
        assert_eq!(constraint_identifier(&err), "users_email_key");
        assert_eq!(err.constraint().as_deref(), Some("users_email_key"));
    }

    #[test]
    fn test_database_error_without_constraint() {
        assert_eq!(constraint_identifier(&driver_error(None)), "");
        let err = DbError::database("syntax error", Some("42601".into()), "check syntax");
        assert_eq!(constraint_identifier(&err), "");
        assert_eq!(err.constraint(), None);
    }

    #[test]
    fn test_compound_shape_uses_original_cause() {
        let err = DbError::rollback_failed(
            driver_error(Some("orders_user_id_fkey")).into(),
            DbError::connection("connection reset", "reconnect"),
        );
        assert_eq!(constraint_identifier(&err), "orders_user_id_fkey");
    }

    #[test]
    fn test_unrecognized_failures() {
        assert_eq!(constraint_identifier(&sqlx::Error::PoolTimedOut), "");
        assert_eq!(
            constraint_identifier(&DbError::timeout("transaction", 5)),
            ""
        );
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "network timeout");
        assert_eq!(constraint_identifier(&io), "");
    }
}
