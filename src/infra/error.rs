//! Error types for the relay store layer

use thiserror::Error;

/// Errors that can occur in the store layer.
///
/// A lost claim or a commit that matched no pending row is not an error;
/// those are reported as `Ok(false)` by the store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration error
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Missing or invalid backend configuration
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Caller supplied an argument the store cannot accept
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Whether the failure is worth retrying later.
    ///
    /// Covers pool exhaustion, lost connections, statement timeouts and lock
    /// contention. Never true for configuration or input errors.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Database(err) => is_transient_sqlx(err),
            _ => false,
        }
    }
}

fn is_transient_sqlx(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db) => {
            let Some(code) = db.code() else {
                return false;
            };
            if db.try_downcast_ref::<sqlx::sqlite::SqliteError>().is_some() {
                is_transient_sqlite_code(&code)
            } else {
                is_transient_sqlstate(&code)
            }
        }
        _ => false,
    }
}

/// SQLite (extended) result codes.
pub(crate) fn is_transient_sqlite_code(code: &str) -> bool {
    // SQLITE_BUSY / SQLITE_LOCKED, ignoring the extended bits
    code.parse::<i32>()
        .is_ok_and(|code| matches!(code & 0xff, 5 | 6))
}

/// Postgres SQLSTATE values. All-digit codes are SQLSTATEs here too.
pub(crate) fn is_transient_sqlstate(code: &str) -> bool {
    code == "57014"
        || code.starts_with("08")
        || code.starts_with("40")
        || code.starts_with("53")
        || code == "57P01"
        || code == "57P03"
}

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_errors_are_transient() {
        assert!(StoreError::Database(sqlx::Error::PoolTimedOut).is_transient());
        assert!(StoreError::Database(sqlx::Error::PoolClosed).is_transient());
    }

    #[test]
    fn test_row_not_found_is_not_transient() {
        assert!(!StoreError::Database(sqlx::Error::RowNotFound).is_transient());
    }

    #[test]
    fn test_configuration_is_not_transient() {
        assert!(!StoreError::Configuration("DATABASE_URL missing".into()).is_transient());
        assert!(!StoreError::InvalidInput("ticket_ref".into()).is_transient());
    }

    #[test]
    fn test_postgres_codes() {
        assert!(is_transient_sqlstate("57014")); // statement timeout
        assert!(is_transient_sqlstate("08006")); // connection failure
        assert!(is_transient_sqlstate("40001")); // serialization failure
        assert!(is_transient_sqlstate("40P01")); // deadlock
        assert!(is_transient_sqlstate("53300")); // too many connections
        assert!(is_transient_sqlstate("57P01")); // admin shutdown
        assert!(!is_transient_sqlstate("23505")); // unique violation
        assert!(!is_transient_sqlstate("42P01")); // undefined table
    }

    #[test]
    fn test_sqlite_codes() {
        assert!(is_transient_sqlite_code("5"));
        assert!(is_transient_sqlite_code("517")); // SQLITE_BUSY_SNAPSHOT
        assert!(is_transient_sqlite_code("6"));
        assert!(!is_transient_sqlite_code("19")); // SQLITE_CONSTRAINT
        assert!(!is_transient_sqlite_code("2067")); // SQLITE_CONSTRAINT_UNIQUE
        assert!(!is_transient_sqlite_code("40001"));
    }

    #[tokio::test]
    async fn test_sqlite_database_error_uses_sqlite_codes() {
        let pool = crate::infra::sqlite::memory_pool().await.unwrap();

        let err = sqlx::query("SELECT * FROM no_such_table")
            .execute(&pool)
            .await
            .map_err(StoreError::from)
            .unwrap_err();

        assert!(matches!(err, StoreError::Database(sqlx::Error::Database(_))));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_sqlite_busy_is_transient() {
        use sqlx::sqlite::SqliteConnectOptions;
        use sqlx::{ConnectOptions, Connection};

        let path = std::env::temp_dir().join(format!("relay-busy-{}.db", uuid::Uuid::new_v4()));
        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .busy_timeout(std::time::Duration::ZERO);

        let mut holder = options.connect().await.unwrap();
        let mut waiter = options.connect().await.unwrap();
        sqlx::query("BEGIN IMMEDIATE").execute(&mut holder).await.unwrap();

        let err = sqlx::query("BEGIN IMMEDIATE")
            .execute(&mut waiter)
            .await
            .map_err(StoreError::from)
            .unwrap_err();
        assert!(err.is_transient(), "expected SQLITE_BUSY to be transient: {err}");

        sqlx::query("ROLLBACK").execute(&mut holder).await.unwrap();
        holder.close().await.unwrap();
        waiter.close().await.unwrap();
        let _ = std::fs::remove_file(&path);
    }
}
