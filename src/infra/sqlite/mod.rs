//! SQLite implementations for single-host deployments and tests
//!
//! Provides the same link store and event ledger as the Postgres backend,
//! suitable for local development where only one relay instance runs.

mod event_dedup;
mod link_store;

pub use event_dedup::*;
pub use link_store::*;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

/// Open a private in-memory database.
///
/// Pinned to a single connection that is never recycled: every SQLite
/// in-memory connection is its own database.
pub async fn memory_pool() -> crate::infra::Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .min_connections(1)
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;
    Ok(pool)
}
