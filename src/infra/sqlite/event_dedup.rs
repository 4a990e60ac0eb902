//! SQLite processed-event ledger

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;

use crate::infra::{EventDedupStore, Result};

/// SQLite-based idempotency ledger
pub struct SqliteEventDedupStore {
    pool: SqlitePool,
}

impl SqliteEventDedupStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventDedupStore for SqliteEventDedupStore {
    async fn is_processed(&self, event_key: &str) -> Result<bool> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM processed_events WHERE event_key = ?")
                .bind(event_key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.is_some())
    }

    async fn mark_processed(&self, event_key: &str) -> Result<bool> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO processed_events (event_key, processed_at)
            VALUES (?, ?)
            ON CONFLICT (event_key) DO NOTHING
            "#,
        )
        .bind(event_key)
        .bind(Utc::now().timestamp_micros())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if inserted == 0 {
            tracing::debug!(event_key = %event_key, "Event already marked processed");
        }
        Ok(true)
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM processed_events WHERE processed_at < ?")
            .bind(cutoff.timestamp_micros())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn count(&self) -> Result<u64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM processed_events")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0 as u64)
    }
}
