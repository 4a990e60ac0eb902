//! PostgreSQL processed-event ledger

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;

use super::clamp_timestamp;
use crate::infra::{EventDedupStore, Result};

/// PostgreSQL-based idempotency ledger
pub struct PgEventDedupStore {
    pool: PgPool,
}

impl PgEventDedupStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventDedupStore for PgEventDedupStore {
    async fn is_processed(&self, event_key: &str) -> Result<bool> {
        let row: (bool,) =
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM processed_events WHERE event_key = $1)")
                .bind(event_key)
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0)
    }

    async fn mark_processed(&self, event_key: &str) -> Result<bool> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO processed_events (event_key, processed_at)
            VALUES ($1, now())
            ON CONFLICT (event_key) DO NOTHING
            "#,
        )
        .bind(event_key)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if inserted == 0 {
            tracing::debug!(event_key = %event_key, "Event already marked processed");
        }
        Ok(true)
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM processed_events WHERE processed_at < $1")
            .bind(clamp_timestamp(cutoff))
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
