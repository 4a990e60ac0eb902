//! SQLite thread link store
//!
//! Same claim/commit protocol as the Postgres store, for a single host. The
//! reclaim `DELETE` and the conditional `INSERT` run as two autocommit
//! statements: SQLite serializes writers, and the primary key on
//! `thread_key` decides the winner exactly as it does on Postgres.
//! Timestamps are stored as integer microseconds since the Unix epoch.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqlitePool, FromRow};
use tracing::{debug, info, instrument, warn};

use crate::domain::{LinkState, LinkStats, ThreadLink, ThreadLocation, TicketRef};
use crate::infra::{LinkStore, LinkStoreConfig, Result, StoreError};

/// SQLite-based thread link store
pub struct SqliteLinkStore {
    pool: SqlitePool,
    config: LinkStoreConfig,
}

impl SqliteLinkStore {
    /// Create a new link store over an existing pool
    pub fn new(pool: SqlitePool, config: LinkStoreConfig) -> Self {
        Self { pool, config }
    }

    /// Get the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Load the full row for a thread (admin / diagnostics)
    pub async fn get_link(&self, thread_key: &str) -> Result<Option<ThreadLink>> {
        let row = sqlx::query_as::<_, LinkRow>(
            r#"
            SELECT thread_key, ticket_ref, channel_ref, created_at
            FROM thread_links
            WHERE thread_key = ?
            "#,
        )
        .bind(thread_key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ThreadLink::try_from).transpose()
    }
}

#[async_trait]
impl LinkStore for SqliteLinkStore {
    #[instrument(skip(self), fields(backend = "sqlite"))]
    async fn claim(&self, thread_key: &str, channel_ref: &str) -> Result<bool> {
        let now = Utc::now();
        let stale_before = self.config.stale_before(now);

        let reclaimed = sqlx::query(
            r#"
            DELETE FROM thread_links
            WHERE thread_key = ?
              AND ticket_ref IS NULL
              AND created_at < ?
            "#,
        )
        .bind(thread_key)
        .bind(stale_before.timestamp_micros())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if reclaimed > 0 {
            info!(
                thread_key = %thread_key,
                staleness_secs = self.config.staleness_threshold.as_secs(),
                "Reclaimed stale pending claim"
            );
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO thread_links (thread_key, channel_ref, created_at)
            VALUES (?, ?, ?)
            ON CONFLICT (thread_key) DO NOTHING
            "#,
        )
        .bind(thread_key)
        .bind(channel_ref)
        .bind(now.timestamp_micros())
        .execute(&self.pool)
        .await?
        .rows_affected();

        let won = inserted == 1;
        debug!(thread_key = %thread_key, won, "Claim attempted");
        Ok(won)
    }

    #[instrument(skip(self), fields(backend = "sqlite"))]
    async fn commit(&self, thread_key: &str, ticket_ref: TicketRef) -> Result<bool> {
        let updated = sqlx::query(
            r#"
            UPDATE thread_links
            SET ticket_ref = ?
            WHERE thread_key = ?
              AND ticket_ref IS NULL
            "#,
        )
        .bind(ticket_ref.get())
        .bind(thread_key)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            warn!(
                thread_key = %thread_key,
                ticket_ref = ticket_ref.get(),
                "Commit matched no pending claim; ticket is unlinked"
            );
            return Ok(false);
        }

        debug!(thread_key = %thread_key, ticket_ref = ticket_ref.get(), "Claim committed");
        Ok(true)
    }

    async fn get_ticket_id(&self, thread_key: &str) -> Result<Option<LinkState>> {
        let row: Option<(Option<i64>,)> =
            sqlx::query_as("SELECT ticket_ref FROM thread_links WHERE thread_key = ?")
                .bind(thread_key)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(ticket_ref,)| LinkState::from_column(ticket_ref)))
    }

    async fn reverse_lookup(&self, ticket_ref: TicketRef) -> Result<Option<ThreadLocation>> {
        let row: Option<(String, String)> = sqlx::query_as(
            r#"
            SELECT thread_key, channel_ref
            FROM thread_links
            WHERE ticket_ref = ?
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(ticket_ref.get())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(thread_key, channel_ref)| ThreadLocation {
            thread_key,
            channel_ref,
        }))
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM thread_links WHERE created_at < ?")
            .bind(cutoff.timestamp_micros())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn stats(&self) -> Result<LinkStats> {
        let (total, committed): (i64, i64) =
            sqlx::query_as("SELECT COUNT(*), COUNT(ticket_ref) FROM thread_links")
                .fetch_one(&self.pool)
                .await?;

        Ok(LinkStats {
            total: total as u64,
            pending: (total - committed) as u64,
            committed: committed as u64,
        })
    }
}

/// Raw row from thread_links table
#[derive(Debug, FromRow)]
struct LinkRow {
    thread_key: String,
    ticket_ref: Option<i64>,
    channel_ref: String,
    created_at: i64,
}

impl TryFrom<LinkRow> for ThreadLink {
    type Error = StoreError;

    fn try_from(row: LinkRow) -> Result<Self> {
        let created_at = DateTime::<Utc>::from_timestamp_micros(row.created_at).ok_or_else(|| {
            StoreError::Internal(format!("invalid created_at: {}", row.created_at))
        })?;

        Ok(Self {
            thread_key: row.thread_key,
            state: LinkState::from_column(row.ticket_ref),
            channel_ref: row.channel_ref,
            created_at,
        })
    }
}
