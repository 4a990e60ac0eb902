//! PostgreSQL thread link store
//!
//! # Claim protocol
//!
//! A claim is two statements in one short transaction:
//!
//! ```sql
//! DELETE FROM thread_links
//!     WHERE thread_key = $1 AND ticket_ref IS NULL
//!       AND created_at < now() - make_interval(secs => $staleness);
//! INSERT INTO thread_links (thread_key, channel_ref, created_at)
//!     VALUES ($1, $2, now())
//!     ON CONFLICT (thread_key) DO NOTHING;
//! ```
//!
//! Both timestamps come from the database clock, so instances with skewed
//! local clocks still agree on what is stale.
//!
//! The primary key on `thread_key` makes the insert the arbiter: exactly one
//! concurrent caller sees `rows_affected() == 1`, whichever instance it runs
//! on. A concurrent reclaimer blocks on the row lock taken by the first
//! `DELETE` and then finds nothing stale to remove.
//!
//! # Commit
//!
//! ```sql
//! UPDATE thread_links SET ticket_ref = $2
//!     WHERE thread_key = $1 AND ticket_ref IS NULL;
//! ```
//!
//! A straggler whose pending row was reclaimed and re-won by someone else
//! matches nothing, so a committed row is never overwritten.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPool, FromRow};
use tracing::{debug, info, instrument, warn};

use crate::domain::{LinkState, LinkStats, ThreadLink, ThreadLocation, TicketRef};
use super::clamp_timestamp;
use crate::infra::{LinkStore, LinkStoreConfig, Result};

/// PostgreSQL-based thread link store
pub struct PgLinkStore {
    pool: PgPool,
    config: LinkStoreConfig,
}

impl PgLinkStore {
    /// Create a new link store over an existing pool
    pub fn new(pool: PgPool, config: LinkStoreConfig) -> Self {
        Self { pool, config }
    }

    /// Get the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Load the full row for a thread (admin / diagnostics)
    pub async fn get_link(&self, thread_key: &str) -> Result<Option<ThreadLink>> {
        let row = sqlx::query_as::<_, LinkRow>(
            r#"
            SELECT thread_key, ticket_ref, channel_ref, created_at
            FROM thread_links
            WHERE thread_key = $1
            "#,
        )
        .bind(thread_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ThreadLink::from))
    }
}

#[async_trait]
impl LinkStore for PgLinkStore {
    #[instrument(skip(self), fields(backend = "postgres"))]
    async fn claim(&self, thread_key: &str, channel_ref: &str) -> Result<bool> {
        let staleness_secs = self.config.staleness_threshold.as_secs_f64();

        let mut tx = self.pool.begin().await?;

        let reclaimed = sqlx::query(
            r#"
            DELETE FROM thread_links
            WHERE thread_key = $1
              AND ticket_ref IS NULL
              AND created_at < now() - make_interval(secs => $2)
            "#,
        )
        .bind(thread_key)
        .bind(staleness_secs)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let inserted = sqlx::query(
            r#"
            INSERT INTO thread_links (thread_key, channel_ref, created_at)
            VALUES ($1, $2, now())
            ON CONFLICT (thread_key) DO NOTHING
            "#,
        )
        .bind(thread_key)
        .bind(channel_ref)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;

        if reclaimed > 0 {
            info!(
                thread_key = %thread_key,
                staleness_secs = self.config.staleness_threshold.as_secs(),
                "Reclaimed stale pending claim"
            );
        }

        let won = inserted == 1;
        debug!(thread_key = %thread_key, won, "Claim attempted");
        Ok(won)
    }

    #[instrument(skip(self), fields(backend = "postgres"))]
    async fn commit(&self, thread_key: &str, ticket_ref: TicketRef) -> Result<bool> {
        let updated = sqlx::query(
            r#"
            UPDATE thread_links
            SET ticket_ref = $2
            WHERE thread_key = $1
              AND ticket_ref IS NULL
            "#,
        )
        .bind(thread_key)
        .bind(ticket_ref.get())
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
            sqlx::query_as("SELECT ticket_ref FROM thread_links WHERE thread_key = $1")
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
            WHERE ticket_ref = $1
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
        let result = sqlx::query("DELETE FROM thread_links WHERE created_at < $1")
            .bind(clamp_timestamp(cutoff))
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
    created_at: DateTime<Utc>,
}

impl From<LinkRow> for ThreadLink {
    fn from(row: LinkRow) -> Self {
        Self {
            thread_key: row.thread_key,
            state: LinkState::from_column(row.ticket_ref),
            channel_ref: row.channel_ref,
            created_at: row.created_at,
        }
    }
}
