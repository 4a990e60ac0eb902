//! Trait definitions for the relay stores
//!
//! All mutual exclusion lives in the backing store: a conditional insert that
//! reports whether it created the row and a conditional update that reports
//! whether it matched. Implementations must not add in-process locking, which
//! would only hold for a single instance.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;

use crate::domain::{LinkStats, LinkState, ThreadLocation, TicketRef};

use super::Result;

/// Thread -> ticket link store.
///
/// Lifecycle per `thread_key`: `UNCLAIMED -> PENDING -> COMMITTED -> (deleted)`,
/// with a reclaim edge from a stale `PENDING` back to `UNCLAIMED`.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LinkStore: Send + Sync {
    /// Try to become the sole creator of the ticket for `thread_key`.
    ///
    /// - Deletes a `PENDING` row older than the staleness threshold
    /// - Inserts a fresh `PENDING` row if none exists
    ///
    /// Returns `true` only if this call inserted the row. `false` means a
    /// pending or committed row already exists.
    async fn claim(&self, thread_key: &str, channel_ref: &str) -> Result<bool>;

    /// Attach `ticket_ref` to a `PENDING` row.
    ///
    /// Returns `false` if the row is missing or already committed; the stored
    /// value is left unchanged in that case.
    async fn commit(&self, thread_key: &str, ticket_ref: TicketRef) -> Result<bool>;

    /// Current state of the link, if any.
    async fn get_ticket_id(&self, thread_key: &str) -> Result<Option<LinkState>>;

    /// Find the thread a committed ticket belongs to.
    async fn reverse_lookup(&self, ticket_ref: TicketRef) -> Result<Option<ThreadLocation>>;

    /// Delete rows created strictly before `cutoff`, returning the count.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    /// Row counts by state
    async fn stats(&self) -> Result<LinkStats>;
}

/// Idempotency ledger keyed by an opaque event identifier.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EventDedupStore: Send + Sync {
    /// Check whether the event was already handled
    async fn is_processed(&self, event_key: &str) -> Result<bool>;

    /// Record the event as handled.
    ///
    /// Inserting an existing key is a no-op and still returns `true`.
    async fn mark_processed(&self, event_key: &str) -> Result<bool>;

    /// Delete markers recorded strictly before `cutoff`, returning the count.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    /// Number of stored markers
    async fn count(&self) -> Result<u64>;
}

/// Health of a single component
#[derive(Debug, Clone)]
pub enum ComponentHealth {
    Healthy,
    Degraded { reason: String },
    Unhealthy { reason: String },
}

impl ComponentHealth {
    pub fn is_healthy(&self) -> bool {
        matches!(self, ComponentHealth::Healthy)
    }

    pub fn is_unhealthy(&self) -> bool {
        matches!(self, ComponentHealth::Unhealthy { .. })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentHealth::Healthy => "healthy",
            ComponentHealth::Degraded { .. } => "degraded",
            ComponentHealth::Unhealthy { .. } => "unhealthy",
        }
    }
}
