//! Handler flows on top of the stores
//!
//! [`TicketRelay`] is what an inbound-event handler calls. It owns the
//! claim -> create -> commit sequence that keeps ticket creation to one per
//! thread across every relay instance, and the dedup -> lookup -> post ->
//! mark sequence for mirroring ticket updates back into the thread.
//!
//! The ticketing system and the chat platform are reached through the
//! [`TicketingClient`] and [`ThreadPoster`] traits.

use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::domain::{LinkState, ThreadLocation, TicketRef};
use crate::infra::{EventDedupStore, LinkStore, Retry, RetryConfig, StoreError, StoreHandle};
use crate::metrics::{metric_names, timed, MetricsRegistry};

/// Errors surfaced by the relay flows
#[derive(Error, Debug)]
pub enum RelayError {
    /// The store failed, after retries if the failure was transient
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The ticketing API rejected or failed the request
    #[error("ticketing error: {0}")]
    Ticketing(String),

    /// Posting into the thread failed
    #[error("post error: {0}")]
    Post(String),
}

impl RelayError {
    /// Whether the caller should retry the whole event later
    pub fn is_transient(&self) -> bool {
        match self {
            RelayError::Store(e) => e.is_transient(),
            RelayError::Ticketing(_) | RelayError::Post(_) => true,
        }
    }
}

/// Input for creating a ticket from a thread
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketRequest {
    pub thread_key: String,
    pub channel_ref: String,
    pub subject: String,
    pub description: String,
    /// Display name or id of whoever raised the request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requester: Option<String>,
}

/// A ticket the ticketing system created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedTicket {
    pub ticket_ref: TicketRef,
    /// Link to the ticket, when the ticketing system provides one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Downstream ticketing API
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TicketingClient: Send + Sync {
    async fn create_ticket(&self, request: &TicketRequest) -> Result<CreatedTicket, RelayError>;
}

/// Chat platform side: post a message into a thread
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ThreadPoster: Send + Sync {
    async fn post_reply(&self, location: &ThreadLocation, text: &str) -> Result<(), RelayError>;
}

/// Result of [`TicketRelay::open_ticket`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TicketOutcome {
    /// This call created the ticket and linked it to the thread
    Created(CreatedTicket),
    /// The thread already has a ticket
    AlreadyLinked(TicketRef),
    /// Another caller holds the claim and has not committed yet.
    ///
    /// The caller must not create a ticket; report "in progress" instead.
    InProgress,
    /// The ticket was created but could not be linked to the thread.
    ///
    /// Happens when this caller's claim was reclaimed as stale before it
    /// committed. The ticket needs to be linked by hand or discarded.
    Orphaned(CreatedTicket),
}

/// Result of [`TicketRelay::mirror_update`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MirrorOutcome {
    /// Posted into the thread and recorded as processed
    Posted(ThreadLocation),
    /// Event was already processed; nothing posted
    Duplicate,
    /// No thread is linked to the ticket yet; not recorded, so a redelivery
    /// after the link commits is still mirrored
    UnknownTicket,
}

/// Ticket creation and update mirroring over the shared stores
pub struct TicketRelay {
    links: Arc<dyn LinkStore>,
    events: Arc<dyn EventDedupStore>,
    ticketing: Arc<dyn TicketingClient>,
    poster: Arc<dyn ThreadPoster>,
    retry: Retry,
    metrics: Arc<MetricsRegistry>,
}

impl TicketRelay {
    pub fn new(
        links: Arc<dyn LinkStore>,
        events: Arc<dyn EventDedupStore>,
        ticketing: Arc<dyn TicketingClient>,
        poster: Arc<dyn ThreadPoster>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            links,
            events,
            ticketing,
            poster,
            retry: Retry::new(RetryConfig::database()),
            metrics,
        }
    }

    /// Build over the stores of an existing handle
    pub fn from_handle(
        store: &StoreHandle,
        ticketing: Arc<dyn TicketingClient>,
        poster: Arc<dyn ThreadPoster>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self::new(store.links(), store.events(), ticketing, poster, metrics)
    }

    /// Override the retry policy for store calls
    pub fn with_retry(mut self, config: RetryConfig) -> Self {
        self.retry = Retry::new(config);
        self
    }

    /// Create the ticket for a thread, at most once across all instances.
    ///
    /// The ticketing API is called between `claim` and `commit`, never while
    /// a transaction is open. If ticket creation fails the claim is left
    /// pending; it is reclaimed once it goes stale.
    #[instrument(skip(self, request), fields(thread_key = %request.thread_key))]
    pub async fn open_ticket(&self, request: &TicketRequest) -> Result<TicketOutcome, RelayError> {
        let won = self
            .timed_store("claim", || {
                self.links.claim(&request.thread_key, &request.channel_ref)
            })
            .await?;

        if !won {
            self.metrics.inc_counter(metric_names::CLAIMS_LOST).await;
            let state = self
                .timed_store("get_ticket_id", || {
                    self.links.get_ticket_id(&request.thread_key)
                })
                .await?;

            return Ok(match state {
                Some(LinkState::Committed(ticket_ref)) => {
                    debug!(ticket_ref = %ticket_ref, "Thread already has a ticket");
                    TicketOutcome::AlreadyLinked(ticket_ref)
                }
                // Absent means the row was swept or reclaimed between the
                // two calls; either way someone else is acting on it.
                Some(LinkState::Pending) | None => {
                    info!("Ticket creation in progress elsewhere");
                    TicketOutcome::InProgress
                }
            });
        }

        self.metrics.inc_counter(metric_names::CLAIMS_WON).await;

        let ticket = match timed(
            &self.metrics,
            metric_names::TICKETING_LATENCY,
            self.ticketing.create_ticket(request),
        )
        .await
        {
            Ok(ticket) => ticket,
            Err(e) => {
                warn!(error = %e, "Ticket creation failed; claim left pending");
                self.metrics
                    .inc_counter(metric_names::TICKET_CREATE_FAILURES)
                    .await;
                return Err(e);
            }
        };
        self.metrics.inc_counter(metric_names::TICKETS_CREATED).await;

        let committed = self
            .timed_store("commit", || {
                self.links.commit(&request.thread_key, ticket.ticket_ref)
            })
            .await;

        match committed {
            Ok(true) => {
                self.metrics.inc_counter(metric_names::COMMITS).await;
            }
            Ok(false) => {
                self.metrics
                    .inc_counter(metric_names::COMMIT_MISMATCHES)
                    .await;
                warn!(ticket_ref = %ticket.ticket_ref, "Created ticket is orphaned");
                return Ok(TicketOutcome::Orphaned(ticket));
            }
            Err(e) => {
                error!(
                    ticket_ref = %ticket.ticket_ref,
                    error = %e,
                    "Commit failed after ticket creation; ticket is orphaned"
                );
                return Ok(TicketOutcome::Orphaned(ticket));
            }
        }

        info!(ticket_ref = %ticket.ticket_ref, "Ticket created and linked");

        let location = ThreadLocation {
            thread_key: request.thread_key.clone(),
            channel_ref: request.channel_ref.clone(),
        };
        if let Err(e) = self
            .poster
            .post_reply(&location, &ticket_created_message(&ticket))
            .await
        {
            warn!(error = %e, "Failed to announce ticket in thread");
            self.metrics.inc_counter(metric_names::POST_FAILURES).await;
        }

        Ok(TicketOutcome::Created(ticket))
    }

    /// Post a ticket update into its thread, once per `event_key`.
    ///
    /// A crash between posting and recording the event can repost the update
    /// on redelivery; that window is accepted.
    #[instrument(skip(self, ticket_ref, body), fields(ticket_ref = %ticket_ref))]
    pub async fn mirror_update(
        &self,
        event_key: &str,
        ticket_ref: TicketRef,
        body: &str,
    ) -> Result<MirrorOutcome, RelayError> {
        let processed = self
            .timed_store("is_processed", || self.events.is_processed(event_key))
            .await?;
        if processed {
            debug!(event_key = %event_key, "Skipping duplicate event");
            self.metrics
                .inc_counter(metric_names::UPDATES_DUPLICATE)
                .await;
            return Ok(MirrorOutcome::Duplicate);
        }

        let location = self
            .timed_store("reverse_lookup", || self.links.reverse_lookup(ticket_ref))
            .await?;

        let Some(location) = location else {
            info!(event_key = %event_key, "No thread linked to ticket");
            self.metrics
                .inc_counter(metric_names::UPDATES_UNKNOWN_TICKET)
                .await;
            return Ok(MirrorOutcome::UnknownTicket);
        };

        if let Err(e) = self.poster.post_reply(&location, body).await {
            warn!(event_key = %event_key, error = %e, "Failed to post update");
            self.metrics.inc_counter(metric_names::POST_FAILURES).await;
            return Err(e);
        }

        self.timed_store("mark_processed", || self.events.mark_processed(event_key))
            .await?;
        self.metrics.inc_counter(metric_names::UPDATES_POSTED).await;

        Ok(MirrorOutcome::Posted(location))
    }

    /// Run a store call with transient-error retry, recording latency and
    /// failures.
    async fn timed_store<F, Fut, T>(&self, context: &str, operation: F) -> Result<T, StoreError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, StoreError>>,
    {
        let result = timed(
            &self.metrics,
            metric_names::STORE_LATENCY,
            self.retry.store(context, operation),
        )
        .await;

        if let Err(e) = &result {
            self.metrics.inc_counter(metric_names::STORE_ERRORS).await;
            error!(operation = context, error = %e, transient = e.is_transient(), "Store call failed");
        }
        result
    }
}

fn ticket_created_message(ticket: &CreatedTicket) -> String {
    match &ticket.url {
        Some(url) => format!("Created ticket {}: {}", ticket.ticket_ref, url),
        None => format!("Created ticket {}", ticket.ticket_ref),
    }
}
