//! Ticket Relay Library
//!
//! Coordination state for a chat-to-ticketing relay: which inbound thread
//! owns which downstream ticket, and which upstream events were already
//! handled. Safe to run as many concurrent instances against one database.
//!
//! ## Modules
//!
//! - [`domain`] - Thread link types (`TicketRef`, `LinkState`, `ThreadLink`)
//! - [`infra`] - Store traits, Postgres/SQLite backends, pool, sweeper
//! - [`relay`] - Ticket creation and update mirroring flows
//! - [`metrics`] - Counters, gauges and histograms
//! - [`telemetry`] - Logging and OpenTelemetry setup
//! - [`server`] - Ops HTTP surface and process wiring

pub mod domain;
pub mod infra;
pub mod metrics;
pub mod migrations;
pub mod relay;
pub mod server;
pub mod telemetry;

// Re-export commonly used types
pub use domain::{LinkState, LinkStats, ThreadLink, ThreadLocation, TicketRef};

pub use infra::{EventDedupStore, LinkStore, Result, StoreError, StoreHandle};

pub use relay::{MirrorOutcome, RelayError, TicketOutcome, TicketRelay};
