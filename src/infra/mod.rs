//! Infrastructure layer for the ticket relay
//!
//! Contains trait definitions and implementations for:
//! - Thread link store and processed-event ledger (PostgreSQL, SQLite)
//! - Connection pool wiring and the shared store handle
//! - Pool health monitoring
//! - Retention sweeper (background cleanup)
//! - Retry with backoff for transient store failures
//! - Graceful shutdown

mod config;
mod error;
mod graceful_shutdown;
mod pool;
mod pool_monitor;
pub mod postgres;
mod retry;
pub mod sqlite;
mod sweeper;
mod traits;

pub use config::{BackendKind, LinkStoreConfig, PoolConfig};
pub use error::*;
pub use graceful_shutdown::{
    shutdown_signal, spawn_until_shutdown, ShutdownCoordinator, ShutdownSignal,
};
pub use pool::{PoolState, StoreHandle};
pub use pool_monitor::{PoolHealthStatus, PoolMonitor, PoolMonitorConfig, PoolStats};
pub use postgres::{PgEventDedupStore, PgLinkStore};
pub use retry::{Retry, RetryConfig, RetryResult};
pub use sqlite::{SqliteEventDedupStore, SqliteLinkStore};
pub use sweeper::{
    spawn_sweeper, RetentionSweeper, RetentionSweeperConfig, SweepReport, SweeperMessage,
};
pub use traits::*;
