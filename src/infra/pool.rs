//! Connection pool wiring and the store handle
//!
//! [`StoreHandle`] is built once at startup and passed to every collaborator
//! that needs the link store or the event ledger. There is no global pool.

use std::str::FromStr;
use std::sync::Arc;

use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::{info, warn};

use super::postgres::{PgEventDedupStore, PgLinkStore};
use super::sqlite::{SqliteEventDedupStore, SqliteLinkStore};
use super::{
    BackendKind, EventDedupStore, LinkStore, LinkStoreConfig, PoolConfig, Result,
};

#[derive(Clone)]
enum Backend {
    Postgres(PgPool),
    Sqlite(SqlitePool),
}

/// Snapshot of pool occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolState {
    /// Open connections (in use + idle)
    pub size: u32,
    /// Idle connections
    pub idle: u32,
    /// Configured upper bound
    pub max: u32,
}

impl PoolState {
    pub fn active(&self) -> u32 {
        self.size.saturating_sub(self.idle)
    }
}

/// Handle to the link store and event ledger over one shared pool
#[derive(Clone)]
pub struct StoreHandle {
    backend: Backend,
    links: Arc<dyn LinkStore>,
    events: Arc<dyn EventDedupStore>,
    max_connections: u32,
}

impl StoreHandle {
    /// Build the pool described by `config` and the stores on top of it.
    ///
    /// Applies migrations when `config.migrate_on_startup` is set.
    pub async fn connect(config: &PoolConfig, link_config: LinkStoreConfig) -> Result<Self> {
        let backend = config.validate()?;
        info!(
            backend = %backend,
            min_connections = config.min_connections,
            max_connections = config.max_connections,
            statement_timeout_ms = config.statement_timeout.as_millis() as u64,
            staleness_secs = link_config.staleness_threshold.as_secs(),
            "Connecting store"
        );

        let handle = match backend {
            BackendKind::Postgres => {
                let pool = connect_postgres(config).await?;
                Self::from_postgres(pool, link_config, config.max_connections)
            }
            BackendKind::Sqlite => {
                let (pool, max_connections) = connect_sqlite(config).await?;
                Self::from_sqlite(pool, link_config, max_connections)
            }
        };

        if config.migrate_on_startup {
            handle.migrate().await?;
            info!("Database migrations applied");
        } else {
            info!("DB migrations skipped (DB_MIGRATE_ON_STARTUP=0)");
        }

        Ok(handle)
    }

    /// Wrap an existing Postgres pool
    pub fn from_postgres(pool: PgPool, link_config: LinkStoreConfig, max_connections: u32) -> Self {
        Self {
            links: Arc::new(PgLinkStore::new(pool.clone(), link_config)),
            events: Arc::new(PgEventDedupStore::new(pool.clone())),
            backend: Backend::Postgres(pool),
            max_connections,
        }
    }

    /// Wrap an existing SQLite pool
    pub fn from_sqlite(
        pool: SqlitePool,
        link_config: LinkStoreConfig,
        max_connections: u32,
    ) -> Self {
        Self {
            links: Arc::new(SqliteLinkStore::new(pool.clone(), link_config)),
            events: Arc::new(SqliteEventDedupStore::new(pool.clone())),
            backend: Backend::Sqlite(pool),
            max_connections,
        }
    }

    /// The thread link store
    pub fn links(&self) -> Arc<dyn LinkStore> {
        self.links.clone()
    }

    /// The processed-event ledger
    pub fn events(&self) -> Arc<dyn EventDedupStore> {
        self.events.clone()
    }

    pub fn backend(&self) -> BackendKind {
        match self.backend {
            Backend::Postgres(_) => BackendKind::Postgres,
            Backend::Sqlite(_) => BackendKind::Sqlite,
        }
    }

    /// Apply embedded migrations for the active backend
    pub async fn migrate(&self) -> Result<()> {
        match &self.backend {
            Backend::Postgres(pool) => crate::migrations::run_postgres(pool).await,
            Backend::Sqlite(pool) => crate::migrations::run_sqlite(pool).await,
        }
    }

    /// Round-trip a trivial statement to prove the backend is reachable
    pub async fn ping(&self) -> Result<()> {
        match &self.backend {
            Backend::Postgres(pool) => {
                sqlx::query("SELECT 1").execute(pool).await?;
            }
            Backend::Sqlite(pool) => {
                sqlx::query("SELECT 1").execute(pool).await?;
            }
        }
        Ok(())
    }

    /// Current pool occupancy
    pub fn pool_state(&self) -> PoolState {
        let (size, idle) = match &self.backend {
            Backend::Postgres(pool) => (pool.size(), pool.num_idle() as u32),
            Backend::Sqlite(pool) => (pool.size(), pool.num_idle() as u32),
        };
        PoolState {
            size,
            idle,
            max: self.max_connections,
        }
    }

    /// Close every pooled connection; in-flight operations finish first
    pub async fn close(&self) {
        match &self.backend {
            Backend::Postgres(pool) => pool.close().await,
            Backend::Sqlite(pool) => pool.close().await,
        }
        info!(backend = %self.backend(), "Connection pool closed");
    }
}

async fn connect_postgres(config: &PoolConfig) -> Result<PgPool> {
    let options = PgConnectOptions::from_str(&config.database_url)?.options([(
        "statement_timeout",
        config.statement_timeout.as_millis().to_string(),
    )]);

    let pool = PgPoolOptions::new()
        .min_connections(config.min_connections)
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .max_lifetime(config.max_lifetime)
        .test_before_acquire(true)
        .connect_with(options)
        .await?;

    info!("Connected to PostgreSQL");
    Ok(pool)
}

async fn connect_sqlite(config: &PoolConfig) -> Result<(SqlitePool, u32)> {
    let in_memory = config.database_url.contains(":memory:")
        || config.database_url.contains("mode=memory");

    let options = SqliteConnectOptions::from_str(&config.database_url)?
        .create_if_missing(true)
        .busy_timeout(config.statement_timeout);

    let pool = if in_memory {
        if config.max_connections > 1 {
            warn!("In-memory SQLite is limited to a single connection");
        }
        SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?
    } else {
        SqlitePoolOptions::new()
            .min_connections(config.min_connections)
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(config.idle_timeout)
            .max_lifetime(config.max_lifetime)
            .test_before_acquire(true)
            .connect_with(options.journal_mode(SqliteJournalMode::Wal))
            .await?
    };

    let max = if in_memory { 1 } else { config.max_connections };
    info!(in_memory, "Opened SQLite database");
    Ok((pool, max))
}
