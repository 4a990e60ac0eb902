//! Store configuration
//!
//! Loaded from environment variables:
//!
//! - `DATABASE_URL` - `postgres://...` or `sqlite:...` (required)
//! - `DB_MIN_CONNECTIONS` - Connections kept open when idle (default: 1)
//! - `DB_MAX_CONNECTIONS` - Pool upper bound (default: 10)
//! - `DB_ACQUIRE_TIMEOUT_SECS` - Wait for a free connection (default: 5)
//! - `DB_IDLE_TIMEOUT_SECS` - Close connections idle this long (default: 300)
//! - `DB_MAX_LIFETIME_SECS` - Recycle connections older than this (default: 1800)
//! - `DB_STATEMENT_TIMEOUT_MS` - Per-statement timeout (default: 10000)
//! - `DB_MIGRATE_ON_STARTUP` - Apply embedded migrations on connect (default: true)
//! - `CLAIM_STALENESS_SECS` - Age after which a pending claim may be reclaimed (default: 30)

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::{Result, StoreError};

/// Backend selected by the database URL scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Postgres,
    Sqlite,
}

impl BackendKind {
    pub fn from_url(url: &str) -> Option<Self> {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Some(BackendKind::Postgres)
        } else if url.starts_with("sqlite:") {
            Some(BackendKind::Sqlite)
        } else {
            None
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Postgres => write!(f, "postgres"),
            BackendKind::Sqlite => write!(f, "sqlite"),
        }
    }
}

/// Connection pool configuration
#[derive(Clone)]
pub struct PoolConfig {
    /// Backend connection URL (may carry credentials; never logged)
    pub database_url: String,
    /// Minimum pooled connections
    pub min_connections: u32,
    /// Maximum pooled connections
    pub max_connections: u32,
    /// How long a caller waits for a free connection
    pub acquire_timeout: Duration,
    /// Idle connections older than this are closed
    pub idle_timeout: Duration,
    /// Connections older than this are recycled
    pub max_lifetime: Duration,
    /// Upper bound on a single statement
    pub statement_timeout: Duration,
    /// Whether to apply migrations when connecting
    pub migrate_on_startup: bool,
}

impl fmt::Debug for PoolConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolConfig")
            .field("database_url", &"<redacted>")
            .field("min_connections", &self.min_connections)
            .field("max_connections", &self.max_connections)
            .field("acquire_timeout", &self.acquire_timeout)
            .field("idle_timeout", &self.idle_timeout)
            .field("max_lifetime", &self.max_lifetime)
            .field("statement_timeout", &self.statement_timeout)
            .field("migrate_on_startup", &self.migrate_on_startup)
            .finish()
    }
}

impl PoolConfig {
    /// Config with defaults for everything but the URL
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            min_connections: 1,
            max_connections: 10,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(300),
            max_lifetime: Duration::from_secs(1800),
            statement_timeout: Duration::from_millis(10_000),
            migrate_on_startup: true,
        }
    }

    /// Load configuration from environment variables.
    ///
    /// A missing `DATABASE_URL` or an inconsistent pool bound is a
    /// [`StoreError::Configuration`]; it is fatal at startup.
    pub fn from_env() -> Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| {
                StoreError::Configuration("DATABASE_URL environment variable is required".into())
            })?;

        let mut config = Self::new(database_url);
        config.min_connections = env_parse("DB_MIN_CONNECTIONS")?.unwrap_or(config.min_connections);
        config.max_connections = env_parse("DB_MAX_CONNECTIONS")?.unwrap_or(config.max_connections);
        if let Some(secs) = env_parse::<u64>("DB_ACQUIRE_TIMEOUT_SECS")? {
            config.acquire_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("DB_IDLE_TIMEOUT_SECS")? {
            config.idle_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("DB_MAX_LIFETIME_SECS")? {
            config.max_lifetime = Duration::from_secs(secs);
        }
        if let Some(ms) = env_parse::<u64>("DB_STATEMENT_TIMEOUT_MS")? {
            config.statement_timeout = Duration::from_millis(ms);
        }
        config.migrate_on_startup = std::env::var("DB_MIGRATE_ON_STARTUP")
            .ok()
            .map(|v| {
                !matches!(
                    v.trim().to_ascii_lowercase().as_str(),
                    "0" | "false" | "off"
                )
            })
            .unwrap_or(true);

        config.validate()?;
        Ok(config)
    }

    /// Check the configuration is usable
    pub fn validate(&self) -> Result<BackendKind> {
        let backend = BackendKind::from_url(&self.database_url).ok_or_else(|| {
            StoreError::Configuration(
                "DATABASE_URL must start with postgres://, postgresql:// or sqlite:".into(),
            )
        })?;

        if self.max_connections == 0 {
            return Err(StoreError::Configuration(
                "DB_MAX_CONNECTIONS must be at least 1".into(),
            ));
        }
        if self.min_connections > self.max_connections {
            return Err(StoreError::Configuration(format!(
                "DB_MIN_CONNECTIONS ({}) exceeds DB_MAX_CONNECTIONS ({})",
                self.min_connections, self.max_connections
            )));
        }
        if self.statement_timeout.is_zero() {
            return Err(StoreError::Configuration(
                "DB_STATEMENT_TIMEOUT_MS must be positive".into(),
            ));
        }

        Ok(backend)
    }
}

/// Link store configuration
#[derive(Debug, Clone)]
pub struct LinkStoreConfig {
    /// Age after which a pending claim is considered abandoned.
    ///
    /// Assumes downstream ticket creation always finishes well within this
    /// window. That is an empirical timing assumption, not a proven bound:
    /// a claimant slower than this can be overtaken, and its late commit is
    /// then rejected.
    ///
    /// Postgres measures age against the database clock. SQLite uses the
    /// local clock, which is shared only because SQLite is single-host.
    pub staleness_threshold: Duration,
}

impl Default for LinkStoreConfig {
    fn default() -> Self {
        Self {
            staleness_threshold: Duration::from_secs(30),
        }
    }
}

impl LinkStoreConfig {
    pub fn new(staleness_threshold: Duration) -> Self {
        Self {
            staleness_threshold,
        }
    }

    pub fn from_env() -> Result<Self> {
        let staleness_threshold = env_parse::<u64>("CLAIM_STALENESS_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(30));
        Ok(Self {
            staleness_threshold,
        })
    }

    /// Pending rows created before the returned instant are stale
    pub fn stale_before(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        chrono::Duration::from_std(self.staleness_threshold)
            .ok()
            .and_then(|threshold| now.checked_sub_signed(threshold))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| StoreError::Configuration(format!("{name} has invalid value {raw:?}"))),
        Err(_) => Ok(None),
    }
}
