//! Process wiring and the operational HTTP surface.
//!
//! This module wires together:
//! - configuration
//! - the store handle (pool, link store, event ledger)
//! - background tasks (retention sweeper, pool sampler)
//! - the Axum router exposing `/health`, `/ready` and `/metrics`

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::infra::{
    shutdown_signal, spawn_sweeper, spawn_until_shutdown, ComponentHealth, LinkStoreConfig,
    PoolConfig, PoolMonitor, PoolMonitorConfig, RetentionSweeper, RetentionSweeperConfig,
    ShutdownCoordinator, StoreHandle,
};
use crate::metrics::{metric_names, MetricsRegistry};
use crate::telemetry::{init_telemetry, shutdown_telemetry, TelemetryConfig};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Ops server listen address.
    pub listen_addr: SocketAddr,
    pub pool: PoolConfig,
    pub links: LinkStoreConfig,
    pub sweeper: RetentionSweeperConfig,
    pub pool_monitor: PoolMonitorConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        let port: u16 = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8080);

        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let listen_addr: SocketAddr = format!("{host}:{port}")
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid listen address {host}:{port}: {e}"))?;

        let mut pool_monitor = PoolMonitorConfig::default();
        if let Some(secs) = std::env::var("POOL_SAMPLE_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
        {
            pool_monitor.sample_interval = Duration::from_secs(secs);
        }

        Ok(Self {
            listen_addr,
            pool: PoolConfig::from_env()?,
            links: LinkStoreConfig::from_env()?,
            sweeper: RetentionSweeperConfig::from_env(),
            pool_monitor,
        })
    }
}

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: StoreHandle,
    pub metrics: Arc<MetricsRegistry>,
    pub pool_monitor: Arc<PoolMonitor>,
}

/// Run the relay process until SIGINT/SIGTERM.
pub async fn run() -> anyhow::Result<()> {
    init_telemetry(&TelemetryConfig::from_env()).map_err(|e| anyhow::anyhow!(e))?;

    info!("Starting ticket relay v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    info!(
        listen_addr = %config.listen_addr,
        pool = ?config.pool,
        staleness_secs = config.links.staleness_threshold.as_secs(),
        "Configuration loaded"
    );

    let store = StoreHandle::connect(&config.pool, config.links.clone()).await?;
    let metrics = Arc::new(MetricsRegistry::new());
    let pool_monitor = Arc::new(PoolMonitor::with_config(config.pool_monitor.clone()));
    let coordinator = Arc::new(ShutdownCoordinator::new());

    let sweeper = if config.sweeper.enabled {
        let sweeper = RetentionSweeper::new(
            config.sweeper.clone(),
            store.links(),
            store.events(),
            metrics.clone(),
        );
        Some(spawn_sweeper(sweeper, coordinator.signal()))
    } else {
        info!("Retention sweeper disabled (RETENTION_ENABLED=false)");
        None
    };

    let sampler = spawn_until_shutdown(
        coordinator.signal(),
        "pool-sampler",
        sample_pool(
            store.clone(),
            pool_monitor.clone(),
            metrics.clone(),
            config.pool_monitor.sample_interval,
        ),
    );

    let state = AppState {
        store: store.clone(),
        metrics,
        pool_monitor,
    };
    let app = build_router(state);

    info!("Starting HTTP server on {}", config.listen_addr);
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;

    let stop = coordinator.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            stop.shutdown();
        })
        .await;

    // Also covers the server exiting on its own
    coordinator.shutdown();

    if let Some((handle, _control)) = sweeper {
        if let Err(e) = handle.await {
            error!(error = %e, "Retention sweeper task failed");
        }
    }
    if let Err(e) = sampler.await {
        error!(error = %e, "Pool sampler task failed");
    }

    store.close().await;
    shutdown_telemetry();
    info!("Ticket relay stopped");

    served?;
    Ok(())
}

/// Build the ops router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn sample_pool(
    store: StoreHandle,
    monitor: Arc<PoolMonitor>,
    metrics: Arc<MetricsRegistry>,
    every: Duration,
) {
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        record_pool(&store, &monitor, &metrics).await;
    }
}

async fn record_pool(store: &StoreHandle, monitor: &PoolMonitor, metrics: &MetricsRegistry) {
    let state = store.pool_state();
    monitor.update(state).await;

    metrics.set_gauge(metric_names::DB_POOL_SIZE, u64::from(state.size)).await;
    metrics.set_gauge(metric_names::DB_POOL_IDLE, u64::from(state.idle)).await;
    metrics.set_gauge(metric_names::DB_POOL_ACTIVE, u64::from(state.active())).await;
    metrics.set_gauge(metric_names::DB_POOL_MAX, u64::from(state.max)).await;
}

/// Liveness: the process is up.
async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "ticket-relay",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Readiness: the store answers and the pool has headroom.
async fn readiness_check(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    record_pool(&state.store, &state.pool_monitor, &state.metrics).await;
    let pool = state.pool_monitor.stats().await;

    let health = match state.store.ping().await {
        Err(e) => ComponentHealth::Unhealthy {
            reason: format!("database unavailable: {e}"),
        },
        Ok(()) if pool.is_critical() => ComponentHealth::Degraded {
            reason: format!("connection pool {}", pool.status),
        },
        Ok(()) => ComponentHealth::Healthy,
    };

    let code = if health.is_unhealthy() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    let reason = match &health {
        ComponentHealth::Healthy => None,
        ComponentHealth::Degraded { reason } | ComponentHealth::Unhealthy { reason } => {
            Some(reason.clone())
        }
    };

    (
        code,
        Json(serde_json::json!({
            "status": health.as_str(),
            "backend": state.store.backend().to_string(),
            "reason": reason,
            "pool": pool,
        })),
    )
}

/// Prometheus text exposition.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    record_pool(&state.store, &state.pool_monitor, &state.metrics).await;
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.to_prometheus().await,
    )
}
