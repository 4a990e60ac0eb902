//! Connection pool health monitoring
//!
//! Classifies pool occupancy into a health status for the readiness
//! endpoint and logs transitions into and out of saturation.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::RwLock;

use super::PoolState;

/// Pool health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolHealthStatus {
    /// Pool is healthy with plenty of capacity
    #[default]
    Healthy,
    /// Pool is under moderate load but functioning
    Moderate,
    /// Pool is under heavy load, may experience delays
    Stressed,
    /// Pool is saturated; callers will start timing out on acquire
    Critical,
}

impl PoolHealthStatus {
    fn is_stressed(&self) -> bool {
        matches!(self, PoolHealthStatus::Stressed | PoolHealthStatus::Critical)
    }
}

impl std::fmt::Display for PoolHealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolHealthStatus::Healthy => write!(f, "healthy"),
            PoolHealthStatus::Moderate => write!(f, "moderate"),
            PoolHealthStatus::Stressed => write!(f, "stressed"),
            PoolHealthStatus::Critical => write!(f, "critical"),
        }
    }
}

/// Configuration for pool health monitoring
#[derive(Debug, Clone)]
pub struct PoolMonitorConfig {
    /// Threshold for moderate status (fraction of pool in use)
    pub moderate_threshold: f64,
    /// Threshold for stressed status (fraction of pool in use)
    pub stressed_threshold: f64,
    /// Threshold for critical status (fraction of pool in use)
    pub critical_threshold: f64,
    /// How often the server samples the pool
    pub sample_interval: Duration,
}

impl Default for PoolMonitorConfig {
    fn default() -> Self {
        Self {
            moderate_threshold: 0.5,
            stressed_threshold: 0.8,
            critical_threshold: 0.95,
            sample_interval: Duration::from_secs(15),
        }
    }
}

/// Pool statistics as last sampled
#[derive(Debug, Clone, Default, Serialize)]
pub struct PoolStats {
    pub total_connections: u32,
    pub max_connections: u32,
    pub active_connections: u32,
    pub idle_connections: u32,
    pub status: PoolHealthStatus,
}

impl PoolStats {
    /// Fraction of the pool in use
    pub fn utilization(&self) -> f64 {
        if self.max_connections == 0 {
            return 0.0;
        }
        self.active_connections as f64 / self.max_connections as f64
    }

    pub fn is_stressed(&self) -> bool {
        self.status.is_stressed()
    }

    pub fn is_critical(&self) -> bool {
        matches!(self.status, PoolHealthStatus::Critical)
    }
}

/// Connection pool health monitor
pub struct PoolMonitor {
    config: PoolMonitorConfig,
    last_stats: RwLock<PoolStats>,
}

impl PoolMonitor {
    pub fn new() -> Self {
        Self::with_config(PoolMonitorConfig::default())
    }

    pub fn with_config(config: PoolMonitorConfig) -> Self {
        Self {
            config,
            last_stats: RwLock::new(PoolStats::default()),
        }
    }

    pub fn config(&self) -> &PoolMonitorConfig {
        &self.config
    }

    /// Classify an occupancy snapshot
    pub fn classify(&self, state: &PoolState) -> PoolHealthStatus {
        let utilization = if state.max > 0 {
            state.active() as f64 / state.max as f64
        } else {
            0.0
        };

        if utilization >= self.config.critical_threshold {
            PoolHealthStatus::Critical
        } else if utilization >= self.config.stressed_threshold {
            PoolHealthStatus::Stressed
        } else if utilization >= self.config.moderate_threshold {
            PoolHealthStatus::Moderate
        } else {
            PoolHealthStatus::Healthy
        }
    }

    /// Record a new sample, logging status changes
    pub async fn update(&self, state: PoolState) -> PoolStats {
        let status = self.classify(&state);
        let stats = PoolStats {
            total_connections: state.size,
            max_connections: state.max,
            active_connections: state.active(),
            idle_connections: state.idle,
            status,
        };

        let mut last = self.last_stats.write().await;
        if status != last.status {
            match status {
                PoolHealthStatus::Critical => {
                    tracing::error!(
                        utilization = %stats.utilization(),
                        active = stats.active_connections,
                        max = stats.max_connections,
                        "Pool health critical - connection pool saturated"
                    );
                }
                PoolHealthStatus::Stressed => {
                    tracing::warn!(
                        utilization = %stats.utilization(),
                        active = stats.active_connections,
                        max = stats.max_connections,
                        "Pool health stressed - approaching capacity"
                    );
                }
                PoolHealthStatus::Healthy if last.status.is_stressed() => {
                    tracing::info!(
                        utilization = %stats.utilization(),
                        "Pool health recovered to healthy"
                    );
                }
                _ => {}
            }
        }
        *last = stats.clone();
        stats
    }

    /// Last sampled statistics
    pub async fn stats(&self) -> PoolStats {
        self.last_stats.read().await.clone()
    }

    pub async fn status(&self) -> PoolHealthStatus {
        self.last_stats.read().await.status
    }
}

impl Default for PoolMonitor {
    fn default() -> Self {
        Self::new()
    }
}
