//! Retention sweeper
//!
//! Background task that periodically deletes thread links and processed-event
//! markers older than the retention window. It bounds storage growth only;
//! nothing depends on it for correctness, so a failed sweep is logged and
//! retried on the next tick.
//!
//! # Configuration
//!
//! - `RETENTION_DAYS` - Age after which rows are deleted (default: 30)
//! - `RETENTION_INTERVAL_SECS` - Time between sweeps (default: 14 days)
//! - `RETENTION_ENABLED` - Set to `false` to skip spawning the sweeper (default: true)

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use super::{EventDedupStore, LinkStore, ShutdownSignal};
use crate::metrics::{metric_names, MetricsRegistry};

const DEFAULT_RETENTION_DAYS: u32 = 30;
const DEFAULT_INTERVAL: Duration = Duration::from_secs(14 * 24 * 60 * 60);

/// Configuration for the retention sweeper
#[derive(Debug, Clone)]
pub struct RetentionSweeperConfig {
    /// Rows created more than this many days ago are deleted
    pub retention_days: u32,
    /// Time between sweeps
    pub interval: Duration,
    /// Whether the sweeper runs at all
    pub enabled: bool,
}

impl Default for RetentionSweeperConfig {
    fn default() -> Self {
        Self {
            retention_days: DEFAULT_RETENTION_DAYS,
            interval: DEFAULT_INTERVAL,
            enabled: true,
        }
    }
}

impl RetentionSweeperConfig {
    /// Load configuration from environment
    pub fn from_env() -> Self {
        let retention_days = std::env::var("RETENTION_DAYS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_RETENTION_DAYS);

        let interval = std::env::var("RETENTION_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_INTERVAL);

        let enabled = std::env::var("RETENTION_ENABLED")
            .ok()
            .map(|s| s == "true" || s == "1")
            .unwrap_or(true);

        Self {
            retention_days,
            interval,
            enabled,
        }
    }

    /// Rows created strictly before the returned instant are expired
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        chrono::Duration::try_days(i64::from(self.retention_days))
            .and_then(|retention| now.checked_sub_signed(retention))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// Message types for sweeper control
#[derive(Debug)]
pub enum SweeperMessage {
    /// Run a sweep now instead of waiting for the next tick
    SweepNow,
    /// Stop the sweeper
    Shutdown,
}

/// Result of one sweep.
///
/// `None` means the delete against that store failed; the failure was logged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub cutoff: DateTime<Utc>,
    pub links_deleted: Option<u64>,
    pub events_deleted: Option<u64>,
}

impl SweepReport {
    pub fn is_complete(&self) -> bool {
        self.links_deleted.is_some() && self.events_deleted.is_some()
    }

    pub fn total_deleted(&self) -> u64 {
        self.links_deleted.unwrap_or(0) + self.events_deleted.unwrap_or(0)
    }
}

/// Retention sweeper over both stores
pub struct RetentionSweeper {
    config: RetentionSweeperConfig,
    links: Arc<dyn LinkStore>,
    events: Arc<dyn EventDedupStore>,
    metrics: Arc<MetricsRegistry>,
}

impl RetentionSweeper {
    pub fn new(
        config: RetentionSweeperConfig,
        links: Arc<dyn LinkStore>,
        events: Arc<dyn EventDedupStore>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            config,
            links,
            events,
            metrics,
        }
    }

    pub fn config(&self) -> &RetentionSweeperConfig {
        &self.config
    }

    /// Delete expired rows from both stores.
    ///
    /// Each store is swept independently; a failure in one does not skip the
    /// other. Never returns an error.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> SweepReport {
        let cutoff = self.config.cutoff(now);
        debug!(cutoff = %cutoff, "Starting retention sweep");
        self.metrics.inc_counter(metric_names::SWEEP_RUNS).await;

        let links_deleted = match self.links.delete_older_than(cutoff).await {
            Ok(n) => {
                self.metrics
                    .add_counter(metric_names::SWEEP_LINKS_DELETED, n)
                    .await;
                Some(n)
            }
            Err(e) => {
                error!(error = %e, cutoff = %cutoff, "Failed to sweep thread links");
                self.metrics.inc_counter(metric_names::SWEEP_FAILURES).await;
                None
            }
        };

        let events_deleted = match self.events.delete_older_than(cutoff).await {
            Ok(n) => {
                self.metrics
                    .add_counter(metric_names::SWEEP_EVENTS_DELETED, n)
                    .await;
                Some(n)
            }
            Err(e) => {
                error!(error = %e, cutoff = %cutoff, "Failed to sweep processed events");
                self.metrics.inc_counter(metric_names::SWEEP_FAILURES).await;
                None
            }
        };

        let report = SweepReport {
            cutoff,
            links_deleted,
            events_deleted,
        };

        info!(
            cutoff = %cutoff,
            links_deleted = ?report.links_deleted,
            events_deleted = ?report.events_deleted,
            "Retention sweep finished"
        );

        report
    }

    /// Sweep on every tick until shutdown or a `Shutdown` message.
    ///
    /// The first tick fires immediately, so a freshly started process sweeps
    /// once on boot.
    pub async fn run(
        self,
        mut control_rx: mpsc::Receiver<SweeperMessage>,
        shutdown: ShutdownSignal,
    ) {
        info!(
            retention_days = self.config.retention_days,
            interval_secs = self.config.interval.as_secs(),
            "Starting retention sweeper"
        );

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.wait() => {
                    info!("Retention sweeper shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.sweep_once(Utc::now()).await;
                }
                msg = control_rx.recv() => {
                    match msg {
                        Some(SweeperMessage::SweepNow) => {
                            info!("Forced retention sweep");
                            self.sweep_once(Utc::now()).await;
                        }
                        Some(SweeperMessage::Shutdown) | None => {
                            info!("Retention sweeper shutting down");
                            break;
                        }
                    }
                }
            }
        }
    }
}

/// Spawn the sweeper onto its own task
pub fn spawn_sweeper(
    sweeper: RetentionSweeper,
    shutdown: ShutdownSignal,
) -> (tokio::task::JoinHandle<()>, mpsc::Sender<SweeperMessage>) {
    let (control_tx, control_rx) = mpsc::channel(16);
    let handle = tokio::spawn(sweeper.run(control_rx, shutdown));
    (handle, control_tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::{MockEventDedupStore, MockLinkStore, ShutdownCoordinator, StoreError};
    use chrono::TimeZone;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 31, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_config_default() {
        let config = RetentionSweeperConfig::default();
        assert_eq!(config.retention_days, 30);
        assert_eq!(config.interval, Duration::from_secs(1_209_600));
        assert!(config.enabled);
    }

    #[test]
    fn test_cutoff() {
        let config = RetentionSweeperConfig::default();
        assert_eq!(
            config.cutoff(fixed_now()),
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_cutoff_saturates_for_huge_retention() {
        let config = RetentionSweeperConfig {
            retention_days: 200_000_000,
            ..Default::default()
        };
        assert_eq!(config.cutoff(fixed_now()), DateTime::<Utc>::MIN_UTC);
    }

    #[tokio::test]
    async fn test_sweep_with_huge_retention_deletes_nothing_expired() {
        let mut links = MockLinkStore::new();
        links
            .expect_delete_older_than()
            .withf(|cutoff| *cutoff == DateTime::<Utc>::MIN_UTC)
            .times(1)
            .returning(|_| Ok(0));
        let mut events = MockEventDedupStore::new();
        events
            .expect_delete_older_than()
            .withf(|cutoff| *cutoff == DateTime::<Utc>::MIN_UTC)
            .times(1)
            .returning(|_| Ok(0));

        let sweeper = RetentionSweeper::new(
            RetentionSweeperConfig {
                retention_days: u32::MAX,
                ..Default::default()
            },
            Arc::new(links),
            Arc::new(events),
            Arc::new(MetricsRegistry::new()),
        );

        let report = sweeper.sweep_once(fixed_now()).await;
        assert!(report.is_complete());
        assert_eq!(report.total_deleted(), 0);
    }

    #[tokio::test]
    async fn test_sweep_deletes_from_both_stores() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();

        let mut links = MockLinkStore::new();
        links
            .expect_delete_older_than()
            .withf(move |cutoff| *cutoff == expected)
            .times(1)
            .returning(|_| Ok(3));

        let mut events = MockEventDedupStore::new();
        events
            .expect_delete_older_than()
            .withf(move |cutoff| *cutoff == expected)
            .times(1)
            .returning(|_| Ok(5));

        let metrics = Arc::new(MetricsRegistry::new());
        let sweeper = RetentionSweeper::new(
            RetentionSweeperConfig::default(),
            Arc::new(links),
            Arc::new(events),
            metrics.clone(),
        );

        let report = sweeper.sweep_once(fixed_now()).await;
        assert!(report.is_complete());
        assert_eq!(report.total_deleted(), 8);
        assert_eq!(metrics.get_counter(metric_names::SWEEP_LINKS_DELETED).await, 3);
        assert_eq!(metrics.get_counter(metric_names::SWEEP_EVENTS_DELETED).await, 5);
    }

    #[tokio::test]
    async fn test_link_failure_does_not_skip_events() {
        let mut links = MockLinkStore::new();
        links
            .expect_delete_older_than()
            .returning(|_| Err(StoreError::Database(sqlx::Error::PoolTimedOut)));

        let mut events = MockEventDedupStore::new();
        events
            .expect_delete_older_than()
            .times(1)
            .returning(|_| Ok(2));

        let metrics = Arc::new(MetricsRegistry::new());
        let sweeper = RetentionSweeper::new(
            RetentionSweeperConfig::default(),
            Arc::new(links),
            Arc::new(events),
            metrics.clone(),
        );

        let report = sweeper.sweep_once(fixed_now()).await;
        assert_eq!(report.links_deleted, None);
        assert_eq!(report.events_deleted, Some(2));
        assert!(!report.is_complete());
        assert_eq!(metrics.get_counter(metric_names::SWEEP_FAILURES).await, 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let mut links = MockLinkStore::new();
        links.expect_delete_older_than().returning(|_| Ok(0));
        let mut events = MockEventDedupStore::new();
        events.expect_delete_older_than().returning(|_| Ok(0));

        let sweeper = RetentionSweeper::new(
            RetentionSweeperConfig::default(),
            Arc::new(links),
            Arc::new(events),
            Arc::new(MetricsRegistry::new()),
        );

        let coordinator = ShutdownCoordinator::new();
        let (handle, control) = spawn_sweeper(sweeper, coordinator.signal());

        control.send(SweeperMessage::SweepNow).await.unwrap();
        coordinator.shutdown();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper should stop")
            .unwrap();
    }
}
