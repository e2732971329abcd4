//! Periodic alert sweep scheduler.
//!
//! Drives the recurring sweep-then-dispatch cycle: each tick classifies the
//! stock table, creates deduplicated alerts, and hands the newly created
//! ones to the dispatch worker. The first tick fires immediately at startup.
//!
//! A tick that finds the previous run still in flight is skipped rather than
//! run in parallel; the engine's dedup makes concurrent sweeps data-safe,
//! but there is no point stacking them.

use std::sync::Arc;

use tokio::signal;
use tokio::sync::Mutex;
use tokio::time::{self, Duration};

use crate::alerts::dispatch::DispatchHandle;
use crate::alerts::engine::AlertEngine;
use crate::metrics::AppMetrics;

#[derive(Debug, Clone, Copy)]
pub struct SweepSettings {
    pub expiry_threshold_days: i64,
    pub low_stock_threshold: i64,
    pub interval_seconds: u64,
}

/// Run the sweep loop until `Ctrl+C` (SIGINT) is received.
///
/// Sweep errors are logged and the loop continues — a single failed pass
/// must never take down the scheduler.
pub async fn run_alert_sweeps(
    engine: Arc<AlertEngine>,
    dispatch: DispatchHandle,
    metrics: Arc<AppMetrics>,
    settings: SweepSettings,
) {
    let mut interval = time::interval(Duration::from_secs(settings.interval_seconds));
    let in_flight = Arc::new(Mutex::new(()));

    tracing::info!(
        "Alert sweep scheduler started (interval: {}s, expiry threshold: {}d, low stock: {})",
        settings.interval_seconds,
        settings.expiry_threshold_days,
        settings.low_stock_threshold
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let Ok(_guard) = in_flight.try_lock() else {
                    tracing::warn!("previous sweep still in flight, skipping tick");
                    continue;
                };
                sweep_once(&engine, &dispatch, &metrics, &settings).await;
            }

            _ = signal::ctrl_c() => {
                tracing::info!("Shutdown signal received. Stopping sweeps.");
                break;
            }
        }
    }

    tracing::info!("Alert sweep scheduler stopped cleanly");
}

/// Execute a single sweep-and-dispatch cycle. Extracted for testability and
/// reused by the eager sweeps triggered from request handlers.
pub async fn sweep_once(
    engine: &Arc<AlertEngine>,
    dispatch: &DispatchHandle,
    metrics: &Arc<AppMetrics>,
    settings: &SweepSettings,
) {
    metrics.sweeps_total.inc();

    let created = match engine
        .sweep(settings.expiry_threshold_days, settings.low_stock_threshold)
        .await
    {
        Ok(created) => created,
        Err(err) => {
            metrics.sweep_errors_total.inc();
            tracing::error!("sweep failed, skipping tick: {}", err);
            return;
        }
    };

    metrics.alerts_created_total.inc_by(created.len() as f64);
    match engine.active_alerts().await {
        Ok(active) => metrics.active_alerts.set(active.len() as f64),
        Err(err) => tracing::debug!("active alert count unavailable: {}", err),
    }

    if created.is_empty() {
        tracing::debug!("sweep created no new alerts");
        return;
    }

    tracing::info!("dispatching {} newly created alert(s)", created.len());
    dispatch.enqueue(created).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::dispatch::{DispatchConfig, Dispatcher};
    use crate::db::create_pool;
    use crate::repository::test_fixtures::stock_row;
    use crate::repository::{
        AlertRepository, PatientRepository, PrescriptionRepository, StockRepository,
    };
    use crate::services::mock_notifier::RecordingNotifier;
    use chrono::NaiveDate;

    const SETTINGS: SweepSettings = SweepSettings {
        expiry_threshold_days: 15,
        low_stock_threshold: 5,
        interval_seconds: 86_400,
    };

    struct Fixture {
        engine: Arc<AlertEngine>,
        dispatch: DispatchHandle,
        metrics: Arc<AppMetrics>,
        notifier: Arc<RecordingNotifier>,
        stock: StockRepository,
    }

    async fn make_fixture() -> Fixture {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        let stock = StockRepository::new(pool.clone());
        let alerts = AlertRepository::new(pool.clone());
        let engine = Arc::new(AlertEngine::with_clock(
            stock.clone(),
            alerts.clone(),
            Arc::new(|| NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()),
        ));
        let metrics = Arc::new(AppMetrics::new().unwrap());
        let notifier = Arc::new(RecordingNotifier::new());

        let dispatcher = Arc::new(Dispatcher::new(
            alerts,
            PrescriptionRepository::new(pool.clone()),
            PatientRepository::new(pool),
            notifier.clone(),
            DispatchConfig {
                pharmacy_email: "pharmacy@example.com".to_string(),
                admin_email: None,
                site_base: "http://localhost:5000".to_string(),
            },
            metrics.clone(),
        ));
        let dispatch = dispatcher.spawn();

        Fixture {
            engine,
            dispatch,
            metrics,
            notifier,
            stock,
        }
    }

    async fn wait_for_sends(notifier: &RecordingNotifier, expected: usize) {
        for _ in 0..100 {
            if notifier.sent_count() >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn sweep_once_creates_and_dispatches_alerts() {
        let fx = make_fixture().await;
        fx.stock.insert(&stock_row("Paracetamol", "B1", "Jan-24", 3)).await.unwrap();

        sweep_once(&fx.engine, &fx.dispatch, &fx.metrics, &SETTINGS).await;

        wait_for_sends(&fx.notifier, 1).await;
        assert_eq!(fx.notifier.sent_count(), 1);
        assert_eq!(fx.notifier.sent()[0].to, "pharmacy@example.com");
    }

    #[tokio::test]
    async fn second_sweep_sends_nothing_new() {
        let fx = make_fixture().await;
        fx.stock.insert(&stock_row("Paracetamol", "B1", "Jan-24", 3)).await.unwrap();

        sweep_once(&fx.engine, &fx.dispatch, &fx.metrics, &SETTINGS).await;
        wait_for_sends(&fx.notifier, 1).await;

        sweep_once(&fx.engine, &fx.dispatch, &fx.metrics, &SETTINGS).await;
        // Give the worker a chance to (incorrectly) deliver something.
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(fx.notifier.sent_count(), 1);
    }

    #[tokio::test]
    async fn sweep_once_on_empty_stock_is_quiet() {
        let fx = make_fixture().await;

        sweep_once(&fx.engine, &fx.dispatch, &fx.metrics, &SETTINGS).await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(fx.notifier.sent_count(), 0);
        assert_eq!(fx.metrics.active_alerts.get() as i64, 0);
    }
}
