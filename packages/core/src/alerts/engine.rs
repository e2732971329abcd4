//! Alert engine: classification, dedup, resolution.
//!
//! Three independent trigger paths create alerts: the periodic sweep, the
//! bill-upload eager sweep, and the dispense-time check. All of them funnel
//! through [`AlertEngine::create_or_skip`], which holds the creation mutex
//! across its check-then-insert so the unresolved-alert invariant survives
//! overlapping invocations.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::dates;
use crate::error::AppError;
use crate::repository::{AlertRepository, AlertRow, AlertType, StockRepository};

/// Injectable date source so sweep classification is deterministic in tests.
pub type Clock = Arc<dyn Fn() -> NaiveDate + Send + Sync>;

pub struct AlertEngine {
    stock: StockRepository,
    alerts: AlertRepository,
    clock: Clock,
    // Serializes every check-then-insert in create_or_skip.
    create_lock: Mutex<()>,
}

impl AlertEngine {
    pub fn new(stock: StockRepository, alerts: AlertRepository) -> Self {
        Self::with_clock(stock, alerts, Arc::new(|| Utc::now().date_naive()))
    }

    pub fn with_clock(stock: StockRepository, alerts: AlertRepository, clock: Clock) -> Self {
        Self {
            stock,
            alerts,
            clock,
            create_lock: Mutex::new(()),
        }
    }

    /// One full pass over the stock table.
    ///
    /// Returns only the alerts created by this pass; pre-existing unresolved
    /// alerts are not re-surfaced, so the return value can drive notification
    /// dispatch without repeating emails on every sweep. Rows with a blank
    /// product or batch, or an expiry the normalizer rejects, are skipped.
    pub async fn sweep(
        &self,
        expiry_threshold_days: i64,
        low_stock_threshold: i64,
    ) -> Result<Vec<AlertRow>, AppError> {
        let today = (self.clock)();
        let rows = self.stock.list().await?;

        let mut created = Vec::new();
        for row in rows {
            let product = row.product_name.trim();
            let batch = row.batch.trim();
            if product.is_empty() || batch.is_empty() {
                continue;
            }

            let days_left = match dates::days_until_expiry(&row.exp, today) {
                Ok(days) => days,
                Err(_) => {
                    tracing::debug!(
                        product, batch,
                        exp = %row.exp,
                        "skipping stock row with unusable expiry"
                    );
                    continue;
                }
            };

            let alert_type = if days_left < 0 {
                AlertType::Expired
            } else if days_left <= expiry_threshold_days {
                AlertType::ExpiringSoon
            } else if row.qty <= low_stock_threshold {
                AlertType::LowStock
            } else {
                continue;
            };

            if let Some(alert) = self
                .create_or_skip(product, batch, &row.exp, Some(days_left), alert_type)
                .await?
            {
                created.push(alert);
            }
        }

        if !created.is_empty() {
            tracing::info!("Sweep created {} new alert(s)", created.len());
        }
        Ok(created)
    }

    /// The single dedup-and-insert primitive shared by sweep and the
    /// dispense-time check. Returns `None` when an unresolved alert for the
    /// same case-insensitive `(product, batch, alert_type)` already exists.
    pub async fn create_or_skip(
        &self,
        product_name: &str,
        batch: &str,
        exp_raw: &str,
        days_to_expiry: Option<i64>,
        alert_type: AlertType,
    ) -> Result<Option<AlertRow>, AppError> {
        let _guard = self.create_lock.lock().await;

        if self
            .alerts
            .unresolved_exists(product_name, batch, alert_type)
            .await?
        {
            return Ok(None);
        }

        let alert = AlertRow {
            alert_id: Uuid::new_v4().to_string(),
            product_name: product_name.trim().to_string(),
            batch: batch.trim().to_string(),
            exp: exp_raw.trim().to_string(),
            days_to_expiry,
            alert_type,
            created_at: Utc::now().to_rfc3339(),
            last_sent_at: None,
            resolved: false,
            resolved_by: None,
            resolved_at: None,
        };
        self.alerts.insert(&alert).await?;

        tracing::info!(
            product = %alert.product_name,
            batch = %alert.batch,
            alert_type = %alert.alert_type,
            "created alert"
        );
        Ok(Some(alert))
    }

    /// Idempotent, monotonic resolution: `false` when the id is unknown or
    /// the alert was already resolved.
    pub async fn resolve(&self, alert_id: &str, actor: &str) -> Result<bool, AppError> {
        Ok(self.alerts.resolve(alert_id, actor).await?)
    }

    /// Bulk-resolve all unresolved alerts for the given non-empty subset of
    /// `(product, batch)`. Used when stock is removed so stale alerts do not
    /// linger for deleted inventory.
    pub async fn resolve_by_match(
        &self,
        product_name: Option<&str>,
        batch: Option<&str>,
        actor: &str,
    ) -> Result<u64, AppError> {
        Ok(self.alerts.resolve_matching(product_name, batch, actor).await?)
    }

    /// Record that a notification was dispatched for this alert, independent
    /// of resolution.
    pub async fn touch_last_sent(&self, alert_id: &str) -> Result<bool, AppError> {
        Ok(self.alerts.touch_last_sent(alert_id).await?)
    }

    pub async fn active_alerts(&self) -> Result<Vec<AlertRow>, AppError> {
        Ok(self.alerts.list_active().await?)
    }

    pub async fn find(&self, alert_id: &str) -> Result<Option<AlertRow>, AppError> {
        Ok(self.alerts.find(alert_id).await?)
    }
}
