//! Prometheus metrics registry.
//!
//! [`AppMetrics`] owns all registered metrics and the [`Registry`] they
//! belong to. Construct it once at startup, wrap in `Arc`, and pass it to
//! the scheduler and the dispatcher. Exposed at `GET /metrics` in
//! Prometheus text exposition format.

use prometheus::{Counter, Encoder, Gauge, Opts, Registry, TextEncoder};

pub struct AppMetrics {
    /// Total sweep passes over the stock table (scheduled + eager).
    pub sweeps_total: Counter,
    /// Sweep passes that failed outright.
    pub sweep_errors_total: Counter,
    /// Alerts created across all trigger paths.
    pub alerts_created_total: Counter,
    /// Emails handed to the notifier successfully.
    pub emails_sent_total: Counter,
    /// Emails dropped after exhausting delivery attempts.
    pub email_failures_total: Counter,
    /// Unresolved alerts after the most recent sweep.
    pub active_alerts: Gauge,
    /// The registry that owns all of the above metrics.
    pub registry: Registry,
}

impl AppMetrics {
    /// Create and register all metrics. Returns an error if any metric
    /// name is invalid or duplicated (should not happen in practice).
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let sweeps_total = Counter::with_opts(Opts::new(
            "pharmacy_tracker_sweeps_total",
            "Total alert sweep passes",
        ))?;

        let sweep_errors_total = Counter::with_opts(Opts::new(
            "pharmacy_tracker_sweep_errors_total",
            "Failed alert sweep passes",
        ))?;

        let alerts_created_total = Counter::with_opts(Opts::new(
            "pharmacy_tracker_alerts_created_total",
            "Alerts created across all trigger paths",
        ))?;

        let emails_sent_total = Counter::with_opts(Opts::new(
            "pharmacy_tracker_emails_sent_total",
            "Notification emails delivered to the transport",
        ))?;

        let email_failures_total = Counter::with_opts(Opts::new(
            "pharmacy_tracker_email_failures_total",
            "Notification emails dropped after retries",
        ))?;

        let active_alerts = Gauge::with_opts(Opts::new(
            "pharmacy_tracker_active_alerts",
            "Unresolved alerts after the most recent sweep",
        ))?;

        registry.register(Box::new(sweeps_total.clone()))?;
        registry.register(Box::new(sweep_errors_total.clone()))?;
        registry.register(Box::new(alerts_created_total.clone()))?;
        registry.register(Box::new(emails_sent_total.clone()))?;
        registry.register(Box::new(email_failures_total.clone()))?;
        registry.register(Box::new(active_alerts.clone()))?;

        Ok(Self {
            sweeps_total,
            sweep_errors_total,
            alerts_created_total,
            emails_sent_total,
            email_failures_total,
            active_alerts,
            registry,
        })
    }

    /// Render the registry in text exposition format.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(err) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::error!("metrics encoding failed: {}", err);
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_register_and_render() {
        let metrics = AppMetrics::new().unwrap();
        metrics.sweeps_total.inc();
        metrics.alerts_created_total.inc_by(3.0);
        metrics.active_alerts.set(2.0);

        let output = metrics.render();
        assert!(output.contains("pharmacy_tracker_sweeps_total 1"));
        assert!(output.contains("pharmacy_tracker_alerts_created_total 3"));
        assert!(output.contains("pharmacy_tracker_active_alerts 2"));
    }
}
