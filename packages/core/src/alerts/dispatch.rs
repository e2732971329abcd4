//! Notification dispatch.
//!
//! Turns newly created alerts into addressed emails: pharmacy first, then
//! every patient linked to the lot through a prescription, then the site
//! admin, deduplicated by address. Delivery runs on a bounded-queue worker
//! decoupled from alert creation; a send failure for one recipient never
//! blocks the rest and never rolls back the alert.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;

use crate::error::AppError;
use crate::metrics::AppMetrics;
use crate::repository::{
    AlertRepository, AlertRow, PatientRepository, PatientRow, PrescriptionRepository,
};
use crate::services::mailer::Notifier;

/// Delivery attempts per recipient before giving up.
const MAX_SEND_ATTEMPTS: u32 = 3;
/// Base delay for the retry backoff; doubles per attempt, plus jitter.
const RETRY_BASE_DELAY_MS: u64 = 500;
/// Alerts waiting for the dispatch worker.
const QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Pharmacy/chemist address; always the first recipient.
    pub pharmacy_email: String,
    /// Site admin address; appended when configured.
    pub admin_email: Option<String>,
    /// Base URL embedded in resolution links.
    pub site_base: String,
}

/// One addressed, composed message ready for the notifier.
#[derive(Debug, Clone)]
pub struct OutboundEmail {
    pub to: String,
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
}

pub struct Dispatcher {
    alerts: AlertRepository,
    prescriptions: PrescriptionRepository,
    patients: PatientRepository,
    notifier: Arc<dyn Notifier>,
    config: DispatchConfig,
    metrics: Arc<AppMetrics>,
}

/// Sender half of the dispatch queue. Cloneable; held by the scheduler and
/// any request handler that triggers an eager sweep.
#[derive(Clone)]
pub struct DispatchHandle {
    tx: mpsc::Sender<AlertRow>,
}

impl DispatchHandle {
    /// Queue alerts for delivery. Dropping a full queue's overflow is
    /// acceptable: the alert row already exists and `last_sent_at` stays
    /// unset, so a later enqueue will still deliver it.
    pub async fn enqueue(&self, alerts: Vec<AlertRow>) {
        for alert in alerts {
            if let Err(err) = self.tx.send(alert).await {
                tracing::warn!("dispatch queue closed, dropping alert: {}", err);
            }
        }
    }
}

impl Dispatcher {
    pub fn new(
        alerts: AlertRepository,
        prescriptions: PrescriptionRepository,
        patients: PatientRepository,
        notifier: Arc<dyn Notifier>,
        config: DispatchConfig,
        metrics: Arc<AppMetrics>,
    ) -> Self {
        Self {
            alerts,
            prescriptions,
            patients,
            notifier,
            config,
            metrics,
        }
    }

    /// Start the background delivery worker and return its queue handle.
    pub fn spawn(self: Arc<Self>) -> DispatchHandle {
        let (tx, mut rx) = mpsc::channel::<AlertRow>(QUEUE_CAPACITY);

        tokio::spawn(async move {
            tracing::info!(
                notifier = self.notifier.notifier_name(),
                "dispatch worker started"
            );
            while let Some(alert) = rx.recv().await {
                self.dispatch_alert(&alert).await;
            }
            tracing::info!("dispatch worker stopped");
        });

        DispatchHandle { tx }
    }

    /// Deliver one alert's fan-out, then stamp `last_sent_at`.
    ///
    /// The alert is re-read first: one already notified (or resolved in the
    /// meantime) is skipped, so an unresolved alert is emailed exactly once
    /// no matter how many sweeps re-run while it stays open.
    pub async fn dispatch_alert(&self, alert: &AlertRow) {
        let current = match self.alerts.find(&alert.alert_id).await {
            Ok(Some(row)) => row,
            Ok(None) => {
                tracing::warn!(alert_id = %alert.alert_id, "alert vanished before dispatch");
                return;
            }
            Err(err) => {
                tracing::error!(alert_id = %alert.alert_id, "alert re-read failed: {}", err);
                return;
            }
        };
        if current.last_sent_at.is_some() {
            tracing::debug!(alert_id = %alert.alert_id, "already notified, skipping");
            return;
        }
        if current.resolved {
            tracing::debug!(alert_id = %alert.alert_id, "resolved before dispatch, skipping");
            return;
        }

        let emails = match self.compose_recipients(&current).await {
            Ok(emails) => emails,
            Err(err) => {
                tracing::error!(alert_id = %alert.alert_id, "recipient composition failed: {}", err);
                return;
            }
        };

        for email in &emails {
            if self.send_with_retry(email).await {
                self.metrics.emails_sent_total.inc();
            } else {
                self.metrics.email_failures_total.inc();
                tracing::error!(
                    alert_id = %alert.alert_id,
                    to = %email.to,
                    "giving up on recipient after {} attempts",
                    MAX_SEND_ATTEMPTS
                );
            }
        }

        // Stamped after attempting the fan-out, whatever the outcomes:
        // delivery results feed logs and metrics, never alert state.
        if let Err(err) = self.alerts.touch_last_sent(&alert.alert_id).await {
            tracing::error!(alert_id = %alert.alert_id, "failed to stamp last_sent_at: {}", err);
        }
    }

    /// Build the role-ordered, address-deduplicated recipient list.
    pub async fn compose_recipients(
        &self,
        alert: &AlertRow,
    ) -> Result<Vec<OutboundEmail>, AppError> {
        let product = alert.product_name.as_str();
        let batch = alert.batch.as_str();
        let exp = alert.exp.as_str();
        let alert_type = alert.alert_type.as_str();
        let days = alert
            .days_to_expiry
            .map(|d| d.to_string())
            .unwrap_or_default();

        let mut emails = Vec::new();

        let chem_link = self.resolve_link(&alert.alert_id, "chemist");
        emails.push(OutboundEmail {
            to: self.config.pharmacy_email.clone(),
            subject: format!(
                "Inventory alert: {} (Batch {}) - {}",
                product, batch, alert_type
            ),
            text_body: format!(
                "Inventory alert for {} (Batch {}). Expiry: {} ({} days). Type: {}.\n\nConfirm removal: {}",
                product, batch, exp, days, alert_type, chem_link
            ),
            html_body: format!(
                "<p>Inventory alert for <strong>{}</strong> (Batch {}).<br>Expiry: {} ({} days).<br>Type: <strong>{}</strong>.</p><p><a href='{}'>Mark removed</a></p>",
                product, batch, exp, days, alert_type, chem_link
            ),
        });

        for patient in self.find_patients_for_med(product, batch).await? {
            let Some(address) = patient.notify_address() else {
                tracing::warn!(patient_id = %patient.patient_id, "patient has no notification address");
                continue;
            };
            let link = self.resolve_link(&alert.alert_id, "patient");
            emails.push(OutboundEmail {
                to: address.to_string(),
                subject: format!("Medicine expiry alert - {}", product),
                text_body: format!(
                    "Dear {}, your medicine {} (Batch {}) is {}. Expiry: {}.",
                    patient.name, product, batch, alert_type, exp
                ),
                html_body: format!(
                    "<p>Dear {},</p><p>Your medicine <strong>{}</strong> (Batch {}) is <strong>{}</strong>. Expiry: {}.</p><p><a href='{}'>I have discarded it</a></p>",
                    patient.name, product, batch, alert_type, exp, link
                ),
            });
        }

        if let Some(admin) = &self.config.admin_email {
            let link = self.resolve_link(&alert.alert_id, "admin");
            emails.push(OutboundEmail {
                to: admin.clone(),
                subject: format!("Alert: {} (Batch {}) - {}", product, batch, alert_type),
                text_body: format!(
                    "Admin notification: {} (Batch {}) - {}. Expiry: {}.",
                    product, batch, alert_type, exp
                ),
                html_body: format!(
                    "<p>Admin notification for <strong>{}</strong> (Batch {}) - {}.</p><p><a href='{}'>Mark resolved</a></p>",
                    product, batch, alert_type, link
                ),
            });
        }

        // Dedup by address keeping first occurrence, so an admin who is also
        // the pharmacy gets the pharmacy wording once.
        let mut seen = HashSet::new();
        Ok(emails
            .into_iter()
            .filter(|e| !e.to.trim().is_empty() && seen.insert(e.to.clone()))
            .collect())
    }

    /// Patients linked to `(product, batch)` through any prescription that
    /// lists the medication, case-insensitively.
    async fn find_patients_for_med(
        &self,
        product_name: &str,
        batch: &str,
    ) -> Result<Vec<PatientRow>, AppError> {
        let product = product_name.trim().to_lowercase();
        let batch = batch.trim().to_lowercase();

        let mut out = Vec::new();
        let mut seen_patients = HashSet::new();
        for prescription in self.prescriptions.list().await? {
            let listed = prescription.medications.iter().any(|m| {
                m.product_name.trim().to_lowercase() == product
                    && m.batch.trim().to_lowercase() == batch
            });
            if !listed {
                continue;
            }
            if !seen_patients.insert(prescription.patient_id.clone()) {
                continue;
            }
            if let Some(patient) = self.patients.find(&prescription.patient_id).await? {
                out.push(patient);
            }
        }
        Ok(out)
    }

    fn resolve_link(&self, alert_id: &str, role: &str) -> String {
        format!(
            "{}/api/resolve_alert?alert_id={}&user={}",
            self.config.site_base.trim_end_matches('/'),
            alert_id,
            role
        )
    }

    async fn send_with_retry(&self, email: &OutboundEmail) -> bool {
        for attempt in 0..MAX_SEND_ATTEMPTS {
            match self
                .notifier
                .send(&email.to, &email.subject, &email.text_body, &email.html_body)
                .await
            {
                Ok(()) => return true,
                Err(err) => {
                    tracing::warn!(
                        to = %email.to,
                        attempt = attempt + 1,
                        "send failed: {}",
                        err
                    );
                    if attempt + 1 < MAX_SEND_ATTEMPTS {
                        let backoff = RETRY_BASE_DELAY_MS * 2u64.pow(attempt);
                        let jitter = rand::thread_rng().gen_range(0..RETRY_BASE_DELAY_MS / 2);
                        tokio::time::sleep(Duration::from_millis(backoff + jitter)).await;
                    }
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_pool;
    use crate::repository::test_fixtures::{alert_row, patient_row, prescription_row};
    use crate::repository::{AlertType, Medication};
    use crate::services::mock_notifier::RecordingNotifier;

    struct Fixture {
        dispatcher: Dispatcher,
        notifier: Arc<RecordingNotifier>,
        alerts: AlertRepository,
        prescriptions: PrescriptionRepository,
        patients: PatientRepository,
    }

    async fn make_fixture(notifier: RecordingNotifier, admin: Option<&str>) -> Fixture {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        let alerts = AlertRepository::new(pool.clone());
        let prescriptions = PrescriptionRepository::new(pool.clone());
        let patients = PatientRepository::new(pool);
        let notifier = Arc::new(notifier);

        let dispatcher = Dispatcher::new(
            alerts.clone(),
            prescriptions.clone(),
            patients.clone(),
            notifier.clone(),
            DispatchConfig {
                pharmacy_email: "pharmacy@example.com".to_string(),
                admin_email: admin.map(str::to_string),
                site_base: "http://localhost:5000/".to_string(),
            },
            Arc::new(AppMetrics::new().unwrap()),
        );

        Fixture {
            dispatcher,
            notifier,
            alerts,
            prescriptions,
            patients,
        }
    }

    async fn link_patient(fx: &Fixture, name: &str, email: &str, product: &str, batch: &str) {
        let patient = patient_row(name, email);
        fx.patients.insert(&patient).await.unwrap();
        let prescription = prescription_row(
            &patient.patient_id,
            vec![Medication {
                product_name: product.to_string(),
                batch: batch.to_string(),
                qty: 1,
            }],
        );
        fx.prescriptions.insert(&prescription).await.unwrap();
    }

    #[tokio::test]
    async fn recipients_are_role_ordered() {
        let fx = make_fixture(RecordingNotifier::new(), Some("admin@example.com")).await;
        link_patient(&fx, "Asha", "asha@example.com", "Paracetamol", "B1").await;

        let alert = alert_row("Paracetamol", "B1", AlertType::Expired);
        let emails = fx.dispatcher.compose_recipients(&alert).await.unwrap();

        assert_eq!(emails.len(), 3);
        assert_eq!(emails[0].to, "pharmacy@example.com");
        assert_eq!(emails[1].to, "asha@example.com");
        assert_eq!(emails[2].to, "admin@example.com");
    }

    #[tokio::test]
    async fn duplicate_addresses_keep_first_occurrence() {
        // Admin shares the pharmacy inbox: one message, pharmacy wording.
        let fx = make_fixture(RecordingNotifier::new(), Some("pharmacy@example.com")).await;

        let alert = alert_row("Paracetamol", "B1", AlertType::Expired);
        let emails = fx.dispatcher.compose_recipients(&alert).await.unwrap();

        assert_eq!(emails.len(), 1);
        assert!(emails[0].subject.starts_with("Inventory alert"));
    }

    #[tokio::test]
    async fn patient_messages_are_personalized_and_linked() {
        let fx = make_fixture(RecordingNotifier::new(), None).await;
        link_patient(&fx, "Asha", "asha@example.com", "Paracetamol", "B1").await;

        let alert = alert_row("Paracetamol", "B1", AlertType::ExpiringSoon);
        let emails = fx.dispatcher.compose_recipients(&alert).await.unwrap();

        let patient_mail = &emails[1];
        assert!(patient_mail.text_body.contains("Dear Asha"));
        assert!(patient_mail.text_body.contains("expiring_soon"));
        let expected_link = format!(
            "http://localhost:5000/api/resolve_alert?alert_id={}&user=patient",
            alert.alert_id
        );
        assert!(patient_mail.html_body.contains(&expected_link));
    }

    #[tokio::test]
    async fn medication_match_is_case_insensitive() {
        let fx = make_fixture(RecordingNotifier::new(), None).await;
        link_patient(&fx, "Asha", "asha@example.com", "PARACETAMOL", "b1").await;

        let alert = alert_row("Paracetamol", "B1", AlertType::Expired);
        let emails = fx.dispatcher.compose_recipients(&alert).await.unwrap();
        assert_eq!(emails.len(), 2);
    }

    #[tokio::test]
    async fn patient_without_address_is_skipped() {
        let fx = make_fixture(RecordingNotifier::new(), None).await;
        let mut patient = patient_row("Ravi", "");
        patient.contact = String::new();
        fx.patients.insert(&patient).await.unwrap();
        let prescription = prescription_row(
            &patient.patient_id,
            vec![Medication {
                product_name: "Paracetamol".to_string(),
                batch: "B1".to_string(),
                qty: 1,
            }],
        );
        fx.prescriptions.insert(&prescription).await.unwrap();

        let alert = alert_row("Paracetamol", "B1", AlertType::Expired);
        let emails = fx.dispatcher.compose_recipients(&alert).await.unwrap();
        assert_eq!(emails.len(), 1); // pharmacy only
    }

    #[tokio::test]
    async fn dispatch_sends_and_stamps_last_sent() {
        let fx = make_fixture(RecordingNotifier::new(), None).await;

        let alert = alert_row("Paracetamol", "B1", AlertType::Expired);
        fx.alerts.insert(&alert).await.unwrap();

        fx.dispatcher.dispatch_alert(&alert).await;

        assert_eq!(fx.notifier.sent_count(), 1);
        let stored = fx.alerts.find(&alert.alert_id).await.unwrap().unwrap();
        assert!(stored.last_sent_at.is_some());
    }

    #[tokio::test]
    async fn already_notified_alert_is_not_resent() {
        let fx = make_fixture(RecordingNotifier::new(), None).await;

        let alert = alert_row("Paracetamol", "B1", AlertType::Expired);
        fx.alerts.insert(&alert).await.unwrap();

        fx.dispatcher.dispatch_alert(&alert).await;
        fx.dispatcher.dispatch_alert(&alert).await;

        assert_eq!(fx.notifier.sent_count(), 1);
    }

    #[tokio::test]
    async fn resolved_alert_is_not_dispatched() {
        let fx = make_fixture(RecordingNotifier::new(), None).await;

        let alert = alert_row("Paracetamol", "B1", AlertType::Expired);
        fx.alerts.insert(&alert).await.unwrap();
        fx.alerts.resolve(&alert.alert_id, "chemist").await.unwrap();

        fx.dispatcher.dispatch_alert(&alert).await;
        assert_eq!(fx.notifier.sent_count(), 0);
    }

    #[tokio::test]
    async fn one_failing_recipient_does_not_block_the_rest() {
        let notifier = RecordingNotifier::new().with_failure_for("asha@example.com");
        let fx = make_fixture(notifier, Some("admin@example.com")).await;
        link_patient(&fx, "Asha", "asha@example.com", "Paracetamol", "B1").await;

        let alert = alert_row("Paracetamol", "B1", AlertType::Expired);
        fx.alerts.insert(&alert).await.unwrap();

        fx.dispatcher.dispatch_alert(&alert).await;

        // Pharmacy and admin delivered; the failing patient was retried and
        // dropped; last_sent_at is stamped regardless.
        let sent = fx.notifier.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|m| m.to != "asha@example.com"));
        let stored = fx.alerts.find(&alert.alert_id).await.unwrap().unwrap();
        assert!(stored.last_sent_at.is_some());
    }

    #[tokio::test]
    async fn queue_worker_delivers_enqueued_alerts() {
        let fx = make_fixture(RecordingNotifier::new(), None).await;
        let notifier = fx.notifier.clone();
        let alerts_repo = fx.alerts.clone();

        let alert = alert_row("Paracetamol", "B1", AlertType::Expired);
        alerts_repo.insert(&alert).await.unwrap();

        let handle = Arc::new(fx.dispatcher).spawn();
        handle.enqueue(vec![alert.clone()]).await;

        // Give the worker a few scheduling turns to drain the queue.
        for _ in 0..50 {
            if notifier.sent_count() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(notifier.sent_count(), 1);
    }
}
