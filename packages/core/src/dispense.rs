//! Point-of-dispense flow.
//!
//! A QR scan dispenses a prescription: stock is decremented, a sale row is
//! recorded per applied item, the prescription transitions to `dispensed`
//! exactly once, and any medication close to (or past) expiry triggers an
//! immediate patient-only notification. The patient path deliberately
//! bypasses the dispatcher's fan-out: the chemist is standing at the
//! counter; the patient is the one walking away with the medicine.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::alerts::engine::{AlertEngine, Clock};
use crate::dates;
use crate::error::AppError;
use crate::ledger::StockLedger;
use crate::repository::{
    AlertType, PatientRepository, PrescriptionRepository, PrescriptionStatus, SaleRepository,
    SaleRow, StockRepository,
};
use crate::services::mailer::Notifier;

/// Outcome of one QR-scan dispense.
#[derive(Debug, Serialize)]
pub struct DispenseReport {
    pub prescription_id: String,
    pub items_applied: usize,
    pub items_skipped: usize,
    pub patient_alerts_sent: usize,
}

/// One patient notification actually emailed at dispense time.
#[derive(Debug, Clone, Serialize)]
pub struct SentAlert {
    pub product_name: String,
    pub batch: String,
    pub alert_type: AlertType,
    pub days_left: i64,
    pub email: String,
}

pub struct DispenseService {
    ledger: Arc<StockLedger>,
    stock: StockRepository,
    prescriptions: PrescriptionRepository,
    patients: PatientRepository,
    sales: SaleRepository,
    engine: Arc<AlertEngine>,
    notifier: Arc<dyn Notifier>,
    expiry_threshold_days: i64,
    clock: Clock,
}

impl DispenseService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ledger: Arc<StockLedger>,
        stock: StockRepository,
        prescriptions: PrescriptionRepository,
        patients: PatientRepository,
        sales: SaleRepository,
        engine: Arc<AlertEngine>,
        notifier: Arc<dyn Notifier>,
        expiry_threshold_days: i64,
    ) -> Self {
        Self::with_clock(
            ledger,
            stock,
            prescriptions,
            patients,
            sales,
            engine,
            notifier,
            expiry_threshold_days,
            Arc::new(|| Utc::now().date_naive()),
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn with_clock(
        ledger: Arc<StockLedger>,
        stock: StockRepository,
        prescriptions: PrescriptionRepository,
        patients: PatientRepository,
        sales: SaleRepository,
        engine: Arc<AlertEngine>,
        notifier: Arc<dyn Notifier>,
        expiry_threshold_days: i64,
        clock: Clock,
    ) -> Self {
        Self {
            ledger,
            stock,
            prescriptions,
            patients,
            sales,
            engine,
            notifier,
            expiry_threshold_days,
            clock,
        }
    }

    /// Dispense a prescription.
    ///
    /// The `created -> dispensed` transition happens exactly once: a second
    /// scan fails with `Conflict` and touches nothing. Per-item decrement
    /// failures (missing batch, short stock) are logged and counted as
    /// skipped; the rest of the prescription still dispenses.
    pub async fn process_scan(
        &self,
        prescription_id: &str,
        pharmacy_id: Option<&str>,
    ) -> Result<DispenseReport, AppError> {
        let prescription = self
            .prescriptions
            .find(prescription_id)
            .await?
            .ok_or_else(|| AppError::not_found("prescription not found"))?;

        if prescription.status == PrescriptionStatus::Dispensed {
            return Err(AppError::conflict(format!(
                "prescription {} already dispensed",
                prescription_id
            )));
        }

        let pharmacy = pharmacy_id.unwrap_or(&prescription.pharmacy_id);

        let mut items_applied = 0;
        let mut items_skipped = 0;
        for med in &prescription.medications {
            let qty = med.qty.max(1);
            match self
                .ledger
                .decrement(&med.product_name, &med.batch, qty)
                .await
            {
                Ok(_) => {
                    let sale = SaleRow {
                        sale_id: Uuid::new_v4().to_string(),
                        prescription_id: prescription_id.to_string(),
                        product_name: med.product_name.clone(),
                        batch: med.batch.clone(),
                        qty,
                        sold_at: Utc::now().to_rfc3339(),
                        pharmacy_id: pharmacy.to_string(),
                    };
                    self.sales.insert(&sale).await?;
                    items_applied += 1;
                }
                Err(err) => {
                    tracing::warn!(
                        product = %med.product_name,
                        batch = %med.batch,
                        "could not decrement stock: {}",
                        err
                    );
                    items_skipped += 1;
                }
            }
        }

        self.prescriptions
            .set_status(prescription_id, PrescriptionStatus::Dispensed)
            .await?;

        // Expiry alerts for the patient. A failure here must not undo the
        // dispense, so it degrades to zero alerts sent.
        let patient_alerts_sent = match self.check_and_alert(prescription_id).await {
            Ok(sent) => sent.len(),
            Err(err) => {
                tracing::error!(
                    prescription_id,
                    "dispense-time expiry check failed: {}",
                    err
                );
                0
            }
        };

        Ok(DispenseReport {
            prescription_id: prescription_id.to_string(),
            items_applied,
            items_skipped,
            patient_alerts_sent,
        })
    }

    /// Check a dispensed prescription's medications against the expiry
    /// threshold and email the patient about each one that is expired or
    /// expiring soon. Returns the alerts actually emailed.
    ///
    /// Alert rows go through [`AlertEngine::create_or_skip`] so this path
    /// shares the sweep's dedup invariant, but the patient email goes out
    /// regardless of dedup; they are receiving this lot now.
    pub async fn check_and_alert(
        &self,
        prescription_id: &str,
    ) -> Result<Vec<SentAlert>, AppError> {
        let Some(prescription) = self.prescriptions.find(prescription_id).await? else {
            return Ok(Vec::new());
        };
        let Some(patient) = self.patients.find(&prescription.patient_id).await? else {
            tracing::warn!(
                patient_id = %prescription.patient_id,
                "prescription references unknown patient"
            );
            return Ok(Vec::new());
        };
        let Some(address) = patient.notify_address().map(str::to_string) else {
            tracing::warn!(patient_id = %patient.patient_id, "patient has no notification address");
            return Ok(Vec::new());
        };

        let today = (self.clock)();
        let stock_rows = self.stock.list().await?;

        let mut sent = Vec::new();
        for med in &prescription.medications {
            let product = med.product_name.trim();
            let batch = med.batch.trim();
            if product.is_empty() || batch.is_empty() {
                continue;
            }

            let Some(stock_row) = stock_rows.iter().find(|r| {
                r.product_name.trim().to_lowercase() == product.to_lowercase()
                    && r.batch.trim().to_lowercase() == batch.to_lowercase()
            }) else {
                continue;
            };

            let days_left = match dates::days_until_expiry(&stock_row.exp, today) {
                Ok(days) => days,
                Err(_) => continue,
            };
            if days_left > self.expiry_threshold_days {
                continue;
            }

            let alert_type = if days_left < 0 {
                AlertType::Expired
            } else {
                AlertType::ExpiringSoon
            };

            self.engine
                .create_or_skip(product, batch, &stock_row.exp, Some(days_left), alert_type)
                .await?;

            let (subject, body, html) = compose_patient_alert(
                &patient.name,
                product,
                batch,
                &stock_row.exp,
                days_left,
                prescription_id,
                alert_type,
            );

            match self.notifier.send(&address, &subject, &body, &html).await {
                Ok(()) => {
                    tracing::info!(to = %address, product, "dispense-time alert emailed");
                    sent.push(SentAlert {
                        product_name: product.to_string(),
                        batch: batch.to_string(),
                        alert_type,
                        days_left,
                        email: address.clone(),
                    });
                }
                Err(err) => {
                    tracing::error!(to = %address, product, "dispense-time alert failed: {}", err);
                }
            }
        }

        Ok(sent)
    }
}

fn compose_patient_alert(
    patient_name: &str,
    product: &str,
    batch: &str,
    exp_raw: &str,
    days_left: i64,
    prescription_id: &str,
    alert_type: AlertType,
) -> (String, String, String) {
    if alert_type == AlertType::Expired {
        let subject = format!("Medicine expired alert - {}", product);
        let body = format!(
            "Dear {},\n\n\
             URGENT: The medicine '{}' (Batch: {}) that was dispensed to you has EXPIRED on {}.\n\n\
             DO NOT consume this medicine. It expired {} days ago.\n\n\
             Please contact your pharmacy immediately for a replacement.\n\n\
             Prescription ID: {}",
            patient_name,
            product,
            batch,
            exp_raw,
            days_left.abs(),
            prescription_id
        );
        let html = format!(
            "<p>Dear <strong>{}</strong>,</p>\
             <p style=\"color: red; font-weight: bold;\">URGENT: The medicine '{}' (Batch: {}) that was dispensed to you has EXPIRED on {}.</p>\
             <p><strong>DO NOT consume this medicine.</strong> It expired {} days ago.</p>\
             <p>Please contact your pharmacy immediately for a replacement.</p>\
             <p><small>Prescription ID: {}</small></p>",
            patient_name,
            product,
            batch,
            exp_raw,
            days_left.abs(),
            prescription_id
        );
        (subject, body, html)
    } else {
        let subject = format!("Medicine expiring soon alert - {}", product);
        let body = format!(
            "Dear {},\n\n\
             IMPORTANT: The medicine '{}' (Batch: {}) that was dispensed to you will expire soon on {}.\n\n\
             Days until expiry: {} days\n\n\
             Please use this medicine before the expiry date or contact your pharmacy for guidance.\n\n\
             Prescription ID: {}",
            patient_name, product, batch, exp_raw, days_left, prescription_id
        );
        let html = format!(
            "<p>Dear <strong>{}</strong>,</p>\
             <p style=\"color: orange; font-weight: bold;\">IMPORTANT: The medicine '{}' (Batch: {}) that was dispensed to you will expire soon on {}.</p>\
             <p><strong>Days until expiry: {} days</strong></p>\
             <p>Please use this medicine before the expiry date or contact your pharmacy for guidance.</p>\
             <p><small>Prescription ID: {}</small></p>",
            patient_name, product, batch, exp_raw, days_left, prescription_id
        );
        (subject, body, html)
    }
}
