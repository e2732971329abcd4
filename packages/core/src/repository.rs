//! Database repositories for the pharmacy tables.
//!
//! All SQLite read/write logic lives here, one repository per table:
//! stock, alerts, prescriptions, patients, sales. The ledger and alert
//! engine load whole tables through these repositories and do their
//! matching in memory; inventories are small and this keeps the matching
//! rules (case-insensitive identity keys) in one visible place instead of
//! scattered across SQL strings.
//!
//! Rows are mapped with `try_get` + `filter_map`; a row that fails to map
//! is dropped rather than failing the whole read.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

// ---- Row types ----

/// One stock lot. `id` is the SQLite rowid, used for targeted updates.
#[derive(Debug, Clone)]
pub struct StockRow {
    pub id: i64,
    pub product_name: String,
    pub hsn: String,
    pub mrp: String,
    pub batch: String,
    pub exp: String,
    pub qty: i64,
    pub manufacturer: String,
    pub rate: String,
    pub gtin: String,
    pub last_update: String,
}

/// Alert classification. Exactly one of these is raised per stock row and
/// expiry conditions take precedence over low stock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    Expired,
    ExpiringSoon,
    LowStock,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::Expired => "expired",
            AlertType::ExpiringSoon => "expiring_soon",
            AlertType::LowStock => "low_stock",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "expired" => Some(AlertType::Expired),
            "expiring_soon" => Some(AlertType::ExpiringSoon),
            "low_stock" => Some(AlertType::LowStock),
            _ => None,
        }
    }
}

impl std::fmt::Display for AlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single alert row. At most one unresolved alert exists per
/// case-insensitive `(product_name, batch, alert_type)`.
#[derive(Debug, Clone, Serialize)]
pub struct AlertRow {
    pub alert_id: String,
    pub product_name: String,
    pub batch: String,
    pub exp: String,
    pub days_to_expiry: Option<i64>,
    pub alert_type: AlertType,
    pub created_at: String,
    pub last_sent_at: Option<String>,
    pub resolved: bool,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<String>,
}

/// One medication line inside a prescription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Medication {
    pub product_name: String,
    pub batch: String,
    #[serde(default = "default_med_qty")]
    pub qty: i64,
}

fn default_med_qty() -> i64 {
    1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrescriptionStatus {
    Created,
    Dispensed,
}

impl PrescriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrescriptionStatus::Created => "created",
            PrescriptionStatus::Dispensed => "dispensed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(PrescriptionStatus::Created),
            "dispensed" => Some(PrescriptionStatus::Dispensed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PrescriptionRow {
    pub prescription_id: String,
    pub patient_id: String,
    pub doctor_name: String,
    pub pharmacy_id: String,
    pub medications: Vec<Medication>,
    pub created_at: String,
    pub qr_path: String,
    pub status: PrescriptionStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct PatientRow {
    pub patient_id: String,
    pub name: String,
    pub age: String,
    pub gender: String,
    pub contact: String,
    pub email: String,
    pub notes: String,
    pub registered_at: String,
}

impl PatientRow {
    /// Preferred notification address: email, falling back to contact.
    pub fn notify_address(&self) -> Option<&str> {
        let email = self.email.trim();
        if !email.is_empty() {
            return Some(email);
        }
        let contact = self.contact.trim();
        if !contact.is_empty() {
            return Some(contact);
        }
        None
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SaleRow {
    pub sale_id: String,
    pub prescription_id: String,
    pub product_name: String,
    pub batch: String,
    pub qty: i64,
    pub sold_at: String,
    pub pharmacy_id: String,
}

// ---- Stock ----

#[derive(Clone)]
pub struct StockRepository {
    pool: SqlitePool,
}

impl StockRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Load the whole stock table, insertion order preserved.
    pub async fn list(&self) -> Result<Vec<StockRow>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT rowid, product_name, hsn, mrp, batch, exp, qty,
                    manufacturer, rate, gtin, last_update
             FROM medicine_stock
             ORDER BY rowid ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().filter_map(map_stock_row).collect())
    }

    /// Append a new stock lot. Returns the new rowid.
    pub async fn insert(&self, row: &StockRow) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO medicine_stock
             (product_name, hsn, mrp, batch, exp, qty, manufacturer, rate, gtin, last_update)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&row.product_name)
        .bind(&row.hsn)
        .bind(&row.mrp)
        .bind(&row.batch)
        .bind(&row.exp)
        .bind(row.qty)
        .bind(&row.manufacturer)
        .bind(&row.rate)
        .bind(&row.gtin)
        .bind(&row.last_update)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Overwrite the quantity of one lot and stamp `last_update`.
    /// Returns `false` when the rowid no longer exists.
    pub async fn set_qty(&self, id: i64, qty: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE medicine_stock SET qty = ?, last_update = ? WHERE rowid = ?",
        )
        .bind(qty)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete lots matching the given non-empty subset of
    /// `(product_name, batch)`, case-insensitively. Returns rows removed.
    pub async fn delete_matching(
        &self,
        product_name: Option<&str>,
        batch: Option<&str>,
    ) -> Result<u64, sqlx::Error> {
        let result = match (product_name, batch) {
            (Some(product), Some(batch)) => {
                sqlx::query(
                    "DELETE FROM medicine_stock
                     WHERE LOWER(TRIM(product_name)) = ? AND LOWER(TRIM(batch)) = ?",
                )
                .bind(product.trim().to_lowercase())
                .bind(batch.trim().to_lowercase())
                .execute(&self.pool)
                .await?
            }
            (None, Some(batch)) => {
                sqlx::query("DELETE FROM medicine_stock WHERE LOWER(TRIM(batch)) = ?")
                    .bind(batch.trim().to_lowercase())
                    .execute(&self.pool)
                    .await?
            }
            (Some(product), None) => {
                sqlx::query("DELETE FROM medicine_stock WHERE LOWER(TRIM(product_name)) = ?")
                    .bind(product.trim().to_lowercase())
                    .execute(&self.pool)
                    .await?
            }
            (None, None) => return Ok(0),
        };

        Ok(result.rows_affected())
    }
}

fn map_stock_row(row: SqliteRow) -> Option<StockRow> {
    Some(StockRow {
        id: row.try_get("rowid").ok()?,
        product_name: row.try_get("product_name").ok()?,
        hsn: row.try_get("hsn").ok()?,
        mrp: row.try_get("mrp").ok()?,
        batch: row.try_get("batch").ok()?,
        exp: row.try_get("exp").ok()?,
        qty: row.try_get("qty").ok()?,
        manufacturer: row.try_get("manufacturer").ok()?,
        rate: row.try_get("rate").ok()?,
        gtin: row.try_get("gtin").ok()?,
        last_update: row.try_get("last_update").ok()?,
    })
}

// ---- Alerts ----

#[derive(Clone)]
pub struct AlertRepository {
    pool: SqlitePool,
}

impl AlertRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, alert: &AlertRow) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO alerts
             (alert_id, product_name, batch, exp, days_to_expiry, alert_type,
              created_at, last_sent_at, resolved, resolved_by, resolved_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&alert.alert_id)
        .bind(&alert.product_name)
        .bind(&alert.batch)
        .bind(&alert.exp)
        .bind(alert.days_to_expiry)
        .bind(alert.alert_type.as_str())
        .bind(&alert.created_at)
        .bind(&alert.last_sent_at)
        .bind(if alert.resolved { 1i64 } else { 0i64 })
        .bind(&alert.resolved_by)
        .bind(&alert.resolved_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn find(&self, alert_id: &str) -> Result<Option<AlertRow>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT alert_id, product_name, batch, exp, days_to_expiry, alert_type,
                    created_at, last_sent_at, resolved, resolved_by, resolved_at
             FROM alerts WHERE alert_id = ?",
        )
        .bind(alert_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.and_then(map_alert_row))
    }

    /// All unresolved alerts, oldest first.
    pub async fn list_active(&self) -> Result<Vec<AlertRow>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT alert_id, product_name, batch, exp, days_to_expiry, alert_type,
                    created_at, last_sent_at, resolved, resolved_by, resolved_at
             FROM alerts WHERE resolved = 0 ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().filter_map(map_alert_row).collect())
    }

    /// The dedup invariant check: does an unresolved alert already exist for
    /// this case-insensitive `(product, batch, alert_type)` key?
    pub async fn unresolved_exists(
        &self,
        product_name: &str,
        batch: &str,
        alert_type: AlertType,
    ) -> Result<bool, sqlx::Error> {
        let row = sqlx::query(
            "SELECT COUNT(*) as cnt FROM alerts
             WHERE LOWER(TRIM(product_name)) = ?
               AND LOWER(TRIM(batch)) = ?
               AND alert_type = ?
               AND resolved = 0",
        )
        .bind(product_name.trim().to_lowercase())
        .bind(batch.trim().to_lowercase())
        .bind(alert_type.as_str())
        .fetch_one(&self.pool)
        .await?;

        let count: i64 = row.try_get("cnt").unwrap_or(0);
        Ok(count > 0)
    }

    /// Mark one alert resolved. No-op returning `false` when the id is
    /// unknown or the alert was already resolved; `resolved` is monotonic
    /// and the first resolver wins.
    pub async fn resolve(&self, alert_id: &str, actor: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE alerts SET resolved = 1, resolved_by = ?, resolved_at = ?
             WHERE alert_id = ? AND resolved = 0",
        )
        .bind(actor)
        .bind(Utc::now().to_rfc3339())
        .bind(alert_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Bulk-resolve all unresolved alerts matching the given non-empty
    /// subset of `(product, batch)`, case-insensitively. Returns the number
    /// resolved; no selector means nothing is touched.
    pub async fn resolve_matching(
        &self,
        product_name: Option<&str>,
        batch: Option<&str>,
        actor: &str,
    ) -> Result<u64, sqlx::Error> {
        let now = Utc::now().to_rfc3339();

        let result = match (product_name, batch) {
            (Some(product), Some(batch)) => {
                sqlx::query(
                    "UPDATE alerts SET resolved = 1, resolved_by = ?, resolved_at = ?
                     WHERE LOWER(TRIM(product_name)) = ?
                       AND LOWER(TRIM(batch)) = ?
                       AND resolved = 0",
                )
                .bind(actor)
                .bind(&now)
                .bind(product.trim().to_lowercase())
                .bind(batch.trim().to_lowercase())
                .execute(&self.pool)
                .await?
            }
            (None, Some(batch)) => {
                sqlx::query(
                    "UPDATE alerts SET resolved = 1, resolved_by = ?, resolved_at = ?
                     WHERE LOWER(TRIM(batch)) = ? AND resolved = 0",
                )
                .bind(actor)
                .bind(&now)
                .bind(batch.trim().to_lowercase())
                .execute(&self.pool)
                .await?
            }
            (Some(product), None) => {
                sqlx::query(
                    "UPDATE alerts SET resolved = 1, resolved_by = ?, resolved_at = ?
                     WHERE LOWER(TRIM(product_name)) = ? AND resolved = 0",
                )
                .bind(actor)
                .bind(&now)
                .bind(product.trim().to_lowercase())
                .execute(&self.pool)
                .await?
            }
            (None, None) => return Ok(0),
        };

        Ok(result.rows_affected())
    }

    /// Record that a notification went out for this alert.
    pub async fn touch_last_sent(&self, alert_id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE alerts SET last_sent_at = ? WHERE alert_id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(alert_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

fn map_alert_row(row: SqliteRow) -> Option<AlertRow> {
    let alert_type: String = row.try_get("alert_type").ok()?;
    let resolved: i64 = row.try_get("resolved").ok()?;

    Some(AlertRow {
        alert_id: row.try_get("alert_id").ok()?,
        product_name: row.try_get("product_name").ok()?,
        batch: row.try_get("batch").ok()?,
        exp: row.try_get("exp").ok()?,
        days_to_expiry: row.try_get("days_to_expiry").ok()?,
        alert_type: AlertType::parse(&alert_type)?,
        created_at: row.try_get("created_at").ok()?,
        last_sent_at: row.try_get("last_sent_at").ok()?,
        resolved: resolved != 0,
        resolved_by: row.try_get("resolved_by").ok()?,
        resolved_at: row.try_get("resolved_at").ok()?,
    })
}

// ---- Prescriptions ----

#[derive(Clone)]
pub struct PrescriptionRepository {
    pool: SqlitePool,
}

impl PrescriptionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, row: &PrescriptionRow) -> Result<(), sqlx::Error> {
        let medications_json =
            serde_json::to_string(&row.medications).unwrap_or_else(|_| "[]".to_string());

        sqlx::query(
            "INSERT INTO prescriptions
             (prescription_id, patient_id, doctor_name, pharmacy_id,
              medications_json, created_at, qr_path, status)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&row.prescription_id)
        .bind(&row.patient_id)
        .bind(&row.doctor_name)
        .bind(&row.pharmacy_id)
        .bind(&medications_json)
        .bind(&row.created_at)
        .bind(&row.qr_path)
        .bind(row.status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn find(&self, prescription_id: &str) -> Result<Option<PrescriptionRow>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT prescription_id, patient_id, doctor_name, pharmacy_id,
                    medications_json, created_at, qr_path, status
             FROM prescriptions WHERE prescription_id = ?",
        )
        .bind(prescription_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.and_then(map_prescription_row))
    }

    pub async fn list(&self) -> Result<Vec<PrescriptionRow>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT prescription_id, patient_id, doctor_name, pharmacy_id,
                    medications_json, created_at, qr_path, status
             FROM prescriptions ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().filter_map(map_prescription_row).collect())
    }

    pub async fn set_status(
        &self,
        prescription_id: &str,
        status: PrescriptionStatus,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE prescriptions SET status = ? WHERE prescription_id = ?")
            .bind(status.as_str())
            .bind(prescription_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn set_qr_path(
        &self,
        prescription_id: &str,
        qr_path: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE prescriptions SET qr_path = ? WHERE prescription_id = ?")
            .bind(qr_path)
            .bind(prescription_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

fn map_prescription_row(row: SqliteRow) -> Option<PrescriptionRow> {
    let medications_json: String = row.try_get("medications_json").ok()?;
    let status: String = row.try_get("status").ok()?;

    Some(PrescriptionRow {
        prescription_id: row.try_get("prescription_id").ok()?,
        patient_id: row.try_get("patient_id").ok()?,
        doctor_name: row.try_get("doctor_name").ok()?,
        pharmacy_id: row.try_get("pharmacy_id").ok()?,
        medications: serde_json::from_str(&medications_json).unwrap_or_default(),
        created_at: row.try_get("created_at").ok()?,
        qr_path: row.try_get("qr_path").ok()?,
        status: PrescriptionStatus::parse(&status)?,
    })
}

// ---- Patients ----

#[derive(Clone)]
pub struct PatientRepository {
    pool: SqlitePool,
}

impl PatientRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, row: &PatientRow) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO patients
             (patient_id, name, age, gender, contact, email, notes, registered_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&row.patient_id)
        .bind(&row.name)
        .bind(&row.age)
        .bind(&row.gender)
        .bind(&row.contact)
        .bind(&row.email)
        .bind(&row.notes)
        .bind(&row.registered_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn find(&self, patient_id: &str) -> Result<Option<PatientRow>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT patient_id, name, age, gender, contact, email, notes, registered_at
             FROM patients WHERE patient_id = ?",
        )
        .bind(patient_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.and_then(map_patient_row))
    }

    pub async fn list(&self) -> Result<Vec<PatientRow>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT patient_id, name, age, gender, contact, email, notes, registered_at
             FROM patients ORDER BY registered_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().filter_map(map_patient_row).collect())
    }
}

fn map_patient_row(row: SqliteRow) -> Option<PatientRow> {
    Some(PatientRow {
        patient_id: row.try_get("patient_id").ok()?,
        name: row.try_get("name").ok()?,
        age: row.try_get("age").ok()?,
        gender: row.try_get("gender").ok()?,
        contact: row.try_get("contact").ok()?,
        email: row.try_get("email").ok()?,
        notes: row.try_get("notes").ok()?,
        registered_at: row.try_get("registered_at").ok()?,
    })
}

// ---- Sales ----

#[derive(Clone)]
pub struct SaleRepository {
    pool: SqlitePool,
}

impl SaleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, row: &SaleRow) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO sales
             (sale_id, prescription_id, product_name, batch, qty, sold_at, pharmacy_id)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&row.sale_id)
        .bind(&row.prescription_id)
        .bind(&row.product_name)
        .bind(&row.batch)
        .bind(row.qty)
        .bind(&row.sold_at)
        .bind(&row.pharmacy_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn list_for_prescription(
        &self,
        prescription_id: &str,
    ) -> Result<Vec<SaleRow>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT sale_id, prescription_id, product_name, batch, qty, sold_at, pharmacy_id
             FROM sales WHERE prescription_id = ? ORDER BY sold_at ASC",
        )
        .bind(prescription_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                Some(SaleRow {
                    sale_id: row.try_get("sale_id").ok()?,
                    prescription_id: row.try_get("prescription_id").ok()?,
                    product_name: row.try_get("product_name").ok()?,
                    batch: row.try_get("batch").ok()?,
                    qty: row.try_get("qty").ok()?,
                    sold_at: row.try_get("sold_at").ok()?,
                    pharmacy_id: row.try_get("pharmacy_id").ok()?,
                })
            })
            .collect())
    }
}



#[cfg(test)]
mod alert_repo_tests {
    use super::test_fixtures::alert_row;
    use super::*;
    use crate::db::create_pool;

    async fn make_repo() -> AlertRepository {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        AlertRepository::new(pool)
    }

    #[tokio::test]
    async fn insert_and_list_active() {
        let repo = make_repo().await;
        repo.insert(&alert_row("Paracetamol", "B1", AlertType::Expired)).await.unwrap();

        let active = repo.list_active().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].alert_type, AlertType::Expired);
        assert!(!active[0].resolved);
    }

    #[tokio::test]
    async fn unresolved_exists_matches_case_insensitively() {
        let repo = make_repo().await;
        repo.insert(&alert_row("Paracetamol", "B1", AlertType::Expired)).await.unwrap();

        assert!(repo
            .unresolved_exists("PARACETAMOL", "b1", AlertType::Expired)
            .await
            .unwrap());
        assert!(!repo
            .unresolved_exists("Paracetamol", "B1", AlertType::LowStock)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn resolve_is_monotonic() {
        let repo = make_repo().await;
        let alert = alert_row("Paracetamol", "B1", AlertType::Expired);
        repo.insert(&alert).await.unwrap();

        assert!(repo.resolve(&alert.alert_id, "patient").await.unwrap());
        // Second resolution is a no-op and the first resolver wins.
        assert!(!repo.resolve(&alert.alert_id, "admin").await.unwrap());

        let stored = repo.find(&alert.alert_id).await.unwrap().unwrap();
        assert!(stored.resolved);
        assert_eq!(stored.resolved_by.as_deref(), Some("patient"));
    }

    #[tokio::test]
    async fn resolve_returns_false_for_unknown_id() {
        let repo = make_repo().await;
        assert!(!repo.resolve("nope", "admin").await.unwrap());
    }

    #[tokio::test]
    async fn resolve_matching_only_touches_unresolved() {
        let repo = make_repo().await;
        let a = alert_row("Paracetamol", "B1", AlertType::Expired);
        let b = alert_row("Paracetamol", "B1", AlertType::LowStock);
        let other = alert_row("Ibuprofen", "B9", AlertType::Expired);
        repo.insert(&a).await.unwrap();
        repo.insert(&b).await.unwrap();
        repo.insert(&other).await.unwrap();

        repo.resolve(&a.alert_id, "chemist").await.unwrap();

        let resolved = repo
            .resolve_matching(Some("paracetamol"), Some("b1"), "chemist")
            .await
            .unwrap();
        assert_eq!(resolved, 1);
        assert_eq!(repo.list_active().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn resolve_matching_by_batch_only() {
        let repo = make_repo().await;
        repo.insert(&alert_row("Paracetamol", "B1", AlertType::Expired)).await.unwrap();
        repo.insert(&alert_row("Ibuprofen", "B1", AlertType::Expired)).await.unwrap();

        let resolved = repo.resolve_matching(None, Some("b1"), "chemist").await.unwrap();
        assert_eq!(resolved, 2);
        assert!(repo.list_active().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn resolve_matching_with_no_selectors_is_a_noop() {
        let repo = make_repo().await;
        repo.insert(&alert_row("Paracetamol", "B1", AlertType::Expired)).await.unwrap();
        assert_eq!(repo.resolve_matching(None, None, "chemist").await.unwrap(), 0);
        assert_eq!(repo.list_active().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn touch_last_sent_stamps_without_resolving() {
        let repo = make_repo().await;
        let alert = alert_row("Paracetamol", "B1", AlertType::Expired);
        repo.insert(&alert).await.unwrap();

        assert!(repo.touch_last_sent(&alert.alert_id).await.unwrap());

        let stored = repo.find(&alert.alert_id).await.unwrap().unwrap();
        assert!(stored.last_sent_at.is_some());
        assert!(!stored.resolved);
    }

    #[tokio::test]
    async fn no_two_active_alerts_share_a_key() {
        let repo = make_repo().await;
        repo.insert(&alert_row("Paracetamol", "B1", AlertType::Expired)).await.unwrap();
        repo.insert(&alert_row("paracetamol", "b1", AlertType::LowStock)).await.unwrap();

        let active = repo.list_active().await.unwrap();
        let mut keys: Vec<(String, String, AlertType)> = active
            .iter()
            .map(|a| {
                (
                    a.product_name.to_lowercase(),
                    a.batch.to_lowercase(),
                    a.alert_type,
                )
            })
            .collect();
        let before = keys.len();
        keys.dedup();
        assert_eq!(before, keys.len());
    }
}


#[cfg(test)]
mod sale_repo_tests {
    use super::*;
    use crate::db::create_pool;

    #[tokio::test]
    async fn insert_and_list_for_prescription() {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        let repo = SaleRepository::new(pool);

        let sale = SaleRow {
            sale_id: uuid::Uuid::new_v4().to_string(),
            prescription_id: "rx-1".to_string(),
            product_name: "Paracetamol".to_string(),
            batch: "B1".to_string(),
            qty: 2,
            sold_at: Utc::now().to_rfc3339(),
            pharmacy_id: "pharmacy_demo".to_string(),
        };
        repo.insert(&sale).await.unwrap();

        let sales = repo.list_for_prescription("rx-1").await.unwrap();
        assert_eq!(sales.len(), 1);
        assert_eq!(sales[0].qty, 2);
        assert!(repo.list_for_prescription("rx-2").await.unwrap().is_empty());
    }
}
