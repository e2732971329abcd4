//! Stock ledger: merge-or-append ingestion, decrement, removal.
//!
//! Every operation is a read-modify-write over the stock table, so the
//! ledger holds a mutex across each cycle; two concurrent upserts of the
//! same lot must not each read the old quantity and overwrite the other's
//! write.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::alerts::engine::AlertEngine;
use crate::error::AppError;
use crate::repository::{StockRepository, StockRow};

/// An incoming stock record, before identity-key normalization.
/// All descriptive fields default to empty; bills rarely carry every column.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewStockEntry {
    #[serde(default)]
    pub product_name: String,
    #[serde(default)]
    pub hsn: String,
    #[serde(default)]
    pub mrp: String,
    #[serde(default)]
    pub batch: String,
    #[serde(default)]
    pub exp: String,
    #[serde(default)]
    pub qty: i64,
    #[serde(default)]
    pub manufacturer: String,
    #[serde(default)]
    pub rate: String,
    #[serde(default)]
    pub gtin: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// Matched an existing lot; quantities were added.
    Merged { new_qty: i64 },
    /// No identity-key match; a new lot row was appended.
    Inserted,
}

#[derive(Debug, Clone, Copy)]
pub struct RemovalOutcome {
    pub removed: u64,
    pub alerts_resolved: u64,
}

pub struct StockLedger {
    stock: StockRepository,
    engine: Arc<AlertEngine>,
    // Guards the read-modify-write cycle of upsert/decrement/remove.
    write_lock: Mutex<()>,
}

impl StockLedger {
    pub fn new(stock: StockRepository, engine: Arc<AlertEngine>) -> Self {
        Self {
            stock,
            engine,
            write_lock: Mutex::new(()),
        }
    }

    /// Merge-or-append one stock record.
    ///
    /// Rejects non-positive quantities with a `Validation` error; batch
    /// ingestion callers treat that as a skipped row, not a failure. Two
    /// entries whose case-insensitive trimmed identity key matches are the
    /// same logical lot and their quantities add; anything else appends.
    pub async fn upsert(&self, entry: &NewStockEntry) -> Result<UpsertOutcome, AppError> {
        if entry.qty <= 0 {
            return Err(AppError::validation(format!(
                "non-positive quantity {} for batch '{}'",
                entry.qty,
                entry.batch.trim()
            )));
        }

        let _guard = self.write_lock.lock().await;

        let rows = self.stock.list().await?;

        let mut incoming = normalize(entry);
        // Bills sometimes list a batch without a name column; inherit the
        // name from an existing lot with the same batch.
        if incoming.product_name.is_empty() && !incoming.batch.is_empty() {
            if let Some(existing) = rows
                .iter()
                .find(|r| norm(&r.batch) == norm(&incoming.batch))
            {
                incoming.product_name = existing.product_name.trim().to_string();
            }
        }

        let incoming_key = row_key(&incoming);
        if let Some(matched) = rows.iter().find(|r| row_key(r) == incoming_key) {
            let new_qty = matched.qty + entry.qty;
            self.stock.set_qty(matched.id, new_qty).await?;
            tracing::debug!(
                product = %incoming.product_name,
                batch = %incoming.batch,
                new_qty,
                "merged stock into existing lot"
            );
            return Ok(UpsertOutcome::Merged { new_qty });
        }

        let mut row = incoming;
        row.qty = entry.qty;
        row.last_update = Utc::now().to_rfc3339();
        self.stock.insert(&row).await?;
        tracing::debug!(
            product = %row.product_name,
            batch = %row.batch,
            qty = row.qty,
            "appended new stock lot"
        );
        Ok(UpsertOutcome::Inserted)
    }

    /// Subtract `qty` from the lot matching a case-insensitive product name
    /// and exact batch. Fails without mutating when the lot is missing or
    /// short. Returns the remaining quantity.
    pub async fn decrement(
        &self,
        product_name: &str,
        batch: &str,
        qty: i64,
    ) -> Result<i64, AppError> {
        if qty <= 0 {
            return Err(AppError::validation(format!("non-positive quantity {}", qty)));
        }

        let _guard = self.write_lock.lock().await;

        let rows = self.stock.list().await?;
        let matched = rows
            .iter()
            .find(|r| {
                norm(&r.product_name) == norm(product_name) && r.batch.trim() == batch.trim()
            })
            .ok_or_else(|| AppError::not_found("batch not found"))?;

        if matched.qty < qty {
            return Err(AppError::InsufficientStock {
                have: matched.qty,
                requested: qty,
            });
        }

        let remaining = matched.qty - qty;
        self.stock.set_qty(matched.id, remaining).await?;
        Ok(remaining)
    }

    /// Delete all lots matching the given non-empty subset of
    /// `(product_name, batch)` and bulk-resolve their outstanding alerts.
    pub async fn remove_by_key(
        &self,
        product_name: Option<&str>,
        batch: Option<&str>,
    ) -> Result<RemovalOutcome, AppError> {
        let product_name = product_name.map(str::trim).filter(|s| !s.is_empty());
        let batch = batch.map(str::trim).filter(|s| !s.is_empty());
        if product_name.is_none() && batch.is_none() {
            return Err(AppError::validation(
                "at least one of product_name or batch is required",
            ));
        }

        let removed = {
            let _guard = self.write_lock.lock().await;
            self.stock.delete_matching(product_name, batch).await?
        };

        let alerts_resolved = self
            .engine
            .resolve_by_match(product_name, batch, "chemist")
            .await?;

        tracing::info!(removed, alerts_resolved, "removed stock by key");
        Ok(RemovalOutcome {
            removed,
            alerts_resolved,
        })
    }

    pub async fn list(&self) -> Result<Vec<StockRow>, AppError> {
        Ok(self.stock.list().await?)
    }
}

fn norm(s: &str) -> String {
    s.trim().to_lowercase()
}

fn normalize(entry: &NewStockEntry) -> StockRow {
    StockRow {
        id: 0,
        product_name: entry.product_name.trim().to_string(),
        hsn: entry.hsn.trim().to_string(),
        mrp: entry.mrp.trim().to_string(),
        batch: entry.batch.trim().to_string(),
        exp: entry.exp.trim().to_string(),
        qty: entry.qty,
        manufacturer: entry.manufacturer.trim().to_string(),
        rate: entry.rate.trim().to_string(),
        gtin: entry.gtin.trim().to_string(),
        last_update: String::new(),
    }
}

type IdentityKey = (
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    String,
);

fn row_key(row: &StockRow) -> IdentityKey {
    (
        norm(&row.product_name),
        norm(&row.hsn),
        norm(&row.mrp),
        norm(&row.batch),
        norm(&row.exp),
        norm(&row.manufacturer),
        norm(&row.rate),
        norm(&row.gtin),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_pool;
    use crate::repository::{AlertRepository, AlertType};

    fn entry(product: &str, batch: &str, exp: &str, qty: i64) -> NewStockEntry {
        NewStockEntry {
            product_name: product.to_string(),
            batch: batch.to_string(),
            exp: exp.to_string(),
            qty,
            ..NewStockEntry::default()
        }
    }

    async fn make_ledger() -> (StockLedger, Arc<AlertEngine>, StockRepository) {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        let stock = StockRepository::new(pool.clone());
        let alerts = AlertRepository::new(pool);
        let engine = Arc::new(AlertEngine::new(stock.clone(), alerts));
        let ledger = StockLedger::new(stock.clone(), engine.clone());
        (ledger, engine, stock)
    }

    #[tokio::test]
    async fn identical_keys_merge_and_quantities_add() {
        let (ledger, _, stock) = make_ledger().await;

        let first = ledger.upsert(&entry("Paracetamol", "B1", "Aug-26", 10)).await.unwrap();
        assert_eq!(first, UpsertOutcome::Inserted);

        let second = ledger.upsert(&entry("Paracetamol", "B1", "Aug-26", 7)).await.unwrap();
        assert_eq!(second, UpsertOutcome::Merged { new_qty: 17 });

        let rows = stock.list().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].qty, 17);
    }

    #[tokio::test]
    async fn key_match_ignores_case_and_whitespace() {
        let (ledger, _, stock) = make_ledger().await;

        ledger.upsert(&entry("Paracetamol", "B1", "Aug-26", 10)).await.unwrap();
        let outcome = ledger.upsert(&entry("  PARACETAMOL ", " b1 ", " aug-26 ", 5)).await.unwrap();

        assert_eq!(outcome, UpsertOutcome::Merged { new_qty: 15 });
        assert_eq!(stock.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn any_differing_key_field_appends_a_new_lot() {
        let (ledger, _, stock) = make_ledger().await;

        ledger.upsert(&entry("Paracetamol", "B1", "Aug-26", 10)).await.unwrap();
        // Same product and batch but a different expiry is a different lot.
        ledger.upsert(&entry("Paracetamol", "B1", "Sep-26", 5)).await.unwrap();

        assert_eq!(stock.list().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn non_positive_quantity_is_rejected_without_mutation() {
        let (ledger, _, stock) = make_ledger().await;

        assert!(matches!(
            ledger.upsert(&entry("Paracetamol", "B1", "Aug-26", 0)).await,
            Err(AppError::Validation { .. })
        ));
        assert!(matches!(
            ledger.upsert(&entry("Paracetamol", "B1", "Aug-26", -4)).await,
            Err(AppError::Validation { .. })
        ));
        assert!(stock.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn blank_product_name_inherits_from_same_batch() {
        let (ledger, _, stock) = make_ledger().await;

        ledger.upsert(&entry("Paracetamol", "B1", "Aug-26", 10)).await.unwrap();
        let outcome = ledger.upsert(&entry("", "B1", "Aug-26", 5)).await.unwrap();

        // With the inherited name the identity key matches and the lot merges.
        assert_eq!(outcome, UpsertOutcome::Merged { new_qty: 15 });
        let rows = stock.list().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].product_name, "Paracetamol");
    }

    #[tokio::test]
    async fn decrement_subtracts_and_reports_remaining() {
        let (ledger, _, stock) = make_ledger().await;
        ledger.upsert(&entry("Paracetamol", "B1", "Aug-26", 30)).await.unwrap();

        let remaining = ledger.decrement("paracetamol", "B1", 10).await.unwrap();
        assert_eq!(remaining, 20);
        assert_eq!(stock.list().await.unwrap()[0].qty, 20);
    }

    #[tokio::test]
    async fn decrement_beyond_stock_fails_without_mutation() {
        let (ledger, _, stock) = make_ledger().await;
        ledger.upsert(&entry("Paracetamol", "B1", "Aug-26", 30)).await.unwrap();

        let err = ledger.decrement("Paracetamol", "B1", 50).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::InsufficientStock { have: 30, requested: 50 }
        ));
        assert_eq!(stock.list().await.unwrap()[0].qty, 30);
    }

    #[tokio::test]
    async fn decrement_unknown_batch_is_not_found() {
        let (ledger, _, _) = make_ledger().await;
        ledger.upsert(&entry("Paracetamol", "B1", "Aug-26", 30)).await.unwrap();

        assert!(matches!(
            ledger.decrement("Paracetamol", "B9", 1).await,
            Err(AppError::NotFound { .. })
        ));
        // Batch matching is exact, unlike the product name.
        assert!(matches!(
            ledger.decrement("Paracetamol", "b1", 1).await,
            Err(AppError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn remove_by_key_deletes_lots_and_resolves_alerts() {
        let (ledger, engine, stock) = make_ledger().await;
        ledger.upsert(&entry("Paracetamol", "B1", "Jan-24", 3)).await.unwrap();
        ledger.upsert(&entry("Ibuprofen", "B2", "Jan-30", 30)).await.unwrap();

        engine
            .create_or_skip("Paracetamol", "B1", "Jan-24", Some(-100), AlertType::Expired)
            .await
            .unwrap();

        let outcome = ledger
            .remove_by_key(Some("Paracetamol"), Some("B1"))
            .await
            .unwrap();
        assert_eq!(outcome.removed, 1);
        assert_eq!(outcome.alerts_resolved, 1);

        assert_eq!(stock.list().await.unwrap().len(), 1);
        assert!(engine.active_alerts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn remove_by_key_requires_a_selector() {
        let (ledger, _, _) = make_ledger().await;
        assert!(matches!(
            ledger.remove_by_key(None, None).await,
            Err(AppError::Validation { .. })
        ));
        assert!(matches!(
            ledger.remove_by_key(Some("  "), Some("")).await,
            Err(AppError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn remove_by_batch_only() {
        let (ledger, _, stock) = make_ledger().await;
        ledger.upsert(&entry("Paracetamol", "B1", "Aug-26", 3)).await.unwrap();
        ledger.upsert(&entry("Ibuprofen", "b1", "Aug-26", 3)).await.unwrap();

        let outcome = ledger.remove_by_key(None, Some("B1")).await.unwrap();
        assert_eq!(outcome.removed, 2);
        assert!(stock.list().await.unwrap().is_empty());
    }
}
