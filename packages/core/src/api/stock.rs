//! Stock ingestion and removal endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use crate::api::{eager_sweep, error_response, value_to_string, AppState};
use crate::error::AppError;
use crate::ledger::NewStockEntry;

/// Header aliases seen on real pharmacy bills, checked in order.
const PRODUCT_ALIASES: &[&str] = &[
    "product_name", "product name", "product", "medicine name", "name", "item", "description",
];
const BATCH_ALIASES: &[&str] = &["batch", "batch no", "batch number"];
const EXP_ALIASES: &[&str] = &["exp", "exp.", "expiry", "expiry date", "exp date", "exp_dt"];
const QTY_ALIASES: &[&str] = &["qty", "quantity", "qnty", "q"];

/// `POST /api/upload_bill` — ingest a parsed bill as a JSON array of rows.
///
/// Rows are heterogeneous: headers vary per supplier and some rows carry a
/// batch but no product name. Each row is normalised and upserted; a row
/// that fails is logged and skipped, and the response reports how many rows
/// actually landed; callers must inspect `imported`, not assume all input
/// rows applied.
pub async fn upload_bill(
    State(state): State<AppState>,
    Json(rows): Json<Vec<serde_json::Value>>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let mut imported = 0usize;
    let mut skipped = 0usize;

    for row in &rows {
        let Some(entry) = normalize_bill_row(row) else {
            skipped += 1;
            continue;
        };

        match state.ledger.upsert(&entry).await {
            Ok(_) => imported += 1,
            Err(AppError::Validation { message }) => {
                tracing::warn!("skipping bill row: {}", message);
                skipped += 1;
            }
            Err(err) => {
                // Keep processing the rest of the bill.
                tracing::error!("bill row failed: {}", err);
                skipped += 1;
            }
        }
    }

    // Newly ingested stock may already be expired or short; surface that
    // immediately instead of waiting for the next scheduled sweep.
    eager_sweep(&state).await;

    Ok(Json(serde_json::json!({
        "status": "ok",
        "imported": imported,
        "skipped": skipped,
    })))
}

/// Map one loosely-typed bill row onto a stock entry. Returns `None` when
/// the row carries neither a product name nor a batch.
fn normalize_bill_row(row: &serde_json::Value) -> Option<NewStockEntry> {
    let obj = row.as_object()?;

    let get = |aliases: &[&str]| -> String {
        for alias in aliases {
            for (key, value) in obj {
                if key.trim().to_lowercase() == *alias {
                    let s = value_to_string(value);
                    if !s.is_empty() {
                        return s;
                    }
                }
            }
        }
        String::new()
    };

    let product_name = get(PRODUCT_ALIASES);
    let batch = get(BATCH_ALIASES);
    if product_name.is_empty() && batch.is_empty() {
        return None;
    }

    // Quantities show up as "10", "10.0", or a bare number.
    let qty = get(QTY_ALIASES).parse::<f64>().map(|q| q as i64).unwrap_or(0);

    Some(NewStockEntry {
        product_name,
        hsn: get(&["hsn"]),
        mrp: get(&["mrp"]),
        batch,
        exp: get(EXP_ALIASES),
        qty,
        manufacturer: get(&["manufacturer"]),
        rate: get(&["rate"]),
        gtin: get(&["gtin"]),
    })
}

#[derive(Debug, Deserialize)]
pub struct DeleteStockRequest {
    pub product_name: Option<String>,
    pub batch: Option<String>,
}

/// `POST /api/delete_stock` — remove lots by product and/or batch and
/// resolve their outstanding alerts.
pub async fn delete_stock(
    State(state): State<AppState>,
    Json(body): Json<DeleteStockRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let outcome = state
        .ledger
        .remove_by_key(body.product_name.as_deref(), body.batch.as_deref())
        .await
        .map_err(error_response)?;

    Ok(Json(serde_json::json!({
        "status": "deleted",
        "removed": outcome.removed,
        "alerts_resolved": outcome.alerts_resolved,
    })))
}
