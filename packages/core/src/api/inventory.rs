//! Inventory read endpoint.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use crate::api::{error_response, AppState};
use crate::dates;
use crate::repository::StockRow;

/// A stock row annotated with expiry information for the dashboard.
#[derive(Debug, Serialize)]
pub struct InventoryItem {
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
    /// `None` when the expiry string does not parse.
    pub days_to_expiry: Option<i64>,
    pub expired: bool,
}

impl InventoryItem {
    fn from_row(row: StockRow, days_to_expiry: Option<i64>) -> Self {
        Self {
            product_name: row.product_name,
            hsn: row.hsn,
            mrp: row.mrp,
            batch: row.batch,
            exp: row.exp,
            qty: row.qty,
            manufacturer: row.manufacturer,
            rate: row.rate,
            gtin: row.gtin,
            last_update: row.last_update,
            days_to_expiry,
            expired: days_to_expiry.is_some_and(|d| d < 0),
        }
    }
}

/// `GET /api/inventory` — whole stock table with expiry annotations.
pub async fn inventory(
    State(state): State<AppState>,
) -> Result<Json<Vec<InventoryItem>>, (StatusCode, Json<serde_json::Value>)> {
    let rows = state.stock.list().await.map_err(|e| error_response(e.into()))?;

    let today = Utc::now().date_naive();
    let items = rows
        .into_iter()
        .map(|row| {
            let days = dates::days_until_expiry(&row.exp, today).ok();
            InventoryItem::from_row(row, days)
        })
        .collect();

    Ok(Json(items))
}
