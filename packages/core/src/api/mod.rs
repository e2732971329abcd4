//! HTTP route handlers.
//!
//! Thin transport layer over the ledger, alert engine, and dispense service.
//! Handlers map [`AppError`] onto status codes and JSON error bodies; all
//! business rules live below this module.

pub mod alerts;
pub mod health;
pub mod inventory;
pub mod patients;
pub mod prescriptions;
pub mod stock;

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;

use crate::alerts::dispatch::DispatchHandle;
use crate::alerts::engine::AlertEngine;
use crate::dispense::DispenseService;
use crate::error::AppError;
use crate::ledger::StockLedger;
use crate::metrics::AppMetrics;
use crate::repository::{PatientRepository, PrescriptionRepository, StockRepository};
use crate::scheduler::SweepSettings;

/// Shared state for all routes.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<AlertEngine>,
    pub ledger: Arc<StockLedger>,
    pub dispense: Arc<DispenseService>,
    pub dispatch: DispatchHandle,
    pub stock: StockRepository,
    pub prescriptions: PrescriptionRepository,
    pub patients: PatientRepository,
    pub metrics: Arc<AppMetrics>,
    pub sweep: SweepSettings,
}

/// Assemble the full application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health::health))
        .route("/metrics", get(metrics))
        .route("/api/upload_bill", post(stock::upload_bill))
        .route("/api/delete_stock", post(stock::delete_stock))
        .route("/api/inventory", get(inventory::inventory))
        .route("/api/alerts", get(alerts::alerts))
        .route("/api/resolve_alert", get(alerts::resolve_alert))
        .route("/api/register_patient", post(patients::register_patient))
        .route("/api/patients", get(patients::patients))
        .route("/api/create_prescription", post(prescriptions::create_prescription))
        .route("/api/prescription/:id", get(prescriptions::get_prescription))
        .route("/api/scan_qr", post(prescriptions::scan_qr))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// `GET /metrics` — Prometheus text exposition. Excluded from anything
/// auth-shaped so scrape agents can reach it.
async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

/// Standard error mapping used by every JSON handler.
pub(crate) fn error_response(err: AppError) -> (StatusCode, Json<serde_json::Value>) {
    let status = match &err {
        AppError::Validation { .. } | AppError::Parse { .. } => StatusCode::BAD_REQUEST,
        AppError::NotFound { .. } => StatusCode::NOT_FOUND,
        AppError::Conflict { .. } | AppError::InsufficientStock { .. } => StatusCode::CONFLICT,
        AppError::Config { .. } | AppError::Database(_) | AppError::Notify { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, Json(serde_json::json!({ "error": err.to_string() })))
}

/// Run an eager sweep-and-dispatch on behalf of a request handler.
/// Failures are logged and swallowed; read endpoints must not 500 because
/// the sweep hiccuped.
pub(crate) async fn eager_sweep(state: &AppState) {
    crate::scheduler::sweep_once(&state.engine, &state.dispatch, &state.metrics, &state.sweep)
        .await;
}

/// Fetch a string field from a loosely-typed JSON object, tolerating
/// numeric values the way uploaded bills and form clients produce them.
pub(crate) fn value_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.trim().to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}
