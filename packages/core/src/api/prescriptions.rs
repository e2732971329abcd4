//! Prescription authoring, lookup, and the QR-scan dispense endpoint.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::{eager_sweep, error_response, value_to_string, AppState};
use crate::dispense::DispenseReport;
use crate::repository::{Medication, PrescriptionRow, PrescriptionStatus};

/// `POST /api/create_prescription`
///
/// Accepts an optional caller-supplied `prescription_id` (the doctor's
/// client generates one for the QR label); reusing an existing id is a
/// conflict rather than a silent overwrite.
pub async fn create_prescription(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let patient_id = body.get("patient_id").map(value_to_string).unwrap_or_default();
    let doctor_name = body.get("doctor_name").map(value_to_string).unwrap_or_default();
    if patient_id.is_empty() || doctor_name.is_empty() || body.get("medications").is_none() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "error": "patient_id, doctor_name, medications required"
            })),
        ));
    }

    let medications: Vec<Medication> = body
        .get("medications")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": "invalid medications" })),
            )
        })?;

    let provided_id = body
        .get("prescription_id")
        .map(value_to_string)
        .filter(|s| !s.is_empty());
    let prescription_id = match provided_id {
        Some(id) => {
            let existing = state
                .prescriptions
                .find(&id)
                .await
                .map_err(|e| error_response(e.into()))?;
            if existing.is_some() {
                return Err((
                    StatusCode::CONFLICT,
                    Json(serde_json::json!({ "error": "prescription_id already exists" })),
                ));
            }
            id
        }
        None => Uuid::new_v4().to_string(),
    };

    let pharmacy_id = {
        let id = body.get("pharmacy_id").map(value_to_string).unwrap_or_default();
        if id.is_empty() { "pharmacy_demo".to_string() } else { id }
    };

    let row = PrescriptionRow {
        prescription_id: prescription_id.clone(),
        patient_id,
        doctor_name,
        pharmacy_id,
        medications,
        created_at: Utc::now().to_rfc3339(),
        qr_path: String::new(),
        status: PrescriptionStatus::Created,
    };
    state
        .prescriptions
        .insert(&row)
        .await
        .map_err(|e| error_response(e.into()))?;

    // Keep the doctor/chemist views current.
    eager_sweep(&state).await;

    Ok(Json(serde_json::json!({
        "status": "ok",
        "prescription_id": prescription_id,
    })))
}

/// `GET /api/prescription/:id`
pub async fn get_prescription(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PrescriptionRow>, (StatusCode, Json<serde_json::Value>)> {
    let row = state
        .prescriptions
        .find(&id)
        .await
        .map_err(|e| error_response(e.into()))?
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({ "error": "not found" })),
            )
        })?;

    Ok(Json(row))
}

#[derive(Debug, Deserialize)]
pub struct ScanQrRequest {
    pub prescription_id: Option<String>,
    pub pharmacy_id: Option<String>,
}

/// `POST /api/scan_qr` — dispense a prescription.
pub async fn scan_qr(
    State(state): State<AppState>,
    Json(body): Json<ScanQrRequest>,
) -> Result<Json<DispenseReport>, (StatusCode, Json<serde_json::Value>)> {
    let Some(prescription_id) = body.prescription_id.filter(|s| !s.trim().is_empty()) else {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "missing prescription id" })),
        ));
    };

    let report = state
        .dispense
        .process_scan(&prescription_id, body.pharmacy_id.as_deref())
        .await
        .map_err(error_response)?;

    Ok(Json(report))
}
