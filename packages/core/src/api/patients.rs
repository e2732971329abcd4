//! Patient registration and listing.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use uuid::Uuid;

use crate::api::{error_response, value_to_string, AppState};
use crate::repository::PatientRow;

/// `POST /api/register_patient` — register a patient. `email` is optional
/// and falls back to `contact` so notifications still have an address.
pub async fn register_patient(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let get = |field: &str| body.get(field).map(value_to_string).unwrap_or_default();

    for field in ["name", "age", "gender", "contact"] {
        if get(field).is_empty() {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": format!("{} missing", field) })),
            ));
        }
    }

    let contact = get("contact");
    let email = {
        let email = get("email");
        if email.is_empty() { contact.clone() } else { email }
    };

    let patient = PatientRow {
        patient_id: Uuid::new_v4().to_string(),
        name: get("name"),
        age: get("age"),
        gender: get("gender"),
        contact,
        email,
        notes: get("notes"),
        registered_at: Utc::now().to_rfc3339(),
    };

    state
        .patients
        .insert(&patient)
        .await
        .map_err(|e| error_response(e.into()))?;

    Ok(Json(serde_json::json!({
        "status": "ok",
        "patient_id": patient.patient_id,
    })))
}

/// `GET /api/patients` — list all registered patients.
pub async fn patients(
    State(state): State<AppState>,
) -> Result<Json<Vec<PatientRow>>, (StatusCode, Json<serde_json::Value>)> {
    let rows = state
        .patients
        .list()
        .await
        .map_err(|e| error_response(e.into()))?;
    Ok(Json(rows))
}
