//! Alert read and resolution endpoints.
//!
//! Routes:
//! - `GET /api/alerts`        — eager sweep, then the active (unresolved) alerts
//! - `GET /api/resolve_alert` — resolution action link target from emails

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use crate::api::{eager_sweep, error_response, AppState};
use crate::repository::AlertRow;

/// Roles a resolution link can carry.
const VALID_ROLES: &[&str] = &["chemist", "patient", "admin"];

/// `GET /api/alerts` — create and dispatch any new alerts, then return the
/// unresolved ones.
pub async fn alerts(
    State(state): State<AppState>,
) -> Result<Json<Vec<AlertRow>>, (StatusCode, Json<serde_json::Value>)> {
    eager_sweep(&state).await;

    let active = state
        .engine
        .active_alerts()
        .await
        .map_err(error_response)?;

    Ok(Json(active))
}

#[derive(Debug, Deserialize)]
pub struct ResolveAlertQuery {
    pub alert_id: Option<String>,
    pub user: Option<String>,
}

/// `GET /api/resolve_alert?alert_id=<id>&user=<chemist|patient|admin>`
///
/// This is the link embedded in notification emails, so success and
/// not-found both render as human-readable HTML.
pub async fn resolve_alert(
    State(state): State<AppState>,
    Query(query): Query<ResolveAlertQuery>,
) -> Response {
    let Some(alert_id) = query.alert_id.filter(|s| !s.trim().is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "alert_id required" })),
        )
            .into_response();
    };

    let user = query.user.unwrap_or_else(|| "patient".to_string());
    if !VALID_ROLES.contains(&user.as_str()) {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "error": format!(
                    "Invalid user '{}'. Must be one of: {}",
                    user,
                    VALID_ROLES.join(", ")
                )
            })),
        )
            .into_response();
    }

    match state.engine.resolve(&alert_id, &user).await {
        Ok(true) => Html(format!(
            "<h3>Thank you - alert {} marked resolved by {}.</h3>",
            alert_id, user
        ))
        .into_response(),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Html("<h3>Unable to mark alert (not found).</h3>".to_string()),
        )
            .into_response(),
        Err(err) => error_response(err).into_response(),
    }
}
