pub mod admin;
pub mod transactions;
pub mod webhook;

use crate::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};

/// Dependency health; 503 only when a critical dependency is down.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.health.check_health().await;
    let status_code = if report.status == "unhealthy" {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (status_code, Json(report))
}
