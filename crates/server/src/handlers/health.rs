//! Liveness and readiness probes. Live means the process is up; ready
//! additionally means the database answers.

use axum::{extract::State, http::StatusCode};

use crate::state::AppState;

/// GET /healthz/live
pub async fn live() -> StatusCode {
    StatusCode::OK
}

/// GET /healthz/ready
pub async fn ready(State(state): State<AppState>) -> StatusCode {
    match sqlx::query("SELECT 1").execute(&state.pool).await {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            tracing::warn!("readiness probe failed: {e}");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}
