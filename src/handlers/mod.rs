pub mod account;
pub mod generation;
pub mod payments;
pub mod team;
pub mod webhooks;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::state::AppState;

pub async fn health(State(state): State<AppState>) -> Response {
    match state
        .supabase
        .select_many::<serde_json::Value>(
            "subscription_plans",
            &[("select", "id".to_string()), ("limit", "1".to_string())],
        )
        .await
    {
        Ok(_) => (StatusCode::OK, axum::Json(json!({ "status": "ok" }))).into_response(),
        Err(error) => {
            tracing::error!(error = %error, "database connectivity check failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                axum::Json(json!({ "status": "degraded", "error": "database unreachable" })),
            )
                .into_response()
        }
    }
}

pub async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "Not Found").into_response()
}
