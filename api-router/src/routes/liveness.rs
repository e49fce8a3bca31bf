use axum::{response::IntoResponse, Json};
use serde_json::json;

/// Process liveness probe.
pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}
