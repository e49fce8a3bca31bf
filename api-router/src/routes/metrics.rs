use axum::{extract::State, response::IntoResponse, Json};
use serde_json::json;

use crate::{api_state::ApiState, error::ApiError};

/// Aggregate feedback counters and cache statistics for debugging.
pub async fn debug_metrics(State(state): State<ApiState>) -> Result<impl IntoResponse, ApiError> {
    let feedback = state.ledger.metrics_snapshot().await?;
    let embedding_cache = state.embedder.cache_stats().await;

    Ok(Json(json!({
        "feedback": feedback,
        "embedding_cache": embedding_cache,
    })))
}
