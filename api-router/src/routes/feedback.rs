use std::collections::HashMap;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::Utc;
use common::error::AppError;
use retrieval_pipeline::vector::UpsertItem;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct FeedbackBody {
    pub response_id: Option<String>,
    pub feedback: Option<i32>,
    pub correction: Option<String>,
}

/// Records a user verdict on a response. On negative feedback the ledger
/// diagnoses the weakest hop; a usable correction is embedded and upserted as
/// a new retrievable document. Correction failures never fail the call.
pub async fn submit_feedback(
    State(state): State<ApiState>,
    Json(body): Json<FeedbackBody>,
) -> Result<impl IntoResponse, ApiError> {
    let response_id = body
        .response_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::ValidationError("response_id is required".to_string()))?
        .to_string();
    let feedback = body
        .feedback
        .ok_or_else(|| ApiError::ValidationError("feedback is required".to_string()))?;

    let correction = state
        .ledger
        .submit_feedback(&response_id, feedback, body.correction.as_deref())
        .await?;

    info!(%response_id, feedback, "Feedback recorded");

    if let Some(correction) = correction {
        if let Err(err) = inject_correction(&state, &correction).await {
            warn!(%err, "Failed to ingest correction, feedback still recorded");
        }
    }

    Ok((
        StatusCode::OK,
        Json(json!({ "status": "success", "message": "Feedback recorded" })),
    ))
}

/// Embeds the correction and upserts it so future retrieval can surface it.
async fn inject_correction(state: &ApiState, correction: &str) -> Result<(), AppError> {
    let values = state.embedder.embed(correction).await?;

    let mut metadata: HashMap<String, Value> = HashMap::new();
    metadata.insert("text".to_string(), Value::String(correction.to_string()));
    metadata.insert("type".to_string(), Value::String("correction".to_string()));
    metadata.insert(
        "timestamp".to_string(),
        json!(Utc::now().timestamp_millis()),
    );
    metadata.insert(
        "source".to_string(),
        Value::String("user_feedback".to_string()),
    );

    state
        .index
        .upsert(vec![UpsertItem {
            id: format!("correction-{}", Uuid::new_v4()),
            values,
            metadata,
        }])
        .await
}
