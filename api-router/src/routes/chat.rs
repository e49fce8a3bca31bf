use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use retrieval_pipeline::orchestrator::error_answer;
use tracing::error;

use crate::{api_state::ApiState, error::ApiError};

use super::ChatBody;

/// Buffered answer endpoint. Failures keep the answer-body shape so clients
/// always have blocks to render.
pub async fn chat(State(state): State<ApiState>, Json(body): Json<ChatBody>) -> Response {
    let Some(message) = body.message() else {
        return ApiError::ValidationError("message is required".to_string()).into_response();
    };

    match state
        .engine
        .answer(message, body.conversation_id.clone())
        .await
    {
        Ok(answer) => (StatusCode::OK, Json(answer)).into_response(),
        Err(err) => {
            error!(%err, "Chat request failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(error_answer())).into_response()
        }
    }
}
