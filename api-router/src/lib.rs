use api_state::ApiState;
use axum::{
    routing::{get, post},
    Router,
};
use routes::{
    chat::chat, chat_stream::chat_stream, feedback::submit_feedback, liveness::health,
    metrics::debug_metrics, readiness::ready,
};

pub mod api_state;
pub mod error;
mod routes;

/// Router for the chat, feedback and operational endpoints.
pub fn api_routes(state: ApiState) -> Router {
    Router::new()
        .route("/api/chat", post(chat))
        .route("/api/chat/stream", post(chat_stream))
        .route("/api/feedback", post(submit_feedback))
        .route("/api/debug/metrics", get(debug_metrics))
        .route("/health", get(health))
        .route("/ready", get(ready))
        .with_state(state)
}
