use std::{sync::Arc, time::Duration};

use axum::{
    extract::State,
    http::header::{HeaderName, HeaderValue, CACHE_CONTROL},
    response::{
        sse::{Event, KeepAlive},
        IntoResponse, Response, Sse,
    },
    Json,
};
use futures::StreamExt;

use crate::{api_state::ApiState, error::ApiError};

use super::ChatBody;

/// Streamed answer endpoint. Every SSE event carries one JSON frame:
/// `meta`, `chunk`, `done` or `error`.
pub async fn chat_stream(State(state): State<ApiState>, Json(body): Json<ChatBody>) -> Response {
    let Some(message) = body.message() else {
        return ApiError::ValidationError("message is required".to_string()).into_response();
    };

    let frames = Arc::clone(&state.engine)
        .answer_stream(message.to_string(), body.conversation_id.clone())
        .map(|frame| Event::default().json_data(&frame));

    let mut response = Sse::new(frames)
        .keep_alive(
            KeepAlive::new()
                .interval(Duration::from_secs(15))
                .text("keep-alive"),
        )
        .into_response();

    let headers = response.headers_mut();
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(
        HeaderName::from_static("x-accel-buffering"),
        HeaderValue::from_static("no"),
    );

    response
}
