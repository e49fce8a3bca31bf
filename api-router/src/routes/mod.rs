pub mod chat;
pub mod chat_stream;
pub mod feedback;
pub mod liveness;
pub mod metrics;
pub mod readiness;

use serde::Deserialize;

/// Shared body of both chat endpoints.
#[derive(Debug, Deserialize)]
pub struct ChatBody {
    pub message: Option<String>,
    pub conversation_id: Option<String>,
}

impl ChatBody {
    /// The message, if present and non-blank.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref().map(str::trim).filter(|m| !m.is_empty())
    }
}
