use std::{pin::Pin, sync::Arc, time::Duration};

use async_openai::types::{
    ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
    CreateChatCompletionRequestArgs,
};
use async_trait::async_trait;
use common::error::AppError;
use futures::{Stream, StreamExt};
use tracing::debug;

type OpenAiClient = async_openai::Client<async_openai::config::OpenAIConfig>;

/// A fully assembled chat exchange: one system prompt and one user message
/// (conversation history is folded into the user message upstream).
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system_prompt: String,
    pub user_message: String,
}

pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, AppError>> + Send>>;

/// Text-in / text-out seam in front of the model provider.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, request: ChatRequest) -> Result<String, AppError>;

    /// Opens a token stream. Establishment failures surface as an error;
    /// mid-stream failures arrive as `Err` items.
    async fn stream(&self, request: ChatRequest) -> Result<TokenStream, AppError>;
}

/// OpenAI-compatible chat backend with a per-call timeout on the buffered path.
pub struct OpenAiChat {
    client: Arc<OpenAiClient>,
    model: String,
    timeout: Duration,
}

impl OpenAiChat {
    pub fn new(client: Arc<OpenAiClient>, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            model: model.into(),
            timeout,
        }
    }

    fn build_request(
        &self,
        request: &ChatRequest,
    ) -> Result<async_openai::types::CreateChatCompletionRequest, AppError> {
        Ok(CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages([
                ChatCompletionRequestSystemMessage::from(request.system_prompt.clone()).into(),
                ChatCompletionRequestUserMessage::from(request.user_message.clone()).into(),
            ])
            .build()?)
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    async fn complete(&self, request: ChatRequest) -> Result<String, AppError> {
        let api_request = self.build_request(&request)?;

        let response = tokio::time::timeout(self.timeout, self.client.chat().create(api_request))
            .await
            .map_err(|_| AppError::InternalError("LLM request timed out".to_string()))??;

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| AppError::LLMParsing("No content found in LLM response".into()))?;

        debug!(chars = content.len(), "LLM completion received");
        Ok(content)
    }

    async fn stream(&self, request: ChatRequest) -> Result<TokenStream, AppError> {
        let api_request = self.build_request(&request)?;
        let stream = self.client.chat().create_stream(api_request).await?;

        let tokens = stream.map(|result| match result {
            Ok(response) => Ok(response
                .choices
                .first()
                .and_then(|choice| choice.delta.content.clone())
                .unwrap_or_default()),
            Err(error) => Err(AppError::OpenAI(error)),
        });

        Ok(Box::pin(tokens))
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub use test_support::ScriptedModel;

#[cfg(any(test, feature = "test-utils"))]
mod test_support {
    use std::{collections::VecDeque, sync::Mutex};

    use futures::stream;

    use super::*;

    /// Replays canned replies in order. `complete` consumes one reply per
    /// call; `stream` chunks the reply at whitespace boundaries. Running out
    /// of replies is an error, which doubles as proof a path never hit the
    /// model.
    pub struct ScriptedModel {
        replies: Mutex<VecDeque<Result<String, String>>>,
    }

    impl ScriptedModel {
        pub fn new(replies: impl IntoIterator<Item = impl Into<String>>) -> Self {
            Self {
                replies: Mutex::new(replies.into_iter().map(|r| Ok(r.into())).collect()),
            }
        }

        pub fn failing(message: impl Into<String>) -> Self {
            Self {
                replies: Mutex::new(VecDeque::from([Err(message.into())])),
            }
        }

        fn next_reply(&self) -> Result<String, AppError> {
            match self.replies.lock().unwrap().pop_front() {
                Some(Ok(reply)) => Ok(reply),
                Some(Err(message)) => Err(AppError::InternalError(message)),
                None => Err(AppError::InternalError("scripted model exhausted".into())),
            }
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        async fn complete(&self, _request: ChatRequest) -> Result<String, AppError> {
            self.next_reply()
        }

        async fn stream(&self, _request: ChatRequest) -> Result<TokenStream, AppError> {
            let reply = self.next_reply()?;

            let mut chunks: Vec<Result<String, AppError>> = Vec::new();
            let mut current = String::new();
            for word in reply.split_inclusive(' ') {
                current.push_str(word);
                if current.len() >= 12 {
                    chunks.push(Ok(std::mem::take(&mut current)));
                }
            }
            if !current.is_empty() {
                chunks.push(Ok(current));
            }

            Ok(Box::pin(stream::iter(chunks)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_model_replays_in_order() {
        let model = ScriptedModel::new(["first", "second"]);
        let request = ChatRequest {
            system_prompt: "s".into(),
            user_message: "u".into(),
        };

        assert_eq!(model.complete(request.clone()).await.unwrap(), "first");
        assert_eq!(model.complete(request.clone()).await.unwrap(), "second");
        assert!(model.complete(request).await.is_err());
    }

    #[tokio::test]
    async fn scripted_stream_reassembles_to_the_reply() {
        let model = ScriptedModel::new(["a reasonably long streamed answer body"]);
        let request = ChatRequest {
            system_prompt: "s".into(),
            user_message: "u".into(),
        };

        let mut stream = model.stream(request).await.unwrap();
        let mut assembled = String::new();
        while let Some(chunk) = stream.next().await {
            assembled.push_str(&chunk.unwrap());
        }

        assert_eq!(assembled, "a reasonably long streamed answer body");
    }
}
