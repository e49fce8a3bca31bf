use std::{sync::Arc, time::Duration};

use async_stream::stream;
use common::{
    conversation::{format_window, ConversationMemory, TurnRole},
    error::AppError,
    storage::{
        ledger::FeedbackLedger,
        types::{evidence_chain::EvidenceChain, response_record::ResponseRecord},
    },
};
use futures::{Stream, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    answer::{
        build_context, detect_mode, parse_llm_json_response, AnswerMode, Block, Source,
        ERROR_ANSWER, FALLBACK_ANSWER,
    },
    hybrid::highest_score,
    llm::{ChatModel, ChatRequest},
    multihop::{MultiHopController, MultiHopOutcome},
    prompts::{
        general_user_message, rag_user_message, GENERAL_SYSTEM_PROMPT, RAG_SYSTEM_PROMPT,
    },
};

/// Complete buffered answer as returned to the HTTP layer.
#[derive(Debug, Serialize)]
pub struct ChatAnswer {
    pub blocks: Vec<Block>,
    pub sources: Vec<Source>,
    pub mode: AnswerMode,
    pub request_id: String,
}

/// One server-sent frame of a streamed answer.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamFrame {
    Meta {
        mode: AnswerMode,
        sources: Vec<Source>,
        request_id: String,
    },
    Chunk {
        data: String,
    },
    Done,
    Error {
        message: String,
    },
}

struct Grounding {
    context: String,
    sources: Vec<Source>,
    confidence: f64,
}

/// Entry point for both boundary operations: classifies the request, drives
/// multi-hop retrieval for knowledge questions, invokes the model and records
/// the response and its evidence chain.
pub struct AnswerEngine {
    controller: MultiHopController,
    ledger: FeedbackLedger,
    memory: Arc<ConversationMemory>,
    model: Arc<dyn ChatModel>,
    similarity_threshold: f64,
    stream_timeout: Duration,
}

impl AnswerEngine {
    pub fn new(
        controller: MultiHopController,
        ledger: FeedbackLedger,
        memory: Arc<ConversationMemory>,
        model: Arc<dyn ChatModel>,
        similarity_threshold: f64,
        stream_timeout: Duration,
    ) -> Self {
        Self {
            controller,
            ledger,
            memory,
            model,
            similarity_threshold,
            stream_timeout,
        }
    }

    pub async fn answer(
        &self,
        message: &str,
        conversation_id: Option<String>,
    ) -> Result<ChatAnswer, AppError> {
        let request_id = short_request_id();
        let conversation_id = conversation_id.unwrap_or_else(|| request_id.clone());
        let mode = detect_mode(message);
        let history = format_window(&self.memory.window(&conversation_id).await);
        info!(%request_id, mode = mode.as_str(), "Handling chat request");

        match mode {
            AnswerMode::General => {
                let raw = self
                    .model
                    .complete(ChatRequest {
                        system_prompt: GENERAL_SYSTEM_PROMPT.to_string(),
                        user_message: general_user_message(&history, message),
                    })
                    .await?;

                self.remember_exchange(&conversation_id, message, &raw).await;

                Ok(ChatAnswer {
                    blocks: parse_llm_json_response(&raw),
                    sources: Vec::new(),
                    mode,
                    request_id,
                })
            }
            AnswerMode::Rag => {
                let outcome = self.controller.run(message).await?;
                let Some(grounding) = self.grounding(&outcome) else {
                    self.remember_exchange(&conversation_id, message, FALLBACK_ANSWER)
                        .await;
                    return Ok(fallback_answer(request_id));
                };

                let raw = self
                    .model
                    .complete(ChatRequest {
                        system_prompt: RAG_SYSTEM_PROMPT.to_string(),
                        user_message: rag_user_message(&grounding.context, &history, message),
                    })
                    .await?;

                self.record_response(&request_id, &outcome, &raw, grounding.confidence)
                    .await;
                self.remember_exchange(&conversation_id, message, &raw).await;

                Ok(ChatAnswer {
                    blocks: parse_llm_json_response(&raw),
                    sources: grounding.sources,
                    mode,
                    request_id,
                })
            }
        }
    }

    /// Token-streamed variant. Frames: one `meta`, any number of `chunk`s,
    /// then `done`; failures surface as an `error` frame. The ledger and
    /// conversation memory are finalised from whatever content was streamed,
    /// including partial content after a timeout or client disconnect.
    pub fn answer_stream(
        self: Arc<Self>,
        message: String,
        conversation_id: Option<String>,
    ) -> impl Stream<Item = StreamFrame> + Send + 'static {
        let engine = self;

        stream! {
            let request_id = short_request_id();
            let conversation_id = conversation_id.unwrap_or_else(|| request_id.clone());
            let mode = detect_mode(&message);
            let history = format_window(&engine.memory.window(&conversation_id).await);
            info!(%request_id, mode = mode.as_str(), "Handling streaming chat request");

            let request;
            let mut ledger_target: Option<(MultiHopOutcome, f64)> = None;

            match mode {
                AnswerMode::General => {
                    yield StreamFrame::Meta {
                        mode,
                        sources: Vec::new(),
                        request_id: request_id.clone(),
                    };
                    request = ChatRequest {
                        system_prompt: GENERAL_SYSTEM_PROMPT.to_string(),
                        user_message: general_user_message(&history, &message),
                    };
                }
                AnswerMode::Rag => {
                    let outcome = match engine.controller.run(&message).await {
                        Ok(outcome) => outcome,
                        Err(err) => {
                            error!(%err, "Multi-hop retrieval failed");
                            yield StreamFrame::Error {
                                message: "Retrieval failed".to_string(),
                            };
                            return;
                        }
                    };

                    match engine.grounding(&outcome) {
                        None => {
                            yield StreamFrame::Meta {
                                mode,
                                sources: Vec::new(),
                                request_id: request_id.clone(),
                            };
                            yield StreamFrame::Chunk {
                                data: FALLBACK_ANSWER.to_string(),
                            };
                            engine
                                .remember_exchange(&conversation_id, &message, FALLBACK_ANSWER)
                                .await;
                            yield StreamFrame::Done;
                            return;
                        }
                        Some(grounding) => {
                            yield StreamFrame::Meta {
                                mode,
                                sources: grounding.sources.clone(),
                                request_id: request_id.clone(),
                            };
                            request = ChatRequest {
                                system_prompt: RAG_SYSTEM_PROMPT.to_string(),
                                user_message: rag_user_message(
                                    &grounding.context,
                                    &history,
                                    &message,
                                ),
                            };
                            ledger_target = Some((outcome, grounding.confidence));
                        }
                    }
                }
            }

            let mut tokens = match engine.model.stream(request).await {
                Ok(tokens) => tokens,
                Err(err) => {
                    error!(%err, "Failed to open LLM stream");
                    yield StreamFrame::Error {
                        message: "The language model is unavailable".to_string(),
                    };
                    return;
                }
            };

            // Finalisation runs in its own task so a dropped client still
            // lands the partial content in memory and the ledger.
            let (tx, rx) = mpsc::channel::<String>(64);
            tokio::spawn(finalise_stream(
                Arc::clone(&engine),
                rx,
                conversation_id.clone(),
                message.clone(),
                request_id.clone(),
                ledger_target,
            ));

            let deadline = tokio::time::Instant::now() + engine.stream_timeout;
            loop {
                match tokio::time::timeout_at(deadline, tokens.next()).await {
                    Err(_) => {
                        warn!(%request_id, "LLM stream timed out, finalising partial answer");
                        break;
                    }
                    Ok(None) => break,
                    Ok(Some(Ok(chunk))) => {
                        if chunk.is_empty() {
                            continue;
                        }
                        let _ = tx.send(chunk.clone()).await;
                        yield StreamFrame::Chunk { data: chunk };
                    }
                    Ok(Some(Err(err))) => {
                        error!(%err, "LLM stream failed mid-answer");
                        yield StreamFrame::Error {
                            message: "Stream interrupted".to_string(),
                        };
                        return;
                    }
                }
            }

            drop(tx);
            yield StreamFrame::Done;
        }
    }

    /// Decides whether retrieval supports a grounded answer: the best fused
    /// score must clear the similarity threshold and the context must be
    /// non-blank.
    fn grounding(&self, outcome: &MultiHopOutcome) -> Option<Grounding> {
        let highest = highest_score(&outcome.results)?;
        if highest < self.similarity_threshold {
            debug!(highest, threshold = self.similarity_threshold, "Below answer threshold");
            return None;
        }

        let (context, sources) = build_context(&outcome.results, self.similarity_threshold);
        if context.trim().is_empty() {
            return None;
        }

        Some(Grounding {
            context,
            sources,
            confidence: highest,
        })
    }

    /// Ledger bookkeeping for a completed grounded answer. Failures are
    /// logged and contained: the user still gets their answer, at worst
    /// without an evidence chain.
    async fn record_response(
        &self,
        request_id: &str,
        outcome: &MultiHopOutcome,
        content: &str,
        confidence: f64,
    ) {
        let response = ResponseRecord::new(request_id, outcome.query_id.clone(), content);
        if let Err(err) = self.ledger.log_response(response).await {
            error!(%err, "Failed to record response, skipping evidence chain");
            return;
        }

        let chain = EvidenceChain::new(
            Uuid::new_v4().to_string(),
            request_id,
            outcome.hop_ids.clone(),
            outcome.results.iter().map(|r| r.id.clone()).collect(),
            confidence,
        );
        if let Err(err) = self.ledger.log_evidence_chain(chain).await {
            error!(%err, "Failed to record evidence chain");
        }
    }

    async fn remember_exchange(&self, conversation_id: &str, user: &str, assistant: &str) {
        self.memory
            .append(conversation_id, TurnRole::User, user)
            .await;
        self.memory
            .append(conversation_id, TurnRole::Assistant, assistant)
            .await;
    }
}

async fn finalise_stream(
    engine: Arc<AnswerEngine>,
    mut rx: mpsc::Receiver<String>,
    conversation_id: String,
    user_message: String,
    request_id: String,
    ledger_target: Option<(MultiHopOutcome, f64)>,
) {
    let mut full_content = String::new();
    while let Some(chunk) = rx.recv().await {
        full_content.push_str(&chunk);
    }

    if full_content.is_empty() {
        debug!(%request_id, "No streamed content, nothing to finalise");
        return;
    }

    if let Some((outcome, confidence)) = ledger_target {
        engine
            .record_response(&request_id, &outcome, &full_content, confidence)
            .await;
    }
    engine
        .remember_exchange(&conversation_id, &user_message, &full_content)
        .await;
}

pub fn fallback_answer(request_id: String) -> ChatAnswer {
    ChatAnswer {
        blocks: vec![Block::Paragraph {
            content: FALLBACK_ANSWER.to_string(),
        }],
        sources: Vec::new(),
        mode: AnswerMode::Rag,
        request_id,
    }
}

/// Body of the HTTP 500 response when answering fails outright.
pub fn error_answer() -> ChatAnswer {
    ChatAnswer {
        blocks: vec![Block::Paragraph {
            content: ERROR_ANSWER.to_string(),
        }],
        sources: Vec::new(),
        mode: AnswerMode::General,
        request_id: short_request_id(),
    }
}

/// First 8 hex characters of a fresh UUID; doubles as the response id a
/// feedback submission refers back to.
fn short_request_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        hybrid::HybridRetriever,
        llm::ScriptedModel,
        vector::{text_match, StaticIndex},
    };
    use common::storage::db::SurrealDbClient;

    const BLOCKS_REPLY: &str =
        r#"{"blocks": [{"type": "paragraph", "content": "Here is the answer."}]}"#;
    const SUFFICIENT: &str = r#"{"sufficient": true, "queries": []}"#;

    async fn engine_with(
        index: StaticIndex,
        model: ScriptedModel,
    ) -> (Arc<AnswerEngine>, FeedbackLedger) {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");
        let ledger = FeedbackLedger::new(Arc::new(db));
        let retriever = HybridRetriever::new(Arc::new(index), ledger.clone());
        let model: Arc<dyn ChatModel> = Arc::new(model);
        let controller =
            MultiHopController::new(retriever, ledger.clone(), Arc::clone(&model), 1);
        let engine = AnswerEngine::new(
            controller,
            ledger.clone(),
            Arc::new(ConversationMemory::new(6)),
            model,
            0.5,
            Duration::from_secs(5),
        );
        (Arc::new(engine), ledger)
    }

    fn assert_hex(id: &str) {
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn small_talk_skips_retrieval() {
        let (engine, _) = engine_with(StaticIndex::new(), ScriptedModel::new([BLOCKS_REPLY])).await;

        let answer = engine.answer("hello", None).await.expect("answer failed");

        assert_eq!(answer.mode, AnswerMode::General);
        assert!(answer.sources.is_empty());
        assert_eq!(answer.blocks.len(), 1);
        assert_hex(&answer.request_id);
    }

    #[tokio::test]
    async fn weak_retrieval_falls_back() {
        let index = StaticIndex::with_fallback(vec![text_match("doc-a", 0.2, "irrelevant")]);
        // one decomposition round, then no grounded answer is attempted
        let (engine, _) = engine_with(index, ScriptedModel::new([SUFFICIENT])).await;

        let answer = engine
            .answer("What is Project X?", None)
            .await
            .expect("answer failed");

        assert_eq!(answer.mode, AnswerMode::Rag);
        assert!(answer.sources.is_empty());
        match &answer.blocks[0] {
            Block::Paragraph { content } => {
                assert!(content.contains("don't have that information"));
            }
            other => panic!("expected paragraph, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn grounded_answer_uses_strong_documents_only() {
        let index = StaticIndex::with_fallback(vec![
            text_match("doc-a", 0.82, "Project X is a lunar lander."),
            text_match("doc-b", 0.75, "Project X launched in 2024."),
            text_match("doc-c", 0.40, "unrelated trivia"),
        ]);
        let (engine, ledger) =
            engine_with(index, ScriptedModel::new([SUFFICIENT, BLOCKS_REPLY])).await;

        let answer = engine
            .answer("What is Project X?", None)
            .await
            .expect("answer failed");

        assert_eq!(answer.mode, AnswerMode::Rag);
        assert_eq!(answer.sources.len(), 2);
        assert_eq!(answer.blocks.len(), 1);

        // the response row shares the request id and carries an evidence chain
        let response: Option<ResponseRecord> = ledger
            .db()
            .get_item(&answer.request_id)
            .await
            .expect("lookup failed");
        let response = response.expect("response row missing");
        assert_eq!(response.user_feedback, 0);

        let chain = EvidenceChain::for_response(&answer.request_id, ledger.db())
            .await
            .expect("chain lookup failed");
        assert!(chain.is_some());
    }

    #[tokio::test]
    async fn streaming_fallback_is_one_chunk() {
        let index = StaticIndex::with_fallback(vec![text_match("doc-a", 0.1, "weak")]);
        let (engine, _) = engine_with(index, ScriptedModel::new([SUFFICIENT])).await;

        let frames: Vec<StreamFrame> = engine
            .answer_stream("What is Project X?".to_string(), None)
            .collect()
            .await;

        assert_eq!(frames.len(), 3);
        assert!(matches!(
            &frames[0],
            StreamFrame::Meta { mode: AnswerMode::Rag, sources, .. } if sources.is_empty()
        ));
        assert!(matches!(
            &frames[1],
            StreamFrame::Chunk { data } if data.contains("don't have that information")
        ));
        assert_eq!(frames[2], StreamFrame::Done);
    }

    #[tokio::test]
    async fn streaming_general_answer_reassembles() {
        let (engine, _) = engine_with(StaticIndex::new(), ScriptedModel::new([BLOCKS_REPLY])).await;

        let frames: Vec<StreamFrame> = Arc::clone(&engine)
            .answer_stream("hello".to_string(), Some("conv-1".to_string()))
            .collect()
            .await;

        assert!(matches!(
            &frames[0],
            StreamFrame::Meta { mode: AnswerMode::General, .. }
        ));
        assert_eq!(frames.last(), Some(&StreamFrame::Done));

        let assembled: String = frames
            .iter()
            .filter_map(|f| match f {
                StreamFrame::Chunk { data } => Some(data.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(assembled, BLOCKS_REPLY);

        // the finaliser lands both turns in conversation memory
        tokio::time::sleep(Duration::from_millis(50)).await;
        let window = engine.memory.window("conv-1").await;
        assert_eq!(window.len(), 2);
        assert_eq!(window[1].content, BLOCKS_REPLY);
    }

    #[tokio::test]
    async fn stream_establishment_failure_emits_error_frame() {
        let (engine, _) = engine_with(StaticIndex::new(), ScriptedModel::failing("down")).await;

        let frames: Vec<StreamFrame> = engine
            .answer_stream("hello".to_string(), None)
            .collect()
            .await;

        assert!(matches!(&frames[0], StreamFrame::Meta { .. }));
        assert!(matches!(&frames[1], StreamFrame::Error { .. }));
        assert_eq!(frames.len(), 2);
    }

    #[tokio::test]
    async fn llm_failure_on_buffered_path_propagates() {
        let (engine, _) = engine_with(StaticIndex::new(), ScriptedModel::failing("down")).await;
        let result = engine.answer("hello", None).await;
        assert!(result.is_err());
    }

    #[test]
    fn stream_frames_serialize_with_type_tags() {
        let meta = StreamFrame::Meta {
            mode: AnswerMode::Rag,
            sources: Vec::new(),
            request_id: "abcd1234".to_string(),
        };
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["type"], "meta");
        assert_eq!(json["mode"], "rag");

        let done = serde_json::to_value(StreamFrame::Done).unwrap();
        assert_eq!(done["type"], "done");
    }
}
