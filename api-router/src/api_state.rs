use std::sync::Arc;

use common::{
    storage::{db::SurrealDbClient, ledger::FeedbackLedger},
    utils::embedding::EmbeddingProvider,
};
use retrieval_pipeline::{orchestrator::AnswerEngine, vector::VectorIndex};

/// Handles shared by every route. Constructed once at startup; everything in
/// here is cheap to clone.
#[derive(Clone)]
pub struct ApiState {
    pub db: Arc<SurrealDbClient>,
    pub ledger: FeedbackLedger,
    pub engine: Arc<AnswerEngine>,
    pub embedder: Arc<EmbeddingProvider>,
    pub index: Arc<dyn VectorIndex>,
}

impl ApiState {
    pub fn new(
        db: Arc<SurrealDbClient>,
        ledger: FeedbackLedger,
        engine: Arc<AnswerEngine>,
        embedder: Arc<EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
    ) -> Self {
        Self {
            db,
            ledger,
            engine,
            embedder,
            index,
        }
    }
}
