#![allow(clippy::module_name_repetitions)]
use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(EvidenceChain, "evidence_chain", {
    response_id: String,
    hop_ids: Vec<String>,
    document_ids: Vec<String>,
    confidence_score: f64
});

impl EvidenceChain {
    pub fn new(
        id: impl Into<String>,
        response_id: impl Into<String>,
        hop_ids: Vec<String>,
        document_ids: Vec<String>,
        confidence_score: f64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            created_at: now,
            updated_at: now,
            response_id: response_id.into(),
            hop_ids,
            document_ids,
            confidence_score,
        }
    }

    /// One chain per response; immutable after write.
    pub async fn for_response(
        response_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let chain: Option<Self> = db
            .client
            .query("SELECT * FROM type::table($table) WHERE response_id = $response_id LIMIT 1")
            .bind(("table", Self::table_name()))
            .bind(("response_id", response_id.to_string()))
            .await?
            .take(0)?;

        Ok(chain)
    }
}
