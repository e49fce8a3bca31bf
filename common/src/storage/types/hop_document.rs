#![allow(clippy::module_name_repetitions)]
use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(HopDocument, "hop_document", {
    hop_id: String,
    document_id: String,
    dense_score: f64,
    sparse_score: f64,
    rank_position: u32
});

impl HopDocument {
    pub fn new(
        id: impl Into<String>,
        hop_id: impl Into<String>,
        document_id: impl Into<String>,
        dense_score: f64,
        sparse_score: f64,
        rank_position: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            created_at: now,
            updated_at: now,
            hop_id: hop_id.into(),
            document_id: document_id.into(),
            dense_score,
            sparse_score,
            rank_position,
        }
    }

    pub async fn for_hop(hop_id: &str, db: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        let documents: Vec<Self> = db
            .client
            .query("SELECT * FROM type::table($table) WHERE hop_id = $hop_id ORDER BY rank_position ASC")
            .bind(("table", Self::table_name()))
            .bind(("hop_id", hop_id.to_string()))
            .await?
            .take(0)?;

        Ok(documents)
    }
}
