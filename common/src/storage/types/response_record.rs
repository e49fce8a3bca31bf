#![allow(clippy::module_name_repetitions)]
use surrealdb::opt::PatchOp;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(ResponseRecord, "response", {
    query_id: String,
    content: String,
    /// -1, 0 or +1; 0 until the user finalises the response.
    user_feedback: i32,
    user_correction: Option<String>
});

impl ResponseRecord {
    pub fn new(
        id: impl Into<String>,
        query_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            created_at: now,
            updated_at: now,
            query_id: query_id.into(),
            content: content.into(),
            user_feedback: 0,
            user_correction: None,
        }
    }

    /// Writes the user verdict onto the response row. The latest submission
    /// wins; a finalised response is never reset to 0.
    pub async fn finalize_feedback(
        id: &str,
        feedback: i32,
        correction: Option<String>,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        let mut update = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace("/user_feedback", feedback))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::sql::Datetime::from(Utc::now()),
            ));

        if let Some(correction) = correction {
            update = update.patch(PatchOp::replace("/user_correction", correction));
        }

        let updated: Option<Self> = update.await?;
        updated.ok_or_else(|| AppError::NotFound(format!("Response {id} not found")))
    }

    pub async fn for_queries(
        query_ids: Vec<String>,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let responses: Vec<Self> = db
            .client
            .query("SELECT * FROM type::table($table) WHERE query_id IN $query_ids")
            .bind(("table", Self::table_name()))
            .bind(("query_ids", query_ids))
            .await?
            .take(0)?;

        Ok(responses)
    }
}
