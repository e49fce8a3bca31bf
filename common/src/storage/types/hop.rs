use surrealdb::opt::PatchOp;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

/// A hop starts out pending; only the weakest-link diagnosis flips it to failed.
#[derive(Deserialize, Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HopStatus {
    Pending,
    Failed,
}

stored_object!(Hop, "hop", {
    query_id: String,
    hop_order: u32,
    sub_query: String,
    reasoning: String,
    status: HopStatus
});

impl Hop {
    pub fn new(
        id: impl Into<String>,
        query_id: impl Into<String>,
        hop_order: u32,
        sub_query: impl Into<String>,
        reasoning: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            created_at: now,
            updated_at: now,
            query_id: query_id.into(),
            hop_order,
            sub_query: sub_query.into(),
            reasoning: reasoning.into(),
            status: HopStatus::Pending,
        }
    }

    /// Flips the hop to failed. Used exclusively by the weakest-link diagnosis.
    pub async fn mark_failed(id: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        let _updated: Option<Self> = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace("/status", HopStatus::Failed))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::sql::Datetime::from(Utc::now()),
            ))
            .await?;

        Ok(())
    }

    pub async fn for_query(query_id: &str, db: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        let hops: Vec<Self> = db
            .client
            .query("SELECT * FROM type::table($table) WHERE query_id = $query_id ORDER BY hop_order ASC")
            .bind(("table", Self::table_name()))
            .bind(("query_id", query_id.to_string()))
            .await?
            .take(0)?;

        Ok(hops)
    }
}
