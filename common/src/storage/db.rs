use std::{ops::Deref, sync::Arc};

use surrealdb::{
    engine::any::{connect, Any},
    opt::auth::Root,
    Error, Surreal,
};

use super::types::StoredObject;

#[derive(Clone)]
pub struct SurrealDbClient {
    pub client: Surreal<Any>,
}

pub trait ProvidesDb {
    fn db(&self) -> &Arc<SurrealDbClient>;
}

impl SurrealDbClient {
    /// Connects and selects the namespace/database. Credentials are skipped
    /// for engines that do not require them (mem://, rocksdb://).
    pub async fn new(
        address: &str,
        username: &str,
        password: &str,
        namespace: &str,
        database: &str,
    ) -> Result<Self, Error> {
        let db = connect(address).await?;

        if !username.is_empty() {
            db.signin(Root { username, password }).await?;
        }

        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }

    pub async fn ensure_initialized(&self) -> Result<(), Error> {
        self.build_indexes().await
    }

    /// Indexes backing the ledger's lookup paths: hop and document joins,
    /// response-by-query, chain-by-response and template lookup by query text.
    pub async fn build_indexes(&self) -> Result<(), Error> {
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_hop_query ON hop FIELDS query_id")
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_hop_status ON hop FIELDS status")
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_hop_document_hop ON hop_document FIELDS hop_id")
            .await?;
        self.client
            .query(
                "DEFINE INDEX IF NOT EXISTS idx_hop_document_document ON hop_document FIELDS document_id",
            )
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_response_query ON response FIELDS query_id")
            .await?;
        self.client
            .query(
                "DEFINE INDEX IF NOT EXISTS idx_evidence_response ON evidence_chain FIELDS response_id",
            )
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_query_text ON query FIELDS text")
            .await?;

        Ok(())
    }

    /// Insert-or-replace keyed by the caller-generated id, which makes the
    /// ledger's append operations idempotent.
    pub async fn put_item<T>(&self, item: T) -> Result<Option<T>, Error>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        self.client
            .upsert((T::table_name(), item.get_id()))
            .content(item)
            .await
    }

    /// Operation to retrieve a single object by its ID, requires the struct to implement StoredObject
    ///
    /// # Arguments
    /// * `id` - The ID of the item to retrieve
    ///
    /// # Returns
    /// * `Result<Option<T>, Error>` - The found item or Error
    pub async fn get_item<T>(&self, id: &str) -> Result<Option<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.select((T::table_name(), id)).await
    }
}

impl Deref for SurrealDbClient {
    type Target = Surreal<Any>;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl SurrealDbClient {
    /// Create an in-memory SurrealDB client for testing.
    pub async fn memory(namespace: &str, database: &str) -> Result<Self, Error> {
        let db = connect("mem://").await?;

        db.use_ns(namespace).use_db(database).await?;

        let client = SurrealDbClient { client: db };
        client.ensure_initialized().await?;

        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use crate::stored_object;

    use super::*;
    use uuid::Uuid;

    stored_object!(Dummy, "dummy", {
        name: String
    });

    #[tokio::test]
    async fn test_initialization_and_crud() {
        let namespace = "test_ns";
        let database = &Uuid::new_v4().to_string(); // ensures isolation per test run
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("Failed to start in-memory surrealdb");

        let dummy = Dummy {
            id: "abc".to_string(),
            name: "first".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let stored = db.put_item(dummy.clone()).await.expect("Failed to store");
        assert!(stored.is_some());

        let fetched = db
            .get_item::<Dummy>(&dummy.id)
            .await
            .expect("Failed to fetch");
        assert_eq!(fetched, Some(dummy.clone()));

        // Re-putting the same id replaces rather than duplicates
        let replacement = Dummy {
            name: "second".to_string(),
            ..dummy.clone()
        };
        db.put_item(replacement.clone())
            .await
            .expect("Failed to replace");

        let all: Vec<Dummy> = db.select("dummy").await.expect("Failed to select");
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].name, "second");
    }

    #[tokio::test]
    async fn test_build_indexes_is_idempotent() {
        let namespace = "test_ns";
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("Failed to start in-memory surrealdb");

        db.build_indexes().await.expect("Failed to build indexes");
        db.build_indexes()
            .await
            .expect("Index rebuild should not fail");
    }
}
