use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use common::{error::AppError, utils::config::AppConfig, utils::embedding::EmbeddingProvider};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

/// A raw nearest-neighbour hit with its opaque metadata.
///
/// Higher layers consume the `text`, `title`, `source`, `tags`, `type` and
/// `timestamp` metadata keys; everything else is carried through untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorMatch {
    pub id: String,
    pub score: f64,
    pub metadata: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpsertItem {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: HashMap<String, Value>,
}

/// Top-K similarity search plus upsert over an external vector store.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Embeds the query text and returns matches sorted by descending score,
    /// along with the highest score. A misconfigured backend yields
    /// `(vec![], None)`, never an error.
    async fn query(
        &self,
        text: &str,
        top_k: usize,
    ) -> Result<(Vec<VectorMatch>, Option<f64>), AppError>;

    async fn upsert(&self, items: Vec<UpsertItem>) -> Result<(), AppError>;
}

struct PineconeEndpoint {
    host: String,
    api_key: String,
}

/// Pinecone data-plane client. Construction never fails: without credentials
/// the index is disabled and queries come back empty.
pub struct PineconeIndex {
    http: reqwest::Client,
    endpoint: Option<PineconeEndpoint>,
    embedder: Arc<EmbeddingProvider>,
}

#[derive(Serialize)]
struct PineconeQueryRequest<'a> {
    vector: &'a [f32],
    #[serde(rename = "topK")]
    top_k: usize,
    #[serde(rename = "includeMetadata")]
    include_metadata: bool,
}

#[derive(Deserialize)]
struct PineconeQueryResponse {
    #[serde(default)]
    matches: Vec<PineconeMatch>,
}

#[derive(Deserialize)]
struct PineconeMatch {
    id: String,
    #[serde(default)]
    score: f64,
    #[serde(default)]
    metadata: HashMap<String, Value>,
}

#[derive(Serialize)]
struct PineconeUpsertRequest {
    vectors: Vec<UpsertItem>,
}

impl PineconeIndex {
    pub fn from_config(config: &AppConfig, embedder: Arc<EmbeddingProvider>) -> Self {
        let endpoint = match (&config.pinecone_api_key, &config.pinecone_index) {
            (Some(api_key), Some(host)) if !api_key.is_empty() && !host.is_empty() => {
                Some(PineconeEndpoint {
                    host: host.trim_end_matches('/').to_string(),
                    api_key: api_key.clone(),
                })
            }
            _ => {
                warn!("Pinecone credentials or index host missing, vector retrieval disabled");
                None
            }
        };

        Self {
            http: reqwest::Client::new(),
            endpoint,
            embedder,
        }
    }
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    async fn query(
        &self,
        text: &str,
        top_k: usize,
    ) -> Result<(Vec<VectorMatch>, Option<f64>), AppError> {
        let Some(endpoint) = &self.endpoint else {
            warn!("Vector index not configured, returning no matches");
            return Ok((Vec::new(), None));
        };

        let vector = self.embedder.embed(text).await?;
        let request = PineconeQueryRequest {
            vector: &vector,
            top_k,
            include_metadata: true,
        };

        // Backend errors degrade to an empty result; retrieval is never retried.
        let response = match self
            .http
            .post(format!("{}/query", endpoint.host))
            .header("Api-Key", &endpoint.api_key)
            .json(&request)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
        {
            Ok(response) => response,
            Err(error) => {
                warn!(%error, "Vector index query failed");
                return Ok((Vec::new(), None));
            }
        };

        let parsed: PineconeQueryResponse = match response.json().await {
            Ok(parsed) => parsed,
            Err(error) => {
                warn!(%error, "Vector index returned an unreadable response");
                return Ok((Vec::new(), None));
            }
        };

        let mut matches: Vec<VectorMatch> = parsed
            .matches
            .into_iter()
            .map(|m| VectorMatch {
                id: m.id,
                score: m.score.clamp(0.0, 1.0),
                metadata: m.metadata,
            })
            .collect();
        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });

        let highest = matches.first().map(|m| m.score);
        debug!(matches = matches.len(), ?highest, "Vector index query complete");

        Ok((matches, highest))
    }

    async fn upsert(&self, items: Vec<UpsertItem>) -> Result<(), AppError> {
        let Some(endpoint) = &self.endpoint else {
            return Err(AppError::InternalError(
                "vector index not configured for upsert".to_string(),
            ));
        };

        self.http
            .post(format!("{}/vectors/upsert", endpoint.host))
            .header("Api-Key", &endpoint.api_key)
            .json(&PineconeUpsertRequest { vectors: items })
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub use test_support::StaticIndex;

#[cfg(any(test, feature = "test-utils"))]
mod test_support {
    use std::sync::Mutex;

    use super::*;

    /// In-memory index serving canned matches, keyed by exact query text,
    /// with a fallback set for everything else. Upserts are recorded.
    #[derive(Default)]
    pub struct StaticIndex {
        by_query: Mutex<HashMap<String, Vec<VectorMatch>>>,
        fallback: Mutex<Vec<VectorMatch>>,
        upserts: Mutex<Vec<UpsertItem>>,
    }

    impl StaticIndex {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_fallback(matches: Vec<VectorMatch>) -> Self {
            let index = Self::default();
            *index.fallback.lock().unwrap() = matches;
            index
        }

        pub fn stage(&self, query: &str, matches: Vec<VectorMatch>) {
            self.by_query
                .lock()
                .unwrap()
                .insert(query.to_string(), matches);
        }

        pub fn upserted(&self) -> Vec<UpsertItem> {
            self.upserts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl VectorIndex for StaticIndex {
        async fn query(
            &self,
            text: &str,
            top_k: usize,
        ) -> Result<(Vec<VectorMatch>, Option<f64>), AppError> {
            let mut matches = self
                .by_query
                .lock()
                .unwrap()
                .get(text)
                .cloned()
                .unwrap_or_else(|| self.fallback.lock().unwrap().clone());

            matches.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.id.cmp(&b.id))
            });
            matches.truncate(top_k);

            let highest = matches.first().map(|m| m.score);
            Ok((matches, highest))
        }

        async fn upsert(&self, items: Vec<UpsertItem>) -> Result<(), AppError> {
            self.upserts.lock().unwrap().extend(items);
            Ok(())
        }
    }

    /// Builds a match with a `text` metadata field, the common case in tests.
    pub fn text_match(id: &str, score: f64, text: &str) -> VectorMatch {
        let mut metadata = HashMap::new();
        metadata.insert("text".to_string(), Value::String(text.to_string()));
        VectorMatch {
            id: id.to_string(),
            score,
            metadata,
        }
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub use test_support::text_match;
