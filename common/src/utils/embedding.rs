use std::{
    collections::HashMap,
    collections::VecDeque,
    sync::Arc,
};

use async_openai::types::CreateEmbeddingRequestArgs;
use tokio::sync::Mutex;
use tracing::debug;

use crate::{
    error::AppError,
    utils::config::{AppConfig, EmbeddingBackend},
};

type OpenAiClient = async_openai::Client<async_openai::config::OpenAIConfig>;

/// Observable counters for the embedding cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
}

/// Bounded most-recently-used cache keyed on the exact input string.
struct MruCache {
    capacity: usize,
    entries: HashMap<String, Vec<f32>>,
    recency: VecDeque<String>,
    hits: u64,
    misses: u64,
}

impl MruCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
            recency: VecDeque::new(),
            hits: 0,
            misses: 0,
        }
    }

    fn get(&mut self, key: &str) -> Option<Vec<f32>> {
        match self.entries.get(key) {
            Some(vector) => {
                let vector = vector.clone();
                self.touch(key);
                self.hits += 1;
                Some(vector)
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    fn insert(&mut self, key: String, vector: Vec<f32>) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.contains_key(&key) {
            self.touch(&key);
            self.entries.insert(key, vector);
            return;
        }
        if self.entries.len() >= self.capacity {
            if let Some(oldest) = self.recency.pop_front() {
                self.entries.remove(&oldest);
            }
        }
        self.recency.push_back(key.clone());
        self.entries.insert(key, vector);
    }

    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.recency.iter().position(|k| k == key) {
            self.recency.remove(pos);
            self.recency.push_back(key.to_string());
        }
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            size: self.entries.len(),
        }
    }
}

enum Backend {
    OpenAI { client: Arc<OpenAiClient>, model: String },
    /// Deterministic local embeddings for tests and offline runs.
    Hashed,
}

/// Produces unit-norm dense vectors of a fixed dimension, memoised in a
/// bounded MRU cache.
pub struct EmbeddingProvider {
    backend: Backend,
    dimensions: u32,
    cache: Mutex<MruCache>,
}

impl EmbeddingProvider {
    pub fn from_config(
        config: &AppConfig,
        openai_client: Option<Arc<OpenAiClient>>,
    ) -> Result<Self, AppError> {
        let backend = match config.embedding_backend {
            EmbeddingBackend::OpenAI => {
                if config.openai_api_key.is_empty() {
                    return Err(AppError::EmbeddingUnavailable(
                        "openai embedding backend configured without an API key".to_string(),
                    ));
                }
                let client = openai_client.ok_or_else(|| {
                    AppError::EmbeddingUnavailable(
                        "openai embedding backend requires a client".to_string(),
                    )
                })?;
                Backend::OpenAI {
                    client,
                    model: config.embedding_model.clone(),
                }
            }
            EmbeddingBackend::Hashed => Backend::Hashed,
        };

        Ok(Self {
            backend,
            dimensions: config.embedding_dimensions,
            cache: Mutex::new(MruCache::new(config.embedding_cache_size)),
        })
    }

    #[cfg(any(test, feature = "test-utils"))]
    pub fn hashed(dimensions: u32, cache_size: usize) -> Self {
        Self {
            backend: Backend::Hashed,
            dimensions,
            cache: Mutex::new(MruCache::new(cache_size)),
        }
    }

    pub fn dimensions(&self) -> u32 {
        self.dimensions
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.lock().await.stats()
    }

    /// Embeds the input, returning a unit-norm vector. Identical inputs are
    /// served from the cache byte-for-byte.
    pub async fn embed(&self, input: &str) -> Result<Vec<f32>, AppError> {
        if let Some(cached) = self.cache.lock().await.get(input) {
            return Ok(cached);
        }

        // Computed outside the cache lock; embedding calls may suspend.
        let vector = match &self.backend {
            Backend::OpenAI { client, model } => {
                self.embed_openai(client, model, input).await?
            }
            Backend::Hashed => hashed_embedding(input, self.dimensions as usize),
        };
        let vector = l2_normalize(vector);

        self.cache
            .lock()
            .await
            .insert(input.to_string(), vector.clone());

        Ok(vector)
    }

    async fn embed_openai(
        &self,
        client: &OpenAiClient,
        model: &str,
        input: &str,
    ) -> Result<Vec<f32>, AppError> {
        let request = CreateEmbeddingRequestArgs::default()
            .model(model)
            .dimensions(self.dimensions)
            .input([input])
            .build()?;

        let response = client.embeddings().create(request).await?;

        let embedding = response
            .data
            .first()
            .ok_or_else(|| {
                AppError::EmbeddingUnavailable("No embedding data received from API".into())
            })?
            .embedding
            .clone();

        debug!(dimensions = embedding.len(), "Embedding created");

        Ok(embedding)
    }
}

fn l2_normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in &mut vector {
            *v /= norm;
        }
    }
    vector
}

/// FNV-1a over each token spread across the vector. Stable across runs so
/// tests get byte-identical embeddings without a model.
fn hashed_embedding(input: &str, dimensions: usize) -> Vec<f32> {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

    let mut vector = vec![0.0f32; dimensions.max(1)];
    for token in input
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        let mut hash = FNV_OFFSET;
        for byte in token.bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        let bucket = (hash % vector.len() as u64) as usize;
        let sign = if hash & 1 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign;
    }

    if vector.iter().all(|v| *v == 0.0) {
        vector[0] = 1.0;
    }
    vector
}
