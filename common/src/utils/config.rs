use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Selects the embedding backend for vector generation.
#[derive(Clone, Deserialize, Debug, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// Use an OpenAI-compatible API for embeddings (default).
    #[default]
    OpenAI,
    /// Use deterministic hashed embeddings (for testing).
    Hashed,
}

/// Application configuration loaded from files and environment variables.
#[allow(clippy::module_name_repetitions)]
#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub openai_api_key: String,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: u32,
    #[serde(default)]
    pub embedding_backend: EmbeddingBackend,
    #[serde(default = "default_embedding_cache_size")]
    pub embedding_cache_size: usize,
    #[serde(default)]
    pub pinecone_api_key: Option<String>,
    /// Data-plane host of the Pinecone index, e.g. `https://idx-abc123.svc.pinecone.io`.
    #[serde(default)]
    pub pinecone_index: Option<String>,
    #[serde(default = "default_similarity_threshold")]
    pub rag_similarity_threshold: f64,
    #[serde(default = "default_max_hops")]
    pub max_hops: usize,
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    #[serde(default = "default_llm_timeout_secs")]
    pub llm_timeout_secs: u64,
    #[serde(default = "default_surrealdb_address")]
    pub surrealdb_address: String,
    #[serde(default)]
    pub surrealdb_username: String,
    #[serde(default)]
    pub surrealdb_password: String,
    #[serde(default = "default_surrealdb_namespace")]
    pub surrealdb_namespace: String,
    #[serde(default = "default_surrealdb_database")]
    pub surrealdb_database: String,
}

fn default_port() -> u16 {
    8000
}

/// Default base URL used for OpenAI-compatible APIs.
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

/// Dimension requested from the embedding API and expected by the index.
fn default_embedding_dimensions() -> u32 {
    1024
}

fn default_embedding_cache_size() -> usize {
    100
}

/// Minimum fused score a retrieved document needs to be used as answer context.
fn default_similarity_threshold() -> f64 {
    0.5
}

fn default_max_hops() -> usize {
    1
}

/// Number of conversation turns kept per conversation.
fn default_history_window() -> usize {
    6
}

fn default_llm_timeout_secs() -> u64 {
    60
}

/// In-memory engine by default; point at `ws://` or `rocksdb://` in deployment.
fn default_surrealdb_address() -> String {
    "mem://".to_string()
}

fn default_surrealdb_namespace() -> String {
    "hoplite".to_string()
}

fn default_surrealdb_database() -> String {
    "ledger".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            openai_api_key: String::new(),
            openai_base_url: default_base_url(),
            chat_model: default_chat_model(),
            embedding_model: default_embedding_model(),
            embedding_dimensions: default_embedding_dimensions(),
            embedding_backend: EmbeddingBackend::default(),
            embedding_cache_size: default_embedding_cache_size(),
            pinecone_api_key: None,
            pinecone_index: None,
            rag_similarity_threshold: default_similarity_threshold(),
            max_hops: default_max_hops(),
            history_window: default_history_window(),
            llm_timeout_secs: default_llm_timeout_secs(),
            surrealdb_address: default_surrealdb_address(),
            surrealdb_username: String::new(),
            surrealdb_password: String::new(),
            surrealdb_namespace: default_surrealdb_namespace(),
            surrealdb_database: default_surrealdb_database(),
        }
    }
}

/// Loads the application configuration from the environment and optional config file.
#[allow(clippy::module_name_repetitions)]
pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}
