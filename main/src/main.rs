use std::{sync::Arc, time::Duration};

use api_router::{api_routes, api_state::ApiState};
use common::{
    conversation::ConversationMemory,
    storage::{db::SurrealDbClient, ledger::FeedbackLedger},
    utils::{config::get_config, embedding::EmbeddingProvider},
};
use retrieval_pipeline::{
    llm::OpenAiChat,
    orchestrator::AnswerEngine,
    vector::{PineconeIndex, VectorIndex},
    HybridRetriever, MultiHopController,
};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    // Get config
    let config = get_config()?;

    let db = Arc::new(
        SurrealDbClient::new(
            &config.surrealdb_address,
            &config.surrealdb_username,
            &config.surrealdb_password,
            &config.surrealdb_namespace,
            &config.surrealdb_database,
        )
        .await?,
    );
    db.ensure_initialized().await?;

    let openai_client = Arc::new(async_openai::Client::with_config(
        async_openai::config::OpenAIConfig::new()
            .with_api_key(&config.openai_api_key)
            .with_api_base(&config.openai_base_url),
    ));

    let embedder = Arc::new(EmbeddingProvider::from_config(
        &config,
        Some(openai_client.clone()),
    )?);
    info!(
        embedding_backend = ?config.embedding_backend,
        embedding_dimensions = embedder.dimensions(),
        "Embedding provider initialized"
    );

    let index: Arc<dyn VectorIndex> =
        Arc::new(PineconeIndex::from_config(&config, Arc::clone(&embedder)));
    let ledger = FeedbackLedger::new(Arc::clone(&db));
    let memory = Arc::new(ConversationMemory::new(config.history_window));

    let model = Arc::new(OpenAiChat::new(
        openai_client,
        config.chat_model.clone(),
        Duration::from_secs(config.llm_timeout_secs),
    ));

    let retriever = HybridRetriever::new(Arc::clone(&index), ledger.clone());
    let controller = MultiHopController::new(
        retriever,
        ledger.clone(),
        model.clone(),
        config.max_hops,
    );
    let engine = Arc::new(AnswerEngine::new(
        controller,
        ledger.clone(),
        memory,
        model,
        config.rag_similarity_threshold,
        Duration::from_secs(config.llm_timeout_secs),
    ));

    let state = ApiState::new(db, ledger, engine, embedder, index);
    let app = api_routes(state);

    info!("Starting server listening on 0.0.0.0:{}", config.port);
    let serve_address = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(serve_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
