use std::{sync::Arc, time::Duration};

use common::{
    storage::db::SurrealDbClient, storage::store::StorageManager,
    utils::{config::get_config, embedding::EmbeddingProvider},
};
use event_bus::EventBus;
use ingestion_pipeline::{pipeline::IngestionPipeline, pool_worker, run_worker_loop};
use job_queue::JobQueue;
use retrieval_pipeline::reranking::RerankerPool;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

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

    let openai_client = Arc::new(async_openai::Client::with_config(
        async_openai::config::OpenAIConfig::new()
            .with_api_key(&config.openai_api_key)
            .with_api_base(&config.openai_base_url),
    ));

    let reranker_pool = RerankerPool::maybe_from_config(&config)?;

    // Create global storage manager
    let storage = StorageManager::new(&config).await?;

    let embedding_provider = Arc::new(
        EmbeddingProvider::from_config(&config, Some(openai_client.clone())).await?,
    );

    let job_queue = JobQueue::new((*db).clone(), config.worker.clone());
    let event_bus = EventBus::new((*db).clone());

    let pool_worker_handles = pool_worker::spawn_pool_workers(
        db.clone(),
        job_queue,
        event_bus,
        openai_client.clone(),
        config.clone(),
        storage.clone(),
        Duration::from_millis(500),
    );
    info!(pools = pool_worker_handles.len(), "spawned pool workers");

    let ingestion_pipeline = Arc::new(IngestionPipeline::new(
        db.clone(),
        openai_client.clone(),
        config,
        reranker_pool,
        storage,
        embedding_provider,
    )?);

    run_worker_loop(db, ingestion_pipeline).await
}
