use std::sync::Arc;

use async_openai::{config::OpenAIConfig, Client as OpenAiClient};
use common::{
    storage::{db::SurrealDbClient, store::StorageManager},
    utils::{config::AppConfig, embedding::EmbeddingProvider},
};
use event_bus::EventBus;
use job_queue::JobQueue;

/// Shared application state handed to every route. Beyond the teacher's
/// `db`/`config`/`storage`, carries the cross-shard coordination handles this
/// spec's routes dispatch work through: the durable job queue (§4.2) and the
/// in-process event bus (§4.1), plus the OpenAI client and embedding provider
/// the embed/search/parse routes call through directly rather than via a
/// worker job.
#[derive(Clone)]
pub struct ApiState {
    pub db: Arc<SurrealDbClient>,
    pub config: AppConfig,
    pub storage: StorageManager,
    pub job_queue: JobQueue,
    pub event_bus: EventBus,
    pub openai_client: Arc<OpenAiClient<OpenAIConfig>>,
    pub embedding_provider: Arc<EmbeddingProvider>,
}

impl ApiState {
    pub async fn new(
        config: &AppConfig,
        storage: StorageManager,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let surreal_db_client = Arc::new(
            SurrealDbClient::new(
                &config.surrealdb_address,
                &config.surrealdb_username,
                &config.surrealdb_password,
                &config.surrealdb_namespace,
                &config.surrealdb_database,
            )
            .await?,
        );

        surreal_db_client.apply_migrations().await?;

        let job_queue = JobQueue::new((*surreal_db_client).clone(), config.worker.clone());
        let event_bus = EventBus::new((*surreal_db_client).clone());

        let openai_client = Arc::new(OpenAiClient::with_config(
            OpenAIConfig::new()
                .with_api_key(&config.openai_api_key)
                .with_api_base(&config.openai_base_url),
        ));

        let embedding_provider = Arc::new(
            EmbeddingProvider::from_config(config, Some(openai_client.clone())).await?,
        );

        let app_state = Self {
            db: surreal_db_client.clone(),
            config: config.clone(),
            storage,
            job_queue,
            event_bus,
            openai_client,
            embedding_provider,
        };

        Ok(app_state)
    }
}
