//! Embedding Manager (§4.8) model-switch contract, layered on top of
//! `common::utils::embedding::EmbeddingProvider`. The provider only tracks
//! whichever model is currently loaded; this module owns the decision of
//! *whether* a requested switch is safe to apply in place, or whether it
//! first requires the caller to confirm a wipe of the existing vector
//! collections (a dimension change invalidates every stored vector, since
//! HNSW indexes and cosine comparisons are only meaningful within one fixed
//! dimension).

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        indexes::ensure_runtime_indexes,
        types::{
            knowledge_entity_embedding::KnowledgeEntityEmbedding, system_settings::SystemSettings,
            text_chunk_embedding::TextChunkEmbedding,
        },
    },
    utils::{
        config::EmbeddingBackend,
        embedding::{resolve_model_dimension, EmbeddingProvider},
    },
};
use event_bus::EventBus;
use serde::Serialize;
use serde_json::json;

/// Collections whose rows are keyed to one embedding dimension; a wipe
/// truncates exactly these two tables.
const EMBEDDING_COLLECTIONS: [&str; 2] = ["text_chunk_embedding", "knowledge_entity_embedding"];

#[derive(Debug, Clone, Serialize)]
pub struct CollectionStatus {
    pub name: String,
    pub row_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SwitchCheck {
    pub current_model: String,
    pub current_dimension: usize,
    pub candidate_model: String,
    pub candidate_dimension: usize,
    pub requires_wipe: bool,
    pub affected_collections: Vec<CollectionStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SwitchOutcome {
    pub new_model: String,
    pub new_dimension: usize,
    pub collections_wiped: bool,
}

async fn row_count(db: &SurrealDbClient, table: &str) -> Result<usize, AppError> {
    let mut response = db
        .client
        .query(format!("SELECT count() FROM {table} GROUP ALL"))
        .await
        .map_err(AppError::Database)?;
    #[derive(serde::Deserialize)]
    struct CountRow {
        count: usize,
    }
    let rows: Vec<CountRow> = response.take(0).map_err(AppError::Database)?;
    Ok(rows.first().map_or(0, |row| row.count))
}

async fn collection_statuses(db: &SurrealDbClient) -> Result<Vec<CollectionStatus>, AppError> {
    let mut statuses = Vec::with_capacity(EMBEDDING_COLLECTIONS.len());
    for table in EMBEDDING_COLLECTIONS {
        statuses.push(CollectionStatus {
            name: table.to_string(),
            row_count: row_count(db, table).await?,
        });
    }
    Ok(statuses)
}

/// What-if check for `POST /api/embed/model/check-switch`: resolves the
/// candidate model's dimension and reports whether applying it would require
/// a wipe, without mutating any state.
pub async fn check_switch(
    db: &SurrealDbClient,
    backend: EmbeddingBackend,
    candidate_model: &str,
) -> Result<SwitchCheck, AppError> {
    let settings = SystemSettings::get_current(db).await?;
    let candidate_dimension = resolve_model_dimension(backend, candidate_model);
    let current_dimension = settings.embedding_dimensions as usize;
    let requires_wipe = candidate_dimension != current_dimension;

    let affected_collections = if requires_wipe {
        collection_statuses(db).await?
    } else {
        Vec::new()
    };

    Ok(SwitchCheck {
        current_model: settings.embedding_model,
        current_dimension,
        candidate_model: candidate_model.to_string(),
        candidate_dimension,
        requires_wipe,
        affected_collections,
    })
}

/// Applies the §4.8 model-switch contract.
///
/// * Same dimension: updates `SystemSettings` and clears the provider's
///   cache in place; `collections_wiped` is `false`.
/// * Different dimension, `confirm_wipe == false`: returns
///   `AppError::Conflict` without touching any state. Callers surface this
///   as HTTP 409 with the `check_switch` payload so the operator can see
///   what would be wiped.
/// * Different dimension, `confirm_wipe == true`: deletes every row in both
///   embedding collections, rebuilds their HNSW indexes at the new
///   dimension, updates `SystemSettings`, and clears the cache.
///
/// The caller is responsible for emitting `embed.model.switched` on
/// `event_bus` afterwards with the returned `SwitchOutcome` — kept outside
/// this function so a dry-run caller (`check_switch`) never has an event-bus
/// side effect to accidentally trigger.
pub async fn switch_model(
    db: &SurrealDbClient,
    provider: &EmbeddingProvider,
    backend: EmbeddingBackend,
    new_model: &str,
    confirm_wipe: bool,
) -> Result<SwitchOutcome, AppError> {
    let settings = SystemSettings::get_current(db).await?;
    let new_dimension = resolve_model_dimension(backend, new_model);
    let current_dimension = settings.embedding_dimensions as usize;

    if new_dimension != current_dimension && !confirm_wipe {
        return Err(AppError::Conflict(format!(
            "switching embedding model from '{}' ({} dims) to '{new_model}' ({new_dimension} dims) requires confirm_wipe=true",
            settings.embedding_model, current_dimension,
        )));
    }

    let collections_wiped = new_dimension != current_dimension;

    if collections_wiped {
        for table in EMBEDDING_COLLECTIONS {
            db.client
                .query(format!("DELETE FROM {table}"))
                .await
                .map_err(AppError::Database)?
                .check()
                .map_err(AppError::Database)?;
        }
        // `ensure_runtime_indexes` overwrites an HNSW index in place when the
        // dimension changed, but do it explicitly per-table too so a stale
        // index left in an error state from a prior switch doesn't linger.
        TextChunkEmbedding::redefine_hnsw_index(db, new_dimension).await?;
        KnowledgeEntityEmbedding::redefine_hnsw_index(db, new_dimension).await?;
        ensure_runtime_indexes(db, new_dimension).await?;
    }

    let mut changes = settings;
    changes.embedding_model = new_model.to_string();
    changes.embedding_dimensions = new_dimension as u32;
    SystemSettings::update(db, changes).await?;

    provider.clear_cache().await;

    Ok(SwitchOutcome {
        new_model: new_model.to_string(),
        new_dimension,
        collections_wiped,
    })
}

/// `switch_model`, followed by emitting `embed.model.switched` on the event
/// bus so anything tracking the active model (e.g. a cache warmer) can react.
pub async fn switch_model_and_emit(
    db: &SurrealDbClient,
    provider: &EmbeddingProvider,
    event_bus: &EventBus,
    backend: EmbeddingBackend,
    new_model: &str,
    confirm_wipe: bool,
) -> Result<SwitchOutcome, AppError> {
    let outcome = switch_model(db, provider, backend, new_model, confirm_wipe).await?;
    event_bus
        .emit(
            "embed.model.switched",
            json!({
                "new_model": outcome.new_model,
                "new_dimension": outcome.new_dimension,
                "collections_wiped": outcome.collections_wiped,
            }),
            "embedding_manager",
        )
        .await?;
    Ok(outcome)
}

/// Currently loaded model/dimension, for `GET /api/embed/model/current`.
pub async fn current_model(db: &SurrealDbClient) -> Result<(String, usize), AppError> {
    let settings = SystemSettings::get_current(db).await?;
    Ok((settings.embedding_model, settings.embedding_dimensions as usize))
}

/// Non-empty embedding collections and their row counts, for
/// `GET /api/embed/model/collections`.
pub async fn collections(db: &SurrealDbClient) -> Result<Vec<CollectionStatus>, AppError> {
    collection_statuses(db).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::db::SurrealDbClient;
    use uuid::Uuid;

    async fn memory_db() -> SurrealDbClient {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory surrealdb");
        db.apply_migrations().await.expect("migrations");
        db
    }

    async fn seed_settings(db: &SurrealDbClient, model: &str, dims: u32) {
        let mut settings = SystemSettings::get_current(db).await.expect("default settings");
        settings.embedding_model = model.to_string();
        settings.embedding_dimensions = dims;
        SystemSettings::update(db, settings).await.expect("seed settings");
    }

    #[tokio::test]
    async fn same_dimension_switch_never_requires_wipe() {
        let db = memory_db().await;
        seed_settings(&db, "bge-small", 384).await;

        let check = check_switch(&db, EmbeddingBackend::FastEmbed, "minilm-l6")
            .await
            .expect("check");
        assert!(!check.requires_wipe);
        assert!(check.affected_collections.is_empty());

        let provider = EmbeddingProvider::new_hashed(384).expect("provider");
        let outcome = switch_model(&db, &provider, EmbeddingBackend::FastEmbed, "minilm-l6", false)
            .await
            .expect("switch without wipe");
        assert!(!outcome.collections_wiped);
        assert_eq!(outcome.new_dimension, 384);
    }

    #[tokio::test]
    async fn dimension_change_without_confirm_is_rejected() {
        let db = memory_db().await;
        seed_settings(&db, "bge-small", 384).await;

        let provider = EmbeddingProvider::new_hashed(384).expect("provider");
        let result = switch_model(&db, &provider, EmbeddingBackend::FastEmbed, "bge-large", false).await;
        assert!(matches!(result, Err(AppError::Conflict(_))));

        let settings = SystemSettings::get_current(&db).await.expect("settings unchanged");
        assert_eq!(settings.embedding_model, "bge-small");
    }

    #[tokio::test]
    async fn confirmed_wipe_empties_collections_and_updates_settings() {
        let db = memory_db().await;
        seed_settings(&db, "bge-small", 384).await;

        let seed = TextChunkEmbedding::new("chunk-1", "doc-1".to_string(), vec![0.1; 384], "user-1".to_string());
        db.store_item(seed).await.expect("seed embedding");

        let provider = EmbeddingProvider::new_hashed(384).expect("provider");
        let outcome = switch_model(&db, &provider, EmbeddingBackend::FastEmbed, "bge-large", true)
            .await
            .expect("switch with wipe");
        assert!(outcome.collections_wiped);
        assert_eq!(outcome.new_dimension, 1024);

        let statuses = collections(&db).await.expect("collections");
        assert!(statuses.iter().all(|status| status.row_count == 0));

        let settings = SystemSettings::get_current(&db).await.expect("settings updated");
        assert_eq!(settings.embedding_model, "bge-large");
        assert_eq!(settings.embedding_dimensions, 1024);
    }
}
