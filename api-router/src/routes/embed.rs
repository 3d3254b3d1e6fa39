//! Embedding Manager HTTP surface (§4.8): embed raw text/batches/documents
//! through `ApiState::embedding_provider`, run a nearest-neighbor lookup over
//! stored chunk embeddings, and manage the active embedding model through
//! `retrieval_pipeline::embedding_manager`.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use common::{
    error::AppError,
    storage::types::{document::Document, text_chunk::TextChunk},
    utils::config::EmbeddingBackend,
};
use retrieval_pipeline::embedding_manager;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct EmbedTextRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct EmbedTextResponse {
    pub embedding: Vec<f32>,
    pub dimension: usize,
    pub backend: String,
}

pub async fn embed_text(
    State(state): State<ApiState>,
    Json(input): Json<EmbedTextRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let embedding = state.embedding_provider.embed(&input.text).await?;
    Ok(Json(EmbedTextResponse {
        dimension: embedding.len(),
        embedding,
        backend: state.embedding_provider.backend_label().to_string(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct EmbedBatchRequest {
    pub texts: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct EmbedBatchResponse {
    pub embeddings: Vec<Vec<f32>>,
    pub dimension: usize,
    pub backend: String,
}

pub async fn embed_batch(
    State(state): State<ApiState>,
    Json(input): Json<EmbedBatchRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let embeddings = state
        .embedding_provider
        .embed_batch(&input.texts, state.config.embed.batch_size)
        .await?;
    Ok(Json(EmbedBatchResponse {
        dimension: state.embedding_provider.dimension(),
        embeddings,
        backend: state.embedding_provider.backend_label().to_string(),
    }))
}

/// `POST /api/embed/document/{id}`: (re)embeds every page of a registered
/// document's text as one chunk per page, storing chunk + embedding together.
/// Synchronous — unlike ingestion intake, there's no dispatcher route for a
/// standalone "re-embed" job, so this runs inline on the request.
pub async fn embed_document(
    State(state): State<ApiState>,
    axum::extract::Path(id): axum::extract::Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let document = Document::get(&state.db, &id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("document {id}")))?;

    let mut chunk_ids = Vec::with_capacity(document.text_pages.len());
    for page in &document.text_pages {
        if page.text.trim().is_empty() {
            continue;
        }
        let embedding = state.embedding_provider.embed(&page.text).await?;
        let chunk = TextChunk::new(document.id.clone(), page.text.clone(), "system".to_string());
        chunk_ids.push(chunk.id.clone());
        TextChunk::store_with_embedding(chunk, embedding, &state.db).await?;
    }

    Ok((
        StatusCode::OK,
        Json(json!({ "document_id": document.id, "chunks_embedded": chunk_ids.len(), "chunk_ids": chunk_ids })),
    ))
}

#[derive(Debug, Deserialize)]
pub struct NearestRequest {
    pub text: String,
    pub user_id: String,
    #[serde(default = "default_take")]
    pub take: usize,
}

fn default_take() -> usize {
    10
}

pub async fn nearest(
    State(state): State<ApiState>,
    Json(input): Json<NearestRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let embedding = state.embedding_provider.embed(&input.text).await?;
    let results = TextChunk::vector_search(input.take, embedding, &state.db, &input.user_id).await?;
    Ok(Json(results))
}

#[derive(Debug, Deserialize)]
pub struct ModelSwitchRequest {
    pub model: String,
    #[serde(default)]
    pub backend: Option<String>,
    #[serde(default)]
    pub confirm_wipe: bool,
}

fn parse_backend(raw: Option<&str>) -> Result<EmbeddingBackend, ApiError> {
    match raw.unwrap_or("fast_embed").to_ascii_lowercase().as_str() {
        "fast_embed" | "fastembed" => Ok(EmbeddingBackend::FastEmbed),
        "openai" => Ok(EmbeddingBackend::OpenAi),
        other => Err(ApiError::ValidationError(format!("unknown embedding backend '{other}'"))),
    }
}

/// `POST /api/embed/model/switch`: applies the §4.8 switch contract, 409 if a
/// dimension change is attempted without `confirm_wipe`.
pub async fn switch_model(
    State(state): State<ApiState>,
    Json(input): Json<ModelSwitchRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let backend = parse_backend(input.backend.as_deref())?;
    let outcome = embedding_manager::switch_model_and_emit(
        &state.db,
        &state.embedding_provider,
        &state.event_bus,
        backend,
        &input.model,
        input.confirm_wipe,
    )
    .await?;
    Ok(Json(outcome))
}

/// `POST /api/embed/model/check-switch`: dry-run for `switch_model`.
pub async fn check_switch(
    State(state): State<ApiState>,
    Json(input): Json<ModelSwitchRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let backend = parse_backend(input.backend.as_deref())?;
    let check = embedding_manager::check_switch(&state.db, backend, &input.model).await?;
    Ok(Json(check))
}

pub async fn current_model(State(state): State<ApiState>) -> Result<impl IntoResponse, ApiError> {
    let (model, dimension) = embedding_manager::current_model(&state.db).await?;
    Ok(Json(json!({ "model": model, "dimension": dimension })))
}

/// `GET /api/embed/model/available`: the fixed set of backends/models this
/// deployment can switch to, mirroring the resolution table
/// `common::utils::embedding::resolve_fastembed_model` supports.
pub async fn available_models() -> impl IntoResponse {
    Json(json!({
        "fast_embed": ["BAAI/bge-small-en-v1.5", "BAAI/bge-base-en-v1.5", "BAAI/bge-large-en-v1.5", "sentence-transformers/all-MiniLM-L6-v2"],
        "openai": ["text-embedding-3-small", "text-embedding-3-large"],
    }))
}

pub async fn collections(State(state): State<ApiState>) -> Result<impl IntoResponse, ApiError> {
    let collections = embedding_manager::collections(&state.db).await?;
    Ok(Json(collections))
}
