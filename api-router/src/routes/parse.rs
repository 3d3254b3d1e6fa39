//! Parse HTTP surface (§4.10): chunks raw text or a registered document's
//! pages via `retrieval_pipeline::chunker`, and exposes the chunking defaults
//! sourced from `AppConfig::parse`.

use std::collections::HashMap;

use axum::{extract::State, response::IntoResponse, Json};
use common::{
    error::AppError,
    storage::types::{document::Document, text_chunk::TextChunk},
};
use retrieval_pipeline::chunker::{self, ChunkMethod, ChunkerConfig, TextSpan};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{api_state::ApiState, error::ApiError};

fn parse_method(raw: Option<&str>) -> Result<ChunkMethod, ApiError> {
    match raw.unwrap_or("fixed") {
        "fixed" => Ok(ChunkMethod::Fixed),
        "sentence" => Ok(ChunkMethod::Sentence),
        "semantic" => Ok(ChunkMethod::Semantic),
        other => Err(ApiError::ValidationError(format!("unknown chunk method '{other}'"))),
    }
}

/// Splits `text` on sentence terminators, trimming empties. Mirrors the
/// chunker's own internal splitter closely enough to seed a semantic-method
/// embedding cache without exposing that private helper across the crate
/// boundary.
fn split_sentences(text: &str) -> Vec<String> {
    text.split(|c| c == '.' || c == '!' || c == '?')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Serialize)]
pub struct ChunkSpan {
    pub text: String,
    pub start_offset: usize,
    pub end_offset: usize,
}

impl From<TextSpan> for ChunkSpan {
    fn from(span: TextSpan) -> Self {
        Self { text: span.text, start_offset: span.start_offset, end_offset: span.end_offset }
    }
}

async fn chunk_with_method(
    state: &ApiState,
    text: &str,
    method: ChunkMethod,
    config: ChunkerConfig,
) -> Result<Vec<TextSpan>, AppError> {
    if method != ChunkMethod::Semantic {
        return Ok(chunker::chunk(text, method, config, |_| None));
    }

    let mut cache: HashMap<String, Vec<f32>> = HashMap::new();
    for sentence in split_sentences(text) {
        if cache.contains_key(&sentence) {
            continue;
        }
        let embedding = state.embedding_provider.embed(&sentence).await?;
        cache.insert(sentence, embedding);
    }

    Ok(chunker::chunk(text, method, config, |s| cache.get(s).cloned()))
}

#[derive(Debug, Deserialize)]
pub struct ChunkTextRequest {
    pub text: String,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub chunk_size: Option<usize>,
    #[serde(default)]
    pub overlap: Option<usize>,
}

pub async fn chunk_text(
    State(state): State<ApiState>,
    Json(input): Json<ChunkTextRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let method = parse_method(input.method.as_deref())?;
    let config = ChunkerConfig {
        chunk_size: input.chunk_size.unwrap_or(state.config.parse.chunk_size),
        overlap: input.overlap.unwrap_or(state.config.parse.chunk_overlap),
    };

    let spans = chunk_with_method(&state, &input.text, method, config).await?;
    let spans: Vec<ChunkSpan> = spans.into_iter().map(ChunkSpan::from).collect();
    Ok(Json(json!({ "method": input.method.unwrap_or_else(|| "fixed".to_string()), "chunks": spans })))
}

/// `POST /api/parse/text`: chunks free-form text without persisting anything,
/// for previewing how a chunking config would split a document before it's
/// ingested.
pub async fn parse_text(
    State(state): State<ApiState>,
    Json(input): Json<ChunkTextRequest>,
) -> Result<impl IntoResponse, ApiError> {
    chunk_text(State(state), Json(input)).await
}

/// `POST /api/parse/document/{id}`: chunks every page of a registered
/// document and stores the resulting `TextChunk` rows (without embeddings —
/// pair with `POST /api/embed/document/{id}` to also embed them).
pub async fn parse_document(
    State(state): State<ApiState>,
    axum::extract::Path(id): axum::extract::Path<String>,
    Json(input): Json<ChunkTextRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let document = Document::get(&state.db, &id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("document {id}")))?;

    let method = parse_method(input.method.as_deref())?;
    let config = ChunkerConfig {
        chunk_size: input.chunk_size.unwrap_or(state.config.parse.chunk_size),
        overlap: input.overlap.unwrap_or(state.config.parse.chunk_overlap),
    };

    let mut total_chunks = 0usize;
    for page in &document.text_pages {
        let spans = chunk_with_method(&state, &page.text, method, config).await?;
        for span in spans {
            let chunk = TextChunk::new(document.id.clone(), span.text, "system".to_string());
            state.db.store_item(chunk).await.map_err(AppError::Database)?;
            total_chunks += 1;
        }
    }

    Ok(Json(json!({ "document_id": document.id, "chunks_created": total_chunks })))
}

#[derive(Debug, Serialize)]
pub struct ChunkingConfigResponse {
    pub chunk_size: usize,
    pub overlap: usize,
}

pub async fn get_chunking_config(State(state): State<ApiState>) -> impl IntoResponse {
    Json(ChunkingConfigResponse {
        chunk_size: state.config.parse.chunk_size,
        overlap: state.config.parse.chunk_overlap,
    })
}
