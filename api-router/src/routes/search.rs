//! Search HTTP surface (§4.11, §4.15): hybrid/semantic/keyword retrieval over
//! chunks and entities, result-set facets, and similar-document lookup.
//! Grounded in `retrieval_pipeline`'s RRF/pipeline modules and
//! `TextChunk::{vector_search,fts_search}`.

use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use common::{
    error::AppError,
    storage::types::text_chunk::{TextChunk, TextChunkSearchResult},
};
use retrieval_pipeline::{
    facets,
    rrf::{self, FusedItem, RankedItem},
    retrieve_entities, RetrievalConfig, SearchTarget, StrategyOutput,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{api_state::ApiState, error::ApiError};

fn default_limit() -> usize {
    20
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    pub user_id: String,
    #[serde(default)]
    pub semantic_weight: Option<f64>,
    #[serde(default)]
    pub keyword_weight: Option<f64>,
    #[serde(default)]
    pub offset: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

/// `POST /api/search/` — hybrid retrieval: fuses a vector-search ranking and
/// an FTS ranking over the same user's chunks with `rrf::reciprocal_rank_fusion`.
pub async fn hybrid_search(
    State(state): State<ApiState>,
    Json(input): Json<SearchRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let embedding = state.embedding_provider.embed(&input.query).await?;
    let take = input.offset + input.limit;

    let semantic_hits = TextChunk::vector_search(take.max(1), embedding, &state.db, &input.user_id).await?;
    let keyword_hits = TextChunk::fts_search(take.max(1), &input.query, &state.db, &input.user_id).await?;

    let semantic: Vec<RankedItem<TextChunkSearchResult>> = semantic_hits
        .into_iter()
        .map(|hit| RankedItem {
            doc_id: hit.chunk.source_id.clone(),
            chunk_id: hit.chunk.id.clone(),
            highlights: Vec::new(),
            payload: hit,
        })
        .collect();
    let keyword: Vec<RankedItem<TextChunkSearchResult>> = keyword_hits
        .into_iter()
        .map(|hit| RankedItem {
            doc_id: hit.chunk.source_id.clone(),
            chunk_id: hit.chunk.id.clone(),
            highlights: Vec::new(),
            payload: hit,
        })
        .collect();

    let semantic_weight = input
        .semantic_weight
        .unwrap_or(f64::from(state.config.search.default_semantic_weight));
    let keyword_weight = input
        .keyword_weight
        .unwrap_or(f64::from(state.config.search.default_keyword_weight));

    let fused = rrf::reciprocal_rank_fusion(&semantic, &keyword, semantic_weight, keyword_weight);
    let page = rrf::paginate(fused, input.offset, input.limit);

    let results: Vec<_> = page
        .into_iter()
        .map(|item: FusedItem<TextChunkSearchResult>| {
            json!({
                "doc_id": item.doc_id,
                "chunk_id": item.chunk_id,
                "score": item.score,
                "chunk": item.payload.chunk.chunk,
            })
        })
        .collect();

    Ok(Json(json!({ "results": results })))
}

#[derive(Debug, Deserialize)]
pub struct SemanticSearchRequest {
    pub query: String,
    pub user_id: String,
    #[serde(default)]
    pub target: Option<String>,
}

fn parse_target(raw: Option<&str>) -> Result<SearchTarget, ApiError> {
    match raw.unwrap_or("both") {
        "entities" | "entities_only" => Ok(SearchTarget::EntitiesOnly),
        "chunks" | "chunks_only" => Ok(SearchTarget::ChunksOnly),
        "both" => Ok(SearchTarget::Both),
        other => Err(ApiError::ValidationError(format!("unknown search target '{other}'"))),
    }
}

/// `POST /api/search/semantic` — runs the full retrieval pipeline's `Search`
/// strategy, which itself blends vector search, FTS, and graph traversal.
pub async fn semantic_search(
    State(state): State<ApiState>,
    Json(input): Json<SemanticSearchRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let target = parse_target(input.target.as_deref())?;
    let config = RetrievalConfig::for_search(target);

    let output = retrieve_entities(
        &state.db,
        &state.openai_client,
        Some(&state.embedding_provider),
        &input.query,
        &input.user_id,
        config,
        None,
    )
    .await?;

    let search_result = match output {
        StrategyOutput::Search(result) => result,
        _ => return Err(AppError::InternalError("search strategy returned unexpected output".into()).into()),
    };

    let chunks: Vec<_> = search_result
        .chunks
        .iter()
        .map(|c| json!({ "chunk_id": c.chunk.id, "source_id": c.chunk.source_id, "score": c.score, "text": c.chunk.chunk }))
        .collect();
    let entities: Vec<_> = search_result
        .entities
        .iter()
        .map(|e| json!({ "entity_id": e.entity.id, "name": e.entity.name, "score": e.score }))
        .collect();

    Ok(Json(json!({ "chunks": chunks, "entities": entities })))
}

#[derive(Debug, Deserialize)]
pub struct KeywordSearchRequest {
    pub query: String,
    pub user_id: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

pub async fn keyword_search(
    State(state): State<ApiState>,
    Json(input): Json<KeywordSearchRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let results = TextChunk::fts_search(input.limit, &input.query, &state.db, &input.user_id).await?;
    Ok(Json(results))
}

#[derive(Debug, Deserialize)]
pub struct SuggestQuery {
    pub q: String,
    pub user_id: String,
}

/// `GET /api/search/suggest?q=` — cheap autocomplete: top FTS hits' chunk
/// text, truncated to a short snippet.
pub async fn suggest(
    State(state): State<ApiState>,
    Query(query): Query<SuggestQuery>,
) -> Result<impl IntoResponse, ApiError> {
    if query.q.trim().is_empty() {
        return Ok(Json(json!({ "suggestions": Vec::<String>::new() })));
    }

    let hits = TextChunk::fts_search(5, &query.q, &state.db, &query.user_id).await?;
    let suggestions: Vec<String> = hits
        .into_iter()
        .map(|hit| hit.chunk.chunk.chars().take(80).collect())
        .collect();

    Ok(Json(json!({ "suggestions": suggestions })))
}

#[derive(Debug, Deserialize)]
pub struct SimilarQuery {
    pub user_id: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

/// `GET /api/search/similar/{doc_id}` — seeds a vector search from one of the
/// document's own chunk embeddings, excluding chunks from the same document.
pub async fn similar_documents(
    State(state): State<ApiState>,
    axum::extract::Path(doc_id): axum::extract::Path<String>,
    Query(query): Query<SimilarQuery>,
) -> Result<impl IntoResponse, ApiError> {
    use common::storage::types::{text_chunk_embedding::TextChunkEmbedding, StoredObject};
    use surrealdb::RecordId;

    let chunks = TextChunk::find_by_source_id(&state.db, &doc_id).await?;
    let Some(seed_chunk) = chunks.into_iter().next() else {
        return Err(ApiError::NotFound(format!("no chunks found for document {doc_id}")));
    };

    let chunk_ref = RecordId::from_table_key(TextChunk::table_name(), &seed_chunk.id);
    let seed_embedding = TextChunkEmbedding::get_by_chunk_id(&chunk_ref, &state.db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("no embedding found for document {doc_id}")))?;

    let hits = TextChunk::vector_search(query.limit + 10, seed_embedding.embedding, &state.db, &query.user_id).await?;
    let similar: Vec<_> = hits
        .into_iter()
        .filter(|hit| hit.chunk.source_id != doc_id)
        .take(query.limit)
        .map(|hit| json!({ "source_id": hit.chunk.source_id, "chunk_id": hit.chunk.id, "score": hit.score }))
        .collect();

    Ok(Json(json!({ "document_id": doc_id, "similar": similar })))
}

#[derive(Debug, Deserialize)]
pub struct FiltersQuery {
    pub q: Option<String>,
}

pub async fn filters(
    State(state): State<ApiState>,
    Query(query): Query<FiltersQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let filters = facets::get_available_filters(&state.db, query.q.as_deref()).await?;
    Ok(Json(filters))
}

#[derive(Debug, Deserialize)]
pub struct AiFeedbackRequest {
    pub query: String,
    pub result_id: String,
    pub helpful: bool,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AiFeedbackAck {
    pub received: bool,
}

/// `POST /api/search/ai/feedback` — search relevance feedback is logged onto
/// the event bus rather than given its own storage type; there's nothing here
/// yet that reads it back (no feedback-driven reranking), so a first-class
/// table would be speculative.
pub async fn ai_feedback(
    State(state): State<ApiState>,
    Json(input): Json<AiFeedbackRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .event_bus
        .emit(
            "search.ai.feedback",
            json!({
                "query": input.query,
                "result_id": input.result_id,
                "helpful": input.helpful,
                "comment": input.comment,
            }),
            "search_routes",
        )
        .await?;
    Ok(Json(AiFeedbackAck { received: true }))
}

/// `POST /api/search/chat` — conversational retrieval-augmented chat over SSE
/// is out of scope here: it requires an LLM-inference/streaming-response
/// layer this crate doesn't own (the retrieval pipeline only ever returns a
/// finished `StrategyOutput`, never a token stream).
pub async fn chat() -> Result<impl IntoResponse, ApiError> {
    Err(ApiError::ValidationError(
        "conversational chat is not implemented by this retrieval surface; use /api/search/semantic".to_string(),
    ))
}
