//! Contradictions HTTP surface (§4.14, §6): pairs claims across two
//! documents, heuristically verifies and scores them, persists confirmed
//! contradictions, and links them into chains.

use axum::{extract::State, response::IntoResponse, Json};
use common::{
    error::AppError,
    storage::types::contradiction::{Contradiction, ContradictionStatus},
};
use contradiction_detection::{chains, claims::extract_claims_simple, similarity, verify};
use serde::Deserialize;
use serde_json::json;

use crate::{api_state::ApiState, error::ApiError};

/// Embedding cosine-similarity threshold claim pairs must clear before
/// heuristic verification runs on them.
const SIMILARITY_THRESHOLD: f32 = 0.5;

async fn analyze_pair(
    state: &ApiState,
    doc_a_id: &str,
    text_a: &str,
    doc_b_id: &str,
    text_b: &str,
) -> Result<Vec<Contradiction>, AppError> {
    let claims_a = extract_claims_simple(text_a, doc_a_id);
    let claims_b = extract_claims_simple(text_b, doc_b_id);

    if claims_a.is_empty() || claims_b.is_empty() {
        return Ok(Vec::new());
    }

    let mut embeddings_a = Vec::with_capacity(claims_a.len());
    for claim in &claims_a {
        embeddings_a.push(state.embedding_provider.embed(&claim.text).await?);
    }
    let mut embeddings_b = Vec::with_capacity(claims_b.len());
    for claim in &claims_b {
        embeddings_b.push(state.embedding_provider.embed(&claim.text).await?);
    }

    let pairs = similarity::find_similar_claims(&claims_a, &embeddings_a, &claims_b, &embeddings_b, SIMILARITY_THRESHOLD);

    let mut recorded = Vec::new();
    for (claim_a, claim_b, sim) in pairs {
        let Some(verdict) = verify::verify_contradiction_heuristic(&claim_a, &claim_b, sim) else {
            continue;
        };
        let severity = verify::score_severity(&claim_a.text, &claim_b.text, verdict.contradiction_type, verdict.confidence);
        let contradiction = Contradiction::record(
            &state.db,
            doc_a_id,
            doc_b_id,
            claim_a.text.clone(),
            claim_b.text.clone(),
            verdict.contradiction_type,
            severity,
            verdict.confidence,
        )
        .await?;
        recorded.push(contradiction);
    }

    Ok(recorded)
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    pub doc_a_id: String,
    pub text_a: String,
    pub doc_b_id: String,
    pub text_b: String,
}

pub async fn analyze(
    State(state): State<ApiState>,
    Json(input): Json<AnalyzeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let contradictions = analyze_pair(&state, &input.doc_a_id, &input.text_a, &input.doc_b_id, &input.text_b).await?;
    Ok(Json(contradictions))
}

#[derive(Debug, Deserialize)]
pub struct DocumentPair {
    pub doc_a_id: String,
    pub text_a: String,
    pub doc_b_id: String,
    pub text_b: String,
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub pairs: Vec<DocumentPair>,
}

/// `POST /api/contradictions/batch`: runs `analyze` across every supplied
/// document pair sequentially. Each embedding call already goes through the
/// provider's own batching/caching, so there's no separate concurrency
/// control needed here.
pub async fn batch(
    State(state): State<ApiState>,
    Json(input): Json<BatchRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut all = Vec::new();
    for pair in input.pairs {
        let found = analyze_pair(&state, &pair.doc_a_id, &pair.text_a, &pair.doc_b_id, &pair.text_b).await?;
        all.extend(found);
    }
    Ok(Json(all))
}

pub async fn list(State(state): State<ApiState>) -> Result<impl IntoResponse, ApiError> {
    let contradictions = Contradiction::all(&state.db).await?;
    Ok(Json(contradictions))
}

pub async fn get_chains(State(state): State<ApiState>) -> Result<impl IntoResponse, ApiError> {
    let chains = Contradiction::chains(&state.db).await?;
    Ok(Json(chains))
}

/// `POST /api/contradictions/detect-chains`: re-derives chains from every
/// persisted contradiction and assigns each discovered chain a fresh id.
pub async fn detect_chains(State(state): State<ApiState>) -> Result<impl IntoResponse, ApiError> {
    let all = Contradiction::all(&state.db).await?;
    let discovered = chains::detect_chains(&all);

    let mut assigned = 0usize;
    for (index, chain) in discovered.iter().enumerate() {
        let chain_id = format!("chain-{}", index + 1);
        for contradiction_id in chain {
            Contradiction::assign_chain(&state.db, contradiction_id, &chain_id).await?;
            assigned += 1;
        }
    }

    Ok(Json(json!({ "chains_found": discovered.len(), "contradictions_assigned": assigned })))
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: ContradictionStatus,
}

pub async fn update_status(
    State(state): State<ApiState>,
    axum::extract::Path(id): axum::extract::Path<String>,
    Json(input): Json<UpdateStatusRequest>,
) -> Result<impl IntoResponse, ApiError> {
    Contradiction::update_status(&state.db, &id, input.status).await?;
    let contradiction = Contradiction::get(&state.db, &id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("contradiction {id}")))?;
    Ok(Json(contradiction))
}
