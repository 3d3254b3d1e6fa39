//! Anomalies HTTP surface (§4.13, §6): red-flag pattern detection over
//! document text, plus listing/status/notes management for persisted
//! `Anomaly` findings.
//!
//! Only `anomaly_detection::red_flag::detect` is wired up here — the
//! `content`/`metadata`/`statistical` detectors all take precomputed
//! corpus-wide statistics (`CorpusTextStats`, per-field `MetricStats`,
//! a full `corpus_embeddings` slice) that nothing in this codebase currently
//! aggregates; that's a batch/worker job, not a per-request HTTP concern.

use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use common::{
    error::AppError,
    storage::types::{
        anomaly::{Anomaly, AnomalySeverity, AnomalyStatus},
        document::Document,
    },
};
use serde::Deserialize;

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct DetectRequest {
    pub doc_id: String,
    pub text: String,
}

pub async fn detect(
    State(state): State<ApiState>,
    Json(input): Json<DetectRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let anomalies = anomaly_detection::red_flag::detect(&state.db, &input.doc_id, &input.text).await?;
    Ok(Json(anomalies))
}

/// `POST /api/anomalies/document/{id}`: loads a registered document's text
/// pages and runs red-flag detection over their concatenated text.
pub async fn detect_for_document(
    State(state): State<ApiState>,
    axum::extract::Path(id): axum::extract::Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let document = Document::get(&state.db, &id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("document {id}")))?;

    let text = document
        .text_pages
        .iter()
        .map(|page| page.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    let anomalies = anomaly_detection::red_flag::detect(&state.db, &document.id, &text).await?;
    Ok(Json(anomalies))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<AnomalyStatus>,
    pub severity: Option<AnomalySeverity>,
}

pub async fn list(
    State(state): State<ApiState>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let anomalies = Anomaly::list(&state.db, query.status, query.severity).await?;
    Ok(Json(anomalies))
}

pub async fn stats(State(state): State<ApiState>) -> Result<impl IntoResponse, ApiError> {
    let stats = Anomaly::stats(&state.db).await?;
    Ok(Json(stats))
}

pub async fn get(
    State(state): State<ApiState>,
    axum::extract::Path(id): axum::extract::Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let anomaly = Anomaly::get(&state.db, &id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("anomaly {id}")))?;
    Ok(Json(anomaly))
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: AnomalyStatus,
}

pub async fn update_status(
    State(state): State<ApiState>,
    axum::extract::Path(id): axum::extract::Path<String>,
    Json(input): Json<UpdateStatusRequest>,
) -> Result<impl IntoResponse, ApiError> {
    Anomaly::update_status(&state.db, &id, input.status).await?;
    let anomaly = Anomaly::get(&state.db, &id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("anomaly {id}")))?;
    Ok(Json(anomaly))
}

#[derive(Debug, Deserialize)]
pub struct AddNoteRequest {
    pub note: String,
}

pub async fn add_note(
    State(state): State<ApiState>,
    axum::extract::Path(id): axum::extract::Path<String>,
    Json(input): Json<AddNoteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let anomaly = Anomaly::add_note(&state.db, &id, &input.note).await?;
    Ok(Json(anomaly))
}

#[derive(Debug, Deserialize)]
pub struct BulkStatusRequest {
    pub ids: Vec<String>,
    pub status: AnomalyStatus,
}

pub async fn bulk_update_status(
    State(state): State<ApiState>,
    Json(input): Json<BulkStatusRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let updated = Anomaly::bulk_update_status(&state.db, &input.ids, input.status).await?;
    Ok(Json(serde_json::json!({ "updated": updated })))
}
