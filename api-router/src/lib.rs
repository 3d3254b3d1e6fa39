use api_state::ApiState;
use axum::{
    extract::{DefaultBodyLimit, FromRef},
    middleware::from_fn_with_state,
    routing::{get, post, put},
    Router,
};
use middleware_api_auth::api_auth;
use routes::{
    anomalies::{
        add_note as anomaly_add_note, bulk_update_status as anomaly_bulk_update_status, detect as anomaly_detect,
        detect_for_document as anomaly_detect_for_document, get as anomaly_get, list as anomaly_list,
        stats as anomaly_stats, update_status as anomaly_update_status,
    },
    categories::get_categories,
    contradictions::{
        analyze as contradiction_analyze, batch as contradiction_batch, detect_chains as contradiction_detect_chains,
        get_chains as contradiction_get_chains, list as contradiction_list, update_status as contradiction_update_status,
    },
    embed::{
        available_models, check_switch, collections as embedding_collections, current_model, embed_batch,
        embed_document, embed_text, nearest, switch_model,
    },
    ingest::{get_batch, get_job, get_queue, ingest_path, retry_job, upload, upload_batch},
    ingress::ingest_data,
    liveness::live,
    parse::{chunk_text, get_chunking_config, parse_document, parse_text},
    readiness::ready,
    search::{
        ai_feedback, chat as search_chat, filters as search_filters, hybrid_search, keyword_search, semantic_search,
        similar_documents, suggest,
    },
};

pub mod api_state;
pub mod error;
mod middleware_api_auth;
mod routes;

/// Router for API functionality, version 1
pub fn api_routes_v1<S>(app_state: &ApiState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    // Public, unauthenticated endpoints (for k8s/systemd probes)
    let public = Router::new()
        .route("/ready", get(ready))
        .route("/live", get(live));

    let body_limit = DefaultBodyLimit::max(app_state.config.ingest_max_body_bytes);

    // Protected API endpoints (require auth)
    let protected = Router::new()
        .route(
            "/ingest",
            post(ingest_data).layer(body_limit.clone()),
        )
        .route("/ingest/upload", post(upload).layer(body_limit.clone()))
        .route("/ingest/upload/batch", post(upload_batch).layer(body_limit))
        .route("/ingest/ingest-path", post(ingest_path))
        .route("/ingest/job/:id", get(get_job))
        .route("/ingest/job/:id/retry", post(retry_job))
        .route("/ingest/batch/:id", get(get_batch))
        .route("/ingest/queue", get(get_queue))
        .route("/categories", get(get_categories))
        .route("/embed/text", post(embed_text))
        .route("/embed/batch", post(embed_batch))
        .route("/embed/document/:id", post(embed_document))
        .route("/embed/nearest", post(nearest))
        .route("/embed/model/switch", post(switch_model))
        .route("/embed/model/check-switch", post(check_switch))
        .route("/embed/model/current", get(current_model))
        .route("/embed/model/available", get(available_models))
        .route("/embed/collections", get(embedding_collections))
        .route("/parse/text", post(parse_text))
        .route("/parse/chunk", post(chunk_text))
        .route("/parse/document/:id", post(parse_document))
        .route("/parse/config/chunking", get(get_chunking_config))
        .route("/search", post(hybrid_search))
        .route("/search/semantic", post(semantic_search))
        .route("/search/keyword", post(keyword_search))
        .route("/search/suggest", get(suggest))
        .route("/search/similar/:doc_id", get(similar_documents))
        .route("/search/filters", get(search_filters))
        .route("/search/chat", post(search_chat))
        .route("/search/ai/feedback", post(ai_feedback))
        .route("/anomalies/detect", post(anomaly_detect))
        .route("/anomalies/document/:id", post(anomaly_detect_for_document))
        .route("/anomalies/list", get(anomaly_list))
        .route("/anomalies/stats", get(anomaly_stats))
        .route("/anomalies/bulk-status", post(anomaly_bulk_update_status))
        .route("/anomalies/:id", get(anomaly_get))
        .route("/anomalies/:id/status", put(anomaly_update_status))
        .route("/anomalies/:id/notes", post(anomaly_add_note))
        .route("/contradictions/analyze", post(contradiction_analyze))
        .route("/contradictions/batch", post(contradiction_batch))
        .route("/contradictions/list", get(contradiction_list))
        .route("/contradictions/chains", get(contradiction_get_chains))
        .route("/contradictions/detect-chains", post(contradiction_detect_chains))
        .route("/contradictions/:id/status", put(contradiction_update_status))
        .route_layer(from_fn_with_state(app_state.clone(), api_auth));

    public.merge(protected)
}
