#![allow(clippy::missing_docs_in_private_items)]
//! The intake-to-completion record for a single ingested file (§3 File/IngestJob).
//! Generalizes the teacher's `ingestion_task.rs` single-purpose record with the
//! full classification/routing/retry shape this spec requires.

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FileCategory {
    Document,
    Image,
    Audio,
    Archive,
    Unknown,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum JobPriority {
    User = 1,
    Batch = 2,
    Reprocess = 3,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Queued,
    Processing,
    Completed,
    Failed,
    Dead,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum ImageLayout {
    Simple,
    Table,
    Mixed,
    Complex,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ImageClassification {
    Clean,
    Fixable,
    Messy,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageQualityScore {
    pub dpi: u32,
    pub skew_deg: f32,
    pub contrast_ratio: f32,
    pub has_noise: bool,
    pub layout: ImageLayout,
}

impl ImageQualityScore {
    pub const MIN_DPI: u32 = 150;
    pub const MAX_SKEW_DEGREES: f32 = 2.0;
    pub const MIN_CONTRAST: f32 = 0.4;

    /// §4.5: count the fixed issue thresholds, then classify.
    pub fn classify(&self) -> ImageClassification {
        let issues = [
            self.dpi < Self::MIN_DPI,
            self.skew_deg.abs() > Self::MAX_SKEW_DEGREES,
            self.contrast_ratio < Self::MIN_CONTRAST,
            self.has_noise,
        ]
        .into_iter()
        .filter(|issue| *issue)
        .count();

        let simple_layout = matches!(self.layout, ImageLayout::Simple | ImageLayout::Table);

        match issues {
            0 => ImageClassification::Clean,
            1 | 2 if simple_layout => ImageClassification::Fixable,
            _ => ImageClassification::Messy,
        }
    }
}

stored_object!(IngestJob, "ingest_job", {
    batch_id: Option<String>,
    path: String,
    original_name: String,
    size: i64,
    sha256: String,
    mime_type: String,
    category: FileCategory,
    extension: String,
    extension_fidelity: bool,
    width: Option<u32>,
    height: Option<u32>,
    dpi: Option<u32>,
    quality_score: Option<ImageQualityScore>,
    classification: Option<ImageClassification>,
    priority: JobPriority,
    status: JobStatus,
    worker_route: Vec<String>,
    route_index: usize,
    current_worker: Option<String>,
    retry_count: i32,
    max_retries: i32,
    document_id: Option<String>,
    error: Option<String>
});

impl IngestJob {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        path: String,
        original_name: String,
        size: i64,
        sha256: String,
        mime_type: String,
        category: FileCategory,
        extension: String,
        extension_fidelity: bool,
        priority: JobPriority,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            batch_id: None,
            path,
            original_name,
            size,
            sha256,
            mime_type,
            category,
            extension,
            extension_fidelity,
            width: None,
            height: None,
            dpi: None,
            quality_score: None,
            classification: None,
            priority,
            status: JobStatus::Pending,
            worker_route: Vec::new(),
            route_index: 0,
            current_worker: None,
            retry_count: 0,
            max_retries: 3,
            document_id: None,
            error: None,
        }
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    pub async fn persist(self, db: &SurrealDbClient) -> Result<Self, AppError> {
        db.store_item(self)
            .await
            .map_err(AppError::Database)?
            .ok_or_else(|| AppError::InternalError("failed to persist ingest job".to_string()))
    }

    pub async fn get(db: &SurrealDbClient, id: &str) -> Result<Option<Self>, AppError> {
        db.get_item(id).await.map_err(AppError::Database)
    }

    pub async fn find_by_batch(db: &SurrealDbClient, batch_id: &str) -> Result<Vec<Self>, AppError> {
        db.client
            .query("SELECT * FROM ingest_job WHERE batch_id = $batch_id")
            .bind(("batch_id", batch_id.to_string()))
            .await
            .map_err(AppError::Database)?
            .take(0)
            .map_err(AppError::Database)
    }

    /// Jobs still moving through the pipeline (`Queued`/`Processing`), most
    /// recently updated first, optionally narrowed to one pool (§6 `GET
    /// /api/ingest/queue`).
    pub async fn find_active(db: &SurrealDbClient, pool: Option<&str>) -> Result<Vec<Self>, AppError> {
        let where_pool = pool.map_or_else(String::new, |_| " AND current_worker = $pool".to_string());
        let sql = format!(
            "SELECT * FROM ingest_job WHERE (status = 'Queued' OR status = 'Processing'){where_pool} ORDER BY updated_at DESC"
        );

        let mut query = db.client.query(sql);
        if let Some(pool) = pool {
            query = query.bind(("pool", pool.to_string()));
        }

        query.await.map_err(AppError::Database)?.take(0).map_err(AppError::Database)
    }

    /// Persists the dispatcher's (§4.6) full mutable state for one transition:
    /// status, route (in case a `ROUTE_BY_QUALITY` marker was just resolved),
    /// position in the route, current worker, retry count, and terminal
    /// outcome fields. One UPDATE per transition, matching `Document::mark_status`'s
    /// pattern of targeted field updates rather than a full record rewrite.
    #[allow(clippy::too_many_arguments)]
    pub async fn update_dispatch_state(
        db: &SurrealDbClient,
        id: &str,
        status: JobStatus,
        worker_route: Vec<String>,
        route_index: usize,
        current_worker: Option<String>,
        retry_count: i32,
        document_id: Option<String>,
        error: Option<String>,
    ) -> Result<(), AppError> {
        db.client
            .query(
                "UPDATE type::thing('ingest_job', $id) SET \
                 status = $status, worker_route = $worker_route, route_index = $route_index, \
                 current_worker = $current_worker, retry_count = $retry_count, \
                 document_id = $document_id, error = $error",
            )
            .bind(("id", id.to_string()))
            .bind(("status", status))
            .bind(("worker_route", worker_route))
            .bind(("route_index", route_index))
            .bind(("current_worker", current_worker))
            .bind(("retry_count", retry_count))
            .bind(("document_id", document_id))
            .bind(("error", error))
            .await
            .map_err(AppError::Database)?
            .check()
            .map_err(AppError::Database)?;
        Ok(())
    }
}

/// Removes path separators and NUL bytes, caps length at 200 bytes, collapses
/// an empty result to `"unnamed"` (§4.3 filename sanitization).
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| *c != '/' && *c != '\\' && *c != '\0')
        .collect();

    let mut truncated = String::new();
    for c in cleaned.chars() {
        if truncated.len() + c.len_utf8() > 200 {
            break;
        }
        truncated.push(c);
    }

    if truncated.is_empty() {
        "unnamed".to_string()
    } else {
        truncated
    }
}
