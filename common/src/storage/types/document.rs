#![allow(clippy::missing_docs_in_private_items)]
//! Registered documents (§3 Document): the persisted result of a completed
//! ingestion job. Owned in spirit by an external Documents service; this core
//! holds the reference record the dispatcher's Document Registration step
//! (§4.7) creates and the parse/embed shards subscribe against.

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DocumentStatus {
    Processing,
    Processed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TextPage {
    pub page_number: u32,
    pub text: String,
}

stored_object!(Document, "document", {
    filename: String,
    mime_type: String,
    size: i64,
    status: DocumentStatus,
    metadata: Map<String, Value>,
    text_pages: Vec<TextPage>,
    /// The `IngestJob` this document was registered from. Registration dedups
    /// on this field so a double-delivered `ingest.job.completed` never
    /// creates two documents for the same job (§5 idempotence requirements).
    source_job_id: Option<String>
});

impl Document {
    pub fn new(filename: String, mime_type: String, size: i64, source_job_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            filename,
            mime_type,
            size,
            status: DocumentStatus::Processing,
            metadata: Map::new(),
            text_pages: Vec::new(),
            source_job_id,
        }
    }

    /// Registers the document produced by `source_job_id`, or returns the
    /// existing one if this job was already registered (idempotent per §5).
    pub async fn register(
        db: &SurrealDbClient,
        filename: String,
        mime_type: String,
        size: i64,
        text_pages: Vec<TextPage>,
        metadata: Map<String, Value>,
        source_job_id: &str,
    ) -> Result<Self, AppError> {
        if let Some(existing) = Self::find_by_job(db, source_job_id).await? {
            return Ok(existing);
        }

        let mut document = Self::new(filename, mime_type, size, Some(source_job_id.to_string()));
        document.text_pages = text_pages;
        document.metadata = metadata;
        document.status = DocumentStatus::Processed;

        db.store_item(document)
            .await
            .map_err(AppError::Database)?
            .ok_or_else(|| AppError::InternalError("failed to register document".to_string()))
    }

    pub async fn find_by_job(db: &SurrealDbClient, source_job_id: &str) -> Result<Option<Self>, AppError> {
        let mut results: Vec<Self> = db
            .client
            .query("SELECT * FROM document WHERE source_job_id = $source_job_id LIMIT 1")
            .bind(("source_job_id", source_job_id.to_string()))
            .await
            .map_err(AppError::Database)?
            .take(0)
            .map_err(AppError::Database)?;
        Ok(results.pop())
    }

    pub async fn get(db: &SurrealDbClient, id: &str) -> Result<Option<Self>, AppError> {
        db.get_item(id).await.map_err(AppError::Database)
    }

    pub async fn mark_status(db: &SurrealDbClient, id: &str, status: DocumentStatus) -> Result<(), AppError> {
        db.client
            .query("UPDATE type::thing('document', $id) SET status = $status")
            .bind(("id", id.to_string()))
            .bind(("status", status))
            .await
            .map_err(AppError::Database)?
            .check()
            .map_err(AppError::Database)?;
        Ok(())
    }
}
