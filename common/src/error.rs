use async_openai::error::OpenAIError;
use thiserror::Error;
use tokio::task::JoinError;

use crate::storage::types::file_info::FileError;

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("OpenAI error: {0}")]
    OpenAI(#[from] OpenAIError),
    #[error("File error: {0}")]
    File(#[from] FileError),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Authorization error: {0}")]
    Auth(String),
    #[error("LLM parsing error: {0}")]
    LLMParsing(String),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("Graph mapper error: {0}")]
    GraphMapper(String),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("Ingestion Processing error: {0}")]
    Processing(String),
    #[error("DOM smoothie error: {0}")]
    DomSmoothie(#[from] dom_smoothie::ReadabilityError),
    #[error("Internal service error: {0}")]
    InternalError(String),
    /// A downstream dependency (db, vector store, LLM, embedding model, worker
    /// service) is unreachable. Maps to HTTP 503; callers may retry.
    #[error("Dependency unavailable: {0}")]
    DependencyUnavailable(String),
    /// A request conflicts with current state (e.g. model switch requiring a
    /// wipe without `confirm_wipe`). Maps to HTTP 409.
    #[error("Conflict: {0}")]
    Conflict(String),
    /// A worker step failed in a way that is expected to be retryable.
    /// Distinct from `Processing` in that callers use it to decide whether to
    /// requeue (see `IngestJob::can_retry`).
    #[error("Transient worker failure: {0}")]
    TransientWorkerFailure(String),
    /// An unrecoverable invariant violation (e.g. mixed-dimension vectors
    /// observed in a collection). Never auto-retried.
    #[error("Fatal: {0}")]
    Fatal(String),
}

impl AppError {
    /// Maps a semantic error kind to the HTTP status code the API surface
    /// should return for it, per the error-kind table in the spec.
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::Validation(_) | AppError::LLMParsing(_) => 400,
            AppError::Auth(_) => 401,
            AppError::NotFound(_) => 404,
            AppError::Conflict(_) => 409,
            AppError::DependencyUnavailable(_) => 503,
            _ => 500,
        }
    }
}
