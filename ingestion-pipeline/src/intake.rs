//! Intake Manager (§4.3): `receive_file`/`receive_batch`/`receive_path` stream
//! bytes, hash, classify, quality-score images, compute the initial
//! `worker_route`, move the file to canonical storage, and persist the job
//! record that the dispatcher later drives.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use chrono::{Datelike, Utc};
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        store::StorageManager,
        types::ingest_job::{
            sanitize_file_name, FileCategory, ImageLayout, ImageQualityScore, IngestJob,
            JobPriority, JobStatus,
        },
    },
    utils::config::OcrMode,
};
use sha2::{Digest, Sha256};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::classifier::{self, Classification};

/// Raw per-image metrics behind the quality classifier (§4.5). Deriving these
/// from pixel data needs an image codec the same way PDF/DOCX extraction
/// needs a document codec; this crate specifies the seam the same way it
/// specifies `extract`/`embed`/`generate` for its other external
/// collaborators, and ships one dependency-free estimator so intake produces
/// a usable score without one.
pub trait ImageQualityAnalyzer: Send + Sync {
    fn analyze(&self, bytes: &[u8]) -> ImageQualityScore;
}

/// Byte-statistics proxy analyzer. Approximates `has_noise` from sampled byte
/// variance and otherwise reports print-grade defaults a real codec would
/// replace with measured DPI/skew/contrast.
pub struct HeuristicImageQualityAnalyzer;

const NOISE_VARIANCE_THRESHOLD: f64 = 4500.0;
const SAMPLE_TARGET: usize = 2048;

impl ImageQualityAnalyzer for HeuristicImageQualityAnalyzer {
    fn analyze(&self, bytes: &[u8]) -> ImageQualityScore {
        ImageQualityScore {
            dpi: 300,
            skew_deg: 0.0,
            contrast_ratio: 0.6,
            has_noise: sampled_byte_variance(bytes) > NOISE_VARIANCE_THRESHOLD,
            layout: ImageLayout::Simple,
        }
    }
}

fn sampled_byte_variance(bytes: &[u8]) -> f64 {
    if bytes.is_empty() {
        return 0.0;
    }
    let stride = (bytes.len() / SAMPLE_TARGET).max(1);
    let sample: Vec<f64> = bytes.iter().step_by(stride).map(|b| f64::from(*b)).collect();
    let mean = sample.iter().sum::<f64>() / sample.len() as f64;
    sample.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / sample.len() as f64
}

fn extension_of(file_name: &str) -> String {
    Path::new(file_name)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default()
}

fn category_label(category: FileCategory) -> &'static str {
    match category {
        FileCategory::Document => "document",
        FileCategory::Image => "image",
        FileCategory::Audio => "audio",
        FileCategory::Archive => "archive",
        FileCategory::Unknown => "unknown",
    }
}

/// `storage/<YYYY/MM/DD>/<category>/<job_id><ext>` (§4.3 step 5).
fn canonical_storage_path(job_id: &str, category: FileCategory, extension: &str) -> String {
    let now = Utc::now();
    format!(
        "storage/{year:04}/{month:02}/{day:02}/{category}/{job_id}{extension}",
        year = now.year(),
        month = now.month(),
        day = now.day(),
        category = category_label(category),
        job_id = job_id,
        extension = extension,
    )
}

/// Streams `bytes` through hashing and classification, quality-scores images,
/// moves the content to canonical storage, and persists the resulting
/// `IngestJob`. `worker_route` carries any `ROUTE_BY_QUALITY`/`RECURSE_ATTACHMENTS`
/// markers unresolved; the dispatcher (§4.6) resolves them at dispatch time.
#[instrument(skip(db, storage, analyzer, bytes), fields(file_name = %file_name))]
pub async fn receive_file(
    db: &SurrealDbClient,
    storage: &StorageManager,
    analyzer: &dyn ImageQualityAnalyzer,
    ocr_mode: OcrMode,
    file_name: &str,
    bytes: &[u8],
    priority: JobPriority,
    batch_id: Option<String>,
) -> Result<IngestJob, AppError> {
    let sanitized_name = sanitize_file_name(file_name);
    let sha256 = hash_bytes(bytes);
    let extension = extension_of(&sanitized_name);
    let classification = classifier::classify(bytes, &sanitized_name);

    if classification.category == FileCategory::Unknown {
        warn!(file_name = %sanitized_name, "unclassifiable file, requires manual override");
    }

    let mut job = IngestJob::new(
        String::new(),
        sanitized_name,
        bytes.len() as i64,
        sha256,
        classification.mime_type.clone(),
        classification.category,
        extension.clone(),
        classification.is_archive,
        priority,
    );
    job.batch_id = batch_id;

    if classification.category == FileCategory::Image {
        let score = analyzer.analyze(bytes);
        let image_classification = score.classify();
        let layout = score.layout;
        job.classification = Some(image_classification);
        job.quality_score = Some(score);
        job.worker_route = classifier::ocr_route(ocr_mode, image_classification, layout);
    } else {
        job.worker_route = classifier::initial_route(&classification);
    }

    let canonical_path = canonical_storage_path(&job.id, classification.category, &extension);
    storage
        .put(&canonical_path, Bytes::copy_from_slice(bytes))
        .await
        .map_err(|err| AppError::from(anyhow::anyhow!(err)))?;
    job.path = canonical_path;
    job.status = JobStatus::Pending;

    info!(job_id = %job.id, mime_type = %classification.mime_type, method = ?classification.method, "file received");

    job.persist(db).await
}

fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Receives a set of files as one batch: each gets its own `IngestJob` sharing
/// a generated `batch_id`. A batch is complete once all child jobs reach a
/// terminal status (§4.3).
pub async fn receive_batch(
    db: &SurrealDbClient,
    storage: &StorageManager,
    analyzer: &dyn ImageQualityAnalyzer,
    ocr_mode: OcrMode,
    files: Vec<(String, Vec<u8>)>,
    priority: JobPriority,
) -> Result<Vec<IngestJob>, AppError> {
    let batch_id = Uuid::new_v4().to_string();
    let mut jobs = Vec::with_capacity(files.len());
    for (file_name, bytes) in files {
        let job = receive_file(
            db,
            storage,
            analyzer,
            ocr_mode,
            &file_name,
            &bytes,
            priority,
            Some(batch_id.clone()),
        )
        .await?;
        jobs.push(job);
    }
    Ok(jobs)
}

/// Reads every file under `path` (optionally recursing into subdirectories)
/// and hands the collected set to `receive_batch`.
pub async fn receive_path(
    db: &SurrealDbClient,
    storage: &StorageManager,
    analyzer: &dyn ImageQualityAnalyzer,
    ocr_mode: OcrMode,
    path: &Path,
    recursive: bool,
    priority: JobPriority,
) -> Result<Vec<IngestJob>, AppError> {
    let mut files = Vec::new();
    collect_files(path, recursive, &mut files).await?;
    receive_batch(db, storage, analyzer, ocr_mode, files, priority).await
}

fn collect_files<'a>(
    path: &'a Path,
    recursive: bool,
    out: &'a mut Vec<(String, Vec<u8>)>,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), AppError>> + Send + 'a>> {
    Box::pin(async move {
        let mut entries = tokio::fs::read_dir(path).await.map_err(AppError::Io)?;
        while let Some(entry) = entries.next_entry().await.map_err(AppError::Io)? {
            let entry_path: PathBuf = entry.path();
            let file_type = entry.file_type().await.map_err(AppError::Io)?;
            if file_type.is_dir() {
                if recursive {
                    collect_files(&entry_path, recursive, out).await?;
                }
                continue;
            }
            let bytes = tokio::fs::read(&entry_path).await.map_err(AppError::Io)?;
            let file_name = entry_path
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default();
            out.push((file_name, bytes));
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::utils::config::{AppConfig, StorageKind};

    async fn memory_db() -> SurrealDbClient {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory surrealdb");
        db.apply_migrations().await.expect("migrations");
        db
    }

    async fn memory_storage() -> StorageManager {
        let cfg = AppConfig {
            storage: StorageKind::Memory,
            ..Default::default()
        };
        StorageManager::new(&cfg).await.expect("storage manager")
    }

    #[tokio::test]
    async fn receive_file_persists_job_and_moves_content_to_canonical_path() {
        let db = memory_db().await;
        let storage = memory_storage().await;
        let analyzer = HeuristicImageQualityAnalyzer;

        let job = receive_file(
            &db,
            &storage,
            &analyzer,
            OcrMode::Auto,
            "report.pdf",
            b"%PDF-1.4 fake contents",
            JobPriority::User,
            None,
        )
        .await
        .expect("receive_file");

        assert_eq!(job.category, FileCategory::Document);
        assert_eq!(job.worker_route, vec!["cpu-extract".to_string()]);
        assert!(job.path.starts_with("storage/"));
        assert!(job.path.ends_with(".pdf"));

        let stored = storage.get(&job.path).await.expect("content moved");
        assert_eq!(stored.as_ref(), b"%PDF-1.4 fake contents");

        let persisted = IngestJob::get(&db, &job.id)
            .await
            .expect("get")
            .expect("exists");
        assert_eq!(persisted.sha256, job.sha256);
    }

    #[tokio::test]
    async fn receive_file_scores_image_quality() {
        let db = memory_db().await;
        let storage = memory_storage().await;
        let analyzer = HeuristicImageQualityAnalyzer;

        let png_header: Vec<u8> = vec![0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0];
        let job = receive_file(
            &db,
            &storage,
            &analyzer,
            OcrMode::Auto,
            "scan.png",
            &png_header,
            JobPriority::Batch,
            None,
        )
        .await
        .expect("receive_file");

        assert_eq!(job.category, FileCategory::Image);
        assert!(job.quality_score.is_some());
        assert!(job.classification.is_some());
        assert_eq!(job.worker_route, vec!["gpu-paddle".to_string()]);
    }

    #[tokio::test]
    async fn receive_batch_shares_a_batch_id_across_jobs() {
        let db = memory_db().await;
        let storage = memory_storage().await;
        let analyzer = HeuristicImageQualityAnalyzer;

        let files = vec![
            ("a.txt".to_string(), b"hello".to_vec()),
            ("b.txt".to_string(), b"world".to_vec()),
        ];
        let jobs = receive_batch(&db, &storage, &analyzer, OcrMode::Auto, files, JobPriority::User)
            .await
            .expect("receive_batch");

        assert_eq!(jobs.len(), 2);
        assert!(jobs[0].batch_id.is_some());
        assert_eq!(jobs[0].batch_id, jobs[1].batch_id);
    }
}
