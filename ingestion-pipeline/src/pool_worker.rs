//! Pool worker executor: the piece that actually drives the job queue and
//! dispatcher (§4.2/§4.6) end to end. `dispatcher.rs` advances an `IngestJob`
//! across its `worker_route` purely in terms of persisted state; something
//! still has to lease each pool's jobs, do the step's real work, and report
//! back. This module is that something — one lease/heartbeat/execute/advance
//! loop per named pool, using the same `extract(path, type) -> text`
//! external-collaborator functions the intake manager already built in
//! `utils/` rather than reimplementing OCR/ASR/PDF decoding here.
//!
//! Completion semantics intentionally don't use `job_queue::run_worker_loop`'s
//! built-in `queue.complete`/`queue.fail` wrapping: a pool step "completing"
//! means *re-enqueue onto the next pool*, not *mark this job done* — that
//! re-enqueue is itself an upsert of the same `job_id` row, so a naive
//! complete-after-advance would immediately clobber the fresh `Queued` state
//! the dispatcher just wrote. `dispatcher::on_worker_completed` owns the only
//! `queue.complete` call (on the terminal step); this loop owns `queue.fail`,
//! whose Queued/Dead verdict decides whether the dispatcher gets told at all.

use std::{sync::Arc, time::Duration};

use async_openai::{config::OpenAIConfig, Client as OpenAiClient};
use common::{
    error::AppError,
    storage::{db::SurrealDbClient, store::StorageManager, types::file_info::FileInfo, types::job::JobQueueState},
    utils::config::AppConfig,
};
use event_bus::EventBus;
use job_queue::{pools, JobQueue};
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::{dispatcher, utils::file_text_extraction::extract_text_from_file};

/// Pools this crate services: the file-intake/extraction/OCR route the
/// dispatcher drives `IngestJob`s through. `cpu-ner`/`gpu-embed`/`io-file`
/// belong to the Parse/Embed shards (separate components per §2's diagram,
/// triggered off `ingest.job.completed` rather than sharing this route).
const SERVICED_POOLS: &[&str] = &[
    pools::CPU_EXTRACT,
    pools::CPU_LIGHT,
    pools::CPU_IMAGE,
    pools::CPU_ARCHIVE,
    pools::GPU_PADDLE,
    pools::GPU_QWEN,
    pools::GPU_WHISPER,
];

fn payload_file_info(payload: &Value) -> Result<(String, String, String), AppError> {
    let file_path = payload
        .get("file_path")
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::Validation("job payload missing file_path".to_string()))?
        .to_string();

    let info = payload.get("file_info").cloned().unwrap_or_default();
    let mime_type = info
        .get("mime_type")
        .and_then(Value::as_str)
        .unwrap_or("application/octet-stream")
        .to_string();
    let original_name = info
        .get("original_name")
        .and_then(Value::as_str)
        .unwrap_or("unnamed")
        .to_string();

    Ok((file_path, mime_type, original_name))
}

/// Runs the real extraction work for one pool step and returns the result
/// fragment `dispatcher::on_worker_completed` merges forward. Text-bearing
/// steps (`cpu-extract`/`cpu-light`/the OCR and ASR pools) all funnel through
/// `extract_text_from_file`, which already dispatches on mime type to the
/// right decoder; `cpu-image` (OCR preprocessing) and `cpu-archive` (member
/// enumeration) produce no text of their own at this layer.
async fn execute_step(
    pool: &str,
    payload: &Value,
    db: &SurrealDbClient,
    openai_client: &OpenAiClient<OpenAIConfig>,
    config: &AppConfig,
    storage: &StorageManager,
) -> Result<Value, AppError> {
    match pool {
        pools::CPU_IMAGE => Ok(json!({"preprocessed": true})),
        pools::CPU_ARCHIVE => Ok(json!({"members": []})),
        pools::CPU_EXTRACT | pools::CPU_LIGHT | pools::GPU_PADDLE | pools::GPU_QWEN | pools::GPU_WHISPER => {
            let (path, mime_type, original_name) = payload_file_info(payload)?;
            let now = chrono::Utc::now();
            let file_info = FileInfo {
                id: original_name.clone(),
                created_at: now,
                updated_at: now,
                sha256: String::new(),
                path,
                file_name: original_name,
                mime_type: mime_type.clone(),
                user_id: "system".to_string(),
            };

            let text = extract_text_from_file(&file_info, db, openai_client, config, storage).await?;
            Ok(json!({
                "text_pages": [{"page_number": 1, "text": text}],
                "metadata": {"mime_type": mime_type},
            }))
        }
        other => Err(AppError::Validation(format!("no pool worker registered for pool {other}"))),
    }
}

/// One pool's lease/heartbeat/execute/advance loop. Leases via `JobQueue::lease`,
/// keeps the lease alive with a background heartbeat task at `heartbeat_interval`
/// (well under `lease_ttl/3` per §4.2), runs `execute_step`, then tells the
/// dispatcher whether the step succeeded or failed so it can advance the route
/// or retry/dead-letter the job.
async fn run_pool(
    pool: &'static str,
    worker_id: String,
    db: Arc<SurrealDbClient>,
    queue: JobQueue,
    bus: EventBus,
    openai_client: Arc<OpenAiClient<OpenAIConfig>>,
    config: AppConfig,
    storage: StorageManager,
    idle_poll_interval: Duration,
) {
    loop {
        let leased = match queue.lease(pool, &worker_id).await {
            Ok(leased) => leased,
            Err(err) => {
                error!(pool, %worker_id, error = %err, "lease attempt failed, backing off");
                tokio::time::sleep(idle_poll_interval).await;
                continue;
            }
        };

        let Some(job) = leased else {
            tokio::time::sleep(idle_poll_interval).await;
            continue;
        };

        let job_id = job.job_id.clone();
        let heartbeat_queue = queue.clone();
        let heartbeat_job_id = job_id.clone();
        let heartbeat_interval = queue.heartbeat_interval();
        let heartbeat_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(heartbeat_interval);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                ticker.tick().await;
                if let Err(err) = heartbeat_queue.heartbeat(&heartbeat_job_id).await {
                    warn!(job_id = %heartbeat_job_id, error = %err, "heartbeat failed");
                }
            }
        });

        let outcome = execute_step(pool, &job.payload, &db, &openai_client, &config, &storage).await;
        heartbeat_task.abort();

        match outcome {
            Ok(result) => {
                if let Err(err) = dispatcher::on_worker_completed(&db, &queue, &bus, &job_id, result).await {
                    error!(job_id, pool, error = %err, "dispatcher failed to advance completed job");
                }
                info!(job_id, pool, %worker_id, "pool step completed");
            }
            Err(err) => {
                match queue.fail(&job_id, err.to_string()).await {
                    Ok(JobQueueState::Dead) => {
                        // Pool-level retry budget exhausted; the dispatcher now
                        // decides whether to restart the whole route from the top
                        // (IngestJob.retry_count) or dead-letter the job for good.
                        if let Err(dispatch_err) =
                            dispatcher::on_worker_failed(&db, &queue, &bus, &job_id, err.to_string()).await
                        {
                            error!(job_id, pool, error = %dispatch_err, "dispatcher failed to handle failed job");
                        }
                    }
                    Ok(_) => {
                        info!(job_id, pool, "pool step failed, requeued within pool for retry");
                    }
                    Err(fail_err) => {
                        error!(job_id, pool, error = %fail_err, "failed to record pool step failure");
                    }
                }
            }
        }
    }
}

/// Spawns one `run_pool` task per serviced pool and returns immediately;
/// callers keep the returned handles alive for the process lifetime (dropping
/// or aborting them stops that pool's workers).
#[allow(clippy::too_many_arguments)]
pub fn spawn_pool_workers(
    db: Arc<SurrealDbClient>,
    queue: JobQueue,
    bus: EventBus,
    openai_client: Arc<OpenAiClient<OpenAIConfig>>,
    config: AppConfig,
    storage: StorageManager,
    idle_poll_interval: Duration,
) -> Vec<tokio::task::JoinHandle<()>> {
    SERVICED_POOLS
        .iter()
        .map(|&pool| {
            let worker_id = format!("{pool}-worker-{}", uuid::Uuid::new_v4());
            tokio::spawn(run_pool(
                pool,
                worker_id,
                Arc::clone(&db),
                queue.clone(),
                bus.clone(),
                Arc::clone(&openai_client),
                config.clone(),
                storage.clone(),
                idle_poll_interval,
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{
        storage::{store::StorageManager, types::ingest_job::{FileCategory, IngestJob, JobPriority}},
        utils::config::{AppConfig, StorageKind},
    };
    use job_queue::priority;
    use uuid::Uuid;

    async fn memory_db() -> SurrealDbClient {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory surrealdb");
        db.apply_migrations().await.expect("migrations");
        db
    }

    async fn memory_storage() -> StorageManager {
        let mut config = AppConfig::default();
        config.storage = StorageKind::Memory;
        StorageManager::new(&config).await.expect("storage manager")
    }

    #[tokio::test]
    async fn cpu_light_step_extracts_plain_text_and_advances_route() {
        let db = memory_db().await;
        let queue = JobQueue::new(db.clone(), common::utils::config::WorkerConfig::default());
        let bus = EventBus::new(db.clone());
        let storage = memory_storage().await;
        let openai_client = OpenAiClient::with_config(OpenAIConfig::new());
        let config = AppConfig::default();

        storage
            .put("storage/doc.txt", bytes::Bytes::from_static(b"hello from the archive"))
            .await
            .expect("seed storage");

        let mut job = IngestJob::new(
            "storage/doc.txt".to_string(),
            "doc.txt".to_string(),
            23,
            "sha".to_string(),
            "text/plain".to_string(),
            FileCategory::Document,
            ".txt".to_string(),
            true,
            JobPriority::User,
        );
        job.worker_route = vec![pools::CPU_EXTRACT.to_string()];
        let job = job.persist(&db).await.expect("persist job");

        dispatcher::dispatch(&db, &queue, &job).await.expect("dispatch");

        let leased = queue
            .lease(pools::CPU_EXTRACT, "test-worker")
            .await
            .expect("lease")
            .expect("job available");

        let result = execute_step(pools::CPU_EXTRACT, &leased.payload, &db, &openai_client, &config, &storage)
            .await
            .expect("execute step");

        dispatcher::on_worker_completed(&db, &queue, &bus, &job.id, result)
            .await
            .expect("advance");

        let persisted = IngestJob::get(&db, &job.id).await.expect("get").expect("exists");
        assert_eq!(persisted.status, common::storage::types::ingest_job::JobStatus::Completed);
        let document_id = persisted.document_id.expect("document registered");
        let document = common::storage::types::document::Document::get(&db, &document_id)
            .await
            .expect("get document")
            .expect("exists");
        assert_eq!(document.text_pages.len(), 1);
        assert!(document.text_pages[0].text.contains("hello from the archive"));
    }

    #[tokio::test]
    async fn cpu_image_step_is_a_textless_preprocessing_hop() {
        let db = memory_db().await;
        let storage = memory_storage().await;
        let openai_client = OpenAiClient::with_config(OpenAIConfig::new());
        let config = AppConfig::default();

        let payload = json!({"file_path": "storage/img.png", "file_info": {"mime_type": "image/png"}});
        let result = execute_step(pools::CPU_IMAGE, &payload, &db, &openai_client, &config, &storage)
            .await
            .expect("execute cpu-image step");

        assert_eq!(result, json!({"preprocessed": true}));
    }

    #[test]
    fn serviced_pools_cover_every_route_the_classifier_emits() {
        for pool in [pools::CPU_EXTRACT, pools::CPU_LIGHT, pools::CPU_IMAGE, pools::CPU_ARCHIVE, pools::GPU_PADDLE, pools::GPU_QWEN, pools::GPU_WHISPER] {
            assert!(SERVICED_POOLS.contains(&pool), "missing worker for pool {pool}");
        }
        let _ = priority::USER;
    }
}
