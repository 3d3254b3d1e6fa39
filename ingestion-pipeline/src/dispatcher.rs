//! Job Dispatcher (§4.6): drives an `IngestJob` across its `worker_route`,
//! one pool at a time. Unlike `pipeline/state.rs`'s `state_machine!` typestate
//! (a compile-time machine for one process's own sequential enrichment run),
//! a routed job's state has to survive a worker leasing it in one process and
//! completing it in another, possibly much later. So this machine validates
//! transitions against the already-persisted `JobStatus` enum at runtime
//! instead of a typestate, and every transition is one `IngestJob::update_dispatch_state`
//! write plus one `JobQueue::enqueue`, not an in-memory state object.

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            document::{Document, TextPage},
            ingest_job::{IngestJob, JobPriority, JobStatus},
        },
    },
};
use event_bus::EventBus;
use job_queue::{priority, JobQueue};
use serde_json::{json, Map, Value};
use tracing::{info, instrument, warn};

use crate::classifier::ROUTE_BY_QUALITY_MARKER_RECURSE;

fn priority_value(priority: JobPriority) -> i32 {
    match priority {
        JobPriority::User => priority::USER,
        JobPriority::Batch => priority::BATCH,
        JobPriority::Reprocess => priority::REPROCESS,
    }
}

/// Payload handed to the worker leasing `job` at `route_index` (§4.6's
/// `{file_path, file_info, quality_score?, route, route_index}` contract).
fn build_payload(job: &IngestJob, route_index: usize) -> Value {
    json!({
        "job_id": job.id,
        "file_path": job.path,
        "file_info": {
            "original_name": job.original_name,
            "mime_type": job.mime_type,
            "category": job.category,
            "size": job.size,
        },
        "quality_score": job.quality_score,
        "route": job.worker_route,
        "route_index": route_index,
        "retry_count": job.retry_count,
    })
}

/// Enqueues `job` onto the first pool of its route. A job whose route is
/// empty (an `Unknown`-category intake awaiting manual override) fails
/// immediately rather than sitting `Pending` forever unqueued.
#[instrument(skip(db, queue), fields(job_id = %job.id))]
pub async fn dispatch(db: &SurrealDbClient, queue: &JobQueue, job: &IngestJob) -> Result<(), AppError> {
    let Some(first_pool) = job.worker_route.first().cloned() else {
        warn!(job_id = %job.id, "job has no route, marking failed");
        IngestJob::update_dispatch_state(
            db,
            &job.id,
            JobStatus::Failed,
            job.worker_route.clone(),
            0,
            None,
            job.retry_count,
            job.document_id.clone(),
            Some("no worker route for this classification".to_string()),
        )
        .await?;
        return Ok(());
    };

    queue
        .enqueue(&first_pool, &job.id, build_payload(job, 0), priority_value(job.priority))
        .await?;

    IngestJob::update_dispatch_state(
        db,
        &job.id,
        JobStatus::Queued,
        job.worker_route.clone(),
        0,
        Some(first_pool),
        job.retry_count,
        job.document_id.clone(),
        None,
    )
    .await?;

    Ok(())
}

/// Text pages extracted by a worker. Workers return a bare JSON object in
/// their result payload; a worker with nothing to extract (e.g. an
/// intermediate OCR stage) simply omits `text_pages`/`metadata`.
fn text_pages_from_result(result: &Value) -> Vec<TextPage> {
    result
        .get("text_pages")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default()
}

fn metadata_from_result(result: &Value) -> Map<String, Value> {
    result
        .get("metadata")
        .and_then(|v| v.as_object().cloned())
        .unwrap_or_default()
}

/// Advances past any `RECURSE_ATTACHMENTS` markers. Resolving them (enqueuing
/// the enumerated attachments/members as their own intake jobs) is the
/// extraction worker's job, driven by its own result payload — the
/// dispatcher's only responsibility here is to not route work to a pool name
/// that was never a real pool.
fn skip_markers(route: &[String], mut index: usize) -> usize {
    while route.get(index).map(String::as_str) == Some(ROUTE_BY_QUALITY_MARKER_RECURSE) {
        index += 1;
    }
    index
}

/// A worker at `job.current_worker` finished its step successfully. Advances
/// to the next pool in the route, or — if this was the last real step —
/// registers the resulting `Document` and marks the job `Completed`,
/// emitting `ingest.job.completed` (§4.7's document registration side effect).
#[instrument(skip(db, queue, bus, result), fields(job_id = %job_id))]
pub async fn on_worker_completed(
    db: &SurrealDbClient,
    queue: &JobQueue,
    bus: &EventBus,
    job_id: &str,
    result: Value,
) -> Result<(), AppError> {
    let job = IngestJob::get(db, job_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("ingest job {job_id}")))?;

    let next_index = skip_markers(&job.worker_route, job.route_index + 1);

    if next_index >= job.worker_route.len() {
        let document = Document::register(
            db,
            job.original_name.clone(),
            job.mime_type.clone(),
            job.size,
            text_pages_from_result(&result),
            metadata_from_result(&result),
            &job.id,
        )
        .await?;

        IngestJob::update_dispatch_state(
            db,
            &job.id,
            JobStatus::Completed,
            job.worker_route.clone(),
            job.route_index,
            job.current_worker.clone(),
            job.retry_count,
            Some(document.id.clone()),
            None,
        )
        .await?;

        queue.complete(&job.id, result).await?;

        bus.emit(
            "ingest.job.completed",
            json!({"job_id": job.id, "document_id": document.id}),
            "dispatcher",
        )
        .await?;

        info!(job_id = %job.id, document_id = %document.id, "job completed");
        return Ok(());
    }

    let next_pool = job.worker_route[next_index].clone();
    let mut advanced = job.clone();
    advanced.route_index = next_index;

    queue
        .enqueue(&next_pool, &job.id, build_payload(&advanced, next_index), priority_value(job.priority))
        .await?;

    IngestJob::update_dispatch_state(
        db,
        &job.id,
        JobStatus::Queued,
        job.worker_route.clone(),
        next_index,
        Some(next_pool),
        job.retry_count,
        job.document_id.clone(),
        None,
    )
    .await?;

    Ok(())
}

/// A worker at `job.current_worker` failed. Retries from the start of the
/// route while `job.can_retry()` holds, otherwise dead-letters the job and
/// emits `ingest.job.failed`.
#[instrument(skip(db, queue, bus), fields(job_id = %job_id))]
pub async fn on_worker_failed(
    db: &SurrealDbClient,
    queue: &JobQueue,
    bus: &EventBus,
    job_id: &str,
    error: String,
) -> Result<(), AppError> {
    let job = IngestJob::get(db, job_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("ingest job {job_id}")))?;

    if job.can_retry() {
        let retry_count = job.retry_count + 1;
        let Some(first_pool) = job.worker_route.first().cloned() else {
            IngestJob::update_dispatch_state(
                db,
                &job.id,
                JobStatus::Dead,
                job.worker_route.clone(),
                0,
                None,
                retry_count,
                job.document_id.clone(),
                Some(error),
            )
            .await?;
            return Ok(());
        };

        let mut retried = job.clone();
        retried.retry_count = retry_count;

        queue
            .enqueue(&first_pool, &job.id, build_payload(&retried, 0), priority_value(job.priority))
            .await?;

        IngestJob::update_dispatch_state(
            db,
            &job.id,
            JobStatus::Queued,
            job.worker_route.clone(),
            0,
            Some(first_pool),
            retry_count,
            job.document_id.clone(),
            Some(error),
        )
        .await?;

        warn!(job_id = %job.id, retry_count, "job failed, retrying from route start");
        return Ok(());
    }

    IngestJob::update_dispatch_state(
        db,
        &job.id,
        JobStatus::Dead,
        job.worker_route.clone(),
        job.route_index,
        job.current_worker.clone(),
        job.retry_count,
        job.document_id.clone(),
        Some(error.clone()),
    )
    .await?;

    bus.emit("ingest.job.failed", json!({"job_id": job.id, "error": error}), "dispatcher").await?;

    warn!(job_id = %job.id, "job dead-lettered after exhausting retries");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{storage::types::ingest_job::FileCategory, utils::config::WorkerConfig};
    use job_queue::pools;
    use uuid::Uuid;

    async fn memory_db() -> SurrealDbClient {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory surrealdb");
        db.apply_migrations().await.expect("migrations");
        db
    }

    async fn make_job(db: &SurrealDbClient, route: Vec<&str>) -> IngestJob {
        let mut job = IngestJob::new(
            "storage/job.pdf".to_string(),
            "job.pdf".to_string(),
            100,
            "deadbeef".to_string(),
            "application/pdf".to_string(),
            FileCategory::Document,
            ".pdf".to_string(),
            true,
            JobPriority::User,
        );
        job.worker_route = route.into_iter().map(str::to_string).collect();
        job.persist(db).await.expect("persist job")
    }

    #[tokio::test]
    async fn dispatch_enqueues_on_first_pool_and_marks_queued() {
        let db = memory_db().await;
        let queue = JobQueue::new(db.clone(), WorkerConfig::default());
        let job = make_job(&db, vec![pools::CPU_EXTRACT]).await;

        dispatch(&db, &queue, &job).await.expect("dispatch");

        let leased = queue.lease(pools::CPU_EXTRACT, "worker-1").await.expect("lease").expect("job available");
        assert_eq!(leased.job_id, job.id);

        let persisted = IngestJob::get(&db, &job.id).await.expect("get").expect("exists");
        assert_eq!(persisted.status, JobStatus::Queued);
        assert_eq!(persisted.current_worker.as_deref(), Some(pools::CPU_EXTRACT));
    }

    #[tokio::test]
    async fn dispatch_fails_immediately_with_empty_route() {
        let db = memory_db().await;
        let queue = JobQueue::new(db.clone(), WorkerConfig::default());
        let job = make_job(&db, vec![]).await;

        dispatch(&db, &queue, &job).await.expect("dispatch");

        let persisted = IngestJob::get(&db, &job.id).await.expect("get").expect("exists");
        assert_eq!(persisted.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn completed_step_advances_to_next_pool_in_route() {
        let db = memory_db().await;
        let queue = JobQueue::new(db.clone(), WorkerConfig::default());
        let bus = EventBus::new(db.clone());
        let mut job = make_job(&db, vec![pools::CPU_EXTRACT, pools::CPU_NER]).await;
        job.current_worker = Some(pools::CPU_EXTRACT.to_string());

        on_worker_completed(&db, &queue, &bus, &job.id, json!({})).await.expect("advance");

        let persisted = IngestJob::get(&db, &job.id).await.expect("get").expect("exists");
        assert_eq!(persisted.status, JobStatus::Queued);
        assert_eq!(persisted.route_index, 1);
        assert_eq!(persisted.current_worker.as_deref(), Some(pools::CPU_NER));

        let leased = queue.lease(pools::CPU_NER, "worker-1").await.expect("lease").expect("job available");
        assert_eq!(leased.job_id, job.id);
    }

    #[tokio::test]
    async fn last_step_registers_document_and_completes() {
        let db = memory_db().await;
        let queue = JobQueue::new(db.clone(), WorkerConfig::default());
        let bus = EventBus::new(db.clone());
        let job = make_job(&db, vec![pools::CPU_EXTRACT]).await;

        let result = json!({
            "text_pages": [{"page_number": 1, "text": "hello world"}],
            "metadata": {"author": "tester"},
        });
        on_worker_completed(&db, &queue, &bus, &job.id, result).await.expect("complete");

        let persisted = IngestJob::get(&db, &job.id).await.expect("get").expect("exists");
        assert_eq!(persisted.status, JobStatus::Completed);
        assert!(persisted.document_id.is_some());

        let document = Document::get(&db, persisted.document_id.as_ref().unwrap())
            .await
            .expect("get document")
            .expect("exists");
        assert_eq!(document.filename, "job.pdf");
    }

    #[tokio::test]
    async fn recurse_attachments_marker_is_skipped_as_terminal() {
        let db = memory_db().await;
        let queue = JobQueue::new(db.clone(), WorkerConfig::default());
        let bus = EventBus::new(db.clone());
        let job = make_job(&db, vec![pools::CPU_ARCHIVE, ROUTE_BY_QUALITY_MARKER_RECURSE]).await;

        on_worker_completed(&db, &queue, &bus, &job.id, json!({})).await.expect("complete");

        let persisted = IngestJob::get(&db, &job.id).await.expect("get").expect("exists");
        assert_eq!(persisted.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn failure_retries_from_route_start_while_budget_remains() {
        let db = memory_db().await;
        let queue = JobQueue::new(db.clone(), WorkerConfig::default());
        let bus = EventBus::new(db.clone());
        let mut job = make_job(&db, vec![pools::CPU_EXTRACT, pools::CPU_NER]).await;
        job.route_index = 1;
        job.current_worker = Some(pools::CPU_NER.to_string());

        on_worker_failed(&db, &queue, &bus, &job.id, "worker crashed".to_string()).await.expect("fail");

        let persisted = IngestJob::get(&db, &job.id).await.expect("get").expect("exists");
        assert_eq!(persisted.status, JobStatus::Queued);
        assert_eq!(persisted.retry_count, 1);
        assert_eq!(persisted.route_index, 0);
        assert_eq!(persisted.current_worker.as_deref(), Some(pools::CPU_EXTRACT));
    }

    #[tokio::test]
    async fn failure_dead_letters_once_retries_are_exhausted() {
        let db = memory_db().await;
        let queue = JobQueue::new(db.clone(), WorkerConfig::default());
        let bus = EventBus::new(db.clone());
        let job = make_job(&db, vec![pools::CPU_EXTRACT]).await;
        IngestJob::update_dispatch_state(
            &db,
            &job.id,
            job.status,
            job.worker_route.clone(),
            job.route_index,
            job.current_worker.clone(),
            job.max_retries,
            job.document_id.clone(),
            None,
        )
        .await
        .expect("set retry_count to budget");

        on_worker_failed(&db, &queue, &bus, &job.id, "permanent failure".to_string()).await.expect("fail");

        let persisted = IngestJob::get(&db, &job.id).await.expect("get").expect("exists");
        assert_eq!(persisted.status, JobStatus::Dead);
        assert_eq!(persisted.error.as_deref(), Some("permanent failure"));
    }
}
