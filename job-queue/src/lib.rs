//! Facade over `common::storage::types::job::JobQueueRecord` (§4.2): named
//! pools, priority ordering, leases with heartbeats, and retry/dead-letter
//! bookkeeping. Worker processes use `JobQueue` to lease work and `run_worker_loop`
//! to drive the lease → heartbeat → complete/fail cycle without reimplementing it
//! per pool.

pub mod pools;
pub mod priority;

use std::time::Duration;

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::job::{JobQueueRecord, JobQueueState},
    },
    utils::config::WorkerConfig,
};
use serde_json::Value;
use tracing::{error, info, instrument, warn};

/// Thin, cloneable handle used by both the dispatcher (enqueue/advance) and
/// worker processes (lease/heartbeat/complete/fail).
#[derive(Clone)]
pub struct JobQueue {
    db: SurrealDbClient,
    config: WorkerConfig,
}

impl JobQueue {
    pub fn new(db: SurrealDbClient, config: WorkerConfig) -> Self {
        Self { db, config }
    }

    #[instrument(skip(self, payload), fields(pool, job_id))]
    pub async fn enqueue(
        &self,
        pool: &str,
        job_id: &str,
        payload: Value,
        priority: i32,
    ) -> Result<JobQueueRecord, AppError> {
        JobQueueRecord::enqueue(&self.db, job_id, pool, payload, priority, self.config.max_retries)
            .await
    }

    /// Same as `enqueue` but with an explicit retry budget, for callers that
    /// want a pool-specific override of the configured default.
    pub async fn enqueue_with_retries(
        &self,
        pool: &str,
        job_id: &str,
        payload: Value,
        priority: i32,
        max_retries: i32,
    ) -> Result<JobQueueRecord, AppError> {
        JobQueueRecord::enqueue(&self.db, job_id, pool, payload, priority, max_retries).await
    }

    pub async fn lease(&self, pool: &str, worker_id: &str) -> Result<Option<JobQueueRecord>, AppError> {
        JobQueueRecord::lease(&self.db, pool, worker_id, i64::try_from(self.config.lease_ttl_secs).unwrap_or(i64::MAX)).await
    }

    pub async fn heartbeat(&self, job_id: &str) -> Result<(), AppError> {
        JobQueueRecord::heartbeat(&self.db, job_id, i64::try_from(self.config.lease_ttl_secs).unwrap_or(i64::MAX)).await
    }

    pub async fn complete(&self, job_id: &str, result: Value) -> Result<(), AppError> {
        JobQueueRecord::complete(&self.db, job_id, result).await
    }

    pub async fn fail(&self, job_id: &str, error: String) -> Result<JobQueueState, AppError> {
        JobQueueRecord::fail(&self.db, job_id, error).await
    }

    pub async fn get(&self, job_id: &str) -> Result<Option<JobQueueRecord>, AppError> {
        JobQueueRecord::get(&self.db, job_id).await
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.config.lease_ttl_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.config.heartbeat_interval_secs)
    }
}

/// Runs a single worker's lease loop against `pool` until the process is
/// torn down. On each iteration: lease the highest-priority oldest eligible
/// job, spawn a heartbeat task that renews the lease on `heartbeat_interval`
/// (well under `lease_ttl/3`, per §4.2's contract), run `process`, then
/// complete or fail the job and stop the heartbeat task. When no job is
/// available, sleeps `idle_poll_interval` before retrying.
///
/// `process` returning `Err` is treated as a `TransientWorkerFailure`-style
/// retry candidate; the queue's own `fail` logic decides requeue vs
/// dead-letter based on `attempts` vs `max_retries`.
pub async fn run_worker_loop<F, Fut>(
    queue: JobQueue,
    pool: &str,
    worker_id: &str,
    idle_poll_interval: Duration,
    mut process: F,
) where
    F: FnMut(JobQueueRecord) -> Fut,
    Fut: std::future::Future<Output = Result<Value, AppError>>,
{
    loop {
        let leased = match queue.lease(pool, worker_id).await {
            Ok(leased) => leased,
            Err(err) => {
                error!(pool, worker_id, error = %err, "lease attempt failed, backing off");
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

        let outcome = process(job).await;
        heartbeat_task.abort();

        match outcome {
            Ok(result) => {
                if let Err(err) = queue.complete(&job_id, result).await {
                    error!(job_id, error = %err, "failed to mark job complete");
                }
                info!(job_id, pool, worker_id, "job completed");
            }
            Err(err) => {
                match queue.fail(&job_id, err.to_string()).await {
                    Ok(JobQueueState::Dead) => {
                        warn!(job_id, pool, "job dead-lettered after exhausting retries");
                    }
                    Ok(_) => {
                        info!(job_id, pool, "job requeued for retry");
                    }
                    Err(fail_err) => {
                        error!(job_id, error = %fail_err, "failed to record job failure");
                    }
                }
            }
        }
    }
}
