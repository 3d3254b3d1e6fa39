#![allow(clippy::missing_docs_in_private_items)]
//! Durable job-queue record: the `(pool, priority, enqueued_at)`-ordered queue of
//! work consumed by worker processes (§4.2). Generalizes the teacher's
//! single-purpose `ingestion_task` record into named pools.

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum JobQueueState {
    Queued,
    Leased,
    Completed,
    Failed,
    Dead,
}

stored_object!(JobQueueRecord, "job_queue_record", {
    job_id: String,
    pool: String,
    priority: i32,
    payload: Value,
    state: JobQueueState,
    attempts: i32,
    max_retries: i32,
    worker_id: Option<String>,
    last_heartbeat: Option<DateTime<Utc>>,
    lease_expires_at: Option<DateTime<Utc>>,
    result: Option<Value>,
    error: Option<String>
});

impl JobQueueRecord {
    /// Enqueue `job_id` onto `pool`. Re-enqueuing an existing `job_id` (the
    /// dispatcher advancing a job to its next pool) upserts the record in place,
    /// resetting lease/attempt bookkeeping for the new stage.
    pub async fn enqueue(
        db: &SurrealDbClient,
        job_id: &str,
        pool: &str,
        payload: Value,
        priority: i32,
        max_retries: i32,
    ) -> Result<Self, AppError> {
        let now = Utc::now();
        let record = Self {
            id: job_id.to_string(),
            created_at: now,
            updated_at: now,
            job_id: job_id.to_string(),
            pool: pool.to_string(),
            priority,
            payload,
            state: JobQueueState::Queued,
            attempts: 0,
            max_retries,
            worker_id: None,
            last_heartbeat: None,
            lease_expires_at: None,
            result: None,
            error: None,
        };

        let stored: Option<Self> = db
            .client
            .upsert((Self::table_name(), job_id))
            .content(record)
            .await
            .map_err(AppError::Database)?;

        stored.ok_or_else(|| AppError::InternalError("failed to enqueue job".to_string()))
    }

    /// Atomically claim the highest-priority, oldest eligible job in `pool`:
    /// either genuinely `Queued`, or `Leased` with an expired lease (a worker
    /// crash recovery). Eligible `Leased` records get `attempts` incremented.
    pub async fn lease(
        db: &SurrealDbClient,
        pool: &str,
        worker_id: &str,
        lease_ttl_secs: i64,
    ) -> Result<Option<Self>, AppError> {
        let now = Utc::now();
        let lease_expires_at = now + chrono::Duration::seconds(lease_ttl_secs);

        // Conditional UPDATE: select the candidate, then claim it with a WHERE
        // guard so a concurrent lease attempt from another worker cannot win the
        // same row twice. Mirrors the retry-on-conflict idiom used for index
        // definitions elsewhere in this crate.
        let sql = r"
            LET $candidate = (
                SELECT * FROM job_queue_record
                WHERE pool = $pool
                  AND (state = 'Queued' OR (state = 'Leased' AND lease_expires_at < $now))
                ORDER BY priority ASC, created_at ASC
                LIMIT 1
            )[0];
            IF $candidate != NONE THEN (
                UPDATE $candidate.id SET
                    state = 'Leased',
                    worker_id = $worker_id,
                    attempts = IF state = 'Leased' THEN attempts + 1 ELSE attempts END,
                    last_heartbeat = $now,
                    lease_expires_at = $lease_expires_at
                WHERE state = $candidate.state
            ) ELSE NONE END;
        ";

        let mut response = db
            .client
            .query(sql)
            .bind(("pool", pool.to_string()))
            .bind(("now", now))
            .bind(("worker_id", worker_id.to_string()))
            .bind(("lease_expires_at", lease_expires_at))
            .await
            .map_err(AppError::Database)?;

        response = response.check().map_err(AppError::Database)?;

        let claimed: Vec<Self> = response.take(1).map_err(AppError::Database)?;
        Ok(claimed.into_iter().next())
    }

    /// Extend the lease. Workers must call this at least every `lease_ttl / 3`.
    pub async fn heartbeat(
        db: &SurrealDbClient,
        job_id: &str,
        lease_ttl_secs: i64,
    ) -> Result<(), AppError> {
        let now = Utc::now();
        let lease_expires_at = now + chrono::Duration::seconds(lease_ttl_secs);

        db.client
            .query("UPDATE type::thing($table, $id) SET last_heartbeat = $now, lease_expires_at = $expires WHERE state = 'Leased'")
            .bind(("table", Self::table_name()))
            .bind(("id", job_id.to_string()))
            .bind(("now", now))
            .bind(("expires", lease_expires_at))
            .await
            .map_err(AppError::Database)?
            .check()
            .map_err(AppError::Database)?;

        Ok(())
    }

    pub async fn complete(db: &SurrealDbClient, job_id: &str, result: Value) -> Result<(), AppError> {
        db.client
            .query("UPDATE type::thing($table, $id) SET state = 'Completed', result = $result WHERE state != 'Completed'")
            .bind(("table", Self::table_name()))
            .bind(("id", job_id.to_string()))
            .bind(("result", result))
            .await
            .map_err(AppError::Database)?
            .check()
            .map_err(AppError::Database)?;

        Ok(())
    }

    /// On failure: requeue if retries remain (consuming one), otherwise
    /// dead-letter. `attempts` only advances up to `max_retries`, so invariant
    /// #1 (`status=DEAD ⇒ retry_count = max_retries`) holds at the transition.
    pub async fn fail(db: &SurrealDbClient, job_id: &str, error: String) -> Result<JobQueueState, AppError> {
        let current: Option<Self> = db.get_item(job_id).await.map_err(AppError::Database)?;
        let Some(current) = current else {
            return Err(AppError::NotFound(format!("job {job_id} not found")));
        };

        let (next_state, next_attempts) = if current.attempts < current.max_retries {
            (JobQueueState::Queued, current.attempts + 1)
        } else {
            (JobQueueState::Dead, current.attempts)
        };

        db.client
            .query("UPDATE type::thing($table, $id) SET state = $state, attempts = $attempts, error = $error, worker_id = NONE, lease_expires_at = NONE")
            .bind(("table", Self::table_name()))
            .bind(("id", job_id.to_string()))
            .bind(("state", next_state.clone()))
            .bind(("attempts", next_attempts))
            .bind(("error", error))
            .await
            .map_err(AppError::Database)?
            .check()
            .map_err(AppError::Database)?;

        Ok(next_state)
    }

    pub async fn get(db: &SurrealDbClient, job_id: &str) -> Result<Option<Self>, AppError> {
        db.get_item(job_id).await.map_err(AppError::Database)
    }

    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::db::SurrealDbClient;
    use serde_json::json;
    use uuid::Uuid;

    async fn memory_db() -> SurrealDbClient {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory surrealdb");
        db.apply_migrations().await.expect("migrations");
        db
    }

    #[tokio::test]
    async fn enqueue_then_lease_claims_oldest_highest_priority() {
        let db = memory_db().await;

        JobQueueRecord::enqueue(&db, "job-a", "cpu-extract", json!({}), 1, 3)
            .await
            .expect("enqueue a");
        JobQueueRecord::enqueue(&db, "job-b", "cpu-extract", json!({}), 1, 3)
            .await
            .expect("enqueue b");

        let leased = JobQueueRecord::lease(&db, "cpu-extract", "worker-1", 30)
            .await
            .expect("lease")
            .expect("a job should be leased");
        assert_eq!(leased.job_id, "job-a");
        assert_eq!(leased.state, JobQueueState::Leased);
    }

    #[tokio::test]
    async fn fail_requeues_until_retries_exhausted_then_dead_letters() {
        let db = memory_db().await;
        JobQueueRecord::enqueue(&db, "job-c", "cpu-extract", json!({}), 1, 1)
            .await
            .expect("enqueue");

        JobQueueRecord::lease(&db, "cpu-extract", "worker-1", 30)
            .await
            .expect("lease")
            .expect("leased");

        let state = JobQueueRecord::fail(&db, "job-c", "boom".to_string())
            .await
            .expect("fail");
        assert_eq!(state, JobQueueState::Queued);

        JobQueueRecord::lease(&db, "cpu-extract", "worker-1", 30)
            .await
            .expect("second lease")
            .expect("leased again");

        let state = JobQueueRecord::fail(&db, "job-c", "boom again".to_string())
            .await
            .expect("fail again");
        assert_eq!(state, JobQueueState::Dead);
    }

    #[tokio::test]
    async fn complete_then_get_returns_result() {
        let db = memory_db().await;
        JobQueueRecord::enqueue(&db, "job-d", "cpu-extract", json!({}), 1, 3)
            .await
            .expect("enqueue");
        JobQueueRecord::complete(&db, "job-d", json!({"ok": true}))
            .await
            .expect("complete");

        let job = JobQueueRecord::get(&db, "job-d")
            .await
            .expect("get")
            .expect("exists");
        assert_eq!(job.state, JobQueueState::Completed);
        assert_eq!(job.result, Some(json!({"ok": true})));
    }
}
