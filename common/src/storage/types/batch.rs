#![allow(clippy::missing_docs_in_private_items)]
//! A `Batch` groups `IngestJob`s that share an origin (one multi-file upload, one
//! recursive directory walk) so callers can poll aggregate progress instead of
//! each job individually (§3).

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(Batch, "batch", {
    total: i64,
    completed: i64,
    failed: i64
});

impl Batch {
    pub async fn create(db: &SurrealDbClient, total: i64) -> Result<Self, AppError> {
        let now = chrono::Utc::now();
        let batch = Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            total,
            completed: 0,
            failed: 0,
        };

        let stored: Option<Self> = db
            .client
            .create(Self::table_name())
            .content(batch)
            .await
            .map_err(AppError::Database)?;

        stored.ok_or_else(|| AppError::InternalError("failed to create batch".to_string()))
    }

    pub async fn mark_job_completed(db: &SurrealDbClient, batch_id: &str) -> Result<(), AppError> {
        db.client
            .query("UPDATE type::thing($table, $id) SET completed += 1")
            .bind(("table", Self::table_name()))
            .bind(("id", batch_id.to_string()))
            .await
            .map_err(AppError::Database)?
            .check()
            .map_err(AppError::Database)?;
        Ok(())
    }

    pub async fn mark_job_failed(db: &SurrealDbClient, batch_id: &str) -> Result<(), AppError> {
        db.client
            .query("UPDATE type::thing($table, $id) SET failed += 1")
            .bind(("table", Self::table_name()))
            .bind(("id", batch_id.to_string()))
            .await
            .map_err(AppError::Database)?
            .check()
            .map_err(AppError::Database)?;
        Ok(())
    }

    pub async fn get(db: &SurrealDbClient, batch_id: &str) -> Result<Option<Self>, AppError> {
        db.get_item(batch_id).await.map_err(AppError::Database)
    }

    /// A batch is complete once every child job has reached a terminal state.
    pub fn is_complete(&self) -> bool {
        self.completed + self.failed >= self.total
    }
}
