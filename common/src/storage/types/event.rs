#![allow(clippy::missing_docs_in_private_items)]
//! Durable record backing the event bus (§4.1). Every `emit` writes one of these
//! before fanning out to in-process subscribers, giving at-least-once delivery a
//! replayable audit trail independent of whichever subscribers were alive at emit time.

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};
use serde_json::Value;

stored_object!(Event, "event", {
    event_type: String,
    payload: Value,
    source: String
});

impl Event {
    pub async fn record(
        db: &SurrealDbClient,
        event_type: &str,
        payload: Value,
        source: &str,
    ) -> Result<Self, AppError> {
        let now = chrono::Utc::now();
        let event = Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            event_type: event_type.to_string(),
            payload,
            source: source.to_string(),
        };

        let stored: Option<Self> = db
            .client
            .create(Self::table_name())
            .content(event)
            .await
            .map_err(AppError::Database)?;

        stored.ok_or_else(|| AppError::InternalError("failed to record event".to_string()))
    }

    pub async fn recent_by_type(
        db: &SurrealDbClient,
        event_type: &str,
        limit: usize,
    ) -> Result<Vec<Self>, AppError> {
        let mut response = db
            .client
            .query("SELECT * FROM event WHERE event_type = $event_type ORDER BY created_at DESC LIMIT $limit")
            .bind(("event_type", event_type.to_string()))
            .bind(("limit", limit))
            .await
            .map_err(AppError::Database)?;

        response.take(0).map_err(AppError::Database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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
    async fn record_then_query_by_type() {
        let db = memory_db().await;
        Event::record(&db, "ingest.job.completed", json!({"job_id": "a"}), "dispatcher")
            .await
            .expect("record");
        Event::record(&db, "ingest.job.failed", json!({"job_id": "b"}), "dispatcher")
            .await
            .expect("record");

        let completed = Event::recent_by_type(&db, "ingest.job.completed", 10)
            .await
            .expect("query");
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].source, "dispatcher");
    }
}
