#![allow(clippy::missing_docs_in_private_items)]
//! Persisted anomaly findings (§3, §4.13). Detectors are independent and each
//! produces records of this shape; the store deduplicates by
//! `(doc_id, anomaly_type, details_fingerprint)` per detection run.

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AnomalyType {
    Content,
    Metadata,
    Temporal,
    Structural,
    Statistical,
    RedFlag,
    HiddenContent,
    FileMismatch,
    HighEntropy,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum AnomalySeverity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AnomalyStatus {
    Detected,
    Confirmed,
    Dismissed,
    FalsePositive,
}

stored_object!(Anomaly, "anomaly", {
    doc_id: String,
    anomaly_type: AnomalyType,
    score: f64,
    severity: AnomalySeverity,
    confidence: f64,
    status: AnomalyStatus,
    explanation: String,
    details: Value,
    details_fingerprint: String
});

impl Anomaly {
    /// Stable fingerprint of `details` so repeated detection runs over the same
    /// document don't pile up duplicate rows for the same underlying finding.
    pub fn fingerprint(details: &Value) -> String {
        let mut hasher = Sha256::new();
        hasher.update(details.to_string().as_bytes());
        format!("{:x}", hasher.finalize())
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn record(
        db: &SurrealDbClient,
        doc_id: &str,
        anomaly_type: AnomalyType,
        score: f64,
        severity: AnomalySeverity,
        confidence: f64,
        explanation: String,
        details: Value,
    ) -> Result<Self, AppError> {
        let details_fingerprint = Self::fingerprint(&details);

        let existing: Option<Self> = db
            .client
            .query(
                "SELECT * FROM anomaly WHERE doc_id = $doc_id AND anomaly_type = $anomaly_type \
                 AND details_fingerprint = $fp LIMIT 1",
            )
            .bind(("doc_id", doc_id.to_string()))
            .bind(("anomaly_type", anomaly_type))
            .bind(("fp", details_fingerprint.clone()))
            .await
            .map_err(AppError::Database)?
            .take(0)
            .map_err(AppError::Database)?;

        if let Some(existing) = existing {
            return Ok(existing);
        }

        let now = chrono::Utc::now();
        let anomaly = Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            doc_id: doc_id.to_string(),
            anomaly_type,
            score,
            severity,
            confidence,
            status: AnomalyStatus::Detected,
            explanation,
            details,
            details_fingerprint,
        };

        let stored: Option<Self> = db
            .client
            .create(Self::table_name())
            .content(anomaly)
            .await
            .map_err(AppError::Database)?;

        stored.ok_or_else(|| AppError::InternalError("failed to record anomaly".to_string()))
    }

    pub async fn find_by_doc(db: &SurrealDbClient, doc_id: &str) -> Result<Vec<Self>, AppError> {
        db.client
            .query("SELECT * FROM anomaly WHERE doc_id = $doc_id ORDER BY created_at DESC")
            .bind(("doc_id", doc_id.to_string()))
            .await
            .map_err(AppError::Database)?
            .take(0)
            .map_err(AppError::Database)
    }

    pub async fn get(db: &SurrealDbClient, id: &str) -> Result<Option<Self>, AppError> {
        db.get_item(id).await.map_err(AppError::Database)
    }

    /// Lists anomalies, optionally narrowed by status and/or severity
    /// (`GET /api/anomalies/list` query params), newest first.
    pub async fn list(
        db: &SurrealDbClient,
        status: Option<AnomalyStatus>,
        severity: Option<AnomalySeverity>,
    ) -> Result<Vec<Self>, AppError> {
        let mut query = "SELECT * FROM anomaly".to_string();
        let mut clauses = Vec::new();
        if status.is_some() {
            clauses.push("status = $status");
        }
        if severity.is_some() {
            clauses.push("severity = $severity");
        }
        if !clauses.is_empty() {
            query.push_str(" WHERE ");
            query.push_str(&clauses.join(" AND "));
        }
        query.push_str(" ORDER BY created_at DESC");

        db.client
            .query(query)
            .bind(("status", status))
            .bind(("severity", severity))
            .await
            .map_err(AppError::Database)?
            .take(0)
            .map_err(AppError::Database)
    }

    pub async fn update_status(db: &SurrealDbClient, id: &str, status: AnomalyStatus) -> Result<(), AppError> {
        db.client
            .query("UPDATE type::thing('anomaly', $id) SET status = $status")
            .bind(("id", id.to_string()))
            .bind(("status", status))
            .await
            .map_err(AppError::Database)?
            .check()
            .map_err(AppError::Database)?;
        Ok(())
    }

    /// Appends an operator note into `details.notes` (§6 `POST /{id}/notes`).
    /// Notes aren't a first-class column since the store has no schema
    /// migration path for adding one after the fact; `details` is already a
    /// free-form `Value` bag for exactly this kind of addition.
    pub async fn add_note(db: &SurrealDbClient, id: &str, note: &str) -> Result<Self, AppError> {
        let existing = Self::get(db, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("anomaly {id}")))?;

        let mut details = existing.details.clone();
        if !details.is_object() {
            details = Value::Object(serde_json::Map::new());
        }
        let obj = details.as_object_mut().expect("details forced to object above");
        let mut notes = obj
            .get("notes")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        notes.push(Value::String(note.to_string()));
        obj.insert("notes".to_string(), Value::Array(notes));

        let updated: Option<Self> = db
            .client
            .query("UPDATE type::thing('anomaly', $id) SET details = $details")
            .bind(("id", id.to_string()))
            .bind(("details", details))
            .await
            .map_err(AppError::Database)?
            .take(0)
            .map_err(AppError::Database)?;

        updated.ok_or_else(|| AppError::NotFound(format!("anomaly {id}")))
    }

    /// Applies `status` to every id in `ids`, returning the count updated
    /// (§6 `POST /bulk-status`). Missing ids are skipped rather than failing
    /// the whole batch.
    pub async fn bulk_update_status(db: &SurrealDbClient, ids: &[String], status: AnomalyStatus) -> Result<usize, AppError> {
        let mut updated = 0usize;
        for id in ids {
            if Self::get(db, id).await?.is_some() {
                Self::update_status(db, id, status).await?;
                updated += 1;
            }
        }
        Ok(updated)
    }

    /// Aggregate counts by severity and status for the anomalies dashboard
    /// (§6 `GET /api/anomalies/stats`).
    pub async fn stats(db: &SurrealDbClient) -> Result<AnomalyStats, AppError> {
        let all = db
            .client
            .query("SELECT * FROM anomaly")
            .await
            .map_err(AppError::Database)?
            .take::<Vec<Self>>(0)
            .map_err(AppError::Database)?;

        let mut stats = AnomalyStats::default();
        for anomaly in &all {
            stats.total += 1;
            match anomaly.severity {
                AnomalySeverity::Low => stats.by_severity_low += 1,
                AnomalySeverity::Medium => stats.by_severity_medium += 1,
                AnomalySeverity::High => stats.by_severity_high += 1,
                AnomalySeverity::Critical => stats.by_severity_critical += 1,
            }
            match anomaly.status {
                AnomalyStatus::Detected => stats.by_status_detected += 1,
                AnomalyStatus::Confirmed => stats.by_status_confirmed += 1,
                AnomalyStatus::Dismissed => stats.by_status_dismissed += 1,
                AnomalyStatus::FalsePositive => stats.by_status_false_positive += 1,
            }
        }
        Ok(stats)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnomalyStats {
    pub total: usize,
    pub by_severity_low: usize,
    pub by_severity_medium: usize,
    pub by_severity_high: usize,
    pub by_severity_critical: usize,
    pub by_status_detected: usize,
    pub by_status_confirmed: usize,
    pub by_status_dismissed: usize,
    pub by_status_false_positive: usize,
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
    async fn duplicate_detection_is_deduplicated() {
        let db = memory_db().await;
        let details = json!({"amount": 9500});

        let first = Anomaly::record(
            &db,
            "doc-1",
            AnomalyType::RedFlag,
            0.85,
            AnomalySeverity::Critical,
            0.85,
            "structuring pattern".to_string(),
            details.clone(),
        )
        .await
        .expect("record");

        let second = Anomaly::record(
            &db,
            "doc-1",
            AnomalyType::RedFlag,
            0.85,
            AnomalySeverity::Critical,
            0.85,
            "structuring pattern".to_string(),
            details,
        )
        .await
        .expect("record again");

        assert_eq!(first.id, second.id);

        let found = Anomaly::find_by_doc(&db, "doc-1").await.expect("find");
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn update_status_and_add_note_round_trip() {
        let db = memory_db().await;
        let anomaly = Anomaly::record(
            &db,
            "doc-1",
            AnomalyType::HighEntropy,
            0.6,
            AnomalySeverity::Medium,
            0.6,
            "high entropy region".to_string(),
            json!({"offset": 128}),
        )
        .await
        .expect("record");

        Anomaly::update_status(&db, &anomaly.id, AnomalyStatus::Confirmed)
            .await
            .expect("update status");
        let reloaded = Anomaly::get(&db, &anomaly.id).await.expect("get").expect("present");
        assert_eq!(reloaded.status, AnomalyStatus::Confirmed);

        let noted = Anomaly::add_note(&db, &anomaly.id, "confirmed by analyst")
            .await
            .expect("add note");
        let notes = noted.details.get("notes").and_then(|v| v.as_array()).expect("notes array");
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].as_str(), Some("confirmed by analyst"));
    }

    #[tokio::test]
    async fn list_filters_and_stats_aggregate() {
        let db = memory_db().await;
        Anomaly::record(
            &db,
            "doc-1",
            AnomalyType::RedFlag,
            0.9,
            AnomalySeverity::Critical,
            0.9,
            "structuring".to_string(),
            json!({"n": 1}),
        )
        .await
        .expect("record 1");
        Anomaly::record(
            &db,
            "doc-2",
            AnomalyType::Metadata,
            0.4,
            AnomalySeverity::Low,
            0.4,
            "odd size".to_string(),
            json!({"n": 2}),
        )
        .await
        .expect("record 2");

        let critical_only = Anomaly::list(&db, None, Some(AnomalySeverity::Critical)).await.expect("list");
        assert_eq!(critical_only.len(), 1);

        let stats = Anomaly::stats(&db).await.expect("stats");
        assert_eq!(stats.total, 2);
        assert_eq!(stats.by_severity_critical, 1);
        assert_eq!(stats.by_severity_low, 1);
        assert_eq!(stats.by_status_detected, 2);
    }
}
