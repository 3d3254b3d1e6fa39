#![allow(clippy::missing_docs_in_private_items)]
//! Persisted contradiction findings between two documents (§3, §4.14), plus the
//! `chain_id` linking a contradiction into a connected component discovered by
//! the chain detector's graph walk.

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ContradictionType {
    Direct,
    Temporal,
    Numeric,
    Entity,
    Logical,
    Contextual,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum ContradictionSeverity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ContradictionStatus {
    Detected,
    Confirmed,
    Dismissed,
    Investigating,
}

stored_object!(Contradiction, "contradiction", {
    doc_a_id: String,
    doc_b_id: String,
    claim_a: String,
    claim_b: String,
    contradiction_type: ContradictionType,
    severity: ContradictionSeverity,
    status: ContradictionStatus,
    confidence: f64,
    chain_id: Option<String>
});

impl Contradiction {
    #[allow(clippy::too_many_arguments)]
    pub async fn record(
        db: &SurrealDbClient,
        doc_a_id: &str,
        doc_b_id: &str,
        claim_a: String,
        claim_b: String,
        contradiction_type: ContradictionType,
        severity: ContradictionSeverity,
        confidence: f64,
    ) -> Result<Self, AppError> {
        let now = chrono::Utc::now();
        let contradiction = Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            doc_a_id: doc_a_id.to_string(),
            doc_b_id: doc_b_id.to_string(),
            claim_a,
            claim_b,
            contradiction_type,
            severity,
            status: ContradictionStatus::Detected,
            confidence,
            chain_id: None,
        };

        let stored: Option<Self> = db
            .client
            .create(Self::table_name())
            .content(contradiction)
            .await
            .map_err(AppError::Database)?;

        stored.ok_or_else(|| AppError::InternalError("failed to record contradiction".to_string()))
    }

    pub async fn assign_chain(db: &SurrealDbClient, id: &str, chain_id: &str) -> Result<(), AppError> {
        db.client
            .query("UPDATE type::thing($table, $id) SET chain_id = $chain_id")
            .bind(("table", Self::table_name()))
            .bind(("id", id.to_string()))
            .bind(("chain_id", chain_id.to_string()))
            .await
            .map_err(AppError::Database)?
            .check()
            .map_err(AppError::Database)?;
        Ok(())
    }

    pub async fn find_by_document(db: &SurrealDbClient, doc_id: &str) -> Result<Vec<Self>, AppError> {
        db.client
            .query("SELECT * FROM contradiction WHERE doc_a_id = $doc_id OR doc_b_id = $doc_id")
            .bind(("doc_id", doc_id.to_string()))
            .await
            .map_err(AppError::Database)?
            .take(0)
            .map_err(AppError::Database)
    }

    pub async fn all(db: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        db.client
            .query("SELECT * FROM contradiction")
            .await
            .map_err(AppError::Database)?
            .take(0)
            .map_err(AppError::Database)
    }

    pub async fn get(db: &SurrealDbClient, id: &str) -> Result<Option<Self>, AppError> {
        db.get_item(id).await.map_err(AppError::Database)
    }

    pub async fn update_status(db: &SurrealDbClient, id: &str, status: ContradictionStatus) -> Result<(), AppError> {
        db.client
            .query("UPDATE type::thing('contradiction', $id) SET status = $status")
            .bind(("id", id.to_string()))
            .bind(("status", status))
            .await
            .map_err(AppError::Database)?
            .check()
            .map_err(AppError::Database)?;
        Ok(())
    }

    /// All distinct chain ids currently assigned, each with its member
    /// contradictions, for `GET /api/contradictions/chains`.
    pub async fn chains(db: &SurrealDbClient) -> Result<Vec<(String, Vec<Self>)>, AppError> {
        let all = Self::all(db).await?;
        let mut by_chain: std::collections::BTreeMap<String, Vec<Self>> = std::collections::BTreeMap::new();
        for contradiction in all {
            if let Some(chain_id) = contradiction.chain_id.clone() {
                by_chain.entry(chain_id).or_default().push(contradiction);
            }
        }
        Ok(by_chain.into_iter().collect())
    }
}
