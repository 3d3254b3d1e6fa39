#![allow(clippy::missing_docs_in_private_items)]
//! Document chunks (§3 Chunk): contiguous, char-offset-addressed segments of a
//! registered `Document`, the unit the Chunker (§4.10) produces and the
//! embedding/search shards consume. Distinct from the teacher's `text_chunk`
//! table, which is keyed by `source_id`/`user_id` for the knowledge-entity
//! pipeline rather than by `document_id`/`chunk_index`.

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(Chunk, "document_chunk", {
    document_id: String,
    chunk_index: u32,
    text: String,
    page_number: Option<u32>,
    start_char: usize,
    end_char: usize,
    token_count: u32,
    vector_id: Option<String>
});

impl Chunk {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        document_id: String,
        chunk_index: u32,
        text: String,
        page_number: Option<u32>,
        start_char: usize,
        end_char: usize,
        token_count: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            document_id,
            chunk_index,
            text,
            page_number,
            start_char,
            end_char,
            token_count,
            vector_id: None,
        }
    }

    /// Upserts on `(document_id, chunk_index)` (§5 idempotence: re-parsing must
    /// not duplicate chunk rows).
    pub async fn upsert(db: &SurrealDbClient, chunk: Self) -> Result<Self, AppError> {
        let existing: Vec<Self> = db
            .client
            .query("SELECT * FROM document_chunk WHERE document_id = $doc_id AND chunk_index = $idx LIMIT 1")
            .bind(("doc_id", chunk.document_id.clone()))
            .bind(("idx", chunk.chunk_index))
            .await
            .map_err(AppError::Database)?
            .take(0)
            .map_err(AppError::Database)?;

        let id = existing.into_iter().next().map_or(chunk.id.clone(), |row| row.id);

        let mut content = chunk;
        content.id = id.clone();

        db.client
            .upsert((Self::table_name(), id))
            .content(content)
            .await
            .map_err(AppError::Database)?
            .ok_or_else(|| AppError::InternalError("failed to upsert chunk".to_string()))
    }

    pub async fn find_by_document(db: &SurrealDbClient, document_id: &str) -> Result<Vec<Self>, AppError> {
        let mut rows: Vec<Self> = db
            .client
            .query("SELECT * FROM document_chunk WHERE document_id = $doc_id ORDER BY chunk_index ASC")
            .bind(("doc_id", document_id.to_string()))
            .await
            .map_err(AppError::Database)?
            .take(0)
            .map_err(AppError::Database)?;
        rows.sort_by_key(|c| c.chunk_index);
        Ok(rows)
    }

    pub async fn set_vector_id(db: &SurrealDbClient, id: &str, vector_id: &str) -> Result<(), AppError> {
        db.client
            .query("UPDATE type::thing('document_chunk', $id) SET vector_id = $vector_id")
            .bind(("id", id.to_string()))
            .bind(("vector_id", vector_id.to_string()))
            .await
            .map_err(AppError::Database)?
            .check()
            .map_err(AppError::Database)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    async fn memory_db() -> SurrealDbClient {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory surrealdb");
        db.apply_migrations().await.expect("migrations");
        db
    }

    #[tokio::test]
    async fn upsert_on_document_and_index_replaces_not_duplicates() {
        let db = memory_db().await;

        let first = Chunk::new("doc-1".to_string(), 0, "first version".to_string(), None, 0, 13, 2);
        Chunk::upsert(&db, first).await.expect("first upsert");

        let second = Chunk::new("doc-1".to_string(), 0, "second version".to_string(), None, 0, 14, 2);
        Chunk::upsert(&db, second).await.expect("second upsert");

        let chunks = Chunk::find_by_document(&db, "doc-1").await.expect("find");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "second version");
    }

    #[tokio::test]
    async fn find_by_document_orders_by_chunk_index() {
        let db = memory_db().await;

        Chunk::upsert(&db, Chunk::new("doc-2".to_string(), 1, "b".to_string(), None, 10, 11, 1))
            .await
            .expect("upsert 1");
        Chunk::upsert(&db, Chunk::new("doc-2".to_string(), 0, "a".to_string(), None, 0, 1, 1))
            .await
            .expect("upsert 0");

        let chunks = Chunk::find_by_document(&db, "doc-2").await.expect("find");
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[1].chunk_index, 1);
    }
}
