//! Filter Optimizer / Facets (§4.15): aggregated counts the search UI uses to
//! narrow a query. Each facet is one `GROUP BY`-style SQL pass over
//! `document`/`knowledge_entity`, mirroring `KnowledgeEntity::search`'s query
//! style in the teacher crate.

use chrono::{Duration, Utc};
use common::{error::AppError, storage::db::SurrealDbClient};
use serde::{Deserialize, Serialize};

/// Counts are capped to the top N values per facet, per spec.
const TOP_N: usize = 20;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FacetCount {
    pub value: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DateRangeCounts {
    pub last_week: i64,
    pub last_month: i64,
    pub last_year: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailableFilters {
    pub file_types: Vec<FacetCount>,
    pub projects: Vec<FacetCount>,
    pub entities: Vec<FacetCount>,
    pub date_ranges: DateRangeCounts,
}

#[derive(Debug, Deserialize)]
struct GroupCountRow {
    value: String,
    count: i64,
}

async fn group_count(
    db: &SurrealDbClient,
    table: &str,
    group_field: &str,
    where_clause: &str,
) -> Result<Vec<FacetCount>, AppError> {
    let sql = format!(
        "SELECT {group_field} AS value, count() AS count FROM {table} {where_clause} \
         GROUP BY {group_field} ORDER BY count DESC LIMIT {TOP_N}"
    );

    let rows: Vec<GroupCountRow> = db.query(sql).await?.take(0)?;

    Ok(rows.into_iter().map(|row| FacetCount { value: row.value, count: row.count }).collect())
}

async fn count_since(db: &SurrealDbClient, table: &str, since: chrono::DateTime<Utc>) -> Result<i64, AppError> {
    #[derive(Debug, Deserialize)]
    struct CountRow {
        count: i64,
    }

    let mut response = db
        .query(format!("SELECT count() AS count FROM {table} WHERE created_at >= $since GROUP ALL"))
        .bind(("since", since))
        .await?;

    let rows: Vec<CountRow> = response.take(0)?;
    Ok(rows.first().map_or(0, |r| r.count))
}

/// Returns aggregated counts for `file_types`, `projects`, `entities` (top 20
/// each) and fixed `date_ranges` (last week/month/year), each computed with a
/// single SQL pass. `query` is currently unused for scoping (the spec leaves
/// query-scoped facets to the caller's filter layer) but accepted for the
/// documented signature `get_available_filters(query?)`.
pub async fn get_available_filters(db: &SurrealDbClient, _query: Option<&str>) -> Result<AvailableFilters, AppError> {
    let file_types = group_count(db, "document", "mime_type", "").await?;
    let projects = group_count(db, "knowledge_entity", "name", "WHERE entity_type = 'Project'").await?;
    let entities = group_count(db, "knowledge_entity", "name", "WHERE entity_type != 'Project'").await?;

    let now = Utc::now();
    let date_ranges = DateRangeCounts {
        last_week: count_since(db, "document", now - Duration::days(7)).await?,
        last_month: count_since(db, "document", now - Duration::days(30)).await?,
        last_year: count_since(db, "document", now - Duration::days(365)).await?,
    };

    Ok(AvailableFilters { file_types, projects, entities, date_ranges })
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::types::{
        document::{Document, TextPage},
        knowledge_entity::{KnowledgeEntity, KnowledgeEntityType},
        StoredObject,
    };
    use serde_json::Map;
    use uuid::Uuid;

    async fn memory_db() -> SurrealDbClient {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory surrealdb");
        db.apply_migrations().await.expect("migrations");
        db
    }

    #[tokio::test]
    async fn file_type_facet_groups_by_mime_type() {
        let db = memory_db().await;

        Document::register(&db, "a.pdf".into(), "application/pdf".into(), 10, vec![], Map::new(), "job-a")
            .await
            .expect("register a");
        Document::register(&db, "b.pdf".into(), "application/pdf".into(), 10, vec![], Map::new(), "job-b")
            .await
            .expect("register b");
        Document::register(&db, "c.txt".into(), "text/plain".into(), 10, vec![], Map::new(), "job-c")
            .await
            .expect("register c");

        let filters = get_available_filters(&db, None).await.expect("filters");
        let pdf = filters.file_types.iter().find(|f| f.value == "application/pdf").expect("pdf facet");
        assert_eq!(pdf.count, 2);
    }

    #[tokio::test]
    async fn project_entities_are_separated_from_other_entities() {
        let db = memory_db().await;
        let user_id = "user-1";

        let project = KnowledgeEntity::new(
            "src".into(),
            "Q3 Audit".into(),
            "desc".into(),
            KnowledgeEntityType::Project,
            None,
            user_id.into(),
        );
        db.store_item(project).await.expect("store project");

        let idea = KnowledgeEntity::new(
            "src".into(),
            "Follow up call".into(),
            "desc".into(),
            KnowledgeEntityType::Idea,
            None,
            user_id.into(),
        );
        db.store_item(idea).await.expect("store idea");

        let filters = get_available_filters(&db, None).await.expect("filters");
        assert!(filters.projects.iter().any(|f| f.value == "Q3 Audit"));
        assert!(filters.entities.iter().any(|f| f.value == "Follow up call"));
        assert!(!filters.projects.iter().any(|f| f.value == "Follow up call"));
    }

    #[tokio::test]
    async fn date_range_counts_include_freshly_registered_documents() {
        let db = memory_db().await;
        Document::register(&db, "a.pdf".into(), "application/pdf".into(), 10, vec![], Map::new(), "job-a")
            .await
            .expect("register a");

        let filters = get_available_filters(&db, None).await.expect("filters");
        assert_eq!(filters.date_ranges.last_week, 1);
        assert_eq!(filters.date_ranges.last_month, 1);
        assert_eq!(filters.date_ranges.last_year, 1);
    }
}
