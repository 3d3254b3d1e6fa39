use crate::storage::types::file_info::deserialize_flexible_id;
use serde::{Deserialize, Serialize};

use crate::{error::AppError, storage::db::SurrealDbClient, storage::types::StoredObject};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SystemSettings {
    #[serde(deserialize_with = "deserialize_flexible_id")]
    pub id: String,
    pub registrations_enabled: bool,
    pub require_email_verification: bool,
    pub query_model: String,
    pub processing_model: String,
    pub embedding_model: String,
    pub embedding_dimensions: u32,
    pub query_system_prompt: String,
    pub ingestion_system_prompt: String,
    pub image_processing_model: String,
    pub image_processing_prompt: String,
    pub voice_processing_model: String,
}

impl StoredObject for SystemSettings {
    fn table_name() -> &'static str {
        "system_settings"
    }

    fn get_id(&self) -> &str {
        &self.id
    }
}

impl SystemSettings {
    /// Seeds the singleton `system_settings:current` row with defaults on
    /// first boot; a no-op if it already exists. Called from
    /// `SurrealDbClient::apply_migrations` so every other lookup (including
    /// `get_current`) can assume the row is always present.
    pub async fn ensure_initialized(db: &SurrealDbClient) -> Result<Self, AppError> {
        let existing: Option<Self> = db.get_item("current").await?;
        if let Some(existing) = existing {
            return Ok(existing);
        }

        let defaults = Self {
            id: "current".to_string(),
            registrations_enabled: true,
            require_email_verification: false,
            query_model: "gpt-4o-mini".to_string(),
            processing_model: "gpt-4o-mini".to_string(),
            embedding_model: "BAAI/bge-small-en-v1.5".to_string(),
            embedding_dimensions: 384,
            query_system_prompt: String::new(),
            ingestion_system_prompt: String::new(),
            image_processing_model: "gpt-4o-mini".to_string(),
            image_processing_prompt: String::new(),
            voice_processing_model: "whisper-1".to_string(),
        };

        let stored: Option<Self> = db.store_item(defaults).await?;
        stored.ok_or(AppError::Validation(
            "Failed to initialize system settings".into(),
        ))
    }

    pub async fn get_current(db: &SurrealDbClient) -> Result<Self, AppError> {
        let settings: Option<Self> = db.get_item("current").await?;
        settings.ok_or(AppError::NotFound("System settings not found".into()))
    }

    pub async fn update(db: &SurrealDbClient, changes: Self) -> Result<Self, AppError> {
        // We need to use a direct query for the update with MERGE
        let updated: Option<Self> = db
            .client
            .query("UPDATE type::thing('system_settings', 'current') MERGE $changes RETURN AFTER")
            .bind(("changes", changes))
            .await?
            .take(0)?;

        updated.ok_or(AppError::Validation(
            "Something went wrong updating the settings".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::types::text_chunk::TextChunk;

    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_settings_initialization() {
        // Setup in-memory database for testing
        let namespace = "test_ns";
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("Failed to start in-memory surrealdb");

        // Test initialization of system settings
        db.apply_migrations()
            .await
            .expect("Failed to apply migrations");
        let settings = SystemSettings::get_current(&db)
            .await
            .expect("Failed to get system settings");

        // Verify initial state after initialization
        assert_eq!(settings.id, "current");
        assert_eq!(settings.registrations_enabled, true);
        assert_eq!(settings.require_email_verification, false);
        assert_eq!(settings.query_model, "gpt-4o-mini");
        assert_eq!(settings.processing_model, "gpt-4o-mini");
        assert_eq!(settings.image_processing_model, "gpt-4o-mini");
        // Dont test these for now, having a hard time getting the formatting exactly the same
        // assert_eq!(
        //     settings.query_system_prompt,
        //     crate::storage::types::system_prompts::DEFAULT_QUERY_SYSTEM_PROMPT
        // );
        // assert_eq!(
        //     settings.ingestion_system_prompt,
        //     crate::storage::types::system_prompts::DEFAULT_INGRESS_ANALYSIS_SYSTEM_PROMPT
        // );

        // Test idempotency - ensure calling it again doesn't change anything
        db.apply_migrations()
            .await
            .expect("Failed to apply migrations");
        let settings_again = SystemSettings::get_current(&db)
            .await
            .expect("Failed to get settings after initialization");

        assert_eq!(settings.id, settings_again.id);
        assert_eq!(
            settings.registrations_enabled,
            settings_again.registrations_enabled
        );
        assert_eq!(
            settings.require_email_verification,
            settings_again.require_email_verification
        );
    }

    #[tokio::test]
    async fn test_get_current_settings() {
        // Setup in-memory database for testing
        let namespace = "test_ns";
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("Failed to start in-memory surrealdb");

        // Initialize settings
        db.apply_migrations()
            .await
            .expect("Failed to apply migrations");

        // Test get_current method
        let settings = SystemSettings::get_current(&db)
            .await
            .expect("Failed to get current settings");

        assert_eq!(settings.id, "current");
        assert_eq!(settings.registrations_enabled, true);
        assert_eq!(settings.require_email_verification, false);
    }

    #[tokio::test]
    async fn test_update_settings() {
        // Setup in-memory database for testing
        let namespace = "test_ns";
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("Failed to start in-memory surrealdb");

        // Initialize settings
        db.apply_migrations()
            .await
            .expect("Failed to apply migrations");

        // Create updated settings
        let mut updated_settings = SystemSettings::get_current(&db).await.unwrap();
        updated_settings.id = "current".to_string();
        updated_settings.registrations_enabled = false;
        updated_settings.require_email_verification = true;
        updated_settings.query_model = "gpt-4".to_string();

        // Test update method
        let result = SystemSettings::update(&db, updated_settings)
            .await
            .expect("Failed to update settings");

        assert_eq!(result.id, "current");
        assert_eq!(result.registrations_enabled, false);
        assert_eq!(result.require_email_verification, true);
        assert_eq!(result.query_model, "gpt-4");

        // Verify changes persisted by getting current settings
        let current = SystemSettings::get_current(&db)
            .await
            .expect("Failed to get current settings after update");

        assert_eq!(current.registrations_enabled, false);
        assert_eq!(current.require_email_verification, true);
        assert_eq!(current.query_model, "gpt-4");
    }

    #[tokio::test]
    async fn test_get_current_nonexistent() {
        // Setup in-memory database for testing
        let namespace = "test_ns";
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("Failed to start in-memory surrealdb");

        // Don't initialize settings and try to get them
        let result = SystemSettings::get_current(&db).await;

        assert!(result.is_err());
        match result {
            Err(AppError::NotFound(_)) => {
                // Expected error
            }
            Err(e) => panic!("Expected NotFound error, got: {:?}", e),
            Ok(_) => panic!("Expected error but got Ok"),
        }
    }

    #[tokio::test]
    async fn test_migration_rerun_after_changing_embedding_dimension() {
        let db = SurrealDbClient::memory("test", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start DB");

        // Initial boot sets up the HNSW indexes at the default 384-dim model.
        db.apply_migrations().await.expect("Initial migration failed");

        let chunk = TextChunk::new(
            "source1".into(),
            "This chunk has the original dimension".into(),
            "user1".into(),
        );
        TextChunk::store_with_embedding(chunk, vec![0.1; 384], &db)
            .await
            .expect("Failed to store initial chunk with embedding");

        // Record a wider-dimension model in settings, then re-run migrations:
        // `apply_migrations` must rebuild the HNSW indexes to match without error.
        let mut settings = SystemSettings::get_current(&db).await.expect("settings");
        settings.embedding_model = "BAAI/bge-large-en-v1.5".to_string();
        settings.embedding_dimensions = 1024;
        SystemSettings::update(&db, settings).await.expect("update settings");

        let migration_result = db.apply_migrations().await;
        assert!(migration_result.is_ok(), "Migrations should not fail after a dimension change");
    }
}
