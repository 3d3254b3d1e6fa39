use chrono::Utc as ChronoUtc;
use surrealdb::opt::PatchOp;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(Scratchpad, "scratchpad", {
    user_id: String,
    title: String,
    content: String,
    #[serde(serialize_with = "serialize_datetime", deserialize_with="deserialize_datetime")]
    last_saved_at: DateTime<Utc>,
    is_dirty: bool,
    #[serde(default)]
    is_archived: bool,
    #[serde(
        serialize_with = "serialize_option_datetime",
        deserialize_with = "deserialize_option_datetime",
        default
    )]
    archived_at: Option<DateTime<Utc>>,
    #[serde(
        serialize_with = "serialize_option_datetime",
        deserialize_with = "deserialize_option_datetime",
        default
    )]
    ingested_at: Option<DateTime<Utc>>
});

impl Scratchpad {
    pub fn new(user_id: String, title: String) -> Self {
        let now = ChronoUtc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            user_id,
            title,
            content: String::new(),
            last_saved_at: now,
            is_dirty: false,
            is_archived: false,
            archived_at: None,
            ingested_at: None,
        }
    }

    pub async fn get_by_user(user_id: &str, db: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        let scratchpads: Vec<Scratchpad> = db.client
            .query("SELECT * FROM type::table($table_name) WHERE user_id = $user_id AND (is_archived = false OR is_archived IS NONE) ORDER BY updated_at DESC")
            .bind(("table_name", Self::table_name()))
            .bind(("user_id", user_id.to_string()))
            .await?
            .take(0)?;

        Ok(scratchpads)
    }

    pub async fn get_archived_by_user(
        user_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let scratchpads: Vec<Scratchpad> = db.client
            .query("SELECT * FROM type::table($table_name) WHERE user_id = $user_id AND is_archived = true ORDER BY archived_at DESC, updated_at DESC")
            .bind(("table_name", Self::table_name()))
            .bind(("user_id", user_id.to_string()))
            .await?
            .take(0)?;

        Ok(scratchpads)
    }

    pub async fn get_by_id(
        id: &str,
        user_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        let scratchpad: Option<Scratchpad> = db.get_item(id).await?;

        let scratchpad =
            scratchpad.ok_or_else(|| AppError::NotFound("Scratchpad not found".to_string()))?;

        if scratchpad.user_id != user_id {
            return Err(AppError::Auth(
                "You don't have access to this scratchpad".to_string(),
            ));
        }

        Ok(scratchpad)
    }

    pub async fn update_content(
        id: &str,
        user_id: &str,
        new_content: &str,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        // First verify ownership
        let scratchpad = Self::get_by_id(id, user_id, db).await?;

        if scratchpad.is_archived {
            return Ok(scratchpad);
        }

        let now = ChronoUtc::now();
        let _updated: Option<Self> = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace("/content", new_content.to_string()))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::Datetime::from(now),
            ))
            .patch(PatchOp::replace(
                "/last_saved_at",
                surrealdb::Datetime::from(now),
            ))
            .patch(PatchOp::replace("/is_dirty", false))
            .await?;

        // Return the updated scratchpad
        Self::get_by_id(id, user_id, db).await
    }

    pub async fn update_title(
        id: &str,
        user_id: &str,
        new_title: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        // First verify ownership
        let _scratchpad = Self::get_by_id(id, user_id, db).await?;

        let _updated: Option<Self> = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace("/title", new_title.to_string()))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::Datetime::from(ChronoUtc::now()),
            ))
            .await?;

        Ok(())
    }

    pub async fn delete(id: &str, user_id: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        // First verify ownership
        let _scratchpad = Self::get_by_id(id, user_id, db).await?;

        let _: Option<Self> = db.client.delete((Self::table_name(), id)).await?;

        Ok(())
    }

    pub async fn archive(
        id: &str,
        user_id: &str,
        db: &SurrealDbClient,
        mark_ingested: bool,
    ) -> Result<Self, AppError> {
        // Verify ownership
        let scratchpad = Self::get_by_id(id, user_id, db).await?;

        if scratchpad.is_archived {
            if mark_ingested && scratchpad.ingested_at.is_none() {
                // Ensure ingested_at is set if required
                let surreal_now = surrealdb::Datetime::from(ChronoUtc::now());
                let _updated: Option<Self> = db
                    .update((Self::table_name(), id))
                    .patch(PatchOp::replace("/ingested_at", surreal_now))
                    .await?;
                return Self::get_by_id(id, user_id, db).await;
            }
            return Ok(scratchpad);
        }

        let now = ChronoUtc::now();
        let surreal_now = surrealdb::Datetime::from(now);
        let mut update = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace("/is_archived", true))
            .patch(PatchOp::replace("/archived_at", surreal_now.clone()))
            .patch(PatchOp::replace("/updated_at", surreal_now.clone()));

        update = if mark_ingested {
            update.patch(PatchOp::replace("/ingested_at", surreal_now))
        } else {
            update.patch(PatchOp::remove("/ingested_at"))
        };

        let _updated: Option<Self> = update.await?;

        Self::get_by_id(id, user_id, db).await
    }

    pub async fn restore(id: &str, user_id: &str, db: &SurrealDbClient) -> Result<Self, AppError> {
        // Verify ownership
        let scratchpad = Self::get_by_id(id, user_id, db).await?;

        if !scratchpad.is_archived {
            return Ok(scratchpad);
        }

        let now = ChronoUtc::now();
        let surreal_now = surrealdb::Datetime::from(now);
        let _updated: Option<Self> = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace("/is_archived", false))
            .patch(PatchOp::remove("/archived_at"))
            .patch(PatchOp::remove("/ingested_at"))
            .patch(PatchOp::replace("/updated_at", surreal_now))
            .await?;

        Self::get_by_id(id, user_id, db).await
    }
}
