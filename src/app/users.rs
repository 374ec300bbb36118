use anyhow::Result;
use sqlx::Row;
use uuid::Uuid;

use crate::app::identity::user_from_row;
use crate::domain::user::User;
use crate::infra::db::Db;
use crate::infra::storage::ObjectStorage;

/// Admin-only user management.
#[derive(Clone)]
pub struct UserService {
    db: Db,
    storage: ObjectStorage,
}

impl UserService {
    pub fn new(db: Db, storage: ObjectStorage) -> Self {
        Self { db, storage }
    }

    pub async fn list(&self) -> Result<Vec<User>> {
        let rows = sqlx::query(
            "SELECT id, username, email, password_hash, is_admin, created_at \
             FROM users ORDER BY created_at",
        )
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows.iter().map(user_from_row).collect())
    }

    pub async fn set_admin(&self, user_id: Uuid, is_admin: bool) -> Result<Option<User>> {
        let row = sqlx::query(
            "UPDATE users SET is_admin = $2 WHERE id = $1 \
             RETURNING id, username, email, password_hash, is_admin, created_at",
        )
        .bind(user_id)
        .bind(is_admin)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.as_ref().map(user_from_row))
    }

    /// Deleting a user cascades to their authored content through the
    /// foreign keys; the backing media files of their incidents are removed
    /// best-effort afterwards.
    pub async fn delete(&self, user_id: Uuid) -> Result<bool> {
        let mut tx = self.db.pool().begin().await?;

        let mut object_keys: Vec<String> = sqlx::query_scalar(
            "SELECT m.image_url FROM incident_images m \
             JOIN incident_reports i ON m.incident_id = i.id \
             WHERE i.user_id = $1",
        )
        .bind(user_id)
        .fetch_all(&mut *tx)
        .await?;
        let video_keys: Vec<String> = sqlx::query_scalar(
            "SELECT m.video_url FROM incident_videos m \
             JOIN incident_reports i ON m.incident_id = i.id \
             WHERE i.user_id = $1",
        )
        .bind(user_id)
        .fetch_all(&mut *tx)
        .await?;
        object_keys.extend(video_keys);

        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Ok(false);
        }

        tx.commit().await?;

        for key in object_keys {
            if let Err(err) = self.storage.delete(&key).await {
                tracing::warn!(error = ?err, key = %key, "failed to delete stored media file");
            }
        }

        Ok(true)
    }
}
