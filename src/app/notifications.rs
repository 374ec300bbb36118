use anyhow::{anyhow, Result};
use sqlx::postgres::PgRow;
use sqlx::Row;
use uuid::Uuid;

use crate::domain::notification::{Notification, NotificationKind};
use crate::infra::db::Db;

#[derive(Clone)]
pub struct NotificationService {
    db: Db,
}

impl NotificationService {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// New-incident event: one warning notification per admin. Runs inside
    /// the caller's transaction so a dispatch failure rolls back the
    /// triggering commit.
    pub async fn notify_admins_with_tx(
        &self,
        reporter_username: &str,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    ) -> Result<()> {
        let message = format!(
            "New incident reported by {} requires review",
            reporter_username
        );
        sqlx::query(
            "INSERT INTO notifications (message, kind, user_id) \
             SELECT $1, 'warning', id FROM users WHERE is_admin = TRUE",
        )
        .bind(message)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn list(&self, user_id: Uuid) -> Result<Vec<Notification>> {
        let rows = sqlx::query(
            "SELECT id, message, kind::text AS kind, read, created_at, user_id \
             FROM notifications \
             WHERE user_id = $1 \
             ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(self.db.pool())
        .await?;

        let mut notifications = Vec::with_capacity(rows.len());
        for row in rows {
            notifications.push(notification_from_row(&row)?);
        }
        Ok(notifications)
    }

    pub async fn get(&self, notification_id: Uuid) -> Result<Option<Notification>> {
        let row = sqlx::query(
            "SELECT id, message, kind::text AS kind, read, created_at, user_id \
             FROM notifications WHERE id = $1",
        )
        .bind(notification_id)
        .fetch_optional(self.db.pool())
        .await?;

        match row {
            Some(row) => Ok(Some(notification_from_row(&row)?)),
            None => Ok(None),
        }
    }

    /// Idempotent: marking an already-read notification is a no-op, not an
    /// error.
    pub async fn mark_read(&self, notification_id: Uuid) -> Result<Option<Notification>> {
        let row = sqlx::query(
            "UPDATE notifications SET read = TRUE \
             WHERE id = $1 \
             RETURNING id, message, kind::text AS kind, read, created_at, user_id",
        )
        .bind(notification_id)
        .fetch_optional(self.db.pool())
        .await?;

        match row {
            Some(row) => Ok(Some(notification_from_row(&row)?)),
            None => Ok(None),
        }
    }
}

fn notification_from_row(row: &PgRow) -> Result<Notification> {
    let kind: String = row.get("kind");
    let kind = NotificationKind::from_db(&kind)
        .ok_or_else(|| anyhow!("unknown notification kind: {}", kind))?;
    Ok(Notification {
        id: row.get("id"),
        message: row.get("message"),
        kind,
        read: row.get("read"),
        created_at: row.get("created_at"),
        user_id: row.get("user_id"),
    })
}
