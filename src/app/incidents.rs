use anyhow::{anyhow, Result};
use bytes::Bytes;
use sqlx::postgres::PgRow;
use sqlx::Row;
use uuid::Uuid;

use crate::app::media::MediaKind;
use crate::app::notifications::NotificationService;
use crate::domain::incident::{
    Comment, IncidentDetail, IncidentImage, IncidentReport, IncidentStatus, IncidentVideo,
    Reaction, ReactionSummary, ReactionType, Review,
};
use crate::domain::user::User;
use crate::infra::db::Db;
use crate::infra::storage::ObjectStorage;

/// The incident aggregate root. Every access to an incident's images,
/// videos, comments, reactions, and reviews goes through here; child rows
/// never outlive the report.
#[derive(Clone)]
pub struct IncidentService {
    db: Db,
    storage: ObjectStorage,
}

impl IncidentService {
    pub fn new(db: Db, storage: ObjectStorage) -> Self {
        Self { db, storage }
    }

    /// Insert the report and dispatch the admin notifications in one
    /// transaction: if notifying fails, the report is rolled back too.
    pub async fn create(
        &self,
        owner_id: Uuid,
        description: String,
        latitude: f64,
        longitude: f64,
    ) -> Result<IncidentReport> {
        let mut tx = self.db.pool().begin().await?;

        let row = sqlx::query(
            "INSERT INTO incident_reports (description, latitude, longitude, user_id) \
             VALUES ($1, $2, $3, $4) \
             RETURNING id, description, latitude, longitude, status::text AS status, \
                       created_at, updated_at, user_id",
        )
        .bind(&description)
        .bind(latitude)
        .bind(longitude)
        .bind(owner_id)
        .fetch_one(&mut *tx)
        .await?;
        let report = report_from_row(&row)?;

        let username: String = sqlx::query_scalar("SELECT username FROM users WHERE id = $1")
            .bind(owner_id)
            .fetch_one(&mut *tx)
            .await?;

        let notifications = NotificationService::new(self.db.clone());
        notifications
            .notify_admins_with_tx(&username, &mut tx)
            .await?;

        tx.commit().await?;
        Ok(report)
    }

    /// Store the upload first, then link it to the report. A failed link
    /// leaves an orphaned object, which is removed best-effort; cleanup
    /// failures are logged and swallowed.
    pub async fn attach(
        &self,
        incident_id: Uuid,
        kind: MediaKind,
        extension: &str,
        content_type: &str,
        data: Bytes,
    ) -> Result<()> {
        let object_key = format!("uploads/{}/{}.{}", incident_id, Uuid::new_v4(), extension);
        self.storage.put(&object_key, content_type, data).await?;

        let insert = match kind {
            MediaKind::Image => {
                "INSERT INTO incident_images (image_url, incident_id) VALUES ($1, $2)"
            }
            MediaKind::Video => {
                "INSERT INTO incident_videos (video_url, incident_id) VALUES ($1, $2)"
            }
        };
        let linked = sqlx::query(insert)
            .bind(&object_key)
            .bind(incident_id)
            .execute(self.db.pool())
            .await;

        if let Err(err) = linked {
            if let Err(cleanup_err) = self.storage.delete(&object_key).await {
                tracing::warn!(
                    error = ?cleanup_err,
                    key = %object_key,
                    "failed to clean up orphaned upload"
                );
            }
            return Err(err.into());
        }

        Ok(())
    }

    pub async fn owner_of(&self, incident_id: Uuid) -> Result<Option<Uuid>> {
        let owner = sqlx::query_scalar("SELECT user_id FROM incident_reports WHERE id = $1")
            .bind(incident_id)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(owner)
    }

    pub async fn get_detail(&self, incident_id: Uuid) -> Result<Option<IncidentDetail>> {
        let row = sqlx::query(
            "SELECT i.id, i.description, i.latitude, i.longitude, i.status::text AS status, \
                    i.created_at, i.updated_at, i.user_id, \
                    u.id AS author_id, u.username AS author_username, u.email AS author_email, \
                    u.is_admin AS author_is_admin, u.created_at AS author_created_at \
             FROM incident_reports i \
             JOIN users u ON i.user_id = u.id \
             WHERE i.id = $1",
        )
        .bind(incident_id)
        .fetch_optional(self.db.pool())
        .await?;

        let row = match row {
            Some(row) => row,
            None => return Ok(None),
        };

        let report = report_from_row(&row)?;
        let reporter = author_from_row(&row);
        let detail = self.load_children(report, reporter).await?;
        Ok(Some(detail))
    }

    pub async fn list(&self) -> Result<Vec<IncidentDetail>> {
        let rows = sqlx::query(
            "SELECT i.id, i.description, i.latitude, i.longitude, i.status::text AS status, \
                    i.created_at, i.updated_at, i.user_id, \
                    u.id AS author_id, u.username AS author_username, u.email AS author_email, \
                    u.is_admin AS author_is_admin, u.created_at AS author_created_at \
             FROM incident_reports i \
             JOIN users u ON i.user_id = u.id \
             ORDER BY i.created_at DESC",
        )
        .fetch_all(self.db.pool())
        .await?;

        // Children are recomputed on every read rather than cached; the
        // per-aggregate fan-out is acceptable at this scale.
        let mut details = Vec::with_capacity(rows.len());
        for row in rows {
            let report = report_from_row(&row)?;
            let reporter = author_from_row(&row);
            details.push(self.load_children(report, reporter).await?);
        }
        Ok(details)
    }

    /// Apply a validated patch. Absent fields keep their values; the status
    /// column only changes when a status is passed in (the handler strips it
    /// for non-admin callers). `updated_at` refreshes on every successful
    /// mutation.
    pub async fn update(
        &self,
        incident_id: Uuid,
        description: Option<String>,
        latitude: Option<f64>,
        longitude: Option<f64>,
        status: Option<IncidentStatus>,
    ) -> Result<Option<IncidentReport>> {
        let row = sqlx::query(
            "UPDATE incident_reports \
             SET description = COALESCE($2, description), \
                 latitude = COALESCE($3, latitude), \
                 longitude = COALESCE($4, longitude), \
                 status = COALESCE($5::incident_status, status), \
                 updated_at = now() \
             WHERE id = $1 \
             RETURNING id, description, latitude, longitude, status::text AS status, \
                       created_at, updated_at, user_id",
        )
        .bind(incident_id)
        .bind(description)
        .bind(latitude)
        .bind(longitude)
        .bind(status.map(|status| status.as_db()))
        .fetch_optional(self.db.pool())
        .await?;

        match row {
            Some(row) => Ok(Some(report_from_row(&row)?)),
            None => Ok(None),
        }
    }

    /// Cascading delete: child rows and the report go in one transaction;
    /// the backing stored files are removed best-effort afterwards. Orphaned
    /// objects are an accepted trade-off, dangling rows are not.
    pub async fn delete(&self, incident_id: Uuid) -> Result<bool> {
        let mut tx = self.db.pool().begin().await?;

        let exists: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM incident_reports WHERE id = $1")
                .bind(incident_id)
                .fetch_optional(&mut *tx)
                .await?;
        if exists.is_none() {
            return Ok(false);
        }

        let mut object_keys: Vec<String> =
            sqlx::query_scalar("SELECT image_url FROM incident_images WHERE incident_id = $1")
                .bind(incident_id)
                .fetch_all(&mut *tx)
                .await?;
        let video_keys: Vec<String> =
            sqlx::query_scalar("SELECT video_url FROM incident_videos WHERE incident_id = $1")
                .bind(incident_id)
                .fetch_all(&mut *tx)
                .await?;
        object_keys.extend(video_keys);

        for statement in [
            "DELETE FROM incident_images WHERE incident_id = $1",
            "DELETE FROM incident_videos WHERE incident_id = $1",
            "DELETE FROM incident_comments WHERE incident_id = $1",
            "DELETE FROM incident_reactions WHERE incident_id = $1",
            "DELETE FROM incident_reviews WHERE incident_id = $1",
        ] {
            sqlx::query(statement)
                .bind(incident_id)
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query("DELETE FROM incident_reports WHERE id = $1")
            .bind(incident_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        for key in object_keys {
            if let Err(err) = self.storage.delete(&key).await {
                tracing::warn!(error = ?err, key = %key, "failed to delete stored media file");
            }
        }

        Ok(true)
    }

    pub async fn exists(&self, incident_id: Uuid) -> Result<bool> {
        let row: Option<Uuid> = sqlx::query_scalar("SELECT id FROM incident_reports WHERE id = $1")
            .bind(incident_id)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(row.is_some())
    }

    pub async fn add_comment(
        &self,
        incident_id: Uuid,
        author_id: Uuid,
        content: String,
    ) -> Result<Comment> {
        let row = sqlx::query(
            "WITH inserted AS ( \
                INSERT INTO incident_comments (content, user_id, incident_id) \
                VALUES ($1, $2, $3) \
                RETURNING id, content, created_at, user_id, incident_id \
             ) \
             SELECT c.id, c.content, c.created_at, c.incident_id, \
                    u.id AS author_id, u.username AS author_username, u.email AS author_email, \
                    u.is_admin AS author_is_admin, u.created_at AS author_created_at \
             FROM inserted c \
             JOIN users u ON c.user_id = u.id",
        )
        .bind(content)
        .bind(author_id)
        .bind(incident_id)
        .fetch_one(self.db.pool())
        .await?;

        Ok(Comment {
            id: row.get("id"),
            content: row.get("content"),
            created_at: row.get("created_at"),
            user: author_from_row(&row),
            incident_id: row.get("incident_id"),
        })
    }

    /// One reaction per (user, incident, type): re-reacting is a no-op that
    /// returns the existing row.
    pub async fn add_reaction(
        &self,
        incident_id: Uuid,
        author_id: Uuid,
        reaction_type: ReactionType,
    ) -> Result<Reaction> {
        let row = sqlx::query(
            "INSERT INTO incident_reactions (reaction_type, user_id, incident_id) \
             VALUES ($1::reaction_type, $2, $3) \
             ON CONFLICT (user_id, incident_id, reaction_type) DO NOTHING \
             RETURNING id, reaction_type::text AS reaction_type, created_at, user_id, incident_id",
        )
        .bind(reaction_type.as_db())
        .bind(author_id)
        .bind(incident_id)
        .fetch_optional(self.db.pool())
        .await?;

        let row = match row {
            Some(row) => row,
            None => sqlx::query(
                "SELECT id, reaction_type::text AS reaction_type, created_at, user_id, incident_id \
                 FROM incident_reactions \
                 WHERE user_id = $1 AND incident_id = $2 AND reaction_type = $3::reaction_type",
            )
            .bind(author_id)
            .bind(incident_id)
            .bind(reaction_type.as_db())
            .fetch_one(self.db.pool())
            .await?,
        };

        reaction_from_row(&row)
    }

    pub async fn add_review(
        &self,
        incident_id: Uuid,
        author_id: Uuid,
        rating: i32,
        content: String,
    ) -> Result<Review> {
        let row = sqlx::query(
            "WITH inserted AS ( \
                INSERT INTO incident_reviews (rating, content, user_id, incident_id) \
                VALUES ($1, $2, $3, $4) \
                RETURNING id, rating, content, created_at, user_id, incident_id \
             ) \
             SELECT r.id, r.rating, r.content, r.created_at, r.incident_id, \
                    u.id AS author_id, u.username AS author_username, u.email AS author_email, \
                    u.is_admin AS author_is_admin, u.created_at AS author_created_at \
             FROM inserted r \
             JOIN users u ON r.user_id = u.id",
        )
        .bind(rating)
        .bind(content)
        .bind(author_id)
        .bind(incident_id)
        .fetch_one(self.db.pool())
        .await?;

        Ok(Review {
            id: row.get("id"),
            rating: row.get("rating"),
            content: row.get("content"),
            created_at: row.get("created_at"),
            user: author_from_row(&row),
            incident_id: row.get("incident_id"),
        })
    }

    /// Derived on read, never stored.
    pub async fn summarize_reactions(&self, incident_id: Uuid) -> Result<ReactionSummary> {
        let rows = sqlx::query(
            "SELECT reaction_type::text AS reaction_type, COUNT(*) AS count \
             FROM incident_reactions \
             WHERE incident_id = $1 \
             GROUP BY reaction_type",
        )
        .bind(incident_id)
        .fetch_all(self.db.pool())
        .await?;

        let mut summary = ReactionSummary::default();
        for row in rows {
            let kind: String = row.get("reaction_type");
            let count: i64 = row.get("count");
            match ReactionType::from_db(&kind) {
                Some(ReactionType::Like) => summary.like = count,
                Some(ReactionType::Share) => summary.share = count,
                None => return Err(anyhow!("unknown reaction type: {}", kind)),
            }
        }
        Ok(summary)
    }

    async fn load_children(&self, report: IncidentReport, reporter: User) -> Result<IncidentDetail> {
        let incident_id = report.id;

        let image_rows = sqlx::query(
            "SELECT id, image_url, created_at, incident_id \
             FROM incident_images WHERE incident_id = $1 ORDER BY created_at",
        )
        .bind(incident_id)
        .fetch_all(self.db.pool())
        .await?;
        let images = image_rows
            .iter()
            .map(|row| IncidentImage {
                id: row.get("id"),
                image_url: row.get("image_url"),
                created_at: row.get("created_at"),
                incident_id: row.get("incident_id"),
            })
            .collect();

        let video_rows = sqlx::query(
            "SELECT id, video_url, created_at, incident_id \
             FROM incident_videos WHERE incident_id = $1 ORDER BY created_at",
        )
        .bind(incident_id)
        .fetch_all(self.db.pool())
        .await?;
        let videos = video_rows
            .iter()
            .map(|row| IncidentVideo {
                id: row.get("id"),
                video_url: row.get("video_url"),
                created_at: row.get("created_at"),
                incident_id: row.get("incident_id"),
            })
            .collect();

        let comment_rows = sqlx::query(
            "SELECT c.id, c.content, c.created_at, c.incident_id, \
                    u.id AS author_id, u.username AS author_username, u.email AS author_email, \
                    u.is_admin AS author_is_admin, u.created_at AS author_created_at \
             FROM incident_comments c \
             JOIN users u ON c.user_id = u.id \
             WHERE c.incident_id = $1 \
             ORDER BY c.created_at",
        )
        .bind(incident_id)
        .fetch_all(self.db.pool())
        .await?;
        let comments = comment_rows
            .iter()
            .map(|row| Comment {
                id: row.get("id"),
                content: row.get("content"),
                created_at: row.get("created_at"),
                user: author_from_row(row),
                incident_id: row.get("incident_id"),
            })
            .collect();

        let review_rows = sqlx::query(
            "SELECT r.id, r.rating, r.content, r.created_at, r.incident_id, \
                    u.id AS author_id, u.username AS author_username, u.email AS author_email, \
                    u.is_admin AS author_is_admin, u.created_at AS author_created_at \
             FROM incident_reviews r \
             JOIN users u ON r.user_id = u.id \
             WHERE r.incident_id = $1 \
             ORDER BY r.created_at",
        )
        .bind(incident_id)
        .fetch_all(self.db.pool())
        .await?;
        let reviews = review_rows
            .iter()
            .map(|row| Review {
                id: row.get("id"),
                rating: row.get("rating"),
                content: row.get("content"),
                created_at: row.get("created_at"),
                user: author_from_row(row),
                incident_id: row.get("incident_id"),
            })
            .collect();

        let reactions = self.summarize_reactions(incident_id).await?;

        Ok(IncidentDetail {
            report,
            user: reporter,
            images,
            videos,
            comments,
            reactions,
            reviews,
        })
    }
}

fn report_from_row(row: &PgRow) -> Result<IncidentReport> {
    let status: String = row.get("status");
    let status = IncidentStatus::from_db(&status)
        .ok_or_else(|| anyhow!("unknown incident status: {}", status))?;
    Ok(IncidentReport {
        id: row.get("id"),
        description: row.get("description"),
        latitude: row.get("latitude"),
        longitude: row.get("longitude"),
        status,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        user_id: row.get("user_id"),
    })
}

fn reaction_from_row(row: &PgRow) -> Result<Reaction> {
    let reaction_type: String = row.get("reaction_type");
    let reaction_type = ReactionType::from_db(&reaction_type)
        .ok_or_else(|| anyhow!("unknown reaction type: {}", reaction_type))?;
    Ok(Reaction {
        id: row.get("id"),
        reaction_type,
        created_at: row.get("created_at"),
        user_id: row.get("user_id"),
        incident_id: row.get("incident_id"),
    })
}

/// Users embedded in aggregate responses come from joined `author_*`
/// columns; the digest is never selected for them.
fn author_from_row(row: &PgRow) -> User {
    User {
        id: row.get("author_id"),
        username: row.get("author_username"),
        email: row.get("author_email"),
        password_hash: String::new(),
        is_admin: row.get("author_is_admin"),
        created_at: row.get("author_created_at"),
    }
}
