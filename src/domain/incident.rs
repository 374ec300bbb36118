use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::user::User;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    Pending,
    UnderInvestigation,
    Rejected,
    Resolved,
}

impl IncidentStatus {
    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "under_investigation" => Some(Self::UnderInvestigation),
            "rejected" => Some(Self::Rejected),
            "resolved" => Some(Self::Resolved),
            _ => None,
        }
    }

    pub fn as_db(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::UnderInvestigation => "under_investigation",
            Self::Rejected => "rejected",
            Self::Resolved => "resolved",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IncidentReport {
    pub id: Uuid,
    pub description: String,
    pub latitude: f64,
    pub longitude: f64,
    pub status: IncidentStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    pub user_id: Uuid,
}

/// The aggregate view returned by every incident read: the report together
/// with its reporter and owned collections, reaction counts derived on read.
#[derive(Debug, Clone, Serialize)]
pub struct IncidentDetail {
    #[serde(flatten)]
    pub report: IncidentReport,
    pub user: User,
    pub images: Vec<IncidentImage>,
    pub videos: Vec<IncidentVideo>,
    pub comments: Vec<Comment>,
    pub reactions: ReactionSummary,
    pub reviews: Vec<Review>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IncidentImage {
    pub id: Uuid,
    pub image_url: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub incident_id: Uuid,
}

#[derive(Debug, Clone, Serialize)]
pub struct IncidentVideo {
    pub id: Uuid,
    pub video_url: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub incident_id: Uuid,
}

#[derive(Debug, Clone, Serialize)]
pub struct Comment {
    pub id: Uuid,
    pub content: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub user: User,
    pub incident_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReactionType {
    Like,
    Share,
}

impl ReactionType {
    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "like" => Some(Self::Like),
            "share" => Some(Self::Share),
            _ => None,
        }
    }

    pub fn as_db(&self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Share => "share",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Reaction {
    pub id: Uuid,
    pub reaction_type: ReactionType,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub user_id: Uuid,
    pub incident_id: Uuid,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ReactionSummary {
    pub like: i64,
    pub share: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Review {
    pub id: Uuid,
    pub rating: i32,
    pub content: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub user: User,
    pub incident_id: Uuid,
}

/// Explicit patch shape for partial updates; every present field is
/// validated before any of them is applied.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IncidentPatch {
    pub description: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub status: Option<String>,
}

impl IncidentPatch {
    pub fn is_empty(&self) -> bool {
        self.description.is_none()
            && self.latitude.is_none()
            && self.longitude.is_none()
            && self.status.is_none()
    }
}
