use axum::{
    extract::{Multipart, Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app::identity::IdentityService;
use crate::app::incidents::IncidentService;
use crate::app::media::{self, MediaKind};
use crate::app::notifications::NotificationService;
use crate::app::policy::{self, Action};
use crate::app::users::UserService;
use crate::domain::incident::{
    Comment, IncidentDetail, IncidentPatch, IncidentStatus, Reaction, ReactionType, Review,
};
use crate::domain::notification::Notification;
use crate::domain::user::User;
use crate::http::auth::SESSION_COOKIE;
use crate::http::{AppError, AuthUser};
use crate::AppState;

#[derive(Serialize)]
pub(crate) struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
pub(crate) struct MessageResponse {
    message: &'static str,
}

fn identity_service(state: &AppState) -> IdentityService {
    IdentityService::new(state.db.clone(), state.session_key, state.session_ttl_hours)
}

fn incident_service(state: &AppState) -> IncidentService {
    IncidentService::new(state.db.clone(), state.storage.clone())
}

fn require(caller: &AuthUser, action: Action) -> Result<(), AppError> {
    if policy::allows(&caller.caller(), action) {
        Ok(())
    } else {
        Err(AppError::forbidden("Unauthorized"))
    }
}

fn session_cookie(token: &str, max_age_seconds: u64) -> String {
    format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        SESSION_COOKIE, token, max_age_seconds
    )
}

fn with_cookie(mut response: Response, cookie: &str) -> Result<Response, AppError> {
    let value = HeaderValue::from_str(cookie)
        .map_err(|_| AppError::internal("failed to build session cookie"))?;
    response.headers_mut().insert(header::SET_COOKIE, value);
    Ok(response)
}

pub(crate) async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = if state.db.ping().await.is_ok() {
        "ok"
    } else {
        "degraded"
    };
    Json(HealthResponse { status })
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub user: User,
}

pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Response, AppError> {
    if payload.email.trim().is_empty() || payload.password.is_empty() {
        return Err(AppError::bad_request("email and password are required"));
    }

    let service = identity_service(&state);
    let user = service
        .login(&payload.email, &payload.password)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, "failed to login");
            AppError::internal("failed to login")
        })?;

    // Unknown email and wrong password fail identically.
    let user = user.ok_or_else(|| AppError::unauthorized("Invalid credentials"))?;

    let (token, _expires_at) = service.issue_session_token(user.id).map_err(|err| {
        tracing::error!(error = ?err, "failed to issue session token");
        AppError::internal("failed to login")
    })?;

    let cookie = session_cookie(&token, state.session_ttl_hours * 60 * 60);
    let response = Json(LoginResponse { user }).into_response();
    with_cookie(response, &cookie)
}

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<MessageResponse>), AppError> {
    if payload.username.trim().is_empty() {
        return Err(AppError::bad_request("username cannot be empty"));
    }
    if payload.email.trim().is_empty() || !payload.email.contains('@') {
        return Err(AppError::bad_request("a valid email is required"));
    }
    if payload.password.len() < 6 {
        return Err(AppError::bad_request(
            "password must be at least 6 characters",
        ));
    }

    let service = identity_service(&state);
    service
        .register(payload.username, payload.email, payload.password)
        .await
        .map_err(|err| {
            if let Some(sqlx_err) = err.downcast_ref::<sqlx::Error>() {
                if let Some(db_err) = sqlx_err.as_database_error() {
                    if db_err.code().as_deref() == Some("23505") {
                        return AppError::conflict("Email already registered");
                    }
                }
            }
            tracing::error!(error = ?err, "failed to register user");
            AppError::internal("failed to register user")
        })?;

    Ok((
        StatusCode::CREATED,
        Json(MessageResponse {
            message: "Registration successful",
        }),
    ))
}

pub async fn logout(_auth: AuthUser) -> Result<Response, AppError> {
    let response = Json(MessageResponse {
        message: "Logged out successfully",
    })
    .into_response();
    with_cookie(response, &session_cookie("", 0))
}

// ---------------------------------------------------------------------------
// Incidents
// ---------------------------------------------------------------------------

struct Upload {
    kind: MediaKind,
    extension: String,
    content_type: String,
    data: Bytes,
}

fn validate_latitude(latitude: f64) -> Result<(), AppError> {
    if !(-90.0..=90.0).contains(&latitude) {
        return Err(AppError::bad_request("latitude must be within -90 and 90"));
    }
    Ok(())
}

fn validate_longitude(longitude: f64) -> Result<(), AppError> {
    if !(-180.0..=180.0).contains(&longitude) {
        return Err(AppError::bad_request(
            "longitude must be within -180 and 180",
        ));
    }
    Ok(())
}

pub async fn create_incident(
    auth: AuthUser,
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<IncidentDetail>), AppError> {
    let mut description: Option<String> = None;
    let mut latitude: Option<f64> = None;
    let mut longitude: Option<f64> = None;
    let mut uploads: Vec<Upload> = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| AppError::bad_request("malformed multipart body"))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "description" => {
                let value = field
                    .text()
                    .await
                    .map_err(|_| AppError::bad_request("invalid description field"))?;
                description = Some(value);
            }
            "latitude" => {
                let value = field
                    .text()
                    .await
                    .map_err(|_| AppError::bad_request("invalid latitude field"))?;
                latitude = Some(
                    value
                        .trim()
                        .parse()
                        .map_err(|_| AppError::bad_request("latitude must be a number"))?,
                );
            }
            "longitude" => {
                let value = field
                    .text()
                    .await
                    .map_err(|_| AppError::bad_request("invalid longitude field"))?;
                longitude = Some(
                    value
                        .trim()
                        .parse()
                        .map_err(|_| AppError::bad_request("longitude must be a number"))?,
                );
            }
            "files" => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let content_type = field.content_type().unwrap_or_default().to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|_| AppError::bad_request("failed to read uploaded file"))?;

                // Classify and allow-list before anything is persisted.
                let kind = media::classify(&content_type).ok_or_else(|| {
                    AppError::unsupported_media("only image and video uploads are accepted")
                })?;
                let extension = media::allowed_extension(&filename).ok_or_else(|| {
                    AppError::unsupported_media("file extension is not allowed")
                })?;
                if data.len() > state.upload_max_bytes {
                    return Err(AppError::bad_request("uploaded file is too large"));
                }

                uploads.push(Upload {
                    kind,
                    extension,
                    content_type,
                    data,
                });
            }
            _ => {}
        }
    }

    let description = description
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| AppError::bad_request("description cannot be empty"))?;
    let latitude = latitude.ok_or_else(|| AppError::bad_request("latitude is required"))?;
    let longitude = longitude.ok_or_else(|| AppError::bad_request("longitude is required"))?;
    validate_latitude(latitude)?;
    validate_longitude(longitude)?;

    let service = incident_service(&state);
    let report = service
        .create(auth.user_id, description, latitude, longitude)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, "failed to create incident");
            AppError::internal("failed to create incident")
        })?;

    // Attachment failures never fail the created report; the file is either
    // cleaned up by the service or logged as an orphan.
    for upload in uploads {
        if let Err(err) = service
            .attach(
                report.id,
                upload.kind,
                &upload.extension,
                &upload.content_type,
                upload.data,
            )
            .await
        {
            tracing::error!(error = ?err, incident_id = %report.id, "failed to attach media");
        }
    }

    let detail = service
        .get_detail(report.id)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, incident_id = %report.id, "failed to fetch incident");
            AppError::internal("failed to fetch incident")
        })?
        .ok_or_else(|| AppError::internal("failed to fetch incident"))?;

    Ok((StatusCode::CREATED, Json(detail)))
}

pub async fn list_incidents(
    _auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<IncidentDetail>>, AppError> {
    let incidents = incident_service(&state).list().await.map_err(|err| {
        tracing::error!(error = ?err, "failed to list incidents");
        AppError::internal("failed to list incidents")
    })?;
    Ok(Json(incidents))
}

pub async fn get_incident(
    _auth: AuthUser,
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<IncidentDetail>, AppError> {
    let detail = incident_service(&state)
        .get_detail(id)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, incident_id = %id, "failed to fetch incident");
            AppError::internal("failed to fetch incident")
        })?;

    match detail {
        Some(detail) => Ok(Json(detail)),
        None => Err(AppError::not_found("incident not found")),
    }
}

pub async fn update_incident(
    auth: AuthUser,
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(mut patch): Json<IncidentPatch>,
) -> Result<Json<IncidentDetail>, AppError> {
    let service = incident_service(&state);
    let owner_id = service
        .owner_of(id)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, incident_id = %id, "failed to fetch incident");
            AppError::internal("failed to fetch incident")
        })?
        .ok_or_else(|| AppError::not_found("incident not found"))?;

    require(&auth, Action::ModifyIncident { owner_id })?;

    // A non-admin's status field is dropped silently before validation, so
    // even an unknown status string is ignored; the rest of the patch still
    // applies.
    if !policy::allows(&auth.caller(), Action::ChangeIncidentStatus) {
        patch.status = None;
    }

    // The whole patch is validated before any field is applied.
    if let Some(description) = &patch.description {
        if description.trim().is_empty() {
            return Err(AppError::bad_request("description cannot be empty"));
        }
    }
    if let Some(latitude) = patch.latitude {
        validate_latitude(latitude)?;
    }
    if let Some(longitude) = patch.longitude {
        validate_longitude(longitude)?;
    }
    let status = match &patch.status {
        Some(value) => Some(
            IncidentStatus::from_db(value)
                .ok_or_else(|| AppError::bad_request("invalid status"))?,
        ),
        None => None,
    };

    if !patch.is_empty() {
        service
            .update(id, patch.description, patch.latitude, patch.longitude, status)
            .await
            .map_err(|err| {
                tracing::error!(error = ?err, incident_id = %id, "failed to update incident");
                AppError::internal("failed to update incident")
            })?
            .ok_or_else(|| AppError::not_found("incident not found"))?;
    }

    let detail = service
        .get_detail(id)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, incident_id = %id, "failed to fetch incident");
            AppError::internal("failed to fetch incident")
        })?
        .ok_or_else(|| AppError::not_found("incident not found"))?;

    Ok(Json(detail))
}

pub async fn delete_incident(
    auth: AuthUser,
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<StatusCode, AppError> {
    let service = incident_service(&state);
    let owner_id = service
        .owner_of(id)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, incident_id = %id, "failed to fetch incident");
            AppError::internal("failed to fetch incident")
        })?
        .ok_or_else(|| AppError::not_found("incident not found"))?;

    require(&auth, Action::ModifyIncident { owner_id })?;

    let deleted = service.delete(id).await.map_err(|err| {
        tracing::error!(error = ?err, incident_id = %id, "failed to delete incident");
        AppError::internal("failed to delete incident")
    })?;

    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found("incident not found"))
    }
}

// ---------------------------------------------------------------------------
// Comments, reactions, reviews
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct AddCommentRequest {
    pub content: String,
}

pub async fn add_comment(
    auth: AuthUser,
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(payload): Json<AddCommentRequest>,
) -> Result<(StatusCode, Json<Comment>), AppError> {
    require(&auth, Action::Contribute)?;
    if payload.content.trim().is_empty() {
        return Err(AppError::bad_request("content cannot be empty"));
    }

    let service = incident_service(&state);
    if !service.exists(id).await.map_err(|err| {
        tracing::error!(error = ?err, incident_id = %id, "failed to fetch incident");
        AppError::internal("failed to fetch incident")
    })? {
        return Err(AppError::not_found("incident not found"));
    }

    let comment = service
        .add_comment(id, auth.user_id, payload.content)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, incident_id = %id, "failed to add comment");
            AppError::internal("failed to add comment")
        })?;

    Ok((StatusCode::CREATED, Json(comment)))
}

#[derive(Deserialize)]
pub struct AddReactionRequest {
    pub reaction_type: String,
}

pub async fn add_reaction(
    auth: AuthUser,
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(payload): Json<AddReactionRequest>,
) -> Result<(StatusCode, Json<Reaction>), AppError> {
    require(&auth, Action::Contribute)?;
    let reaction_type = ReactionType::from_db(&payload.reaction_type)
        .ok_or_else(|| AppError::bad_request("reaction_type must be 'like' or 'share'"))?;

    let service = incident_service(&state);
    if !service.exists(id).await.map_err(|err| {
        tracing::error!(error = ?err, incident_id = %id, "failed to fetch incident");
        AppError::internal("failed to fetch incident")
    })? {
        return Err(AppError::not_found("incident not found"));
    }

    let reaction = service
        .add_reaction(id, auth.user_id, reaction_type)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, incident_id = %id, "failed to add reaction");
            AppError::internal("failed to add reaction")
        })?;

    Ok((StatusCode::CREATED, Json(reaction)))
}

#[derive(Deserialize)]
pub struct AddReviewRequest {
    pub rating: i32,
    pub content: String,
}

pub async fn add_review(
    auth: AuthUser,
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(payload): Json<AddReviewRequest>,
) -> Result<(StatusCode, Json<Review>), AppError> {
    require(&auth, Action::Contribute)?;
    if !(1..=5).contains(&payload.rating) {
        return Err(AppError::bad_request("rating must be between 1 and 5"));
    }
    if payload.content.trim().is_empty() {
        return Err(AppError::bad_request("content cannot be empty"));
    }

    let service = incident_service(&state);
    if !service.exists(id).await.map_err(|err| {
        tracing::error!(error = ?err, incident_id = %id, "failed to fetch incident");
        AppError::internal("failed to fetch incident")
    })? {
        return Err(AppError::not_found("incident not found"));
    }

    let review = service
        .add_review(id, auth.user_id, payload.rating, payload.content)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, incident_id = %id, "failed to add review");
            AppError::internal("failed to add review")
        })?;

    Ok((StatusCode::CREATED, Json(review)))
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

pub async fn list_notifications(
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<Notification>>, AppError> {
    let notifications = NotificationService::new(state.db.clone())
        .list(auth.user_id)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, user_id = %auth.user_id, "failed to list notifications");
            AppError::internal("failed to list notifications")
        })?;
    Ok(Json(notifications))
}

pub async fn mark_notification_read(
    auth: AuthUser,
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<Notification>, AppError> {
    let service = NotificationService::new(state.db.clone());
    let notification = service
        .get(id)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, notification_id = %id, "failed to fetch notification");
            AppError::internal("failed to fetch notification")
        })?
        .ok_or_else(|| AppError::not_found("notification not found"))?;

    require(
        &auth,
        Action::MarkNotificationRead {
            recipient_id: notification.user_id,
        },
    )?;

    let notification = service
        .mark_read(id)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, notification_id = %id, "failed to mark notification read");
            AppError::internal("failed to mark notification read")
        })?
        .ok_or_else(|| AppError::not_found("notification not found"))?;

    Ok(Json(notification))
}

// ---------------------------------------------------------------------------
// Users (admin)
// ---------------------------------------------------------------------------

pub async fn list_users(
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<User>>, AppError> {
    require(&auth, Action::ManageUsers)?;

    let users = UserService::new(state.db.clone(), state.storage.clone())
        .list()
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, "failed to list users");
            AppError::internal("failed to list users")
        })?;
    Ok(Json(users))
}

#[derive(Deserialize)]
pub struct SetAdminRequest {
    pub is_admin: bool,
}

pub async fn set_user_admin(
    auth: AuthUser,
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(payload): Json<SetAdminRequest>,
) -> Result<Json<User>, AppError> {
    require(&auth, Action::ManageUsers)?;

    let user = UserService::new(state.db.clone(), state.storage.clone())
        .set_admin(id, payload.is_admin)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, user_id = %id, "failed to update user");
            AppError::internal("failed to update user")
        })?;

    match user {
        Some(user) => Ok(Json(user)),
        None => Err(AppError::not_found("user not found")),
    }
}

pub async fn delete_user(
    auth: AuthUser,
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<StatusCode, AppError> {
    require(&auth, Action::ManageUsers)?;

    let deleted = UserService::new(state.db.clone(), state.storage.clone())
        .delete(id)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, user_id = %id, "failed to delete user");
            AppError::internal("failed to delete user")
        })?;

    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found("user not found"))
    }
}
