use axum::extract::FromRequestParts;
use axum::http::header;
use axum::http::request::Parts;

use crate::app::identity::IdentityService;
use crate::domain::user::Caller;
use crate::http::AppError;
use crate::AppState;

pub const SESSION_COOKIE: &str = "session";

/// The resolved caller identity for a request. Extracted from the session
/// cookie; the admin flag is loaded fresh from the store so a revoked admin
/// or deleted user is denied immediately.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: uuid::Uuid,
    pub is_admin: bool,
}

impl AuthUser {
    pub fn caller(&self) -> Caller {
        Caller {
            user_id: self.user_id,
            is_admin: self.is_admin,
        }
    }
}

fn session_token(parts: &Parts) -> Option<&str> {
    let cookies = parts.headers.get(header::COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == SESSION_COOKIE).then_some(value)
    })
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = session_token(parts)
            .ok_or_else(|| AppError::unauthorized("Authentication required"))?
            .to_string();

        let service = IdentityService::new(
            state.db.clone(),
            state.session_key,
            state.session_ttl_hours,
        );
        let user_id = service
            .authenticate_session_token(&token)
            .map_err(|_| AppError::internal("failed to authenticate"))?
            .ok_or_else(|| AppError::unauthorized("Authentication required"))?;

        let caller = service
            .caller(user_id)
            .await
            .map_err(|err| {
                tracing::error!(error = ?err, "failed to resolve caller");
                AppError::internal("failed to authenticate")
            })?
            .ok_or_else(|| AppError::unauthorized("Authentication required"))?;

        Ok(AuthUser {
            user_id: caller.user_id,
            is_admin: caller.is_admin,
        })
    }
}
