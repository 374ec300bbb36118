use axum::{routing::delete, routing::get, routing::post, routing::put, Router};

use crate::http::handlers;
use crate::AppState;

pub fn health() -> Router<AppState> {
    Router::new().route("/health", get(handlers::health))
}

pub fn auth() -> Router<AppState> {
    Router::new()
        .route("/login", post(handlers::login))
        .route("/register", post(handlers::register))
        .route("/logout", post(handlers::logout))
}

pub fn incidents() -> Router<AppState> {
    Router::new()
        .route("/incidents", post(handlers::create_incident))
        .route("/incidents", get(handlers::list_incidents))
        .route("/incidents/:id", get(handlers::get_incident))
        .route("/incidents/:id", put(handlers::update_incident))
        .route("/incidents/:id", delete(handlers::delete_incident))
        .route("/incidents/:id/comments", post(handlers::add_comment))
        .route("/incidents/:id/reactions", post(handlers::add_reaction))
        .route("/incidents/:id/reviews", post(handlers::add_review))
}

pub fn notifications() -> Router<AppState> {
    Router::new()
        .route("/notifications", get(handlers::list_notifications))
        .route(
            "/notifications/:id",
            put(handlers::mark_notification_read),
        )
}

pub fn users() -> Router<AppState> {
    Router::new()
        .route("/users", get(handlers::list_users))
        .route("/users/:id", put(handlers::set_user_admin))
        .route("/users/:id", delete(handlers::delete_user))
}
