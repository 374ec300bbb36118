mod common;

use axum::http::{Method, StatusCode};
use serde_json::json;
use uuid::Uuid;

fn unique(prefix: &str) -> String {
    format!("{}_{}", prefix, Uuid::new_v4().simple())
}

#[tokio::test]
async fn register_and_login_flow() {
    let app = common::app().await;
    let suffix = unique("reg");
    let email = format!("{}@example.com", suffix);

    let resp = app
        .post_json(
            "/register",
            json!({
                "username": suffix,
                "email": email,
                "password": "secret123",
            }),
            None,
        )
        .await;
    assert_eq!(resp.status, StatusCode::CREATED);
    assert_eq!(resp.json()["message"], "Registration successful");

    let resp = app
        .post_json(
            "/login",
            json!({ "email": email, "password": "secret123" }),
            None,
        )
        .await;
    assert_eq!(resp.status, StatusCode::OK);

    let body = resp.json();
    assert_eq!(body["user"]["email"], email.as_str());
    assert_eq!(body["user"]["is_admin"], false);
    assert!(body["user"]["password_hash"].is_null());

    let cookie = resp.set_cookie.expect("login must set a session cookie");
    assert!(cookie.starts_with("session="));
    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains("SameSite=Lax"));
    assert!(cookie.contains("Max-Age=86400"));
}

#[tokio::test]
async fn register_rejects_invalid_input() {
    let app = common::app().await;

    let resp = app
        .post_json(
            "/register",
            json!({ "username": "", "email": "a@b.com", "password": "secret123" }),
            None,
        )
        .await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);

    let resp = app
        .post_json(
            "/register",
            json!({ "username": "someone", "email": "not-an-email", "password": "secret123" }),
            None,
        )
        .await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);

    let resp = app
        .post_json(
            "/register",
            json!({ "username": "someone", "email": "a@b.com", "password": "short" }),
            None,
        )
        .await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn register_duplicate_email_conflicts() {
    let app = common::app().await;
    let suffix = unique("dup");
    let email = format!("{}@example.com", suffix);

    let payload = json!({
        "username": suffix,
        "email": email,
        "password": "secret123",
    });

    let resp = app.post_json("/register", payload.clone(), None).await;
    assert_eq!(resp.status, StatusCode::CREATED);

    let resp = app.post_json("/register", payload, None).await;
    assert_eq!(resp.status, StatusCode::CONFLICT);
    assert_eq!(resp.error_message(), "Email already registered");
}

#[tokio::test]
async fn login_fails_uniformly_on_bad_credentials() {
    let app = common::app().await;
    let user = app.create_user(&unique("badcred")).await;

    let unknown = app
        .post_json(
            "/login",
            json!({ "email": "nobody@example.com", "password": "whatever1" }),
            None,
        )
        .await;
    let wrong = app
        .post_json(
            "/login",
            json!({ "email": user.email, "password": "wrongpassword" }),
            None,
        )
        .await;

    assert_eq!(unknown.status, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong.status, StatusCode::UNAUTHORIZED);
    assert_eq!(unknown.error_message(), wrong.error_message());
}

#[tokio::test]
async fn logout_clears_session_cookie() {
    let app = common::app().await;
    let user = app.create_user(&unique("logout")).await;

    let resp = app
        .request(
            Method::POST,
            "/logout",
            None,
            &[("cookie", &format!("session={}", user.session_token))],
        )
        .await;
    assert_eq!(resp.status, StatusCode::OK);

    let cookie = resp.set_cookie.expect("logout must clear the cookie");
    assert!(cookie.starts_with("session=;"));
    assert!(cookie.contains("Max-Age=0"));
}

#[tokio::test]
async fn protected_routes_require_a_session() {
    let app = common::app().await;

    let resp = app.get("/incidents", None).await;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);

    let resp = app.get("/incidents", Some("not-a-valid-token")).await;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn admin_bootstrap_is_idempotent() {
    let app = common::app().await;
    let email = format!("{}@example.com", unique("bootstrap"));

    let service = ajali::app::identity::IdentityService::new(
        app.state.db.clone(),
        app.state.session_key,
        app.state.session_ttl_hours,
    );
    service.ensure_admin(&email, "bootpass1").await.unwrap();
    service.ensure_admin(&email, "changed-later").await.unwrap();

    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE email = $1 AND is_admin = TRUE")
            .bind(&email)
            .fetch_one(app.state.db.pool())
            .await
            .unwrap();
    assert_eq!(count, 1);

    // The rerun did not overwrite the original credentials
    let resp = app
        .post_json(
            "/login",
            json!({ "email": email, "password": "bootpass1" }),
            None,
        )
        .await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.json()["user"]["is_admin"], true);
}

#[tokio::test]
async fn session_of_deleted_user_is_rejected() {
    let app = common::app().await;
    let user = app.create_user(&unique("ghost")).await;

    sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(user.id)
        .execute(app.state.db.pool())
        .await
        .unwrap();

    let resp = app.get("/incidents", Some(&user.session_token)).await;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
}
