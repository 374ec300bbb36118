mod common;

use axum::http::StatusCode;
use serde_json::Value;
use uuid::Uuid;

fn unique(prefix: &str) -> String {
    format!("{}_{}", prefix, Uuid::new_v4().simple())
}

fn find_by_message<'a>(list: &'a Value, message: &str) -> Option<&'a Value> {
    list.as_array()
        .unwrap()
        .iter()
        .find(|item| item["message"] == message)
}

#[tokio::test]
async fn new_incident_notifies_every_admin() {
    let app = common::app().await;
    let reporter = app.create_user(&unique("noisy")).await;
    let admin_a = app.create_admin(&unique("admin_a")).await;
    let admin_b = app.create_admin(&unique("admin_b")).await;

    app.create_incident(&reporter.session_token, "Manhole cover missing")
        .await;

    let expected = format!(
        "New incident reported by {} requires review",
        reporter.username
    );

    for admin in [&admin_a, &admin_b] {
        let resp = app.get("/notifications", Some(&admin.session_token)).await;
        assert_eq!(resp.status, StatusCode::OK);

        let list = resp.json();
        let notification =
            find_by_message(&list, &expected).expect("admin did not receive the notification");
        assert_eq!(notification["type"], "warning");
        assert_eq!(notification["read"], false);
        assert_eq!(notification["user_id"], admin.id.to_string());
    }

    // The reporter is not an admin and gets nothing
    let resp = app
        .get("/notifications", Some(&reporter.session_token))
        .await;
    assert!(find_by_message(&resp.json(), &expected).is_none());
}

#[tokio::test]
async fn recipient_can_mark_notification_read() {
    let app = common::app().await;
    let reporter = app.create_user(&unique("mark")).await;
    let admin = app.create_admin(&unique("mark_admin")).await;

    app.create_incident(&reporter.session_token, "Streetlight sparking")
        .await;

    let expected = format!(
        "New incident reported by {} requires review",
        reporter.username
    );
    let resp = app.get("/notifications", Some(&admin.session_token)).await;
    let list = resp.json();
    let notification = find_by_message(&list, &expected).expect("notification missing");
    let id = notification["id"].as_str().unwrap().to_string();

    let resp = app
        .put_json(
            &format!("/notifications/{}", id),
            serde_json::json!({}),
            Some(&admin.session_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.json()["read"], true);

    // Marking again is a no-op, not an error
    let resp = app
        .put_json(
            &format!("/notifications/{}", id),
            serde_json::json!({}),
            Some(&admin.session_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.json()["read"], true);
}

#[tokio::test]
async fn only_the_recipient_may_mark_read() {
    let app = common::app().await;
    let reporter = app.create_user(&unique("sneak")).await;
    let admin = app.create_admin(&unique("sneak_admin")).await;
    let other_admin = app.create_admin(&unique("sneak_other")).await;

    app.create_incident(&reporter.session_token, "Blocked fire exit")
        .await;

    let expected = format!(
        "New incident reported by {} requires review",
        reporter.username
    );
    let resp = app.get("/notifications", Some(&admin.session_token)).await;
    let list = resp.json();
    let id = find_by_message(&list, &expected).expect("notification missing")["id"]
        .as_str()
        .unwrap()
        .to_string();

    // Even another admin may not touch a notification addressed to someone else
    let resp = app
        .put_json(
            &format!("/notifications/{}", id),
            serde_json::json!({}),
            Some(&other_admin.session_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::FORBIDDEN);

    let resp = app
        .put_json(
            &format!("/notifications/{}", id),
            serde_json::json!({}),
            Some(&reporter.session_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn unknown_notification_is_404() {
    let app = common::app().await;
    let user = app.create_user(&unique("nothing")).await;

    let resp = app
        .put_json(
            &format!("/notifications/{}", Uuid::new_v4()),
            serde_json::json!({}),
            Some(&user.session_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);
}
