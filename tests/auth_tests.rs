//! Password login, session cookie and logout

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::util::ServiceExt;

mod common;
use common::{create_identity_with_password, create_test_db, send, test_app};

/// POST /auth/login and return (status, body, session cookie pair)
async fn login(
    app: axum::Router,
    username: &str,
    password: &str,
) -> (StatusCode, Value, Option<String>) {
    let request = Request::builder()
        .uri("/auth/login")
        .method("POST")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({ "username": username, "password": password }).to_string(),
        ))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(String::from);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body, cookie)
}

#[tokio::test]
async fn test_login_returns_token_and_cookie() {
    let db = create_test_db().await;
    create_identity_with_password(&db, "alice", "password123").await;

    let (status, body, cookie) = login(test_app(&db), "alice", "password123").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["token_type"], "bearer");
    assert_eq!(body["identity"]["username"], "alice");
    let token = body["access_token"].as_str().unwrap().to_string();

    let cookie = cookie.expect("login sets the session cookie");
    assert_eq!(cookie, format!("elder_session={}", token));

    // The bearer token works
    let (status, me) = send(test_app(&db), Method::GET, "/api/auth/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["username"], "alice");
    assert!(me["last_login_at"].is_string());

    // So does the cookie alone
    let response = test_app(&db)
        .oneshot(
            Request::builder()
                .uri("/api/auth/me")
                .header(header::COOKIE, cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_login_by_email() {
    let db = create_test_db().await;
    create_identity_with_password(&db, "bob", "password123").await;

    let (status, body, _) = login(test_app(&db), "bob@example.com", "password123").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["identity"]["username"], "bob");
}

#[tokio::test]
async fn test_wrong_password_is_rejected_and_audited() {
    use elder::models::audit_log;
    use elder::models::prelude::AuditLog;
    use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};

    let db = create_test_db().await;
    create_identity_with_password(&db, "carol", "password123").await;

    let (status, body, cookie) = login(test_app(&db), "carol", "wrong-password").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["detail"], "Invalid credentials");
    assert!(cookie.is_none());

    let failures = AuditLog::find()
        .filter(audit_log::Column::Action.eq("login_failed"))
        .all(&db)
        .await
        .unwrap();
    assert_eq!(failures.len(), 1);
    assert!(!failures[0].success);
}

#[tokio::test]
async fn test_unknown_user_gets_same_error() {
    let db = create_test_db().await;

    let (status, body, _) = login(test_app(&db), "nobody", "password123").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["detail"], "Invalid credentials");
}

#[tokio::test]
async fn test_logout_clears_cookie() {
    let db = create_test_db().await;

    let response = test_app(&db)
        .oneshot(
            Request::builder()
                .uri("/auth/logout")
                .method("POST")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap();
    assert!(cookie.starts_with("elder_session=;"));
    assert!(cookie.contains("Max-Age=0"));
}
