//! Public endpoints, authentication enforcement and response headers

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
};
use http_body_util::BodyExt;
use tower::util::ServiceExt;

mod common;
use common::{create_identity, create_test_db, send, test_app, token_for};

#[tokio::test]
async fn test_health_is_public() {
    let db = create_test_db().await;

    let response = test_app(&db)
        .oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"OK");
}

#[tokio::test]
async fn test_version_and_openapi_are_public() {
    let db = create_test_db().await;

    let (status, version) = send(test_app(&db), Method::GET, "/api/system/version", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(version["version"], env!("CARGO_PKG_VERSION"));

    let (status, doc) = send(test_app(&db), Method::GET, "/api/openapi.json", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(doc["info"]["title"], "Elder");
    assert!(doc["components"]["schemas"]["EntityResponse"].is_object());
}

#[tokio::test]
async fn test_protected_routes_require_auth() {
    let db = create_test_db().await;

    for uri in [
        "/api/organizations",
        "/api/entities",
        "/api/dependencies",
        "/api/identities",
        "/api/groups",
        "/api/access-requests",
        "/api/roles",
        "/api/rbac/me",
        "/api/issues",
        "/api/audit",
        "/api/auth/me",
    ] {
        let (status, body) = send(test_app(&db), Method::GET, uri, None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{uri} must require auth");
        assert!(body["detail"].is_string());
    }
}

#[tokio::test]
async fn test_garbage_token_is_rejected() {
    let db = create_test_db().await;

    let (status, _) = send(
        test_app(&db),
        Method::GET,
        "/api/organizations",
        Some("not-a-jwt"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_security_headers_on_every_response() {
    let db = create_test_db().await;
    let admin = create_identity(&db, "admin", true).await;

    let public = test_app(&db)
        .oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let rejected = test_app(&db)
        .oneshot(Request::builder().uri("/api/roles").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let authed = test_app(&db)
        .oneshot(
            Request::builder()
                .uri("/api/roles")
                .header(header::AUTHORIZATION, format!("Bearer {}", token_for(&admin)))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    for response in [public, rejected, authed] {
        let headers = response.headers();
        assert_eq!(headers.get("x-frame-options").unwrap(), "DENY");
        assert_eq!(headers.get("x-content-type-options").unwrap(), "nosniff");
        assert!(headers.get("content-security-policy").is_some());
        assert!(headers.get(header::CACHE_CONTROL).is_some());
    }
}

#[tokio::test]
async fn test_inactive_identity_token_is_rejected() {
    use sea_orm::{ActiveModelTrait, Set};

    let db = create_test_db().await;
    let admin = create_identity(&db, "admin", true).await;
    let token = token_for(&admin);

    let mut active: elder::models::identity::ActiveModel = admin.into();
    active.is_active = Set(false);
    active.update(&db).await.unwrap();

    let (status, _) = send(test_app(&db), Method::GET, "/api/auth/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
