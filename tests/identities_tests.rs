//! Identity administration and self-service password changes

use axum::http::StatusCode;
use serde_json::json;

mod common;
use common::{
    create_identity, create_identity_with_password, create_test_db, delete, get, grant_role,
    patch, post, test_app, token_for,
};

#[tokio::test]
async fn test_create_and_search_identities() {
    let db = create_test_db().await;
    let admin = create_identity(&db, "admin", true).await;
    let token = token_for(&admin);

    let (status, created) = post(
        test_app(&db),
        "/api/identities",
        &token,
        json!({
            "username": "deploy-bot",
            "identity_type": "service_account",
            "full_name": "Deployment pipeline",
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["identity_type"], "service_account");
    assert_eq!(created["auth_provider"], "local");
    assert!(created.get("hashed_password").is_none());

    let (status, _) = post(
        test_app(&db),
        "/api/identities",
        &token,
        json!({ "username": "deploy-bot" }),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = post(
        test_app(&db),
        "/api/identities",
        &token,
        json!({ "username": "shorty", "password": "short" }),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (_, found) = get(test_app(&db), "/api/identities?search=pipeline", &token).await;
    assert_eq!(found["total"], 1);
    assert_eq!(found["items"][0]["username"], "deploy-bot");
}

#[tokio::test]
async fn test_only_superusers_grant_superuser() {
    let db = create_test_db().await;
    let manager = create_identity(&db, "manager", false).await;
    grant_role(&db, manager.id, "admin", None).await;
    let token = token_for(&manager);

    let (status, _) = post(
        test_app(&db),
        "/api/identities",
        &token,
        json!({ "username": "root2", "is_superuser": true }),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, plain) = post(
        test_app(&db),
        "/api/identities",
        &token,
        json!({ "username": "plain" }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = patch(
        test_app(&db),
        &format!("/api/identities/{}", plain["id"]),
        &token,
        json!({ "is_superuser": true }),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_delete_deactivates() {
    let db = create_test_db().await;
    let admin = create_identity(&db, "admin", true).await;
    let target = create_identity(&db, "leaver", false).await;
    let token = token_for(&admin);

    let (status, _) = delete(
        test_app(&db),
        &format!("/api/identities/{}", admin.id),
        &token,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = delete(
        test_app(&db),
        &format!("/api/identities/{}", target.id),
        &token,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, kept) = get(
        test_app(&db),
        &format!("/api/identities/{}", target.id),
        &token,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(kept["is_active"], false);

    // Its token no longer authenticates
    let (status, _) = get(test_app(&db), "/api/auth/me", &token_for(&target)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_change_own_password() {
    let db = create_test_db().await;
    let user = create_identity_with_password(&db, "dana", "old-password").await;
    let token = token_for(&user);

    let (status, _) = post(
        test_app(&db),
        "/api/identities/me/password",
        &token,
        json!({ "current_password": "wrong-password", "new_password": "new-password" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = post(
        test_app(&db),
        "/api/identities/me/password",
        &token,
        json!({ "current_password": "old-password", "new_password": "new-password" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = common::send(
        test_app(&db),
        axum::http::Method::POST,
        "/auth/login",
        None,
        Some(json!({ "username": "dana", "password": "new-password" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}
