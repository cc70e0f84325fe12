//! Shared fixtures for the HTTP integration tests.
//!
//! Every test gets its own in-memory SQLite database migrated with the real
//! `Migrator`, so the seeded permissions and the `admin`/`editor`/`viewer`
//! roles exist. Requests authenticate with a bearer token minted directly
//! for the fixture identity.

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::Utc;
use http_body_util::BodyExt;
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
use sea_orm_migration::MigratorTrait;
use serde_json::Value;
use tower::util::ServiceExt;

use elder::bootstrapper::create_app;
use elder::migrations::Migrator;
use elder::models::identity::{self, AuthProvider, IdentityType};
use elder::models::user_role::RoleScope;
use elder::models::{entity, organization};
use elder::services::{rbac, security};
use elder::state::AppState;

/// Create an in-memory SQLite database for testing
pub async fn create_test_db() -> DatabaseConnection {
    let db = sea_orm::Database::connect("sqlite::memory:")
        .await
        .expect("Failed to create test database");

    Migrator::up(&db, None)
        .await
        .expect("Failed to run test migrations");

    db
}

/// Full application (router plus middleware stack) over `db`
pub fn test_app(db: &DatabaseConnection) -> Router {
    create_app(AppState::new(db.clone()))
}

/// Identity without a password; authenticate it with [`token_for`]
pub async fn create_identity(
    db: &DatabaseConnection,
    username: &str,
    is_superuser: bool,
) -> identity::Model {
    insert_identity(db, username, None, is_superuser).await
}

/// Identity that can log in with `password`
pub async fn create_identity_with_password(
    db: &DatabaseConnection,
    username: &str,
    password: &str,
) -> identity::Model {
    let hashed = security::hash_password(password).unwrap();
    insert_identity(db, username, Some(hashed), false).await
}

async fn insert_identity(
    db: &DatabaseConnection,
    username: &str,
    hashed_password: Option<String>,
    is_superuser: bool,
) -> identity::Model {
    let now = Utc::now();
    identity::ActiveModel {
        identity_type: Set(IdentityType::Human),
        username: Set(username.to_string()),
        email: Set(Some(format!("{}@example.com", username))),
        full_name: Set(None),
        hashed_password: Set(hashed_password),
        auth_provider: Set(AuthProvider::Local),
        external_id: Set(None),
        is_active: Set(true),
        is_superuser: Set(is_superuser),
        last_login_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("Failed to create identity")
}

/// Assign a seeded role globally (`None`) or on one organization
pub async fn grant_role(
    db: &DatabaseConnection,
    identity_id: i64,
    role_name: &str,
    organization_id: Option<i64>,
) {
    let role = rbac::find_role_by_name(db, role_name)
        .await
        .unwrap()
        .expect("Seeded role missing");
    let scope = if organization_id.is_some() {
        RoleScope::Organization
    } else {
        RoleScope::Global
    };
    rbac::assign_role(db, identity_id, role.id, scope, organization_id)
        .await
        .expect("Failed to assign role");
}

pub async fn create_organization(
    db: &DatabaseConnection,
    name: &str,
    parent_id: Option<i64>,
) -> organization::Model {
    let now = Utc::now();
    organization::ActiveModel {
        name: Set(name.to_string()),
        description: Set(None),
        parent_id: Set(parent_id),
        owner_identity_id: Set(None),
        data_retention_days: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("Failed to create organization")
}

pub async fn create_entity(
    db: &DatabaseConnection,
    name: &str,
    organization_id: i64,
) -> entity::Model {
    let now = Utc::now();
    entity::ActiveModel {
        unique_id: Set(security::generate_unique_id()),
        name: Set(name.to_string()),
        description: Set(None),
        entity_type: Set(elder::models::entity::EntityType::Compute),
        organization_id: Set(organization_id),
        metadata: Set(serde_json::json!({})),
        owner_identity_id: Set(None),
        is_active: Set(true),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("Failed to create entity")
}

/// Bearer token for `identity`
pub fn token_for(identity: &identity::Model) -> String {
    security::create_access_token(identity.id, &identity.username).unwrap()
}

// ============================================================================
// Request helpers
// ============================================================================

/// Send a request and return (status, parsed JSON body or `Value::Null`)
pub async fn send(
    app: Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().uri(uri).method(method);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

pub async fn get(app: Router, uri: &str, token: &str) -> (StatusCode, Value) {
    send(app, Method::GET, uri, Some(token), None).await
}

pub async fn post(app: Router, uri: &str, token: &str, body: Value) -> (StatusCode, Value) {
    send(app, Method::POST, uri, Some(token), Some(body)).await
}

pub async fn patch(app: Router, uri: &str, token: &str, body: Value) -> (StatusCode, Value) {
    send(app, Method::PATCH, uri, Some(token), Some(body)).await
}

pub async fn put(app: Router, uri: &str, token: &str, body: Value) -> (StatusCode, Value) {
    send(app, Method::PUT, uri, Some(token), Some(body)).await
}

pub async fn delete(app: Router, uri: &str, token: &str) -> (StatusCode, Value) {
    send(app, Method::DELETE, uri, Some(token), None).await
}
