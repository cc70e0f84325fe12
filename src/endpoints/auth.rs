use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};

use crate::config::CONFIG;
use crate::error::{AppError, Result};
use crate::middleware::auth::client_ip;
use crate::middleware::{Authenticated, AuthenticatedUser};
use crate::models::audit_log::{AuditAction, ResourceType};
use crate::models::identity;
use crate::models::prelude::*;
use crate::schemas::{IdentityResponse, LoginRequest, LoginResponse};
use crate::services::audit::AuditEvent;
use crate::services::security::{create_access_token, verify_password, SESSION_COOKIE};
use crate::state::AppState;

/// Public session routes mounted at `/auth`
pub fn auth_routes(state: AppState) -> Router {
    Router::new()
        .route("/login", post(login))
        .route("/logout", post(logout))
        .with_state(state)
}

/// Protected routes mounted at `/api/auth`
pub fn session_routes(state: AppState) -> Router {
    Router::new().route("/me", get(me)).with_state(state)
}

// ============================================================================
// Session Cookie Helpers
// ============================================================================

fn session_cookie(token: &str, max_age: i64) -> HeaderValue {
    let cookie = format!(
        "{}={}; HttpOnly; SameSite=Lax; Path=/; Max-Age={}",
        SESSION_COOKIE, token, max_age
    );
    HeaderValue::from_str(&cookie).unwrap_or_else(|_| HeaderValue::from_static(""))
}

fn clear_session_cookie() -> HeaderValue {
    session_cookie("", 0)
}

// ============================================================================
// Endpoint Handlers
// ============================================================================

/// Password login; returns the token and sets the session cookie
async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<LoginRequest>,
) -> Result<Response> {
    let ip = client_ip(&headers);
    let invalid = || AppError::Unauthorized("Invalid credentials".to_string());

    let found = Identity::find()
        .filter(
            identity::Column::Username
                .eq(&request.username)
                .or(identity::Column::Email.eq(&request.username)),
        )
        .one(&state.db)
        .await?;

    let verified = found.filter(|i| {
        i.is_active
            && i.hashed_password
                .as_deref()
                .is_some_and(|hash| verify_password(&request.password, hash))
    });

    let Some(found) = verified else {
        let _ = state
            .audit
            .log_failure(
                AuditEvent::new(AuditAction::LoginFailed, ResourceType::Session)
                    .details(serde_json::json!({ "username": request.username }))
                    .ip(ip),
                "Invalid credentials",
            )
            .await;
        return Err(invalid());
    };

    let mut active: identity::ActiveModel = found.into();
    active.last_login_at = Set(Some(Utc::now()));
    let found = active.update(&state.db).await?;

    let expires_in = CONFIG.auth.access_token_expire_secs;
    let access_token = create_access_token(found.id, &found.username)?;

    let _ = state
        .audit
        .log_success(
            AuditEvent::new(AuditAction::Login, ResourceType::Session)
                .resource(found.id)
                .actor(&found)
                .ip(ip),
        )
        .await;

    let cookie = session_cookie(&access_token, expires_in);
    let body = LoginResponse {
        access_token,
        token_type: "bearer".to_string(),
        expires_in,
        identity: found.into(),
    };

    Ok(([(header::SET_COOKIE, cookie)], Json(body)).into_response())
}

/// Clear the session cookie
async fn logout() -> Response {
    (
        [(header::SET_COOKIE, clear_session_cookie())],
        Json(serde_json::json!({"message": "Logged out"})),
    )
        .into_response()
}

/// The calling identity
async fn me(Authenticated(user): Authenticated) -> Json<IdentityResponse> {
    let AuthenticatedUser { identity, .. } = user;
    Json(identity.into())
}
