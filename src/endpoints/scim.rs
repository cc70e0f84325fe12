//! SCIM 2.0 `/Users` endpoint for identity-provider provisioning
//!
//! Mounted outside the session-protected API: an IdP authenticates with the
//! static bearer token from `ELDER_SCIM_BEARER_TOKEN`.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::config::scim::ScimConfig;
use crate::error::AppError;
use crate::middleware::auth::{bearer_token, client_ip};
use crate::models::audit_log::{AuditAction, ResourceType};
use crate::models::identity;
use crate::services::audit::AuditEvent;
use crate::services::scim::{
    self, ListResponse, PatchRequest, ScimError, ScimUser, ScimUserRequest,
};
use crate::services::security::secrets_match;
use crate::state::AppState;

const SCIM_CONTENT_TYPE: &str = "application/scim+json";

#[derive(Clone)]
struct ScimState {
    app: AppState,
    config: Arc<ScimConfig>,
}

/// Create SCIM routes guarded by the provisioning token in `config`
pub fn scim_routes(state: AppState, config: ScimConfig) -> Router {
    let scim_state = ScimState {
        app: state,
        config: Arc::new(config),
    };

    Router::new()
        .route("/Users", get(list_users).post(create_user))
        .route(
            "/Users/:id",
            get(get_user)
                .put(replace_user)
                .patch(patch_user)
                .delete(delete_user),
        )
        .route_layer(middleware::from_fn_with_state(
            scim_state.clone(),
            require_scim_token,
        ))
        .with_state(scim_state)
}

// ============================================================================
// Responses
// ============================================================================

/// JSON body sent as `application/scim+json`
struct ScimJson<T>(StatusCode, T);

impl<T: Serialize> IntoResponse for ScimJson<T> {
    fn into_response(self) -> Response {
        let mut response = (self.0, Json(self.1)).into_response();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(SCIM_CONTENT_TYPE),
        );
        response
    }
}

/// Any failure, rendered as a SCIM `Error` message
struct ScimFailure(AppError);

impl From<AppError> for ScimFailure {
    fn from(e: AppError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ScimFailure {
    fn into_response(self) -> Response {
        let (status, scim_type, detail) = match self.0 {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, None, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, Some("uniqueness"), msg),
            AppError::BadRequest(msg) | AppError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, Some("invalidValue"), msg)
            }
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, None, msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, None, msg),
            AppError::Json(e) => (StatusCode::BAD_REQUEST, Some("invalidSyntax"), e.to_string()),
            other => {
                tracing::error!(error = %other, "SCIM request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    None,
                    "Internal server error".to_string(),
                )
            }
        };
        ScimJson(status, ScimError::new(status.as_u16(), scim_type, detail)).into_response()
    }
}

type ScimResult<T> = std::result::Result<ScimJson<T>, ScimFailure>;

// ============================================================================
// Authentication
// ============================================================================

async fn require_scim_token(
    State(state): State<ScimState>,
    req: Request,
    next: Next,
) -> Response {
    let expected = match (&state.config.enabled, &state.config.bearer_token) {
        (true, Some(token)) => token,
        _ => {
            return ScimFailure(AppError::NotFound("SCIM is not enabled".to_string()))
                .into_response()
        }
    };

    let authorized = bearer_token(req.headers())
        .is_some_and(|provided| secrets_match(&provided, expected));
    if !authorized {
        tracing::warn!(ip = ?client_ip(req.headers()), "Rejected SCIM request");
        let mut response =
            ScimFailure(AppError::Unauthorized("Invalid SCIM bearer token".to_string()))
                .into_response();
        response.headers_mut().insert(
            header::WWW_AUTHENTICATE,
            HeaderValue::from_static("Bearer realm=\"scim\""),
        );
        return response;
    }

    next.run(req).await
}

async fn audit(
    state: &ScimState,
    action: AuditAction,
    user: &identity::Model,
    headers: &HeaderMap,
) {
    let _ = state
        .app
        .audit
        .log_success(
            AuditEvent::new(action, ResourceType::Identity)
                .resource(user.id)
                .ip(client_ip(headers))
                .details(serde_json::json!({
                    "user_name": user.username,
                    "external_id": user.external_id,
                    "active": user.is_active,
                    "source": "scim",
                })),
        )
        .await;
}

// ============================================================================
// Endpoint Handlers
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListQuery {
    filter: Option<String>,
    start_index: Option<u64>,
    count: Option<u64>,
}

async fn list_users(
    State(state): State<ScimState>,
    Query(query): Query<ListQuery>,
) -> ScimResult<ListResponse> {
    let list = scim::list_users(
        &state.app.db,
        query.filter.as_deref(),
        query.start_index,
        query.count,
    )
    .await?;
    Ok(ScimJson(StatusCode::OK, list))
}

async fn get_user(
    State(state): State<ScimState>,
    Path(id): Path<String>,
) -> ScimResult<ScimUser> {
    let user = scim::find_user(&state.app.db, &id).await?;
    Ok(ScimJson(StatusCode::OK, scim::to_scim_user(&user)))
}

async fn create_user(
    State(state): State<ScimState>,
    headers: HeaderMap,
    Json(request): Json<ScimUserRequest>,
) -> ScimResult<ScimUser> {
    let user = scim::create_user(&state.app.db, request).await?;
    tracing::info!(user_name = %user.username, "SCIM user provisioned");
    audit(&state, AuditAction::ScimUserCreated, &user, &headers).await;
    Ok(ScimJson(StatusCode::CREATED, scim::to_scim_user(&user)))
}

async fn replace_user(
    State(state): State<ScimState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<ScimUserRequest>,
) -> ScimResult<ScimUser> {
    let user = scim::replace_user(&state.app.db, &id, request).await?;
    audit(&state, AuditAction::ScimUserUpdated, &user, &headers).await;
    Ok(ScimJson(StatusCode::OK, scim::to_scim_user(&user)))
}

async fn patch_user(
    State(state): State<ScimState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<PatchRequest>,
) -> ScimResult<ScimUser> {
    let user = scim::patch_user(&state.app.db, &id, request).await?;
    let action = if user.is_active {
        AuditAction::ScimUserUpdated
    } else {
        AuditAction::ScimUserDeactivated
    };
    audit(&state, action, &user, &headers).await;
    Ok(ScimJson(StatusCode::OK, scim::to_scim_user(&user)))
}

async fn delete_user(
    State(state): State<ScimState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> std::result::Result<StatusCode, ScimFailure> {
    let user = scim::deactivate_user(&state.app.db, &id).await?;
    tracing::info!(user_name = %user.username, "SCIM user deactivated");
    audit(&state, AuditAction::ScimUserDeactivated, &user, &headers).await;
    Ok(StatusCode::NO_CONTENT)
}
