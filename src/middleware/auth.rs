//! Authentication middleware for API routes
//!
//! A caller is identified, in order, by a Bearer token, the session cookie,
//! or (when enabled) the trusted SSO proxy headers.

use axum::{
    extract::{Request, State},
    http::{
        header::{AUTHORIZATION, COOKIE},
        HeaderMap, StatusCode,
    },
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};

use crate::config::auth::AuthConfig;
use crate::config::CONFIG;
use crate::db::DbConn;
use crate::error::{AppError, Result};
use crate::models::audit_log::{AuditAction, ResourceType};
use crate::models::identity::{self, AuthProvider, IdentityType};
use crate::models::prelude::*;
use crate::models::user_role::RoleScope;
use crate::services::audit::{AuditEvent, AuditService};
use crate::services::rbac::{self, PermissionSet};
use crate::services::security::{decode_token, SESSION_COOKIE};
use crate::state::AppState;

pub const SSO_EMAIL_HEADER: &str = "x-auth-request-email";
pub const SSO_USER_HEADER: &str = "x-auth-request-user";

/// Authenticated identity stored in request extensions
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub identity: identity::Model,
    pub permissions: PermissionSet,
    pub ip_address: Option<String>,
}

/// Auth middleware for the protected router
///
/// Returns 401 Unauthorized if no credential identifies an active identity.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let ip_address = client_ip(req.headers());

    let identity = match authenticate(&state, req.headers(), &CONFIG.auth).await {
        Ok(identity) => identity,
        Err(AppError::Unauthorized(msg)) => return unauthorized_response(&msg),
        Err(e) => return e.into_response(),
    };

    let permissions = match rbac::load_permission_set(&state.db, &identity).await {
        Ok(p) => p,
        Err(e) => return e.into_response(),
    };

    req.extensions_mut().insert(AuthenticatedUser {
        identity,
        permissions,
        ip_address,
    });

    next.run(req).await
}

/// Resolve the caller from the request headers
pub async fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
    config: &AuthConfig,
) -> Result<identity::Model> {
    if let Some(token) = extract_token(headers) {
        return identity_from_token(&state.db, &token).await;
    }

    if config.sso_header_enabled {
        if let Some(identity) = sso_identity(&state.db, &state.audit, headers, config).await? {
            return Ok(identity);
        }
    }

    Err(AppError::Unauthorized(
        "Missing or invalid Authorization header".to_string(),
    ))
}

/// Token of an `Authorization: Bearer` header
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Bearer token, falling back to the session cookie
pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    if let Some(bearer) = bearer_token(headers) {
        return Some(bearer);
    }

    headers
        .get(COOKIE)
        .and_then(|c| c.to_str().ok())
        .and_then(|cookies| {
            cookies.split(';').find_map(|cookie| {
                cookie
                    .trim()
                    .strip_prefix(SESSION_COOKIE)
                    .and_then(|rest| rest.strip_prefix('='))
                    .filter(|v| !v.is_empty())
                    .map(String::from)
            })
        })
}

/// First address of X-Forwarded-For, or X-Real-IP
pub fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.split(',').next())
        .or_else(|| headers.get("x-real-ip").and_then(|h| h.to_str().ok()))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

async fn identity_from_token(db: &DbConn, token: &str) -> Result<identity::Model> {
    let claims =
        decode_token(token).map_err(|_| AppError::Unauthorized("Invalid or expired token".to_string()))?;

    let identity_id: i64 = claims
        .sub
        .parse()
        .map_err(|_| AppError::Unauthorized("Invalid token subject".to_string()))?;

    Identity::find_by_id(identity_id)
        .filter(identity::Column::IsActive.eq(true))
        .one(db)
        .await?
        .ok_or_else(|| AppError::Unauthorized("Identity not found or inactive".to_string()))
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|h| h.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Identity named by the trusted proxy headers
///
/// Returns `Ok(None)` when the headers are absent. An unknown caller is
/// created only with JIT provisioning enabled.
pub async fn sso_identity(
    db: &DbConn,
    audit: &AuditService,
    headers: &HeaderMap,
    config: &AuthConfig,
) -> Result<Option<identity::Model>> {
    let email = header_value(headers, SSO_EMAIL_HEADER);
    let user = header_value(headers, SSO_USER_HEADER);
    if email.is_none() && user.is_none() {
        return Ok(None);
    }

    let mut condition = sea_orm::Condition::any();
    if let Some(email) = &email {
        condition = condition.add(identity::Column::Email.eq(email.as_str()));
    }
    if let Some(user) = &user {
        condition = condition.add(identity::Column::Username.eq(user.as_str()));
    }

    if let Some(existing) = Identity::find().filter(condition).one(db).await? {
        if !existing.is_active {
            tracing::warn!(username = %existing.username, "SSO login for inactive identity");
            return Err(AppError::Unauthorized("Identity is inactive".to_string()));
        }
        return Ok(Some(existing));
    }

    if !config.sso_jit_provisioning {
        tracing::debug!("Unknown SSO caller and JIT provisioning disabled");
        return Err(AppError::Unauthorized("Unknown SSO identity".to_string()));
    }

    let base = user
        .clone()
        .or_else(|| email.as_deref().and_then(|e| e.split('@').next()).map(String::from))
        .unwrap_or_else(|| "user".to_string());
    let username = unique_username(db, &base).await?;

    let now = Utc::now();
    let created = identity::ActiveModel {
        identity_type: Set(IdentityType::Human),
        username: Set(username),
        email: Set(email),
        full_name: Set(None),
        hashed_password: Set(None),
        auth_provider: Set(AuthProvider::Sso),
        external_id: Set(None),
        is_active: Set(true),
        is_superuser: Set(false),
        last_login_at: Set(Some(now)),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await?;

    match rbac::find_role_by_name(db, &config.sso_default_role).await? {
        Some(role) => {
            rbac::assign_role(db, created.id, role.id, RoleScope::Global, None).await?;
        }
        None => tracing::warn!(
            role = %config.sso_default_role,
            "Default SSO role does not exist; provisioned identity has no role"
        ),
    }

    tracing::info!(username = %created.username, "Provisioned identity from SSO headers");
    let _ = audit
        .log_success(
            AuditEvent::new(AuditAction::SsoProvisioned, ResourceType::Identity)
                .resource(created.id)
                .actor(&created)
                .details(serde_json::json!({ "default_role": config.sso_default_role })),
        )
        .await;

    Ok(Some(created))
}

async fn unique_username(db: &DbConn, base: &str) -> Result<String> {
    let base: String = base
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();
    let base = if base.is_empty() { "user".to_string() } else { base };

    let mut candidate = base.clone();
    let mut counter = 1;
    while Identity::find()
        .filter(identity::Column::Username.eq(&candidate))
        .one(db)
        .await?
        .is_some()
    {
        candidate = format!("{}_{}", base, counter);
        counter += 1;
    }
    Ok(candidate)
}

/// Create a 401 Unauthorized JSON response
fn unauthorized_response(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({
            "detail": message
        })),
    )
        .into_response()
}
