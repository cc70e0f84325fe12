use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use validator::Validate;

use crate::error::{AppError, Result};
use crate::middleware::permissions::{
    allowed_in_org, Authenticated, Authorized, IdentitiesManage, IdentitiesView, Permission,
    RolesManage, RolesView,
};
use crate::middleware::AuthenticatedUser;
use crate::models::audit_log::{AuditAction, ResourceType};
use crate::models::identity::{self, AuthProvider};
use crate::models::prelude::*;
use crate::models::user_role::RoleScope;
use crate::schemas::{
    page_bounds, page_offset, AssignRole, ChangePassword, CreateIdentity, IdentityListQuery, IdentityResponse,
    Paginated, RoleAssignmentResponse, UpdateIdentity,
};
use crate::services::audit::AuditEvent;
use crate::services::{rbac, security};
use crate::state::AppState;

/// Create identity routes
pub fn identities_routes(state: AppState) -> Router {
    Router::new()
        .route("/", get(list_identities).post(create_identity))
        .route("/me/password", post(change_own_password))
        .route(
            "/:id",
            get(get_identity)
                .patch(update_identity)
                .delete(deactivate_identity),
        )
        .route("/:id/roles", get(list_role_assignments).post(assign_role))
        .route("/:id/roles/:assignment_id", delete(unassign_role))
        .with_state(state)
}

async fn find_identity(state: &AppState, id: i64) -> Result<identity::Model> {
    Identity::find_by_id(id)
        .one(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Identity {} not found", id)))
}

async fn ensure_username_free(state: &AppState, username: &str) -> Result<()> {
    let taken = Identity::find()
        .filter(identity::Column::Username.eq(username))
        .count(&state.db)
        .await?;
    if taken > 0 {
        return Err(AppError::Conflict(format!(
            "Username {} already exists",
            username
        )));
    }
    Ok(())
}

fn require_superuser(user: &AuthenticatedUser, what: &str) -> Result<()> {
    if user.identity.is_superuser {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!("Only superusers may {}", what)))
    }
}

/// Global `roles.manage`, or a scoped grant on the assignment's organization
async fn require_role_admin(
    state: &AppState,
    user: &AuthenticatedUser,
    organization_id: Option<i64>,
) -> Result<()> {
    let allowed = match organization_id {
        Some(org_id) => allowed_in_org(&state.db, user, RolesManage::NAME, org_id).await?,
        None => user.permissions.allows(RolesManage::NAME),
    };
    if allowed {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "Permission denied: {} required",
            RolesManage::NAME
        )))
    }
}

// ============================================================================
// Endpoint Handlers
// ============================================================================

async fn list_identities(
    State(state): State<AppState>,
    _auth: Authorized<IdentitiesView>,
    Query(query): Query<IdentityListQuery>,
) -> Result<Json<Paginated<IdentityResponse>>> {
    let (page, per_page) = page_bounds(query.page, query.per_page);

    let mut select = Identity::find();
    if let Some(search) = query.search.as_deref().filter(|s| !s.is_empty()) {
        select = select.filter(
            Condition::any()
                .add(identity::Column::Username.contains(search))
                .add(identity::Column::Email.contains(search))
                .add(identity::Column::FullName.contains(search)),
        );
    }
    if let Some(identity_type) = query.identity_type {
        select = select.filter(identity::Column::IdentityType.eq(identity_type));
    }
    if let Some(is_active) = query.is_active {
        select = select.filter(identity::Column::IsActive.eq(is_active));
    }

    let total = select.clone().count(&state.db).await?;
    let identities = select
        .order_by_asc(identity::Column::Username)
        .offset(page_offset(page, per_page))
        .limit(per_page)
        .all(&state.db)
        .await?;

    Ok(Json(Paginated::new(
        identities.into_iter().map(Into::into).collect(),
        total,
        (page, per_page),
    )))
}

async fn create_identity(
    State(state): State<AppState>,
    Authorized(user, _): Authorized<IdentitiesManage>,
    Json(request): Json<CreateIdentity>,
) -> Result<(StatusCode, Json<IdentityResponse>)> {
    request.validate()?;
    if request.is_superuser {
        require_superuser(&user, "create superusers")?;
    }
    ensure_username_free(&state, &request.username).await?;

    let hashed_password = request
        .password
        .as_deref()
        .map(security::hash_password)
        .transpose()?;

    let now = Utc::now();
    let created = identity::ActiveModel {
        identity_type: Set(request.identity_type),
        username: Set(request.username),
        email: Set(request.email),
        full_name: Set(request.full_name),
        hashed_password: Set(hashed_password),
        auth_provider: Set(AuthProvider::Local),
        external_id: Set(None),
        is_active: Set(true),
        is_superuser: Set(request.is_superuser),
        last_login_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&state.db)
    .await?;

    let _ = state
        .audit
        .log_success(
            AuditEvent::new(AuditAction::IdentityCreated, ResourceType::Identity)
                .resource(created.id)
                .by(&user)
                .details(serde_json::json!({
                    "username": created.username,
                    "identity_type": created.identity_type,
                })),
        )
        .await;

    Ok((StatusCode::CREATED, Json(created.into())))
}

async fn get_identity(
    State(state): State<AppState>,
    _auth: Authorized<IdentitiesView>,
    Path(id): Path<i64>,
) -> Result<Json<IdentityResponse>> {
    Ok(Json(find_identity(&state, id).await?.into()))
}

async fn update_identity(
    State(state): State<AppState>,
    Authorized(user, _): Authorized<IdentitiesManage>,
    Path(id): Path<i64>,
    Json(request): Json<UpdateIdentity>,
) -> Result<Json<IdentityResponse>> {
    request.validate()?;
    let existing = find_identity(&state, id).await?;

    if request.is_superuser.is_some_and(|s| s != existing.is_superuser) {
        require_superuser(&user, "change superuser status")?;
    }
    if request.is_active == Some(false) && id == user.identity.id {
        return Err(AppError::BadRequest(
            "Cannot deactivate your own identity".to_string(),
        ));
    }

    let mut changed = Vec::new();
    let mut active: identity::ActiveModel = existing.into();
    if let Some(email) = request.email {
        active.email = Set(Some(email));
        changed.push("email");
    }
    if let Some(full_name) = request.full_name {
        active.full_name = Set(Some(full_name));
        changed.push("full_name");
    }
    if let Some(password) = request.password.as_deref() {
        active.hashed_password = Set(Some(security::hash_password(password)?));
        changed.push("password");
    }
    if let Some(is_active) = request.is_active {
        active.is_active = Set(is_active);
        changed.push("is_active");
    }
    if let Some(is_superuser) = request.is_superuser {
        active.is_superuser = Set(is_superuser);
        changed.push("is_superuser");
    }
    active.updated_at = Set(Utc::now());
    let updated = active.update(&state.db).await?;

    let _ = state
        .audit
        .log_success(
            AuditEvent::new(AuditAction::IdentityUpdated, ResourceType::Identity)
                .resource(id)
                .by(&user)
                .details(serde_json::json!({ "changed": changed })),
        )
        .await;

    Ok(Json(updated.into()))
}

/// Identities are never removed: audit entries keep referring to them
async fn deactivate_identity(
    State(state): State<AppState>,
    Authorized(user, _): Authorized<IdentitiesManage>,
    Path(id): Path<i64>,
) -> Result<StatusCode> {
    if id == user.identity.id {
        return Err(AppError::BadRequest(
            "Cannot deactivate your own identity".to_string(),
        ));
    }
    let existing = find_identity(&state, id).await?;

    let mut active: identity::ActiveModel = existing.into();
    active.is_active = Set(false);
    active.updated_at = Set(Utc::now());
    active.update(&state.db).await?;

    let _ = state
        .audit
        .log_success(
            AuditEvent::new(AuditAction::IdentityDeactivated, ResourceType::Identity)
                .resource(id)
                .by(&user),
        )
        .await;

    Ok(StatusCode::NO_CONTENT)
}

async fn change_own_password(
    State(state): State<AppState>,
    Authenticated(user): Authenticated,
    Json(request): Json<ChangePassword>,
) -> Result<Json<serde_json::Value>> {
    request.validate()?;

    let current_ok = user
        .identity
        .hashed_password
        .as_deref()
        .is_some_and(|hash| security::verify_password(&request.current_password, hash));
    if !current_ok {
        let _ = state
            .audit
            .log_failure(
                AuditEvent::new(AuditAction::PasswordChanged, ResourceType::Identity)
                    .resource(user.identity.id)
                    .by(&user),
                "Current password is incorrect",
            )
            .await;
        return Err(AppError::BadRequest(
            "Current password is incorrect".to_string(),
        ));
    }

    let mut active: identity::ActiveModel = user.identity.clone().into();
    active.hashed_password = Set(Some(security::hash_password(&request.new_password)?));
    active.updated_at = Set(Utc::now());
    active.update(&state.db).await?;

    let _ = state
        .audit
        .log_success(
            AuditEvent::new(AuditAction::PasswordChanged, ResourceType::Identity)
                .resource(user.identity.id)
                .by(&user),
        )
        .await;

    Ok(Json(serde_json::json!({"message": "Password changed"})))
}

async fn list_role_assignments(
    State(state): State<AppState>,
    _auth: Authorized<RolesView>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<RoleAssignmentResponse>>> {
    find_identity(&state, id).await?;
    let assignments = rbac::list_assignments(&state.db, id).await?;
    Ok(Json(
        assignments
            .into_iter()
            .map(|(assignment, role)| RoleAssignmentResponse::new(assignment, &role))
            .collect(),
    ))
}

async fn assign_role(
    State(state): State<AppState>,
    Authenticated(user): Authenticated,
    Path(id): Path<i64>,
    Json(request): Json<AssignRole>,
) -> Result<(StatusCode, Json<RoleAssignmentResponse>)> {
    let organization_id = match request.scope {
        RoleScope::Organization => request.organization_id,
        RoleScope::Global => None,
    };
    require_role_admin(&state, &user, organization_id).await?;

    let assignment =
        rbac::assign_role(&state.db, id, request.role_id, request.scope, request.organization_id)
            .await?;
    let role = rbac::find_role(&state.db, assignment.role_id).await?;

    tracing::info!(identity_id = id, role = %role.name, "Role assigned");
    let _ = state
        .audit
        .log_success(
            AuditEvent::new(AuditAction::RoleAssigned, ResourceType::Role)
                .resource(role.id)
                .organization(assignment.organization_id)
                .by(&user)
                .details(serde_json::json!({
                    "identity_id": id,
                    "role": role.name,
                    "scope": assignment.scope,
                })),
        )
        .await;

    Ok((
        StatusCode::CREATED,
        Json(RoleAssignmentResponse::new(assignment, &role)),
    ))
}

async fn unassign_role(
    State(state): State<AppState>,
    Authenticated(user): Authenticated,
    Path((id, assignment_id)): Path<(i64, i64)>,
) -> Result<StatusCode> {
    let assignment = UserRole::find_by_id(assignment_id)
        .one(&state.db)
        .await?
        .filter(|a| a.identity_id == id)
        .ok_or_else(|| AppError::NotFound("Role assignment not found".to_string()))?;
    require_role_admin(&state, &user, assignment.organization_id).await?;

    let removed = rbac::unassign_role(&state.db, id, assignment_id).await?;

    let _ = state
        .audit
        .log_success(
            AuditEvent::new(AuditAction::RoleUnassigned, ResourceType::Role)
                .resource(removed.role_id)
                .organization(removed.organization_id)
                .by(&user)
                .details(serde_json::json!({
                    "identity_id": id,
                    "assignment_id": assignment_id,
                })),
        )
        .await;

    Ok(StatusCode::NO_CONTENT)
}
