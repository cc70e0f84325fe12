use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, ModelTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use validator::Validate;

use crate::error::{AppError, Result};
use crate::middleware::permissions::{Authorized, RolesManage, RolesView};
use crate::models::audit_log::{AuditAction, ResourceType};
use crate::models::prelude::*;
use crate::models::{permission, role};
use crate::schemas::{CreateRole, PermissionInfo, RoleResponse, SetRolePermissions, UpdateRole};
use crate::services::audit::AuditEvent;
use crate::services::rbac;
use crate::state::AppState;

/// Create roles routes
pub fn roles_routes(state: AppState) -> Router {
    Router::new()
        .route("/", get(list_roles).post(create_role))
        .route("/permissions", get(list_all_permissions))
        .route(
            "/:role_id",
            get(get_role).patch(update_role).delete(delete_role),
        )
        .route(
            "/:role_id/permissions",
            get(get_role_permissions).put(set_role_permissions),
        )
        .with_state(state)
}

async fn role_response(state: &AppState, found: role::Model) -> Result<RoleResponse> {
    let permissions = rbac::role_permission_names(&state.db, found.id).await?;
    Ok(RoleResponse::new(found, permissions))
}

async fn ensure_name_free(state: &AppState, name: &str) -> Result<()> {
    let taken = Role::find()
        .filter(role::Column::Name.eq(name))
        .count(&state.db)
        .await?;
    if taken > 0 {
        return Err(AppError::Conflict(format!("Role {} already exists", name)));
    }
    Ok(())
}

// ============================================================================
// Endpoint Handlers
// ============================================================================

async fn list_roles(
    State(state): State<AppState>,
    _auth: Authorized<RolesView>,
) -> Result<Json<Vec<RoleResponse>>> {
    let roles = Role::find()
        .order_by_asc(role::Column::Name)
        .all(&state.db)
        .await?;

    let mut responses = Vec::with_capacity(roles.len());
    for r in roles {
        responses.push(role_response(&state, r).await?);
    }
    Ok(Json(responses))
}

async fn list_all_permissions(
    State(state): State<AppState>,
    _auth: Authorized<RolesView>,
) -> Result<Json<Vec<PermissionInfo>>> {
    let permissions = Permission::find()
        .order_by_asc(permission::Column::Name)
        .all(&state.db)
        .await?;
    Ok(Json(permissions.into_iter().map(Into::into).collect()))
}

async fn get_role(
    State(state): State<AppState>,
    _auth: Authorized<RolesView>,
    Path(role_id): Path<i64>,
) -> Result<Json<RoleResponse>> {
    let found = rbac::find_role(&state.db, role_id).await?;
    Ok(Json(role_response(&state, found).await?))
}

async fn create_role(
    State(state): State<AppState>,
    Authorized(user, _): Authorized<RolesManage>,
    Json(request): Json<CreateRole>,
) -> Result<(StatusCode, Json<RoleResponse>)> {
    request.validate()?;
    ensure_name_free(&state, &request.name).await?;

    let created = role::ActiveModel {
        name: Set(request.name),
        description: Set(request.description),
        is_system: Set(false),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(&state.db)
    .await?;

    let permissions = match rbac::set_role_permissions(&state.db, created.id, &request.permissions)
        .await
    {
        Ok(permissions) => permissions,
        Err(e) => {
            // Unknown permission names: do not leave a half-created role behind
            created.delete(&state.db).await?;
            return Err(e);
        }
    };

    let _ = state
        .audit
        .log_success(
            AuditEvent::new(AuditAction::RoleCreated, ResourceType::Role)
                .resource(created.id)
                .by(&user)
                .details(serde_json::json!({
                    "name": created.name,
                    "permissions": permissions,
                })),
        )
        .await;

    Ok((
        StatusCode::CREATED,
        Json(RoleResponse::new(created, permissions)),
    ))
}

async fn update_role(
    State(state): State<AppState>,
    Authorized(user, _): Authorized<RolesManage>,
    Path(role_id): Path<i64>,
    Json(request): Json<UpdateRole>,
) -> Result<Json<RoleResponse>> {
    request.validate()?;
    let existing = rbac::find_role(&state.db, role_id).await?;

    let mut active: role::ActiveModel = existing.clone().into();
    if let Some(name) = request.name.filter(|n| *n != existing.name) {
        if existing.is_system {
            return Err(AppError::BadRequest(
                "System roles cannot be renamed".to_string(),
            ));
        }
        ensure_name_free(&state, &name).await?;
        active.name = Set(name);
    }
    if let Some(description) = request.description {
        active.description = Set(Some(description));
    }
    let updated = active.update(&state.db).await?;

    let _ = state
        .audit
        .log_success(
            AuditEvent::new(AuditAction::RoleUpdated, ResourceType::Role)
                .resource(role_id)
                .by(&user)
                .details(serde_json::json!({
                    "previous_name": existing.name,
                    "name": updated.name,
                })),
        )
        .await;

    Ok(Json(role_response(&state, updated).await?))
}

async fn delete_role(
    State(state): State<AppState>,
    Authorized(user, _): Authorized<RolesManage>,
    Path(role_id): Path<i64>,
) -> Result<StatusCode> {
    let existing = rbac::find_role(&state.db, role_id).await?;
    if existing.is_system {
        return Err(AppError::BadRequest(
            "System roles cannot be deleted".to_string(),
        ));
    }

    let name = existing.name.clone();
    existing.delete(&state.db).await?;

    let _ = state
        .audit
        .log_success(
            AuditEvent::new(AuditAction::RoleDeleted, ResourceType::Role)
                .resource(role_id)
                .by(&user)
                .details(serde_json::json!({ "name": name })),
        )
        .await;

    Ok(StatusCode::NO_CONTENT)
}

async fn get_role_permissions(
    State(state): State<AppState>,
    _auth: Authorized<RolesView>,
    Path(role_id): Path<i64>,
) -> Result<Json<Vec<String>>> {
    rbac::find_role(&state.db, role_id).await?;
    Ok(Json(rbac::role_permission_names(&state.db, role_id).await?))
}

async fn set_role_permissions(
    State(state): State<AppState>,
    Authorized(user, _): Authorized<RolesManage>,
    Path(role_id): Path<i64>,
    Json(request): Json<SetRolePermissions>,
) -> Result<Json<Vec<String>>> {
    let previous = rbac::role_permission_names(&state.db, role_id).await?;
    let permissions = rbac::set_role_permissions(&state.db, role_id, &request.permissions).await?;

    let _ = state
        .audit
        .log_success(
            AuditEvent::new(AuditAction::RolePermissionsChanged, ResourceType::Role)
                .resource(role_id)
                .by(&user)
                .details(serde_json::json!({
                    "previous": previous,
                    "permissions": permissions,
                })),
        )
        .await;

    Ok(Json(permissions))
}
