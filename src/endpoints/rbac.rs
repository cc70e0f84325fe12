use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};

use crate::error::{AppError, Result};
use crate::middleware::permissions::{allowed_in_org, Authenticated, ALL_PERMISSIONS};
use crate::schemas::{MyPermissionsResponse, RbacCheckQuery, RbacCheckResponse};
use crate::services::hierarchy;
use crate::state::AppState;

/// Create RBAC inspection routes
pub fn rbac_routes(state: AppState) -> Router {
    Router::new()
        .route("/check", get(check_permission))
        .route("/me", get(my_permissions))
        .with_state(state)
}

/// Whether the caller holds a permission, globally or on one organization
async fn check_permission(
    State(state): State<AppState>,
    Authenticated(user): Authenticated,
    Query(query): Query<RbacCheckQuery>,
) -> Result<Json<RbacCheckResponse>> {
    if !ALL_PERMISSIONS.contains(&query.permission.as_str()) {
        return Err(AppError::BadRequest(format!(
            "Unknown permission: {}",
            query.permission
        )));
    }

    let allowed = match query.organization_id {
        Some(org_id) => {
            hierarchy::find_organization(&state.db, org_id).await?;
            allowed_in_org(&state.db, &user, &query.permission, org_id).await?
        }
        None => user.permissions.allows(&query.permission),
    };

    Ok(Json(RbacCheckResponse {
        permission: query.permission,
        organization_id: query.organization_id,
        allowed,
    }))
}

async fn my_permissions(Authenticated(user): Authenticated) -> Json<MyPermissionsResponse> {
    Json(MyPermissionsResponse {
        identity_id: user.identity.id,
        username: user.identity.username,
        permissions: user.permissions,
    })
}
