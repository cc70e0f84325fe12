use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, ModelTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use validator::Validate;

use crate::config::CONFIG;
use crate::error::{AppError, Result};
use crate::middleware::permissions::{
    require_in_org, visible_organizations, Authenticated, OrganizationsManage, OrganizationsView,
    Permission,
};
use crate::models::audit_log::{AuditAction, ResourceType};
use crate::models::organization;
use crate::models::prelude::*;
use crate::schemas::{
    page_bounds, page_offset, ChildOrganization, ChildrenQuery, CreateOrganization, GraphQuery,
    OrganizationListQuery, OrganizationResponse, Paginated, UpdateOrganization,
};
use crate::services::audit::{AuditEvent, MAX_RETENTION_DAYS};
use crate::services::dependency_graph::{self, OrganizationGraph};
use crate::services::hierarchy;
use crate::state::AppState;

/// Create organization routes
pub fn organizations_routes(state: AppState) -> Router {
    Router::new()
        .route("/", get(list_organizations).post(create_organization))
        .route(
            "/:id",
            get(get_organization)
                .patch(update_organization)
                .delete(delete_organization),
        )
        .route("/:id/hierarchy", get(get_hierarchy))
        .route("/:id/children", get(get_children))
        .route("/:id/graph", get(get_graph))
        .with_state(state)
}

async fn ensure_identity_exists(state: &AppState, identity_id: i64) -> Result<()> {
    if Identity::find_by_id(identity_id).one(&state.db).await?.is_none() {
        return Err(AppError::BadRequest(format!(
            "Identity {} not found",
            identity_id
        )));
    }
    Ok(())
}

/// Root organizations may only be created or produced by a global grant
fn require_global_manage(user: &crate::middleware::AuthenticatedUser) -> Result<()> {
    if user.permissions.allows(OrganizationsManage::NAME) {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "Permission denied: {} required",
            OrganizationsManage::NAME
        )))
    }
}

// ============================================================================
// Endpoint Handlers
// ============================================================================

async fn list_organizations(
    State(state): State<AppState>,
    Authenticated(user): Authenticated,
    Query(query): Query<OrganizationListQuery>,
) -> Result<Json<Paginated<OrganizationResponse>>> {
    let (page, per_page) = page_bounds(query.page, query.per_page);

    let mut select = Organization::find();
    if let Some(visible) = visible_organizations::<OrganizationsView>(&state.db, &user).await? {
        select = select.filter(organization::Column::Id.is_in(visible));
    }
    if query.roots_only {
        select = select.filter(organization::Column::ParentId.is_null());
    }
    if let Some(parent_id) = query.parent_id {
        select = select.filter(organization::Column::ParentId.eq(parent_id));
    }
    if let Some(name) = query.name.as_deref().filter(|n| !n.is_empty()) {
        select = select.filter(organization::Column::Name.contains(name));
    }

    let total = select.clone().count(&state.db).await?;
    let orgs = select
        .order_by_asc(organization::Column::Name)
        .order_by_asc(organization::Column::Id)
        .offset(page_offset(page, per_page))
        .limit(per_page)
        .all(&state.db)
        .await?;

    Ok(Json(Paginated::new(
        orgs.into_iter().map(Into::into).collect(),
        total,
        (page, per_page),
    )))
}

async fn create_organization(
    State(state): State<AppState>,
    Authenticated(user): Authenticated,
    Json(request): Json<CreateOrganization>,
) -> Result<(StatusCode, Json<OrganizationResponse>)> {
    request.validate()?;

    match request.parent_id {
        Some(parent_id) => {
            hierarchy::validate_parent(&state.db, None, parent_id).await?;
            require_in_org::<OrganizationsManage>(&state.db, &user, parent_id).await?;
        }
        None => require_global_manage(&user)?,
    }
    if let Some(owner) = request.owner_identity_id {
        ensure_identity_exists(&state, owner).await?;
    }

    let now = Utc::now();
    let created = organization::ActiveModel {
        name: Set(request.name),
        description: Set(request.description),
        parent_id: Set(request.parent_id),
        owner_identity_id: Set(request.owner_identity_id),
        data_retention_days: Set(request.data_retention_days),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&state.db)
    .await?;

    tracing::info!(organization_id = created.id, name = %created.name, "Organization created");
    let _ = state
        .audit
        .log_success(
            AuditEvent::new(AuditAction::OrganizationCreated, ResourceType::Organization)
                .resource(created.id)
                .organization(Some(created.id))
                .by(&user)
                .details(serde_json::json!({
                    "name": created.name,
                    "parent_id": created.parent_id,
                })),
        )
        .await;

    Ok((StatusCode::CREATED, Json(created.into())))
}

async fn get_organization(
    State(state): State<AppState>,
    Authenticated(user): Authenticated,
    Path(id): Path<i64>,
) -> Result<Json<OrganizationResponse>> {
    let org = hierarchy::find_organization(&state.db, id).await?;
    require_in_org::<OrganizationsView>(&state.db, &user, id).await?;
    Ok(Json(org.into()))
}

async fn update_organization(
    State(state): State<AppState>,
    Authenticated(user): Authenticated,
    Path(id): Path<i64>,
    Json(request): Json<UpdateOrganization>,
) -> Result<Json<OrganizationResponse>> {
    request.validate()?;

    let existing = hierarchy::find_organization(&state.db, id).await?;
    require_in_org::<OrganizationsManage>(&state.db, &user, id).await?;

    let previous_parent = existing.parent_id;
    let mut active: organization::ActiveModel = existing.into();

    if let Some(name) = request.name {
        active.name = Set(name);
    }
    if let Some(description) = request.description {
        active.description = Set(Some(description));
    }
    if let Some(parent) = request.parent_id {
        match parent {
            Some(new_parent) => {
                hierarchy::validate_parent(&state.db, Some(id), new_parent).await?;
                require_in_org::<OrganizationsManage>(&state.db, &user, new_parent).await?;
            }
            None => require_global_manage(&user)?,
        }
        active.parent_id = Set(parent);
    }
    if let Some(owner) = request.owner_identity_id {
        if let Some(owner_id) = owner {
            ensure_identity_exists(&state, owner_id).await?;
        }
        active.owner_identity_id = Set(owner);
    }
    if let Some(retention) = request.data_retention_days {
        if retention.is_some_and(|days| !(1..=MAX_RETENTION_DAYS).contains(&i64::from(days))) {
            return Err(AppError::BadRequest(format!(
                "data_retention_days must be between 1 and {}",
                MAX_RETENTION_DAYS
            )));
        }
        active.data_retention_days = Set(retention);
    }
    active.updated_at = Set(Utc::now());

    let updated = active.update(&state.db).await?;

    let _ = state
        .audit
        .log_success(
            AuditEvent::new(AuditAction::OrganizationUpdated, ResourceType::Organization)
                .resource(id)
                .organization(Some(id))
                .by(&user)
                .details(serde_json::json!({
                    "previous_parent_id": previous_parent,
                    "parent_id": updated.parent_id,
                })),
        )
        .await;

    Ok(Json(updated.into()))
}

async fn delete_organization(
    State(state): State<AppState>,
    Authenticated(user): Authenticated,
    Path(id): Path<i64>,
) -> Result<StatusCode> {
    let existing = hierarchy::find_organization(&state.db, id).await?;
    require_in_org::<OrganizationsManage>(&state.db, &user, id).await?;
    hierarchy::ensure_deletable(&state.db, id).await?;

    let name = existing.name.clone();
    existing.delete(&state.db).await?;

    tracing::info!(organization_id = id, "Organization deleted");
    let _ = state
        .audit
        .log_success(
            AuditEvent::new(AuditAction::OrganizationDeleted, ResourceType::Organization)
                .resource(id)
                .by(&user)
                .details(serde_json::json!({ "name": name })),
        )
        .await;

    Ok(StatusCode::NO_CONTENT)
}

/// Path from the root down to this organization
async fn get_hierarchy(
    State(state): State<AppState>,
    Authenticated(user): Authenticated,
    Path(id): Path<i64>,
) -> Result<Json<Vec<OrganizationResponse>>> {
    let path = hierarchy::hierarchy_path(&state.db, id).await?;
    require_in_org::<OrganizationsView>(&state.db, &user, id).await?;
    Ok(Json(path.into_iter().map(Into::into).collect()))
}

async fn get_children(
    State(state): State<AppState>,
    Authenticated(user): Authenticated,
    Path(id): Path<i64>,
    Query(query): Query<ChildrenQuery>,
) -> Result<Json<Vec<ChildOrganization>>> {
    hierarchy::find_organization(&state.db, id).await?;
    require_in_org::<OrganizationsView>(&state.db, &user, id).await?;

    let max_depth = if query.recursive { query.depth } else { Some(1) };
    let children = hierarchy::get_all_children(&state.db, id, max_depth).await?;

    Ok(Json(
        children
            .into_iter()
            .map(|child| ChildOrganization {
                organization: child.organization.into(),
                depth: child.depth,
            })
            .collect(),
    ))
}

/// Organizations, entities and dependencies below this organization
async fn get_graph(
    State(state): State<AppState>,
    Authenticated(user): Authenticated,
    Path(id): Path<i64>,
    Query(query): Query<GraphQuery>,
) -> Result<Json<OrganizationGraph>> {
    hierarchy::find_organization(&state.db, id).await?;
    require_in_org::<OrganizationsView>(&state.db, &user, id).await?;

    let depth = CONFIG.graph.clamp_depth(query.depth, 2);
    let graph = dependency_graph::build_organization_graph(&state.db, id, depth, &CONFIG.graph).await?;
    Ok(Json(graph))
}
