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
use serde_json::Value;
use validator::Validate;

use crate::config::CONFIG;
use crate::db::DbConn;
use crate::error::{AppError, Result};
use crate::middleware::permissions::{
    require_in_org, visible_organizations, Authenticated, DependenciesView, EntitiesManage,
    EntitiesView,
};
use crate::middleware::AuthenticatedUser;
use crate::models::audit_log::{AuditAction, ResourceType};
use crate::models::entity;
use crate::models::prelude::*;
use crate::schemas::{
    page_bounds, page_offset, CreateEntity, DepthQuery, EntityListQuery, EntityResponse, Paginated,
    ReachedEntityResponse, UpdateEntity, WalkResponse,
};
use crate::services::audit::AuditEvent;
use crate::services::dependency_graph::{self, Direction};
use crate::services::{hierarchy, security};
use crate::state::AppState;

const UNIQUE_ID_ATTEMPTS: usize = 5;

/// Create entity routes
pub fn entities_routes(state: AppState) -> Router {
    Router::new()
        .route("/", get(list_entities).post(create_entity))
        .route("/lookup/:unique_id", get(lookup_entity))
        .route(
            "/:id",
            get(get_entity).patch(update_entity).delete(delete_entity),
        )
        .route("/:id/dependencies", get(get_dependencies))
        .route("/:id/dependents", get(get_dependents))
        .with_state(state)
}

/// Fresh random `unique_id` not yet taken
async fn allocate_unique_id(db: &DbConn) -> Result<i64> {
    for _ in 0..UNIQUE_ID_ATTEMPTS {
        let candidate = security::generate_unique_id();
        let taken = TrackedEntity::find()
            .filter(entity::Column::UniqueId.eq(candidate))
            .count(db)
            .await?;
        if taken == 0 {
            return Ok(candidate);
        }
        tracing::warn!(candidate, "unique_id collision, retrying");
    }
    Err(AppError::Internal(
        "Could not allocate a unique entity id".to_string(),
    ))
}

fn check_metadata(metadata: &Value) -> Result<()> {
    if metadata.is_object() {
        Ok(())
    } else {
        Err(AppError::BadRequest("metadata must be an object".to_string()))
    }
}

/// Organization referenced by a request body
async fn existing_organization(db: &DbConn, org_id: i64) -> Result<()> {
    match hierarchy::find_organization(db, org_id).await {
        Ok(_) => Ok(()),
        Err(AppError::NotFound(msg)) => Err(AppError::BadRequest(msg)),
        Err(e) => Err(e),
    }
}

async fn ensure_identity_exists(db: &DbConn, identity_id: i64) -> Result<()> {
    if Identity::find_by_id(identity_id).one(db).await?.is_none() {
        return Err(AppError::BadRequest(format!(
            "Identity {} not found",
            identity_id
        )));
    }
    Ok(())
}

// ============================================================================
// Endpoint Handlers
// ============================================================================

async fn list_entities(
    State(state): State<AppState>,
    Authenticated(user): Authenticated,
    Query(query): Query<EntityListQuery>,
) -> Result<Json<Paginated<EntityResponse>>> {
    let (page, per_page) = page_bounds(query.page, query.per_page);

    let mut select = TrackedEntity::find();
    if let Some(org_id) = query.organization_id {
        require_in_org::<EntitiesView>(&state.db, &user, org_id).await?;
        select = select.filter(entity::Column::OrganizationId.eq(org_id));
    } else if let Some(visible) = visible_organizations::<EntitiesView>(&state.db, &user).await? {
        select = select.filter(entity::Column::OrganizationId.is_in(visible));
    }
    if let Some(entity_type) = query.entity_type {
        select = select.filter(entity::Column::EntityType.eq(entity_type));
    }
    if let Some(name) = query.name.as_deref().filter(|n| !n.is_empty()) {
        select = select.filter(entity::Column::Name.contains(name));
    }
    if let Some(is_active) = query.is_active {
        select = select.filter(entity::Column::IsActive.eq(is_active));
    }

    let total = select.clone().count(&state.db).await?;
    let entities = select
        .order_by_asc(entity::Column::Name)
        .order_by_asc(entity::Column::Id)
        .offset(page_offset(page, per_page))
        .limit(per_page)
        .all(&state.db)
        .await?;

    Ok(Json(Paginated::new(
        entities.into_iter().map(Into::into).collect(),
        total,
        (page, per_page),
    )))
}

async fn create_entity(
    State(state): State<AppState>,
    Authenticated(user): Authenticated,
    Json(request): Json<CreateEntity>,
) -> Result<(StatusCode, Json<EntityResponse>)> {
    request.validate()?;

    existing_organization(&state.db, request.organization_id).await?;
    require_in_org::<EntitiesManage>(&state.db, &user, request.organization_id).await?;

    let metadata = request
        .metadata
        .unwrap_or_else(|| Value::Object(Default::default()));
    check_metadata(&metadata)?;
    if let Some(owner) = request.owner_identity_id {
        ensure_identity_exists(&state.db, owner).await?;
    }

    let now = Utc::now();
    let created = entity::ActiveModel {
        unique_id: Set(allocate_unique_id(&state.db).await?),
        name: Set(request.name),
        description: Set(request.description),
        entity_type: Set(request.entity_type),
        organization_id: Set(request.organization_id),
        metadata: Set(metadata),
        owner_identity_id: Set(request.owner_identity_id),
        is_active: Set(request.is_active),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&state.db)
    .await?;

    let _ = state
        .audit
        .log_success(
            AuditEvent::new(AuditAction::EntityCreated, ResourceType::Entity)
                .resource(created.id)
                .organization(Some(created.organization_id))
                .by(&user)
                .details(serde_json::json!({
                    "name": created.name,
                    "entity_type": created.entity_type.as_str(),
                })),
        )
        .await;

    Ok((StatusCode::CREATED, Json(created.into())))
}

async fn visible_entity(
    state: &AppState,
    user: &AuthenticatedUser,
    id: i64,
) -> Result<entity::Model> {
    let found = dependency_graph::find_entity(&state.db, id).await?;
    require_in_org::<EntitiesView>(&state.db, user, found.organization_id).await?;
    Ok(found)
}

async fn get_entity(
    State(state): State<AppState>,
    Authenticated(user): Authenticated,
    Path(id): Path<i64>,
) -> Result<Json<EntityResponse>> {
    Ok(Json(visible_entity(&state, &user, id).await?.into()))
}

/// Lookup by the public `unique_id`
async fn lookup_entity(
    State(state): State<AppState>,
    Authenticated(user): Authenticated,
    Path(unique_id): Path<i64>,
) -> Result<Json<EntityResponse>> {
    let found = TrackedEntity::find()
        .filter(entity::Column::UniqueId.eq(unique_id))
        .one(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Entity {} not found", unique_id)))?;
    require_in_org::<EntitiesView>(&state.db, &user, found.organization_id).await?;
    Ok(Json(found.into()))
}

async fn update_entity(
    State(state): State<AppState>,
    Authenticated(user): Authenticated,
    Path(id): Path<i64>,
    Json(request): Json<UpdateEntity>,
) -> Result<Json<EntityResponse>> {
    request.validate()?;

    let existing = dependency_graph::find_entity(&state.db, id).await?;
    require_in_org::<EntitiesManage>(&state.db, &user, existing.organization_id).await?;

    let previous_org = existing.organization_id;
    let mut active: entity::ActiveModel = existing.into();

    if let Some(target_org) = request.organization_id.filter(|o| *o != previous_org) {
        existing_organization(&state.db, target_org).await?;
        require_in_org::<EntitiesManage>(&state.db, &user, target_org).await?;
        active.organization_id = Set(target_org);
    }
    if let Some(name) = request.name {
        active.name = Set(name);
    }
    if let Some(description) = request.description {
        active.description = Set(Some(description));
    }
    if let Some(entity_type) = request.entity_type {
        active.entity_type = Set(entity_type);
    }
    if let Some(metadata) = request.metadata {
        check_metadata(&metadata)?;
        active.metadata = Set(metadata);
    }
    if let Some(owner) = request.owner_identity_id {
        if let Some(owner_id) = owner {
            ensure_identity_exists(&state.db, owner_id).await?;
        }
        active.owner_identity_id = Set(owner);
    }
    if let Some(is_active) = request.is_active {
        active.is_active = Set(is_active);
    }
    active.updated_at = Set(Utc::now());

    let updated = active.update(&state.db).await?;

    let _ = state
        .audit
        .log_success(
            AuditEvent::new(AuditAction::EntityUpdated, ResourceType::Entity)
                .resource(id)
                .organization(Some(updated.organization_id))
                .by(&user)
                .details(serde_json::json!({
                    "previous_organization_id": previous_org,
                    "organization_id": updated.organization_id,
                })),
        )
        .await;

    Ok(Json(updated.into()))
}

async fn delete_entity(
    State(state): State<AppState>,
    Authenticated(user): Authenticated,
    Path(id): Path<i64>,
) -> Result<StatusCode> {
    let existing = dependency_graph::find_entity(&state.db, id).await?;
    require_in_org::<EntitiesManage>(&state.db, &user, existing.organization_id).await?;

    let org_id = existing.organization_id;
    let name = existing.name.clone();
    existing.delete(&state.db).await?;

    let _ = state
        .audit
        .log_success(
            AuditEvent::new(AuditAction::EntityDeleted, ResourceType::Entity)
                .resource(id)
                .organization(Some(org_id))
                .by(&user)
                .details(serde_json::json!({ "name": name })),
        )
        .await;

    Ok(StatusCode::NO_CONTENT)
}

/// Walk in `direction` from an entity the caller can see, given
/// `dependencies.view` in its organization. Reached entities outside the
/// caller's visible organizations are hidden.
async fn walk_visible(
    state: &AppState,
    user: &AuthenticatedUser,
    id: i64,
    depth: Option<u32>,
    direction: Direction,
) -> Result<Json<WalkResponse>> {
    let start = visible_entity(state, user, id).await?;
    require_in_org::<DependenciesView>(&state.db, user, start.organization_id).await?;

    let depth = CONFIG.graph.clamp_depth(depth, CONFIG.graph.max_depth);
    let reached = dependency_graph::walk(&state.db, id, depth, direction).await?;
    let visible = visible_organizations::<EntitiesView>(&state.db, user).await?;

    let entities = reached
        .into_iter()
        .filter(|r| {
            visible
                .as_ref()
                .map_or(true, |orgs| orgs.contains(&r.entity.organization_id))
        })
        .map(ReachedEntityResponse::from)
        .collect();

    Ok(Json(WalkResponse {
        entity_id: id,
        depth,
        entities,
    }))
}

/// Everything this entity transitively depends on
async fn get_dependencies(
    State(state): State<AppState>,
    Authenticated(user): Authenticated,
    Path(id): Path<i64>,
    Query(query): Query<DepthQuery>,
) -> Result<Json<WalkResponse>> {
    walk_visible(&state, &user, id, query.depth, Direction::Outgoing).await
}

/// Everything that transitively depends on this entity
async fn get_dependents(
    State(state): State<AppState>,
    Authenticated(user): Authenticated,
    Path(id): Path<i64>,
    Query(query): Query<DepthQuery>,
) -> Result<Json<WalkResponse>> {
    walk_visible(&state, &user, id, query.depth, Direction::Incoming).await
}
