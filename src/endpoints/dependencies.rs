use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, ModelTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, QueryTrait, Set,
};

use crate::error::{AppError, Result};
use crate::middleware::permissions::{
    require_in_org, visible_organizations, Authenticated, DependenciesManage, DependenciesView,
};
use crate::middleware::AuthenticatedUser;
use crate::models::audit_log::{AuditAction, ResourceType};
use crate::models::prelude::*;
use crate::models::{dependency, entity};
use crate::schemas::{
    page_bounds, page_offset, CreateDependency, DependencyListQuery, DependencyResponse, Paginated,
};
use crate::services::audit::AuditEvent;
use crate::services::dependency_graph;
use crate::state::AppState;

/// Create dependency routes
pub fn dependencies_routes(state: AppState) -> Router {
    Router::new()
        .route("/", get(list_dependencies).post(create_dependency))
        .route("/:id", get(get_dependency).delete(delete_dependency))
        .with_state(state)
}

async fn find_dependency(state: &AppState, id: i64) -> Result<dependency::Model> {
    Dependency::find_by_id(id)
        .one(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Dependency {} not found", id)))
}

/// Edges are governed by the organization of their source entity
async fn source_organization(state: &AppState, edge: &dependency::Model) -> Result<i64> {
    Ok(dependency_graph::find_entity(&state.db, edge.source_entity_id)
        .await?
        .organization_id)
}

async fn require_edge_access<P: crate::middleware::Permission>(
    state: &AppState,
    user: &AuthenticatedUser,
    edge: &dependency::Model,
) -> Result<i64> {
    let org_id = source_organization(state, edge).await?;
    require_in_org::<P>(&state.db, user, org_id).await?;
    Ok(org_id)
}

/// A missing endpoint entity is a bad request, not a missing route
async fn endpoint_entity(state: &AppState, id: i64) -> Result<entity::Model> {
    match dependency_graph::find_entity(&state.db, id).await {
        Err(AppError::NotFound(msg)) => Err(AppError::BadRequest(msg)),
        other => other,
    }
}

// ============================================================================
// Endpoint Handlers
// ============================================================================

async fn list_dependencies(
    State(state): State<AppState>,
    Authenticated(user): Authenticated,
    Query(query): Query<DependencyListQuery>,
) -> Result<Json<Paginated<DependencyResponse>>> {
    let (page, per_page) = page_bounds(query.page, query.per_page);

    let mut select = Dependency::find();
    if let Some(visible) = visible_organizations::<DependenciesView>(&state.db, &user).await? {
        let visible_entities = TrackedEntity::find()
            .select_only()
            .column(entity::Column::Id)
            .filter(entity::Column::OrganizationId.is_in(visible))
            .into_query();
        select = select.filter(dependency::Column::SourceEntityId.in_subquery(visible_entities));
    }
    if let Some(source) = query.source_entity_id {
        select = select.filter(dependency::Column::SourceEntityId.eq(source));
    }
    if let Some(target) = query.target_entity_id {
        select = select.filter(dependency::Column::TargetEntityId.eq(target));
    }
    if let Some(dependency_type) = query.dependency_type {
        select = select.filter(dependency::Column::DependencyType.eq(dependency_type));
    }

    let total = select.clone().count(&state.db).await?;
    let edges = select
        .order_by_asc(dependency::Column::Id)
        .offset(page_offset(page, per_page))
        .limit(per_page)
        .all(&state.db)
        .await?;

    Ok(Json(Paginated::new(
        edges.into_iter().map(Into::into).collect(),
        total,
        (page, per_page),
    )))
}

async fn create_dependency(
    State(state): State<AppState>,
    Authenticated(user): Authenticated,
    Json(request): Json<CreateDependency>,
) -> Result<(StatusCode, Json<DependencyResponse>)> {
    if request.source_entity_id == request.target_entity_id {
        return Err(AppError::BadRequest(
            "An entity cannot depend on itself".to_string(),
        ));
    }
    let metadata = request.checked_metadata()?;

    let source = endpoint_entity(&state, request.source_entity_id).await?;
    let target = endpoint_entity(&state, request.target_entity_id).await?;

    require_in_org::<DependenciesManage>(&state.db, &user, source.organization_id).await?;
    require_in_org::<DependenciesView>(&state.db, &user, target.organization_id).await?;

    let duplicate = Dependency::find()
        .filter(dependency::Column::SourceEntityId.eq(source.id))
        .filter(dependency::Column::TargetEntityId.eq(target.id))
        .filter(dependency::Column::DependencyType.eq(request.dependency_type))
        .count(&state.db)
        .await?;
    if duplicate > 0 {
        return Err(AppError::Conflict(format!(
            "Dependency {} -[{}]-> {} already exists",
            source.id,
            request.dependency_type.as_str(),
            target.id
        )));
    }

    let created = dependency::ActiveModel {
        source_entity_id: Set(source.id),
        target_entity_id: Set(target.id),
        dependency_type: Set(request.dependency_type),
        metadata: Set(metadata),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(&state.db)
    .await?;

    let _ = state
        .audit
        .log_success(
            AuditEvent::new(AuditAction::DependencyCreated, ResourceType::Dependency)
                .resource(created.id)
                .organization(Some(source.organization_id))
                .by(&user)
                .details(serde_json::json!({
                    "source_entity_id": source.id,
                    "target_entity_id": target.id,
                    "dependency_type": created.dependency_type.as_str(),
                })),
        )
        .await;

    Ok((StatusCode::CREATED, Json(created.into())))
}

async fn get_dependency(
    State(state): State<AppState>,
    Authenticated(user): Authenticated,
    Path(id): Path<i64>,
) -> Result<Json<DependencyResponse>> {
    let edge = find_dependency(&state, id).await?;
    require_edge_access::<DependenciesView>(&state, &user, &edge).await?;
    Ok(Json(edge.into()))
}

async fn delete_dependency(
    State(state): State<AppState>,
    Authenticated(user): Authenticated,
    Path(id): Path<i64>,
) -> Result<StatusCode> {
    let edge = find_dependency(&state, id).await?;
    let org_id = require_edge_access::<DependenciesManage>(&state, &user, &edge).await?;

    let details = serde_json::json!({
        "source_entity_id": edge.source_entity_id,
        "target_entity_id": edge.target_entity_id,
        "dependency_type": edge.dependency_type.as_str(),
    });
    edge.delete(&state.db).await?;

    let _ = state
        .audit
        .log_success(
            AuditEvent::new(AuditAction::DependencyDeleted, ResourceType::Dependency)
                .resource(id)
                .organization(Some(org_id))
                .by(&user)
                .details(details),
        )
        .await;

    Ok(StatusCode::NO_CONTENT)
}
