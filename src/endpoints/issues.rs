use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, ModelTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use validator::Validate;

use crate::db::DbConn;
use crate::error::{AppError, Result};
use crate::middleware::permissions::{
    require_in_org, visible_organizations, Authenticated, EntitiesView, IssuesManage, IssuesView,
    Permission,
};
use crate::middleware::AuthenticatedUser;
use crate::models::audit_log::{AuditAction, ResourceType};
use crate::models::prelude::*;
use crate::models::{issue, issue_entity};
use crate::schemas::{
    page_bounds, page_offset, CreateIssue, IssueListQuery, IssueResponse, Paginated, UpdateIssue,
};
use crate::services::audit::AuditEvent;
use crate::services::{dependency_graph, hierarchy};
use crate::state::AppState;

/// Create issue routes
pub fn issues_routes(state: AppState) -> Router {
    Router::new()
        .route("/", get(list_issues).post(create_issue))
        .route(
            "/:id",
            get(get_issue).patch(update_issue).delete(delete_issue),
        )
        .route(
            "/:id/entities/:entity_id",
            post(link_entity).delete(unlink_entity),
        )
        .with_state(state)
}

async fn find_issue(db: &DbConn, id: i64) -> Result<issue::Model> {
    Issue::find_by_id(id)
        .one(db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Issue {} not found", id)))
}

async fn linked_entity_ids(db: &DbConn, issue_id: i64) -> Result<Vec<i64>> {
    Ok(IssueEntity::find()
        .filter(issue_entity::Column::IssueId.eq(issue_id))
        .order_by_asc(issue_entity::Column::EntityId)
        .all(db)
        .await?
        .into_iter()
        .map(|link| link.entity_id)
        .collect())
}

/// Issues without an organization need the global grant
async fn require_issue_permission<P: Permission>(
    db: &DbConn,
    user: &AuthenticatedUser,
    organization_id: Option<i64>,
) -> Result<()> {
    match organization_id {
        Some(org_id) => require_in_org::<P>(db, user, org_id).await,
        None if user.permissions.allows(P::NAME) => Ok(()),
        None => Err(AppError::Forbidden(format!(
            "Permission denied: {} required",
            P::NAME
        ))),
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

/// Attach an entity; entities in another organization need view access there
async fn add_link(
    db: &DbConn,
    user: &AuthenticatedUser,
    issue_id: i64,
    entity_id: i64,
) -> Result<issue_entity::Model> {
    let entity = match dependency_graph::find_entity(db, entity_id).await {
        Err(AppError::NotFound(msg)) => return Err(AppError::BadRequest(msg)),
        other => other?,
    };
    require_in_org::<EntitiesView>(db, user, entity.organization_id).await?;

    let existing = IssueEntity::find()
        .filter(issue_entity::Column::IssueId.eq(issue_id))
        .filter(issue_entity::Column::EntityId.eq(entity_id))
        .count(db)
        .await?;
    if existing > 0 {
        return Err(AppError::Conflict(format!(
            "Entity {} is already linked to issue {}",
            entity_id, issue_id
        )));
    }

    Ok(issue_entity::ActiveModel {
        issue_id: Set(issue_id),
        entity_id: Set(entity_id),
        ..Default::default()
    }
    .insert(db)
    .await?)
}

// ============================================================================
// Endpoint Handlers
// ============================================================================

async fn list_issues(
    State(state): State<AppState>,
    Authenticated(user): Authenticated,
    Query(query): Query<IssueListQuery>,
) -> Result<Json<Paginated<IssueResponse>>> {
    let (page, per_page) = page_bounds(query.page, query.per_page);

    let mut select = Issue::find();
    if let Some(visible) = visible_organizations::<IssuesView>(&state.db, &user).await? {
        select = select.filter(issue::Column::OrganizationId.is_in(visible));
    }
    if let Some(status) = query.status {
        select = select.filter(issue::Column::Status.eq(status));
    }
    if let Some(priority) = query.priority {
        select = select.filter(issue::Column::Priority.eq(priority));
    }
    if let Some(org_id) = query.organization_id {
        select = select.filter(issue::Column::OrganizationId.eq(org_id));
    }
    if let Some(assignee_id) = query.assignee_id {
        select = select.filter(issue::Column::AssigneeId.eq(assignee_id));
    }

    let total = select.clone().count(&state.db).await?;
    let issues = select
        .order_by_desc(issue::Column::CreatedAt)
        .order_by_desc(issue::Column::Id)
        .offset(page_offset(page, per_page))
        .limit(per_page)
        .all(&state.db)
        .await?;

    let mut items = Vec::with_capacity(issues.len());
    for found in issues {
        let entity_ids = linked_entity_ids(&state.db, found.id).await?;
        items.push(IssueResponse::new(found, entity_ids));
    }
    Ok(Json(Paginated::new(items, total, (page, per_page))))
}

async fn create_issue(
    State(state): State<AppState>,
    Authenticated(user): Authenticated,
    Json(request): Json<CreateIssue>,
) -> Result<(StatusCode, Json<IssueResponse>)> {
    request.validate()?;

    if let Some(org_id) = request.organization_id {
        match hierarchy::find_organization(&state.db, org_id).await {
            Err(AppError::NotFound(msg)) => return Err(AppError::BadRequest(msg)),
            other => other?,
        };
    }
    require_issue_permission::<IssuesManage>(&state.db, &user, request.organization_id).await?;
    if let Some(assignee) = request.assignee_id {
        ensure_identity_exists(&state.db, assignee).await?;
    }

    let now = Utc::now();
    let created = issue::ActiveModel {
        title: Set(request.title),
        description: Set(request.description),
        status: Set(issue::IssueStatus::Open),
        priority: Set(request.priority),
        organization_id: Set(request.organization_id),
        reporter_id: Set(Some(user.identity.id)),
        assignee_id: Set(request.assignee_id),
        created_at: Set(now),
        updated_at: Set(now),
        closed_at: Set(None),
        ..Default::default()
    }
    .insert(&state.db)
    .await?;

    let mut wanted = request.entity_ids.clone();
    wanted.sort_unstable();
    wanted.dedup();
    for entity_id in wanted {
        if let Err(e) = add_link(&state.db, &user, created.id, entity_id).await {
            // Undo the insert on a bad entity list
            created.delete(&state.db).await?;
            return Err(e);
        }
    }

    let _ = state
        .audit
        .log_success(
            AuditEvent::new(AuditAction::IssueCreated, ResourceType::Issue)
                .resource(created.id)
                .by(&user)
                .organization(created.organization_id)
                .details(serde_json::json!({
                    "title": created.title,
                    "priority": created.priority,
                    "entity_ids": request.entity_ids,
                })),
        )
        .await;

    let entity_ids = linked_entity_ids(&state.db, created.id).await?;
    Ok((
        StatusCode::CREATED,
        Json(IssueResponse::new(created, entity_ids)),
    ))
}

async fn get_issue(
    State(state): State<AppState>,
    Authenticated(user): Authenticated,
    Path(id): Path<i64>,
) -> Result<Json<IssueResponse>> {
    let found = find_issue(&state.db, id).await?;
    require_issue_permission::<IssuesView>(&state.db, &user, found.organization_id).await?;

    let entity_ids = linked_entity_ids(&state.db, id).await?;
    Ok(Json(IssueResponse::new(found, entity_ids)))
}

async fn update_issue(
    State(state): State<AppState>,
    Authenticated(user): Authenticated,
    Path(id): Path<i64>,
    Json(request): Json<UpdateIssue>,
) -> Result<Json<IssueResponse>> {
    request.validate()?;
    let existing = find_issue(&state.db, id).await?;
    require_issue_permission::<IssuesManage>(&state.db, &user, existing.organization_id).await?;

    let now = Utc::now();
    let mut active: issue::ActiveModel = existing.clone().into();
    if let Some(title) = request.title {
        active.title = Set(title);
    }
    if let Some(description) = request.description {
        active.description = Set(Some(description));
    }
    if let Some(priority) = request.priority {
        active.priority = Set(priority);
    }
    if let Some(assignee) = request.assignee_id {
        if let Some(assignee) = assignee {
            ensure_identity_exists(&state.db, assignee).await?;
        }
        active.assignee_id = Set(assignee);
    }
    if let Some(status) = request.status {
        if status != existing.status {
            // closed_at tracks the latest move into a terminal status
            active.closed_at = Set(status.is_terminal().then_some(now));
        }
        active.status = Set(status);
    }
    active.updated_at = Set(now);

    let updated = active.update(&state.db).await?;

    let _ = state
        .audit
        .log_success(
            AuditEvent::new(AuditAction::IssueUpdated, ResourceType::Issue)
                .resource(id)
                .by(&user)
                .organization(updated.organization_id)
                .details(serde_json::json!({
                    "previous_status": existing.status,
                    "status": updated.status,
                    "priority": updated.priority,
                    "assignee_id": updated.assignee_id,
                })),
        )
        .await;

    let entity_ids = linked_entity_ids(&state.db, id).await?;
    Ok(Json(IssueResponse::new(updated, entity_ids)))
}

async fn delete_issue(
    State(state): State<AppState>,
    Authenticated(user): Authenticated,
    Path(id): Path<i64>,
) -> Result<StatusCode> {
    let existing = find_issue(&state.db, id).await?;
    require_issue_permission::<IssuesManage>(&state.db, &user, existing.organization_id).await?;

    let organization_id = existing.organization_id;
    let title = existing.title.clone();
    existing.delete(&state.db).await?;

    let _ = state
        .audit
        .log_success(
            AuditEvent::new(AuditAction::IssueDeleted, ResourceType::Issue)
                .resource(id)
                .by(&user)
                .organization(organization_id)
                .details(serde_json::json!({ "title": title })),
        )
        .await;

    Ok(StatusCode::NO_CONTENT)
}

async fn link_entity(
    State(state): State<AppState>,
    Authenticated(user): Authenticated,
    Path((id, entity_id)): Path<(i64, i64)>,
) -> Result<(StatusCode, Json<IssueResponse>)> {
    let existing = find_issue(&state.db, id).await?;
    require_issue_permission::<IssuesManage>(&state.db, &user, existing.organization_id).await?;

    add_link(&state.db, &user, id, entity_id).await?;

    let _ = state
        .audit
        .log_success(
            AuditEvent::new(AuditAction::IssueUpdated, ResourceType::Issue)
                .resource(id)
                .by(&user)
                .organization(existing.organization_id)
                .details(serde_json::json!({ "linked_entity_id": entity_id })),
        )
        .await;

    let entity_ids = linked_entity_ids(&state.db, id).await?;
    Ok((
        StatusCode::CREATED,
        Json(IssueResponse::new(existing, entity_ids)),
    ))
}

async fn unlink_entity(
    State(state): State<AppState>,
    Authenticated(user): Authenticated,
    Path((id, entity_id)): Path<(i64, i64)>,
) -> Result<StatusCode> {
    let existing = find_issue(&state.db, id).await?;
    require_issue_permission::<IssuesManage>(&state.db, &user, existing.organization_id).await?;

    let result = IssueEntity::delete_many()
        .filter(issue_entity::Column::IssueId.eq(id))
        .filter(issue_entity::Column::EntityId.eq(entity_id))
        .exec(&state.db)
        .await?;
    if result.rows_affected == 0 {
        return Err(AppError::NotFound(format!(
            "Entity {} is not linked to issue {}",
            entity_id, id
        )));
    }

    let _ = state
        .audit
        .log_success(
            AuditEvent::new(AuditAction::IssueUpdated, ResourceType::Issue)
                .resource(id)
                .by(&user)
                .organization(existing.organization_id)
                .details(serde_json::json!({ "unlinked_entity_id": entity_id })),
        )
        .await;

    Ok(StatusCode::NO_CONTENT)
}
