use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get},
    Json, Router,
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, ModelTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use validator::Validate;

use crate::db::DbConn;
use crate::error::{AppError, Result};
use crate::middleware::permissions::{
    Authenticated, Authorized, GroupsManage, GroupsView, Permission,
};
use crate::middleware::AuthenticatedUser;
use crate::models::access_request;
use crate::models::audit_log::{AuditAction, ResourceType};
use crate::models::identity_group::{self, ApprovalMode};
use crate::models::prelude::*;
use crate::models::{group_approver, identity_group_membership};
use crate::schemas::{
    page_bounds, page_offset, AccessRequestListQuery, AccessRequestResponse, AddMember, CreateGroup,
    GroupResponse, MemberResponse, Paginated, SetApprovers, SubmitAccessRequest, UpdateGroup,
};
use crate::services::access_requests;
use crate::services::audit::AuditEvent;
use crate::state::AppState;

/// Create group routes
pub fn groups_routes(state: AppState) -> Router {
    Router::new()
        .route("/", get(list_groups).post(create_group))
        .route(
            "/:id",
            get(get_group).patch(update_group).delete(delete_group),
        )
        .route("/:id/approvers", get(list_approvers).put(set_approvers))
        .route("/:id/members", get(list_members).post(add_member))
        .route("/:id/members/:identity_id", delete(remove_member))
        .route(
            "/:id/requests",
            get(list_group_requests).post(submit_request),
        )
        .with_state(state)
}

/// Global `groups.manage` or ownership of the group
fn require_group_admin(user: &AuthenticatedUser, group: &identity_group::Model) -> Result<()> {
    if user.permissions.allows(GroupsManage::NAME)
        || group.owner_identity_id == Some(user.identity.id)
    {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "Permission denied: {} or group ownership required",
            GroupsManage::NAME
        )))
    }
}

async fn ensure_identities_exist(db: &DbConn, ids: &[i64]) -> Result<()> {
    for id in ids {
        if Identity::find_by_id(*id).one(db).await?.is_none() {
            return Err(AppError::BadRequest(format!("Identity {} not found", id)));
        }
    }
    Ok(())
}

async fn ensure_name_free(db: &DbConn, name: &str) -> Result<()> {
    let taken = IdentityGroup::find()
        .filter(identity_group::Column::Name.eq(name))
        .count(db)
        .await?;
    if taken > 0 {
        return Err(AppError::Conflict(format!("Group {} already exists", name)));
    }
    Ok(())
}

fn check_threshold(mode: ApprovalMode, threshold: i32) -> Result<()> {
    if mode == ApprovalMode::Threshold && threshold < 1 {
        return Err(AppError::BadRequest(
            "approval_threshold must be at least 1".to_string(),
        ));
    }
    Ok(())
}

/// Replace the approver list of a group
async fn replace_approvers(db: &DbConn, group_id: i64, identity_ids: &[i64]) -> Result<Vec<i64>> {
    let mut ids = identity_ids.to_vec();
    ids.sort_unstable();
    ids.dedup();
    ensure_identities_exist(db, &ids).await?;

    let txn = db.begin().await?;
    GroupApprover::delete_many()
        .filter(group_approver::Column::GroupId.eq(group_id))
        .exec(&txn)
        .await?;
    for identity_id in &ids {
        group_approver::ActiveModel {
            group_id: Set(group_id),
            identity_id: Set(*identity_id),
            ..Default::default()
        }
        .insert(&txn)
        .await?;
    }
    txn.commit().await?;

    Ok(ids)
}

// ============================================================================
// Group CRUD
// ============================================================================

async fn list_groups(
    State(state): State<AppState>,
    _auth: Authorized<GroupsView>,
) -> Result<Json<Vec<GroupResponse>>> {
    let groups = IdentityGroup::find()
        .order_by_asc(identity_group::Column::Name)
        .all(&state.db)
        .await?;

    let mut responses = Vec::with_capacity(groups.len());
    for group in groups {
        let approvers = access_requests::approver_ids(&state.db, group.id).await?;
        responses.push(GroupResponse::new(group, approvers));
    }
    Ok(Json(responses))
}

async fn create_group(
    State(state): State<AppState>,
    Authorized(user, _): Authorized<GroupsManage>,
    Json(request): Json<CreateGroup>,
) -> Result<(StatusCode, Json<GroupResponse>)> {
    request.validate()?;
    check_threshold(request.approval_mode, request.approval_threshold)?;
    ensure_name_free(&state.db, &request.name).await?;
    if let Some(owner) = request.owner_identity_id {
        ensure_identities_exist(&state.db, &[owner]).await?;
    }
    ensure_identities_exist(&state.db, &request.approver_ids).await?;

    let now = Utc::now();
    let group = identity_group::ActiveModel {
        name: Set(request.name),
        description: Set(request.description),
        owner_identity_id: Set(request.owner_identity_id),
        approval_mode: Set(request.approval_mode),
        approval_threshold: Set(request.approval_threshold),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&state.db)
    .await?;

    let approvers = replace_approvers(&state.db, group.id, &request.approver_ids).await?;

    let _ = state
        .audit
        .log_success(
            AuditEvent::new(AuditAction::GroupCreated, ResourceType::Group)
                .resource(group.id)
                .by(&user)
                .details(serde_json::json!({
                    "name": group.name,
                    "approval_mode": group.approval_mode,
                    "approvers": approvers,
                })),
        )
        .await;

    Ok((StatusCode::CREATED, Json(GroupResponse::new(group, approvers))))
}

async fn get_group(
    State(state): State<AppState>,
    _auth: Authorized<GroupsView>,
    Path(id): Path<i64>,
) -> Result<Json<GroupResponse>> {
    let group = access_requests::find_group(&state.db, id).await?;
    let approvers = access_requests::approver_ids(&state.db, id).await?;
    Ok(Json(GroupResponse::new(group, approvers)))
}

async fn update_group(
    State(state): State<AppState>,
    Authenticated(user): Authenticated,
    Path(id): Path<i64>,
    Json(request): Json<UpdateGroup>,
) -> Result<Json<GroupResponse>> {
    request.validate()?;
    let existing = access_requests::find_group(&state.db, id).await?;
    require_group_admin(&user, &existing)?;

    let mut active: identity_group::ActiveModel = existing.clone().into();
    if let Some(name) = request.name.filter(|n| *n != existing.name) {
        ensure_name_free(&state.db, &name).await?;
        active.name = Set(name);
    }
    if let Some(description) = request.description {
        active.description = Set(Some(description));
    }
    if let Some(owner) = request.owner_identity_id {
        // Ownership changes need the global grant
        if !user.permissions.allows(GroupsManage::NAME) {
            return Err(AppError::Forbidden(
                "Only group administrators may change the owner".to_string(),
            ));
        }
        if let Some(owner) = owner {
            ensure_identities_exist(&state.db, &[owner]).await?;
        }
        active.owner_identity_id = Set(owner);
    }
    let mode = request.approval_mode.unwrap_or(existing.approval_mode);
    let threshold = request
        .approval_threshold
        .unwrap_or(existing.approval_threshold);
    check_threshold(mode, threshold)?;
    active.approval_mode = Set(mode);
    active.approval_threshold = Set(threshold);
    active.updated_at = Set(Utc::now());

    let updated = active.update(&state.db).await?;

    let _ = state
        .audit
        .log_success(
            AuditEvent::new(AuditAction::GroupUpdated, ResourceType::Group)
                .resource(id)
                .by(&user)
                .details(serde_json::json!({
                    "name": updated.name,
                    "approval_mode": updated.approval_mode,
                    "approval_threshold": updated.approval_threshold,
                })),
        )
        .await;

    let approvers = access_requests::approver_ids(&state.db, id).await?;
    Ok(Json(GroupResponse::new(updated, approvers)))
}

async fn delete_group(
    State(state): State<AppState>,
    Authorized(user, _): Authorized<GroupsManage>,
    Path(id): Path<i64>,
) -> Result<StatusCode> {
    let group = access_requests::find_group(&state.db, id).await?;
    let name = group.name.clone();
    group.delete(&state.db).await?;

    let _ = state
        .audit
        .log_success(
            AuditEvent::new(AuditAction::GroupDeleted, ResourceType::Group)
                .resource(id)
                .by(&user)
                .details(serde_json::json!({ "name": name })),
        )
        .await;

    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Approvers
// ============================================================================

async fn list_approvers(
    State(state): State<AppState>,
    _auth: Authorized<GroupsView>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<i64>>> {
    access_requests::find_group(&state.db, id).await?;
    Ok(Json(access_requests::approver_ids(&state.db, id).await?))
}

async fn set_approvers(
    State(state): State<AppState>,
    Authenticated(user): Authenticated,
    Path(id): Path<i64>,
    Json(request): Json<SetApprovers>,
) -> Result<Json<Vec<i64>>> {
    let group = access_requests::find_group(&state.db, id).await?;
    require_group_admin(&user, &group)?;

    let previous = access_requests::approver_ids(&state.db, id).await?;
    let approvers = replace_approvers(&state.db, id, &request.identity_ids).await?;

    let _ = state
        .audit
        .log_success(
            AuditEvent::new(AuditAction::GroupUpdated, ResourceType::Group)
                .resource(id)
                .by(&user)
                .details(serde_json::json!({
                    "previous_approvers": previous,
                    "approvers": approvers,
                })),
        )
        .await;

    Ok(Json(approvers))
}

// ============================================================================
// Members
// ============================================================================

async fn list_members(
    State(state): State<AppState>,
    _auth: Authorized<GroupsView>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<MemberResponse>>> {
    access_requests::find_group(&state.db, id).await?;

    let rows = IdentityGroupMembership::find()
        .filter(identity_group_membership::Column::GroupId.eq(id))
        .order_by_asc(identity_group_membership::Column::Id)
        .find_also_related(Identity)
        .all(&state.db)
        .await?;

    Ok(Json(
        rows.into_iter()
            .map(|(membership, identity)| MemberResponse::new(membership, identity.as_ref()))
            .collect(),
    ))
}

async fn add_member(
    State(state): State<AppState>,
    Authenticated(user): Authenticated,
    Path(id): Path<i64>,
    Json(request): Json<AddMember>,
) -> Result<(StatusCode, Json<MemberResponse>)> {
    let group = access_requests::find_group(&state.db, id).await?;
    require_group_admin(&user, &group)?;

    let member = Identity::find_by_id(request.identity_id)
        .one(&state.db)
        .await?
        .ok_or_else(|| {
            AppError::BadRequest(format!("Identity {} not found", request.identity_id))
        })?;
    if request.expires_at.is_some_and(|at| at <= Utc::now()) {
        return Err(AppError::BadRequest(
            "expires_at must be in the future".to_string(),
        ));
    }

    let membership =
        access_requests::add_membership(&state.db, id, member.id, request.expires_at, None)
            .await?;

    let _ = state
        .audit
        .log_success(
            AuditEvent::new(AuditAction::MemberAdded, ResourceType::Group)
                .resource(id)
                .by(&user)
                .details(serde_json::json!({
                    "identity_id": member.id,
                    "username": member.username,
                    "expires_at": request.expires_at,
                })),
        )
        .await;

    Ok((
        StatusCode::CREATED,
        Json(MemberResponse::new(membership, Some(&member))),
    ))
}

async fn remove_member(
    State(state): State<AppState>,
    Authenticated(user): Authenticated,
    Path((id, identity_id)): Path<(i64, i64)>,
) -> Result<StatusCode> {
    let group = access_requests::find_group(&state.db, id).await?;
    // Members may always leave on their own
    if identity_id != user.identity.id {
        require_group_admin(&user, &group)?;
    }

    let result = IdentityGroupMembership::delete_many()
        .filter(identity_group_membership::Column::GroupId.eq(id))
        .filter(identity_group_membership::Column::IdentityId.eq(identity_id))
        .exec(&state.db)
        .await?;
    if result.rows_affected == 0 {
        return Err(AppError::NotFound(format!(
            "Identity {} is not a member of group {}",
            identity_id, id
        )));
    }

    let _ = state
        .audit
        .log_success(
            AuditEvent::new(AuditAction::MemberRemoved, ResourceType::Group)
                .resource(id)
                .by(&user)
                .details(serde_json::json!({ "identity_id": identity_id })),
        )
        .await;

    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Access requests of one group
// ============================================================================

async fn list_group_requests(
    State(state): State<AppState>,
    Authenticated(user): Authenticated,
    Path(id): Path<i64>,
    Query(query): Query<AccessRequestListQuery>,
) -> Result<Json<Paginated<AccessRequestResponse>>> {
    let group = access_requests::find_group(&state.db, id).await?;
    let approvers = access_requests::approver_ids(&state.db, id).await?;
    let (page, per_page) = page_bounds(query.page, query.per_page);

    let mut select = AccessRequest::find().filter(access_request::Column::GroupId.eq(id));
    // Non-approvers only see their own requests
    if !user.permissions.allows(GroupsView::NAME)
        && !access_requests::can_approve(&group, &approvers, &user.identity)
    {
        select = select.filter(access_request::Column::RequesterId.eq(user.identity.id));
    }
    if let Some(status) = query.status {
        select = select.filter(access_request::Column::Status.eq(status));
    }
    if let Some(requester_id) = query.requester_id {
        select = select.filter(access_request::Column::RequesterId.eq(requester_id));
    }

    let total = select.clone().count(&state.db).await?;
    let requests = select
        .order_by_desc(access_request::Column::CreatedAt)
        .order_by_desc(access_request::Column::Id)
        .offset(page_offset(page, per_page))
        .limit(per_page)
        .all(&state.db)
        .await?;

    let mut items = Vec::with_capacity(requests.len());
    for request in requests {
        let decisions = access_requests::list_decisions(&state.db, request.id).await?;
        items.push(AccessRequestResponse::new(request, decisions));
    }
    Ok(Json(Paginated::new(items, total, (page, per_page))))
}

async fn submit_request(
    State(state): State<AppState>,
    Authenticated(user): Authenticated,
    Path(id): Path<i64>,
    Json(request): Json<SubmitAccessRequest>,
) -> Result<(StatusCode, Json<AccessRequestResponse>)> {
    request.validate()?;

    let submitted = access_requests::submit(
        &state.db,
        id,
        user.identity.id,
        request.reason,
        request.membership_days,
    )
    .await?;

    let _ = state
        .audit
        .log_success(
            AuditEvent::new(AuditAction::AccessRequested, ResourceType::AccessRequest)
                .resource(submitted.id)
                .by(&user)
                .details(serde_json::json!({
                    "group_id": id,
                    "membership_days": submitted.membership_days,
                })),
        )
        .await;

    Ok((
        StatusCode::CREATED,
        Json(AccessRequestResponse::new(submitted, Vec::new())),
    ))
}
