use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use sea_orm::{
    ColumnTrait, Condition, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect,
};
use validator::Validate;

use crate::db::DbConn;
use crate::error::{AppError, Result};
use crate::middleware::permissions::{Authenticated, GroupsView, Permission};
use crate::middleware::AuthenticatedUser;
use crate::models::access_request::{self, AccessRequestStatus};
use crate::models::access_request_decision::Decision;
use crate::models::audit_log::{AuditAction, ResourceType};
use crate::models::prelude::*;
use crate::models::{group_approver, identity_group};
use crate::schemas::{
    page_bounds, page_offset, AccessRequestListQuery, AccessRequestResponse, DecideAccessRequest,
    DecisionOutcomeResponse, Paginated,
};
use crate::services::access_requests;
use crate::services::audit::AuditEvent;
use crate::state::AppState;

/// Create access request routes
pub fn access_requests_routes(state: AppState) -> Router {
    Router::new()
        .route("/", get(list_requests))
        .route("/:id", get(get_request))
        .route("/:id/decide", post(decide_request))
        .route("/:id/cancel", post(cancel_request))
        .with_state(state)
}

/// Groups `user` may decide requests for; `None` when every group qualifies
async fn approvable_groups(db: &DbConn, user: &AuthenticatedUser) -> Result<Option<Vec<i64>>> {
    if user.identity.is_superuser {
        return Ok(None);
    }

    let mut ids: Vec<i64> = GroupApprover::find()
        .filter(group_approver::Column::IdentityId.eq(user.identity.id))
        .all(db)
        .await?
        .into_iter()
        .map(|a| a.group_id)
        .collect();
    ids.extend(
        IdentityGroup::find()
            .filter(identity_group::Column::OwnerIdentityId.eq(user.identity.id))
            .all(db)
            .await?
            .into_iter()
            .map(|g| g.id),
    );
    ids.sort_unstable();
    ids.dedup();
    Ok(Some(ids))
}

/// Whether `user` may look at `request`
async fn can_view(
    db: &DbConn,
    user: &AuthenticatedUser,
    request: &access_request::Model,
) -> Result<bool> {
    if request.requester_id == user.identity.id || user.permissions.allows(GroupsView::NAME) {
        return Ok(true);
    }
    let group = access_requests::find_group(db, request.group_id).await?;
    let approvers = access_requests::approver_ids(db, group.id).await?;
    Ok(access_requests::can_approve(&group, &approvers, &user.identity))
}

// ============================================================================
// Endpoint Handlers
// ============================================================================

async fn list_requests(
    State(state): State<AppState>,
    Authenticated(user): Authenticated,
    Query(query): Query<AccessRequestListQuery>,
) -> Result<Json<Paginated<AccessRequestResponse>>> {
    let (page, per_page) = page_bounds(query.page, query.per_page);
    let approvable = approvable_groups(&state.db, &user).await?;

    let mut select = AccessRequest::find();
    if query.awaiting_me {
        select = select
            .filter(access_request::Column::Status.eq(AccessRequestStatus::Pending))
            .filter(access_request::Column::RequesterId.ne(user.identity.id));
        if let Some(groups) = &approvable {
            select = select.filter(access_request::Column::GroupId.is_in(groups.clone()));
        }
    } else if !user.permissions.allows(GroupsView::NAME) {
        if let Some(groups) = &approvable {
            select = select.filter(
                Condition::any()
                    .add(access_request::Column::RequesterId.eq(user.identity.id))
                    .add(access_request::Column::GroupId.is_in(groups.clone())),
            );
        }
    }

    if let Some(status) = query.status {
        select = select.filter(access_request::Column::Status.eq(status));
    }
    if let Some(group_id) = query.group_id {
        select = select.filter(access_request::Column::GroupId.eq(group_id));
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

async fn get_request(
    State(state): State<AppState>,
    Authenticated(user): Authenticated,
    Path(id): Path<i64>,
) -> Result<Json<AccessRequestResponse>> {
    let request = access_requests::find_request(&state.db, id).await?;
    if !can_view(&state.db, &user, &request).await? {
        // Indistinguishable from a missing request
        return Err(AppError::NotFound(format!(
            "Access request {} not found",
            id
        )));
    }
    let decisions = access_requests::list_decisions(&state.db, id).await?;
    Ok(Json(AccessRequestResponse::new(request, decisions)))
}

async fn decide_request(
    State(state): State<AppState>,
    Authenticated(user): Authenticated,
    Path(id): Path<i64>,
    Json(request): Json<DecideAccessRequest>,
) -> Result<Json<DecisionOutcomeResponse>> {
    request.validate()?;

    let outcome = match access_requests::decide(
        &state.db,
        id,
        &user.identity,
        request.decision,
        request.comment.clone(),
    )
    .await
    {
        Ok(outcome) => outcome,
        Err(e) => {
            let action = match request.decision {
                Decision::Approve => AuditAction::AccessApproved,
                Decision::Deny => AuditAction::AccessDenied,
            };
            let _ = state
                .audit
                .log_failure(
                    AuditEvent::new(action, ResourceType::AccessRequest)
                        .resource(id)
                        .by(&user),
                    &e.to_string(),
                )
                .await;
            return Err(e);
        }
    };

    let action = match outcome.decision.decision {
        Decision::Approve => AuditAction::AccessApproved,
        Decision::Deny => AuditAction::AccessDenied,
    };
    let _ = state
        .audit
        .log_success(
            AuditEvent::new(action, ResourceType::AccessRequest)
                .resource(id)
                .by(&user)
                .details(serde_json::json!({
                    "group_id": outcome.request.group_id,
                    "requester_id": outcome.request.requester_id,
                    "status": outcome.request.status,
                    "approvals": outcome.approvals,
                    "required": outcome.required,
                    "comment": request.comment,
                })),
        )
        .await;

    if let Some(membership) = &outcome.membership {
        let _ = state
            .audit
            .log_success(
                AuditEvent::new(AuditAction::MemberAdded, ResourceType::Group)
                    .resource(membership.group_id)
                    .by(&user)
                    .details(serde_json::json!({
                        "identity_id": membership.identity_id,
                        "access_request_id": id,
                        "expires_at": membership.expires_at,
                    })),
            )
            .await;
    }

    Ok(Json(outcome.into()))
}

async fn cancel_request(
    State(state): State<AppState>,
    Authenticated(user): Authenticated,
    Path(id): Path<i64>,
) -> Result<Json<AccessRequestResponse>> {
    let cancelled = access_requests::cancel(&state.db, id, user.identity.id).await?;

    let _ = state
        .audit
        .log_success(
            AuditEvent::new(AuditAction::AccessRequestCancelled, ResourceType::AccessRequest)
                .resource(id)
                .by(&user)
                .details(serde_json::json!({ "group_id": cancelled.group_id })),
        )
        .await;

    let decisions = access_requests::list_decisions(&state.db, id).await?;
    Ok(Json(AccessRequestResponse::new(cancelled, decisions)))
}
