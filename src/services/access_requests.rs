//! Group access-request workflow
//!
//! A non-member asks to join a group. The group's approvers (owner, listed
//! approvers, superusers) approve or deny. One deny ends the request; the
//! approval count needed depends on the group's approval mode.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};

use crate::db::DbConn;
use crate::error::{AppError, Result};
use crate::models::access_request::{self, AccessRequestStatus};
use crate::models::access_request_decision::{self, Decision};
use crate::models::identity_group::{self, ApprovalMode};
use crate::models::prelude::*;
use crate::models::{group_approver, identity, identity_group_membership};

/// Longest membership an approved request can grant
pub const MAX_MEMBERSHIP_DAYS: i32 = 36_500;

pub async fn find_group(db: &DbConn, group_id: i64) -> Result<identity_group::Model> {
    IdentityGroup::find_by_id(group_id)
        .one(db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Group {} not found", group_id)))
}

pub async fn find_request(db: &DbConn, request_id: i64) -> Result<access_request::Model> {
    AccessRequest::find_by_id(request_id)
        .one(db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Access request {} not found", request_id)))
}

/// Identity ids listed as approvers of a group
pub async fn approver_ids(db: &DbConn, group_id: i64) -> Result<Vec<i64>> {
    Ok(GroupApprover::find()
        .filter(group_approver::Column::GroupId.eq(group_id))
        .order_by_asc(group_approver::Column::IdentityId)
        .all(db)
        .await?
        .into_iter()
        .map(|a| a.identity_id)
        .collect())
}

/// Identities whose approval counts toward an `all` mode group. The
/// requester is never among them since they cannot decide their own request.
fn required_approvers(
    group: &identity_group::Model,
    approvers: &[i64],
    requester_id: i64,
) -> BTreeSet<i64> {
    let mut required: BTreeSet<i64> = approvers.iter().copied().collect();
    if let Some(owner) = group.owner_identity_id {
        required.insert(owner);
    }
    required.remove(&requester_id);
    required
}

/// Approvals needed before `requester_id`'s request in `group` is granted
pub fn required_approvals(
    group: &identity_group::Model,
    approvers: &[i64],
    requester_id: i64,
) -> usize {
    match group.approval_mode {
        ApprovalMode::Any => 1,
        ApprovalMode::All => required_approvers(group, approvers, requester_id)
            .len()
            .max(1),
        ApprovalMode::Threshold => group.approval_threshold.max(1) as usize,
    }
}

/// Whether `identity` may decide requests for `group`
pub fn can_approve(
    group: &identity_group::Model,
    approvers: &[i64],
    identity: &identity::Model,
) -> bool {
    identity.is_superuser
        || group.owner_identity_id == Some(identity.id)
        || approvers.contains(&identity.id)
}

/// Expiry of a membership granted at `now` for `days`
pub fn membership_expiry(now: DateTime<Utc>, days: i32) -> Result<DateTime<Utc>> {
    if !(1..=MAX_MEMBERSHIP_DAYS).contains(&days) {
        return Err(AppError::BadRequest(format!(
            "membership_days must be between 1 and {}",
            MAX_MEMBERSHIP_DAYS
        )));
    }
    Duration::try_days(i64::from(days))
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .ok_or_else(|| AppError::BadRequest("membership_days is out of range".to_string()))
}

pub async fn is_member<C: ConnectionTrait>(
    db: &C,
    group_id: i64,
    identity_id: i64,
) -> Result<bool> {
    let count = IdentityGroupMembership::find()
        .filter(identity_group_membership::Column::GroupId.eq(group_id))
        .filter(identity_group_membership::Column::IdentityId.eq(identity_id))
        .count(db)
        .await?;
    Ok(count > 0)
}

/// Add a membership; an existing one is a conflict
pub async fn add_membership<C: ConnectionTrait>(
    db: &C,
    group_id: i64,
    identity_id: i64,
    expires_at: Option<DateTime<Utc>>,
    access_request_id: Option<i64>,
) -> Result<identity_group_membership::Model> {
    if is_member(db, group_id, identity_id).await? {
        return Err(AppError::Conflict(
            "Identity is already a member of this group".to_string(),
        ));
    }

    let membership = identity_group_membership::ActiveModel {
        group_id: Set(group_id),
        identity_id: Set(identity_id),
        expires_at: Set(expires_at),
        access_request_id: Set(access_request_id),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await?;

    Ok(membership)
}

/// Ask to join a group
pub async fn submit(
    db: &DbConn,
    group_id: i64,
    requester_id: i64,
    reason: Option<String>,
    membership_days: Option<i32>,
) -> Result<access_request::Model> {
    find_group(db, group_id).await?;

    if let Some(days) = membership_days {
        membership_expiry(Utc::now(), days)?;
    }

    if is_member(db, group_id, requester_id).await? {
        return Err(AppError::Conflict(
            "Already a member of this group".to_string(),
        ));
    }

    let pending = AccessRequest::find()
        .filter(access_request::Column::GroupId.eq(group_id))
        .filter(access_request::Column::RequesterId.eq(requester_id))
        .filter(access_request::Column::Status.eq(AccessRequestStatus::Pending))
        .count(db)
        .await?;
    if pending > 0 {
        return Err(AppError::Conflict(
            "A pending request for this group already exists".to_string(),
        ));
    }

    let request = access_request::ActiveModel {
        group_id: Set(group_id),
        requester_id: Set(requester_id),
        reason: Set(reason),
        status: Set(AccessRequestStatus::Pending),
        membership_days: Set(membership_days),
        created_at: Set(Utc::now()),
        decided_at: Set(None),
        ..Default::default()
    }
    .insert(db)
    .await?;

    Ok(request)
}

/// Result of recording one decision
#[derive(Debug, Clone)]
pub struct DecisionOutcome {
    pub request: access_request::Model,
    pub decision: access_request_decision::Model,
    /// Approvals recorded so far and approvals needed
    pub approvals: usize,
    pub required: usize,
    /// Set when this decision granted the membership
    pub membership: Option<identity_group_membership::Model>,
}

/// Record an approver's decision and resolve the request when it is settled
pub async fn decide(
    db: &DbConn,
    request_id: i64,
    approver: &identity::Model,
    decision: Decision,
    comment: Option<String>,
) -> Result<DecisionOutcome> {
    let request = find_request(db, request_id).await?;
    if request.status != AccessRequestStatus::Pending {
        return Err(AppError::Conflict(format!(
            "Access request is already {}",
            status_name(request.status)
        )));
    }

    let group = find_group(db, request.group_id).await?;
    let approvers = approver_ids(db, group.id).await?;

    if request.requester_id == approver.id {
        return Err(AppError::Forbidden(
            "Requesters cannot decide their own access request".to_string(),
        ));
    }
    if !can_approve(&group, &approvers, approver) {
        return Err(AppError::Forbidden(
            "Not an approver for this group".to_string(),
        ));
    }

    let expires_at = request
        .membership_days
        .map(|days| membership_expiry(Utc::now(), days))
        .transpose()?;

    // Commit the decision together with its outcome
    let txn = db.begin().await?;

    let already = AccessRequestDecision::find()
        .filter(access_request_decision::Column::RequestId.eq(request.id))
        .filter(access_request_decision::Column::ApproverId.eq(approver.id))
        .count(&txn)
        .await?;
    if already > 0 {
        return Err(AppError::Conflict(
            "This approver has already decided on the request".to_string(),
        ));
    }

    let recorded = access_request_decision::ActiveModel {
        request_id: Set(request.id),
        approver_id: Set(approver.id),
        decision: Set(decision),
        comment: Set(comment),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    let required = required_approvals(&group, &approvers, request.requester_id);

    if decision == Decision::Deny {
        let request = resolve(&txn, request, AccessRequestStatus::Denied).await?;
        txn.commit().await?;
        return Ok(DecisionOutcome {
            request,
            decision: recorded,
            approvals: 0,
            required,
            membership: None,
        });
    }

    let approvals = AccessRequestDecision::find()
        .filter(access_request_decision::Column::RequestId.eq(request.id))
        .filter(access_request_decision::Column::Decision.eq(Decision::Approve))
        .all(&txn)
        .await?;

    let counted = match group.approval_mode {
        ApprovalMode::All => {
            let needed = required_approvers(&group, &approvers, request.requester_id);
            if needed.is_empty() {
                approvals.len()
            } else {
                approvals
                    .iter()
                    .filter(|d| needed.contains(&d.approver_id))
                    .count()
            }
        }
        ApprovalMode::Any | ApprovalMode::Threshold => approvals.len(),
    };

    if !(approver.is_superuser || counted >= required) {
        txn.commit().await?;
        return Ok(DecisionOutcome {
            request,
            decision: recorded,
            approvals: counted,
            required,
            membership: None,
        });
    }

    let membership = if is_member(&txn, group.id, request.requester_id).await? {
        None
    } else {
        Some(
            add_membership(&txn, group.id, request.requester_id, expires_at, Some(request.id))
                .await?,
        )
    };
    let request = resolve(&txn, request, AccessRequestStatus::Approved).await?;
    txn.commit().await?;

    Ok(DecisionOutcome {
        request,
        decision: recorded,
        approvals: counted,
        required,
        membership,
    })
}

/// Withdraw a pending request; only its requester may do so
pub async fn cancel(
    db: &DbConn,
    request_id: i64,
    requester_id: i64,
) -> Result<access_request::Model> {
    let request = find_request(db, request_id).await?;
    if request.requester_id != requester_id {
        return Err(AppError::Forbidden(
            "Only the requester can cancel an access request".to_string(),
        ));
    }
    if request.status != AccessRequestStatus::Pending {
        return Err(AppError::Conflict(format!(
            "Access request is already {}",
            status_name(request.status)
        )));
    }

    resolve(db, request, AccessRequestStatus::Cancelled).await
}

async fn resolve<C: ConnectionTrait>(
    db: &C,
    request: access_request::Model,
    status: AccessRequestStatus,
) -> Result<access_request::Model> {
    let mut active: access_request::ActiveModel = request.into();
    active.status = Set(status);
    active.decided_at = Set(Some(Utc::now()));
    Ok(active.update(db).await?)
}

/// Decisions recorded on a request, oldest first
pub async fn list_decisions(
    db: &DbConn,
    request_id: i64,
) -> Result<Vec<access_request_decision::Model>> {
    Ok(AccessRequestDecision::find()
        .filter(access_request_decision::Column::RequestId.eq(request_id))
        .order_by_asc(access_request_decision::Column::Id)
        .all(db)
        .await?)
}

/// Delete memberships whose expiry has passed
pub async fn remove_expired_memberships(db: &DbConn, now: DateTime<Utc>) -> Result<u64> {
    let result = IdentityGroupMembership::delete_many()
        .filter(identity_group_membership::Column::ExpiresAt.is_not_null())
        .filter(identity_group_membership::Column::ExpiresAt.lte(now))
        .exec(db)
        .await?;
    Ok(result.rows_affected)
}

pub fn status_name(status: AccessRequestStatus) -> &'static str {
    match status {
        AccessRequestStatus::Pending => "pending",
        AccessRequestStatus::Approved => "approved",
        AccessRequestStatus::Denied => "denied",
        AccessRequestStatus::Cancelled => "cancelled",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{add_test_approver, create_test_db, create_test_group, create_test_identity};

    fn group(mode: ApprovalMode, threshold: i32, owner: Option<i64>) -> identity_group::Model {
        identity_group::Model {
            id: 1,
            name: "ops".into(),
            description: None,
            owner_identity_id: owner,
            approval_mode: mode,
            approval_threshold: threshold,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_required_approvals_per_mode() {
        let requester = 99;
        let required = |g: identity_group::Model, approvers: &[i64]| {
            required_approvals(&g, approvers, requester)
        };
        assert_eq!(required(group(ApprovalMode::Any, 5, Some(1)), &[2, 3]), 1);
        assert_eq!(required(group(ApprovalMode::All, 1, Some(1)), &[2, 3]), 3);
        // Owner listed as approver too is counted once
        assert_eq!(required(group(ApprovalMode::All, 1, Some(2)), &[2, 3]), 2);
        assert_eq!(required(group(ApprovalMode::All, 1, None), &[]), 1);
        assert_eq!(required(group(ApprovalMode::Threshold, 2, None), &[2, 3, 4]), 2);
        assert_eq!(required(group(ApprovalMode::Threshold, 0, None), &[]), 1);
        // A requester who is also an approver is not waited on
        assert_eq!(required_approvals(&group(ApprovalMode::All, 1, Some(1)), &[2, 3], 3), 2);
        assert_eq!(required_approvals(&group(ApprovalMode::All, 1, Some(3)), &[3], 3), 1);
    }

    #[tokio::test]
    async fn test_any_mode_single_approval_grants_membership() {
        let db = create_test_db().await;
        let owner = create_test_identity(&db, "owner", false).await;
        let requester = create_test_identity(&db, "requester", false).await;
        let g = create_test_group(&db, "ops", ApprovalMode::Any, 1, Some(owner.id)).await;

        let request = submit(&db, g.id, requester.id, Some("on call".into()), Some(30))
            .await
            .unwrap();
        assert_eq!(request.status, AccessRequestStatus::Pending);

        let outcome = decide(&db, request.id, &owner, Decision::Approve, None)
            .await
            .unwrap();
        assert_eq!(outcome.request.status, AccessRequestStatus::Approved);
        let membership = outcome.membership.unwrap();
        assert_eq!(membership.identity_id, requester.id);
        assert_eq!(membership.access_request_id, Some(request.id));
        assert!(membership.expires_at.unwrap() > Utc::now() + Duration::days(29));
        assert!(is_member(&db, g.id, requester.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_all_mode_waits_for_every_approver() {
        let db = create_test_db().await;
        let owner = create_test_identity(&db, "owner", false).await;
        let second = create_test_identity(&db, "second", false).await;
        let requester = create_test_identity(&db, "requester", false).await;
        let g = create_test_group(&db, "prod", ApprovalMode::All, 1, Some(owner.id)).await;
        add_test_approver(&db, g.id, second.id).await;

        let request = submit(&db, g.id, requester.id, None, None).await.unwrap();

        let first = decide(&db, request.id, &owner, Decision::Approve, None)
            .await
            .unwrap();
        assert_eq!(first.request.status, AccessRequestStatus::Pending);
        assert_eq!((first.approvals, first.required), (1, 2));

        let err = decide(&db, request.id, &owner, Decision::Approve, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let last = decide(&db, request.id, &second, Decision::Approve, None)
            .await
            .unwrap();
        assert_eq!(last.request.status, AccessRequestStatus::Approved);
        assert!(last.membership.is_some());
        assert!(last.membership.unwrap().expires_at.is_none());
    }

    #[tokio::test]
    async fn test_all_mode_does_not_wait_for_the_requester() {
        let db = create_test_db().await;
        let owner = create_test_identity(&db, "owner", false).await;
        let requester = create_test_identity(&db, "requester", false).await;
        let g = create_test_group(&db, "prod", ApprovalMode::All, 1, Some(owner.id)).await;
        add_test_approver(&db, g.id, requester.id).await;

        let request = submit(&db, g.id, requester.id, None, None).await.unwrap();
        let outcome = decide(&db, request.id, &owner, Decision::Approve, None)
            .await
            .unwrap();
        assert_eq!((outcome.approvals, outcome.required), (1, 1));
        assert_eq!(outcome.request.status, AccessRequestStatus::Approved);
        assert!(is_member(&db, g.id, requester.id).await.unwrap());
    }

    #[test]
    fn test_membership_expiry_bounds() {
        let now = Utc::now();
        assert_eq!(membership_expiry(now, 30).unwrap(), now + Duration::days(30));
        assert!(membership_expiry(now, MAX_MEMBERSHIP_DAYS).is_ok());
        for days in [0, MAX_MEMBERSHIP_DAYS + 1, 2_000_000_000] {
            let err = membership_expiry(now, days).unwrap_err();
            assert!(matches!(err, AppError::BadRequest(_)));
        }
    }

    #[tokio::test]
    async fn test_oversized_membership_days() {
        let db = create_test_db().await;
        let owner = create_test_identity(&db, "owner", false).await;
        let requester = create_test_identity(&db, "requester", false).await;
        let g = create_test_group(&db, "ops", ApprovalMode::Any, 1, Some(owner.id)).await;

        let err = submit(&db, g.id, requester.id, None, Some(2_000_000_000))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));

        // A row stored before the bound existed fails the decision cleanly
        let request = submit(&db, g.id, requester.id, None, Some(7)).await.unwrap();
        let mut active: access_request::ActiveModel = request.clone().into();
        active.membership_days = Set(Some(2_000_000_000));
        active.update(&db).await.unwrap();

        let err = decide(&db, request.id, &owner, Decision::Approve, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
        assert!(list_decisions(&db, request.id).await.unwrap().is_empty());
        let request = find_request(&db, request.id).await.unwrap();
        assert_eq!(request.status, AccessRequestStatus::Pending);
    }

    #[tokio::test]
    async fn test_failed_grant_rolls_back_the_decision() {
        let db = create_test_db().await;
        let owner = create_test_identity(&db, "owner", false).await;
        let requester = create_test_identity(&db, "requester", false).await;
        let g = create_test_group(&db, "ops", ApprovalMode::Any, 1, Some(owner.id)).await;
        let request = submit(&db, g.id, requester.id, None, None).await.unwrap();

        // Membership lookups fail after the vote is written
        db.execute_unprepared("DROP TABLE identity_group_memberships")
            .await
            .unwrap();

        assert!(decide(&db, request.id, &owner, Decision::Approve, None)
            .await
            .is_err());
        assert!(list_decisions(&db, request.id).await.unwrap().is_empty());
        let request = find_request(&db, request.id).await.unwrap();
        assert_eq!(request.status, AccessRequestStatus::Pending);
    }

    #[tokio::test]
    async fn test_threshold_mode() {
        let db = create_test_db().await;
        let requester = create_test_identity(&db, "requester", false).await;
        let g = create_test_group(&db, "db", ApprovalMode::Threshold, 2, None).await;
        let mut approvers = Vec::new();
        for name in ["a1", "a2", "a3"] {
            let a = create_test_identity(&db, name, false).await;
            add_test_approver(&db, g.id, a.id).await;
            approvers.push(a);
        }

        let request = submit(&db, g.id, requester.id, None, None).await.unwrap();
        let one = decide(&db, request.id, &approvers[0], Decision::Approve, None)
            .await
            .unwrap();
        assert_eq!(one.request.status, AccessRequestStatus::Pending);

        let two = decide(&db, request.id, &approvers[2], Decision::Approve, None)
            .await
            .unwrap();
        assert_eq!(two.request.status, AccessRequestStatus::Approved);

        let err = decide(&db, request.id, &approvers[1], Decision::Approve, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_deny_is_final() {
        let db = create_test_db().await;
        let a1 = create_test_identity(&db, "a1", false).await;
        let a2 = create_test_identity(&db, "a2", false).await;
        let requester = create_test_identity(&db, "requester", false).await;
        let g = create_test_group(&db, "sec", ApprovalMode::Threshold, 2, None).await;
        add_test_approver(&db, g.id, a1.id).await;
        add_test_approver(&db, g.id, a2.id).await;

        let request = submit(&db, g.id, requester.id, None, None).await.unwrap();
        decide(&db, request.id, &a1, Decision::Approve, None)
            .await
            .unwrap();
        let denied = decide(&db, request.id, &a2, Decision::Deny, Some("no".into()))
            .await
            .unwrap();
        assert_eq!(denied.request.status, AccessRequestStatus::Denied);
        assert!(denied.request.decided_at.is_some());
        assert!(!is_member(&db, g.id, requester.id).await.unwrap());
        assert_eq!(list_decisions(&db, request.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_decision_permissions() {
        let db = create_test_db().await;
        let owner = create_test_identity(&db, "owner", false).await;
        let stranger = create_test_identity(&db, "stranger", false).await;
        let root = create_test_identity(&db, "root", true).await;
        let requester = create_test_identity(&db, "requester", false).await;
        let g = create_test_group(&db, "ops", ApprovalMode::Threshold, 3, Some(owner.id)).await;
        add_test_approver(&db, g.id, requester.id).await;

        let request = submit(&db, g.id, requester.id, None, None).await.unwrap();

        let err = decide(&db, request.id, &stranger, Decision::Approve, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let err = decide(&db, request.id, &requester, Decision::Approve, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        // A superuser approval settles the request regardless of mode
        let outcome = decide(&db, request.id, &root, Decision::Approve, None)
            .await
            .unwrap();
        assert_eq!(outcome.request.status, AccessRequestStatus::Approved);
    }

    #[tokio::test]
    async fn test_submit_conflicts_and_cancel() {
        let db = create_test_db().await;
        let owner = create_test_identity(&db, "owner", false).await;
        let requester = create_test_identity(&db, "requester", false).await;
        let g = create_test_group(&db, "ops", ApprovalMode::Any, 1, Some(owner.id)).await;

        let request = submit(&db, g.id, requester.id, None, None).await.unwrap();
        let err = submit(&db, g.id, requester.id, None, None).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let err = cancel(&db, request.id, owner.id).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let cancelled = cancel(&db, request.id, requester.id).await.unwrap();
        assert_eq!(cancelled.status, AccessRequestStatus::Cancelled);

        let err = cancel(&db, request.id, requester.id).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let err = decide(&db, request.id, &owner, Decision::Approve, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        add_membership(&db, g.id, requester.id, None, None).await.unwrap();
        let err = submit(&db, g.id, requester.id, None, None).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        let err = add_membership(&db, g.id, requester.id, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_remove_expired_memberships() {
        let db = create_test_db().await;
        let a = create_test_identity(&db, "a", false).await;
        let b = create_test_identity(&db, "b", false).await;
        let c = create_test_identity(&db, "c", false).await;
        let g = create_test_group(&db, "ops", ApprovalMode::Any, 1, None).await;

        add_membership(&db, g.id, a.id, Some(Utc::now() - Duration::hours(1)), None)
            .await
            .unwrap();
        add_membership(&db, g.id, b.id, Some(Utc::now() + Duration::days(1)), None)
            .await
            .unwrap();
        add_membership(&db, g.id, c.id, None, None).await.unwrap();

        assert_eq!(remove_expired_memberships(&db, Utc::now()).await.unwrap(), 1);
        assert!(!is_member(&db, g.id, a.id).await.unwrap());
        assert!(is_member(&db, g.id, b.id).await.unwrap());
        assert!(is_member(&db, g.id, c.id).await.unwrap());
    }
}
