//! Group access requests: submission, approval modes, denial and cancellation

use axum::http::StatusCode;
use serde_json::{json, Value};

mod common;
use common::{create_identity, create_test_db, get, post, test_app, token_for};

/// Create a group as `admin_token` and return its id
async fn create_group(
    db: &sea_orm::DatabaseConnection,
    admin_token: &str,
    name: &str,
    mode: &str,
    approver_ids: &[i64],
) -> i64 {
    let (status, group) = post(
        test_app(db),
        "/api/groups",
        admin_token,
        json!({
            "name": name,
            "approval_mode": mode,
            "approver_ids": approver_ids,
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{group}");
    group["id"].as_i64().unwrap()
}

async fn request_access(
    db: &sea_orm::DatabaseConnection,
    token: &str,
    group_id: i64,
    body: Value,
) -> (StatusCode, Value) {
    post(
        test_app(db),
        &format!("/api/groups/{}/requests", group_id),
        token,
        body,
    )
    .await
}

async fn decide(
    db: &sea_orm::DatabaseConnection,
    token: &str,
    request_id: i64,
    decision: &str,
) -> (StatusCode, Value) {
    post(
        test_app(db),
        &format!("/api/access-requests/{}/decide", request_id),
        token,
        json!({ "decision": decision, "comment": "looked at it" }),
    )
    .await
}

async fn member_ids(db: &sea_orm::DatabaseConnection, token: &str, group_id: i64) -> Vec<i64> {
    let (status, members) = get(
        test_app(db),
        &format!("/api/groups/{}/members", group_id),
        token,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    members
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["identity_id"].as_i64().unwrap())
        .collect()
}

#[tokio::test]
async fn test_any_mode_single_approval_grants_membership() {
    let db = create_test_db().await;
    let admin = create_identity(&db, "admin", true).await;
    let approver = create_identity(&db, "approver", false).await;
    let requester = create_identity(&db, "requester", false).await;
    let admin_token = token_for(&admin);

    let group_id = create_group(&db, &admin_token, "oncall", "any", &[approver.id]).await;

    let (status, request) = request_access(
        &db,
        &token_for(&requester),
        group_id,
        json!({ "reason": "Joining the rotation", "membership_days": 30 }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(request["status"], "pending");
    let request_id = request["id"].as_i64().unwrap();

    let (status, outcome) = decide(&db, &token_for(&approver), request_id, "approve").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["status"], "approved");
    assert_eq!(outcome["membership_granted"], true);
    assert_eq!(outcome["required"], 1);

    assert_eq!(member_ids(&db, &admin_token, group_id).await, vec![requester.id]);

    let (_, members) = get(
        test_app(&db),
        &format!("/api/groups/{}/members", group_id),
        &admin_token,
    )
    .await;
    assert!(members[0]["expires_at"].is_string());
    assert_eq!(members[0]["access_request_id"], request_id);

    // Already decided
    let (status, _) = decide(&db, &token_for(&approver), request_id, "deny").await;
    assert_eq!(status, StatusCode::CONFLICT);

    // Already a member
    let (status, _) = request_access(&db, &token_for(&requester), group_id, json!({})).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_all_mode_waits_for_every_approver() {
    let db = create_test_db().await;
    let admin = create_identity(&db, "admin", true).await;
    let first = create_identity(&db, "first", false).await;
    let second = create_identity(&db, "second", false).await;
    let requester = create_identity(&db, "requester", false).await;
    let admin_token = token_for(&admin);

    let group_id =
        create_group(&db, &admin_token, "prod-access", "all", &[first.id, second.id]).await;

    let (_, request) = request_access(&db, &token_for(&requester), group_id, json!({})).await;
    let request_id = request["id"].as_i64().unwrap();

    let (status, outcome) = decide(&db, &token_for(&first), request_id, "approve").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["status"], "pending");
    assert_eq!(outcome["approvals"], 1);
    assert_eq!(outcome["required"], 2);
    assert!(member_ids(&db, &admin_token, group_id).await.is_empty());

    // One decision per approver
    let (status, _) = decide(&db, &token_for(&first), request_id, "approve").await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, outcome) = decide(&db, &token_for(&second), request_id, "approve").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["status"], "approved");
    assert_eq!(member_ids(&db, &admin_token, group_id).await, vec![requester.id]);

    let (_, detail) = get(
        test_app(&db),
        &format!("/api/access-requests/{}", request_id),
        &token_for(&requester),
    )
    .await;
    assert_eq!(detail["decisions"].as_array().unwrap().len(), 2);
    assert!(detail["decided_at"].is_string());
}

#[tokio::test]
async fn test_deny_resolves_request() {
    let db = create_test_db().await;
    let admin = create_identity(&db, "admin", true).await;
    let approver = create_identity(&db, "approver", false).await;
    let requester = create_identity(&db, "requester", false).await;
    let admin_token = token_for(&admin);

    let group_id = create_group(&db, &admin_token, "finance", "all", &[approver.id]).await;
    let (_, request) = request_access(&db, &token_for(&requester), group_id, json!({})).await;
    let request_id = request["id"].as_i64().unwrap();

    let (status, outcome) = decide(&db, &token_for(&approver), request_id, "deny").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["status"], "denied");
    assert_eq!(outcome["membership_granted"], false);
    assert!(member_ids(&db, &admin_token, group_id).await.is_empty());

    // A fresh request is allowed after a denial
    let (status, _) = request_access(&db, &token_for(&requester), group_id, json!({})).await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_decision_authorization() {
    let db = create_test_db().await;
    let admin = create_identity(&db, "admin", true).await;
    let approver = create_identity(&db, "approver", false).await;
    let bystander = create_identity(&db, "bystander", false).await;
    let admin_token = token_for(&admin);

    let group_id = create_group(&db, &admin_token, "dba", "any", &[approver.id]).await;

    // An approver asking for access cannot approve themselves
    let (_, own) = request_access(&db, &token_for(&approver), group_id, json!({})).await;
    let own_id = own["id"].as_i64().unwrap();
    let (status, _) = decide(&db, &token_for(&approver), own_id, "approve").await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = decide(&db, &token_for(&bystander), own_id, "approve").await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Bystanders cannot even see it
    let (status, _) = get(
        test_app(&db),
        &format!("/api/access-requests/{}", own_id),
        &token_for(&bystander),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // A superuser decision settles it
    let (status, outcome) = decide(&db, &admin_token, own_id, "approve").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["status"], "approved");
}

#[tokio::test]
async fn test_cancel_and_duplicate_pending() {
    let db = create_test_db().await;
    let admin = create_identity(&db, "admin", true).await;
    let approver = create_identity(&db, "approver", false).await;
    let requester = create_identity(&db, "requester", false).await;
    let admin_token = token_for(&admin);
    let requester_token = token_for(&requester);

    let group_id = create_group(&db, &admin_token, "vpn", "any", &[approver.id]).await;

    let (_, request) = request_access(&db, &requester_token, group_id, json!({})).await;
    let request_id = request["id"].as_i64().unwrap();

    let (status, _) = request_access(&db, &requester_token, group_id, json!({})).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = post(
        test_app(&db),
        &format!("/api/access-requests/{}/cancel", request_id),
        &token_for(&approver),
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, cancelled) = post(
        test_app(&db),
        &format!("/api/access-requests/{}/cancel", request_id),
        &requester_token,
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["status"], "cancelled");

    let (status, _) = decide(&db, &token_for(&approver), request_id, "approve").await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = request_access(
        &db,
        &requester_token,
        group_id,
        json!({ "membership_days": 0 }),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_awaiting_me_lists_decidable_requests() {
    let db = create_test_db().await;
    let admin = create_identity(&db, "admin", true).await;
    let approver = create_identity(&db, "approver", false).await;
    let alice = create_identity(&db, "alice", false).await;
    let bob = create_identity(&db, "bob", false).await;
    let admin_token = token_for(&admin);

    let mine = create_group(&db, &admin_token, "mine", "any", &[approver.id]).await;
    let other = create_group(&db, &admin_token, "other", "any", &[]).await;

    request_access(&db, &token_for(&alice), mine, json!({})).await;
    request_access(&db, &token_for(&bob), other, json!({})).await;
    // The approver's own request is not theirs to decide
    request_access(&db, &token_for(&approver), mine, json!({})).await;

    let (status, page) = get(
        test_app(&db),
        "/api/access-requests?awaiting_me=true",
        &token_for(&approver),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total"], 1);
    assert_eq!(page["items"][0]["requester_id"], alice.id);

    // Requesters see only their own
    let (_, page) = get(test_app(&db), "/api/access-requests", &token_for(&bob)).await;
    assert_eq!(page["total"], 1);
    assert_eq!(page["items"][0]["group_id"], other);

    let (_, page) = get(
        test_app(&db),
        "/api/access-requests?status=pending",
        &admin_token,
    )
    .await;
    assert_eq!(page["total"], 3);
}

#[tokio::test]
async fn test_membership_days_is_bounded() {
    let db = create_test_db().await;
    let admin = create_identity(&db, "admin", true).await;
    let approver = create_identity(&db, "approver", false).await;
    let requester = create_identity(&db, "requester", false).await;
    let admin_token = token_for(&admin);
    let group_id = create_group(&db, &admin_token, "oncall", "any", &[approver.id]).await;

    let (status, _) = request_access(
        &db,
        &token_for(&requester),
        group_id,
        json!({ "membership_days": 2_000_000_000 }),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, request) = request_access(
        &db,
        &token_for(&requester),
        group_id,
        json!({ "membership_days": 36_500 }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, outcome) = decide(
        &db,
        &token_for(&approver),
        request["id"].as_i64().unwrap(),
        "approve",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["status"], "approved");
}

#[tokio::test]
async fn test_all_mode_with_requester_among_approvers() {
    let db = create_test_db().await;
    let admin = create_identity(&db, "admin", true).await;
    let approver = create_identity(&db, "approver", false).await;
    let requester = create_identity(&db, "requester", false).await;
    let admin_token = token_for(&admin);
    let group_id =
        create_group(&db, &admin_token, "prod", "all", &[approver.id, requester.id]).await;

    let (_, request) = request_access(&db, &token_for(&requester), group_id, json!({})).await;
    let (status, outcome) = decide(
        &db,
        &token_for(&approver),
        request["id"].as_i64().unwrap(),
        "approve",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["required"], 1);
    assert_eq!(outcome["status"], "approved");
    assert_eq!(member_ids(&db, &admin_token, group_id).await, vec![requester.id]);
}
