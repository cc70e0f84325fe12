//! Audit trail recording, compliance reporting and retention

use axum::http::StatusCode;
use chrono::{Duration, Utc};
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
use serde_json::json;

mod common;
use common::{
    create_identity, create_organization, create_test_db, get, grant_role, post, test_app,
    token_for,
};
use elder::models::audit_log;

/// Insert an entry dated `days_ago` days back
async fn backdated_entry(db: &DatabaseConnection, days_ago: i64, organization_id: Option<i64>) {
    audit_log::ActiveModel {
        timestamp: Set(Utc::now() - Duration::days(days_ago)),
        actor_id: Set(None),
        actor_name: Set(Some("importer".to_string())),
        action: Set("entity_updated".to_string()),
        resource_type: Set("entity".to_string()),
        resource_id: Set(None),
        organization_id: Set(organization_id),
        details: Set(None),
        ip_address: Set(None),
        success: Set(true),
        error_message: Set(None),
        ..Default::default()
    }
    .insert(db)
    .await
    .unwrap();
}

#[tokio::test]
async fn test_mutations_are_recorded() {
    let db = create_test_db().await;
    let admin = create_identity(&db, "admin", true).await;
    let token = token_for(&admin);

    let (_, org) = post(
        test_app(&db),
        "/api/organizations",
        &token,
        json!({ "name": "Acme" }),
    )
    .await;
    let org_id = org["id"].as_i64().unwrap();
    post(
        test_app(&db),
        "/api/entities",
        &token,
        json!({ "name": "web", "entity_type": "compute", "organization_id": org_id }),
    )
    .await;

    let (status, logs) = get(test_app(&db), "/api/audit", &token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(logs["total"], 2);
    let actions: Vec<&str> = logs["logs"]
        .as_array()
        .unwrap()
        .iter()
        .map(|l| l["action"].as_str().unwrap())
        .collect();
    assert!(actions.contains(&"organization_created"));
    assert!(actions.contains(&"entity_created"));
    assert!(logs["logs"]
        .as_array()
        .unwrap()
        .iter()
        .all(|l| l["actor_name"] == "admin"));

    let (_, filtered) = get(test_app(&db), "/api/audit?action=entity_created", &token).await;
    assert_eq!(filtered["total"], 1);
    assert_eq!(filtered["logs"][0]["organization_id"], org_id);

    let (status, stats) = get(test_app(&db), "/api/audit/stats", &token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["total_events"], 2);
    assert_eq!(stats["failed_events"], 0);
}

#[tokio::test]
async fn test_audit_requires_permission() {
    let db = create_test_db().await;
    let viewer = create_identity(&db, "viewer", false).await;
    grant_role(&db, viewer.id, "viewer", None).await;
    let token = token_for(&viewer);

    let (status, _) = get(test_app(&db), "/api/audit", &token).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = get(test_app(&db), "/api/audit/compliance", &token).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = post(test_app(&db), "/api/audit/clear", &token, json!({ "days": 1 })).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_compliance_report() {
    let db = create_test_db().await;
    let admin = create_identity(&db, "admin", true).await;
    let approver = create_identity(&db, "approver", false).await;
    let requester = create_identity(&db, "requester", false).await;
    let token = token_for(&admin);

    let (_, group) = post(
        test_app(&db),
        "/api/groups",
        &token,
        json!({ "name": "ops", "approver_ids": [approver.id] }),
    )
    .await;
    let group_id = group["id"].as_i64().unwrap();

    let (_, request) = post(
        test_app(&db),
        &format!("/api/groups/{}/requests", group_id),
        &token_for(&requester),
        json!({}),
    )
    .await;
    post(
        test_app(&db),
        &format!("/api/access-requests/{}/decide", request["id"]),
        &token_for(&approver),
        json!({ "decision": "approve" }),
    )
    .await;

    let (status, report) = get(test_app(&db), "/api/audit/compliance", &token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["access_decisions"]["requested"], 1);
    assert_eq!(report["access_decisions"]["approved"], 1);
    assert_eq!(report["access_decisions"]["denied"], 0);
    assert!(report["by_actor"]
        .as_array()
        .unwrap()
        .iter()
        .any(|a| a["name"] == "approver"));

    let (status, _) = get(
        test_app(&db),
        "/api/audit/compliance?from=2026-02-01T00:00:00Z&to=2026-01-01T00:00:00Z",
        &token,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_scoped_compliance_report() {
    let db = create_test_db().await;
    let root = create_organization(&db, "root", None).await;
    let team = create_organization(&db, "team", Some(root.id)).await;
    let other = create_organization(&db, "other", None).await;
    backdated_entry(&db, 1, Some(team.id)).await;
    backdated_entry(&db, 1, Some(other.id)).await;

    let auditor = create_identity(&db, "auditor", false).await;
    grant_role(&db, auditor.id, "admin", Some(root.id)).await;
    let token = token_for(&auditor);

    let (status, report) = get(
        test_app(&db),
        &format!("/api/audit/compliance?organization_id={}", root.id),
        &token,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["organization_id"], root.id);
    assert_eq!(report["total_events"], 1);

    let (status, _) = get(
        test_app(&db),
        &format!("/api/audit/compliance?organization_id={}", other.id),
        &token,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_clear_old_logs() {
    let db = create_test_db().await;
    let admin = create_identity(&db, "admin", true).await;
    let token = token_for(&admin);
    backdated_entry(&db, 100, None).await;
    backdated_entry(&db, 5, None).await;

    let (status, _) = post(test_app(&db), "/api/audit/clear", &token, json!({ "days": 0 })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = post(
        test_app(&db),
        "/api/audit/clear",
        &token,
        json!({ "days": 100_000_000_000i64 }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, cleared) = post(
        test_app(&db),
        "/api/audit/clear",
        &token,
        json!({ "days": 30 }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cleared["deleted"], 1);

    // The recent entry plus the record of the clear itself
    let (_, logs) = get(test_app(&db), "/api/audit", &token).await;
    assert_eq!(logs["total"], 2);
    let (_, cleared_entries) = get(
        test_app(&db),
        "/api/audit?action=audit_logs_cleared",
        &token,
    )
    .await;
    assert_eq!(cleared_entries["total"], 1);
}

#[tokio::test]
async fn test_retention_honours_organization_policy() {
    let db = create_test_db().await;
    let admin = create_identity(&db, "admin", true).await;
    let token = token_for(&admin);

    let strict = create_organization(&db, "strict", None).await;
    let mut active: elder::models::organization::ActiveModel = strict.clone().into();
    active.data_retention_days = Set(Some(7));
    active.update(&db).await.unwrap();
    let lenient = create_organization(&db, "lenient", None).await;

    backdated_entry(&db, 10, Some(strict.id)).await;
    backdated_entry(&db, 10, Some(lenient.id)).await;
    backdated_entry(&db, 10, None).await;

    let (status, result) = post(test_app(&db), "/api/audit/retention", &token, json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["deleted"], 1);

    let (_, remaining) = get(
        test_app(&db),
        &format!("/api/audit?organization_id={}", strict.id),
        &token,
    )
    .await;
    assert_eq!(remaining["total"], 0);
}
