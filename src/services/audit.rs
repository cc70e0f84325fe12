use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use serde::{Deserialize, Serialize};

use crate::config::CONFIG;
use crate::db::DbConn;
use crate::error::{AppError, Result};
use crate::middleware::AuthenticatedUser;
use crate::models::audit_log::{self, AuditAction, ResourceType};
use crate::models::prelude::*;
use crate::models::{identity, organization};
use crate::schemas::{page_offset, MAX_PAGE};
use crate::services::hierarchy;

/// Longest retention window accepted anywhere, about a century
pub const MAX_RETENTION_DAYS: i64 = 36_500;

/// A single auditable event, filled in by the handler that performed it
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub action: AuditAction,
    pub resource_type: ResourceType,
    pub resource_id: Option<String>,
    pub actor_id: Option<i64>,
    pub actor_name: Option<String>,
    pub organization_id: Option<i64>,
    pub details: Option<serde_json::Value>,
    pub ip_address: Option<String>,
}

impl AuditEvent {
    pub fn new(action: AuditAction, resource_type: ResourceType) -> Self {
        Self {
            action,
            resource_type,
            resource_id: None,
            actor_id: None,
            actor_name: None,
            organization_id: None,
            details: None,
            ip_address: None,
        }
    }

    pub fn resource(mut self, id: impl ToString) -> Self {
        self.resource_id = Some(id.to_string());
        self
    }

    pub fn actor(mut self, identity: &identity::Model) -> Self {
        self.actor_id = Some(identity.id);
        self.actor_name = Some(identity.username.clone());
        self
    }

    /// Actor and client address of an authenticated request
    pub fn by(self, user: &AuthenticatedUser) -> Self {
        let mut event = self.actor(&user.identity);
        event.ip_address = user.ip_address.clone();
        event
    }

    pub fn organization(mut self, id: Option<i64>) -> Self {
        self.organization_id = id;
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn ip(mut self, ip_address: Option<String>) -> Self {
        self.ip_address = ip_address;
        self
    }
}

/// Audit service for logging system events
#[derive(Clone)]
pub struct AuditService {
    db: DbConn,
}

impl AuditService {
    pub fn new(db: DbConn) -> Self {
        Self { db }
    }

    /// Append an audit entry
    pub async fn log(
        &self,
        event: AuditEvent,
        success: bool,
        error_message: Option<String>,
    ) -> Result<audit_log::Model> {
        let entry = audit_log::ActiveModel {
            timestamp: Set(Utc::now()),
            actor_id: Set(event.actor_id),
            actor_name: Set(event.actor_name),
            action: Set(event.action.to_string()),
            resource_type: Set(event.resource_type.to_string()),
            resource_id: Set(event.resource_id),
            organization_id: Set(event.organization_id),
            details: Set(event.details.map(|d| d.to_string())),
            ip_address: Set(event.ip_address),
            success: Set(success),
            error_message: Set(error_message),
            ..Default::default()
        };

        let saved = entry.insert(&self.db).await.map_err(|e| {
            tracing::warn!(action = %event.action, error = %e, "Failed to write audit entry");
            e
        })?;
        Ok(saved)
    }

    /// Log a successful action
    pub async fn log_success(&self, event: AuditEvent) -> Result<audit_log::Model> {
        self.log(event, true, None).await
    }

    /// Log a failed action
    pub async fn log_failure(&self, event: AuditEvent, error: &str) -> Result<audit_log::Model> {
        self.log(event, false, Some(error.to_string())).await
    }
}

/// Query parameters for fetching audit logs
#[derive(Debug, Clone, Default, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AuditLogQuery {
    pub page: Option<u64>,
    pub per_page: Option<u64>,
    pub actor_id: Option<i64>,
    pub action: Option<String>,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub organization_id: Option<i64>,
    pub success: Option<bool>,
    #[param(value_type = Option<String>, format = DateTime)]
    pub from: Option<DateTime<Utc>>,
    #[param(value_type = Option<String>, format = DateTime)]
    pub to: Option<DateTime<Utc>>,
    pub search: Option<String>,
}

/// Paginated audit log response
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct AuditLogResponse {
    pub logs: Vec<audit_log::Model>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
    pub total_pages: u64,
}

/// Get audit logs with filtering and pagination, newest first
pub async fn get_audit_logs(db: &DbConn, query: AuditLogQuery) -> Result<AuditLogResponse> {
    let page = query.page.unwrap_or(1).clamp(1, MAX_PAGE);
    let per_page = query.per_page.unwrap_or(50).clamp(1, 100);
    let offset = page_offset(page, per_page);

    let mut select = AuditLog::find();

    if let Some(actor_id) = query.actor_id {
        select = select.filter(audit_log::Column::ActorId.eq(actor_id));
    }

    if let Some(action) = &query.action {
        select = select.filter(audit_log::Column::Action.eq(action.clone()));
    }

    if let Some(resource_type) = &query.resource_type {
        select = select.filter(audit_log::Column::ResourceType.eq(resource_type.clone()));
    }

    if let Some(resource_id) = &query.resource_id {
        select = select.filter(audit_log::Column::ResourceId.eq(resource_id.clone()));
    }

    if let Some(organization_id) = query.organization_id {
        select = select.filter(audit_log::Column::OrganizationId.eq(organization_id));
    }

    if let Some(success) = query.success {
        select = select.filter(audit_log::Column::Success.eq(success));
    }

    if let Some(from) = query.from {
        select = select.filter(audit_log::Column::Timestamp.gte(from));
    }

    if let Some(to) = query.to {
        select = select.filter(audit_log::Column::Timestamp.lte(to));
    }

    if let Some(search) = &query.search {
        let search = search.as_str();
        select = select.filter(
            Condition::any()
                .add(audit_log::Column::ActorName.contains(search))
                .add(audit_log::Column::Action.contains(search))
                .add(audit_log::Column::ResourceId.contains(search))
                .add(audit_log::Column::Details.contains(search)),
        );
    }

    let total = select.clone().count(db).await?;

    let logs = select
        .order_by_desc(audit_log::Column::Timestamp)
        .order_by_desc(audit_log::Column::Id)
        .offset(offset)
        .limit(per_page)
        .all(db)
        .await?;

    let total_pages = total.div_ceil(per_page);

    Ok(AuditLogResponse {
        logs,
        total,
        page,
        per_page,
        total_pages,
    })
}

/// Audit log statistics
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct AuditStats {
    pub total_events: u64,
    pub successful_events: u64,
    pub failed_events: u64,
    pub events_today: u64,
    pub events_this_week: u64,
    pub top_actions: Vec<NamedCount>,
    pub recent_failures: Vec<audit_log::Model>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, utoipa::ToSchema)]
pub struct NamedCount {
    pub name: String,
    pub count: u64,
}

pub async fn get_audit_stats(db: &DbConn) -> Result<AuditStats> {
    let total_events = AuditLog::find().count(db).await?;

    let failed_events = AuditLog::find()
        .filter(audit_log::Column::Success.eq(false))
        .count(db)
        .await?;

    let now = Utc::now();
    let today_start = now
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .unwrap_or_default()
        .and_utc();

    let events_today = AuditLog::find()
        .filter(audit_log::Column::Timestamp.gte(today_start))
        .count(db)
        .await?;

    let events_this_week = AuditLog::find()
        .filter(audit_log::Column::Timestamp.gte(now - Duration::days(7)))
        .count(db)
        .await?;

    let recent_failures = AuditLog::find()
        .filter(audit_log::Column::Success.eq(false))
        .order_by_desc(audit_log::Column::Timestamp)
        .limit(10)
        .all(db)
        .await?;

    let actions: Vec<String> = AuditLog::find()
        .select_only()
        .column(audit_log::Column::Action)
        .into_tuple()
        .all(db)
        .await?;

    let mut top_actions = count_names(actions);
    top_actions.truncate(10);

    Ok(AuditStats {
        total_events,
        successful_events: total_events - failed_events,
        failed_events,
        events_today,
        events_this_week,
        top_actions,
        recent_failures,
    })
}

/// Tally names, most frequent first (ties broken alphabetically)
fn count_names<I: IntoIterator<Item = String>>(names: I) -> Vec<NamedCount> {
    let mut counts: HashMap<String, u64> = HashMap::new();
    for name in names {
        *counts.entry(name).or_insert(0) += 1;
    }

    let mut counted: Vec<NamedCount> = counts
        .into_iter()
        .map(|(name, count)| NamedCount { name, count })
        .collect();
    counted.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
    counted
}

/// Outcome counts of the access-request workflow within a report window
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, utoipa::ToSchema)]
pub struct AccessDecisionSummary {
    pub requested: u64,
    pub approved: u64,
    pub denied: u64,
    pub cancelled: u64,
}

/// Filtered aggregation of the audit log over a time window
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct ComplianceReport {
    #[schema(value_type = String, format = DateTime)]
    pub from: DateTime<Utc>,
    #[schema(value_type = String, format = DateTime)]
    pub to: DateTime<Utc>,
    pub organization_id: Option<i64>,
    pub total_events: u64,
    pub failed_events: u64,
    pub by_action: Vec<NamedCount>,
    pub by_resource_type: Vec<NamedCount>,
    pub by_actor: Vec<NamedCount>,
    pub access_decisions: AccessDecisionSummary,
    pub permission_changes: Vec<audit_log::Model>,
}

/// Build a compliance report for `[from, to]`, optionally limited to an
/// organization and its descendants
pub async fn compliance_report(
    db: &DbConn,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    organization_id: Option<i64>,
) -> Result<ComplianceReport> {
    let mut select = AuditLog::find()
        .filter(audit_log::Column::Timestamp.gte(from))
        .filter(audit_log::Column::Timestamp.lte(to));

    if let Some(org_id) = organization_id {
        let mut org_ids = vec![org_id];
        org_ids.extend(
            hierarchy::get_all_children(db, org_id, None)
                .await?
                .into_iter()
                .map(|d| d.organization.id),
        );
        select = select.filter(audit_log::Column::OrganizationId.is_in(org_ids));
    }

    let entries = select
        .order_by_asc(audit_log::Column::Timestamp)
        .all(db)
        .await?;

    Ok(summarize(from, to, organization_id, entries))
}

fn summarize(
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    organization_id: Option<i64>,
    entries: Vec<audit_log::Model>,
) -> ComplianceReport {
    let mut access_decisions = AccessDecisionSummary::default();
    for entry in entries.iter().filter(|e| e.success) {
        match entry.action.as_str() {
            a if a == AuditAction::AccessRequested.as_str() => access_decisions.requested += 1,
            a if a == AuditAction::AccessApproved.as_str() => access_decisions.approved += 1,
            a if a == AuditAction::AccessDenied.as_str() => access_decisions.denied += 1,
            a if a == AuditAction::AccessRequestCancelled.as_str() => {
                access_decisions.cancelled += 1
            }
            _ => {}
        }
    }

    let failed_events = entries.iter().filter(|e| !e.success).count() as u64;
    let by_action = count_names(entries.iter().map(|e| e.action.clone()));
    let by_resource_type = count_names(entries.iter().map(|e| e.resource_type.clone()));
    let by_actor = count_names(
        entries
            .iter()
            .map(|e| e.actor_name.clone().unwrap_or_else(|| "system".to_string())),
    );

    let total_events = entries.len() as u64;
    let permission_changes = entries
        .into_iter()
        .filter(|e| AuditAction::is_permission_change(&e.action))
        .collect();

    ComplianceReport {
        from,
        to,
        organization_id,
        total_events,
        failed_events,
        by_action,
        by_resource_type,
        by_actor,
        access_decisions,
        permission_changes,
    }
}

/// `days` before `now`, or `None` when the window is outside the supported range
pub fn retention_cutoff(now: DateTime<Utc>, days: i64) -> Option<DateTime<Utc>> {
    if !(1..=MAX_RETENTION_DAYS).contains(&days) {
        return None;
    }
    Duration::try_days(days).and_then(|window| now.checked_sub_signed(window))
}

/// Clear audit logs older than `days`
pub async fn clear_old_logs(db: &DbConn, days: i64) -> Result<u64> {
    let cutoff = retention_cutoff(Utc::now(), days).ok_or_else(|| {
        AppError::BadRequest(format!(
            "days must be between 1 and {}",
            MAX_RETENTION_DAYS
        ))
    })?;

    let result = AuditLog::delete_many()
        .filter(audit_log::Column::Timestamp.lt(cutoff))
        .exec(db)
        .await?;

    Ok(result.rows_affected)
}

/// Apply retention: entries scoped to an organization with its own
/// `data_retention_days` use that, everything else uses `default_days`
pub async fn apply_retention(db: &DbConn, default_days: i64) -> Result<u64> {
    let now = Utc::now();

    let overrides: BTreeMap<i64, i32> = Organization::find()
        .filter(organization::Column::DataRetentionDays.is_not_null())
        .all(db)
        .await?
        .into_iter()
        .filter_map(|org| org.data_retention_days.map(|days| (org.id, days)))
        .collect();

    let mut deleted = 0;

    for (org_id, days) in &overrides {
        let Some(cutoff) = retention_cutoff(now, i64::from(*days)) else {
            tracing::warn!(
                organization_id = *org_id,
                days = *days,
                "Skipping retention for out-of-range data_retention_days"
            );
            continue;
        };
        let result = AuditLog::delete_many()
            .filter(audit_log::Column::OrganizationId.eq(*org_id))
            .filter(audit_log::Column::Timestamp.lt(cutoff))
            .exec(db)
            .await?;
        deleted += result.rows_affected;
    }

    let default_cutoff = retention_cutoff(now, default_days).ok_or_else(|| {
        AppError::Internal(format!(
            "Default retention of {} days is out of range",
            default_days
        ))
    })?;
    let mut scope = Condition::any().add(audit_log::Column::OrganizationId.is_null());
    scope = if overrides.is_empty() {
        scope.add(audit_log::Column::OrganizationId.is_not_null())
    } else {
        scope.add(audit_log::Column::OrganizationId.is_not_in(overrides.keys().copied()))
    };

    let result = AuditLog::delete_many()
        .filter(scope)
        .filter(audit_log::Column::Timestamp.lt(default_cutoff))
        .exec(db)
        .await?;
    deleted += result.rows_affected;

    Ok(deleted)
}

/// Retention window used when an organization does not set its own
pub fn default_retention_days() -> i64 {
    CONFIG.audit.retention_days
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{create_test_db, create_test_identity, create_test_organization};

    async fn backdate(db: &DbConn, entry: audit_log::Model, days: i64) {
        let mut active: audit_log::ActiveModel = entry.into();
        active.timestamp = Set(Utc::now() - Duration::days(days));
        active.update(db).await.unwrap();
    }

    #[test]
    fn test_count_names_orders_by_frequency() {
        let counted = count_names(
            ["b", "a", "b", "c", "a", "b"]
                .iter()
                .map(|s| s.to_string()),
        );
        assert_eq!(
            counted,
            vec![
                NamedCount { name: "b".into(), count: 3 },
                NamedCount { name: "a".into(), count: 2 },
                NamedCount { name: "c".into(), count: 1 },
            ]
        );
    }

    #[tokio::test]
    async fn test_log_and_filter() {
        let db = create_test_db().await;
        let audit = AuditService::new(db.clone());
        let alice = create_test_identity(&db, "alice", false).await;

        audit
            .log_success(
                AuditEvent::new(AuditAction::EntityCreated, ResourceType::Entity)
                    .resource(7)
                    .actor(&alice),
            )
            .await
            .unwrap();
        audit
            .log_failure(
                AuditEvent::new(AuditAction::LoginFailed, ResourceType::Session),
                "bad password",
            )
            .await
            .unwrap();

        let all = get_audit_logs(&db, AuditLogQuery::default()).await.unwrap();
        assert_eq!(all.total, 2);

        let failures = get_audit_logs(
            &db,
            AuditLogQuery {
                success: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(failures.total, 1);
        assert_eq!(failures.logs[0].error_message.as_deref(), Some("bad password"));

        let by_actor = get_audit_logs(
            &db,
            AuditLogQuery {
                actor_id: Some(alice.id),
                resource_id: Some("7".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(by_actor.total, 1);
        assert_eq!(by_actor.logs[0].action, "entity_created");
    }

    #[tokio::test]
    async fn test_compliance_report_counts() {
        let db = create_test_db().await;
        let audit = AuditService::new(db.clone());
        let admin = create_test_identity(&db, "admin", true).await;
        let org = create_test_organization(&db, "Root", None).await;
        let child = create_test_organization(&db, "Child", Some(org.id)).await;
        let other = create_test_organization(&db, "Other", None).await;

        for action in [
            AuditAction::AccessRequested,
            AuditAction::AccessApproved,
            AuditAction::RoleAssigned,
        ] {
            audit
                .log_success(
                    AuditEvent::new(action, ResourceType::Group)
                        .actor(&admin)
                        .organization(Some(child.id)),
                )
                .await
                .unwrap();
        }
        audit
            .log_success(
                AuditEvent::new(AuditAction::AccessDenied, ResourceType::AccessRequest)
                    .organization(Some(other.id)),
            )
            .await
            .unwrap();

        let from = Utc::now() - Duration::hours(1);
        let to = Utc::now() + Duration::hours(1);

        let scoped = compliance_report(&db, from, to, Some(org.id)).await.unwrap();
        assert_eq!(scoped.total_events, 3);
        assert_eq!(scoped.access_decisions.requested, 1);
        assert_eq!(scoped.access_decisions.approved, 1);
        assert_eq!(scoped.access_decisions.denied, 0);
        assert_eq!(scoped.permission_changes.len(), 1);
        assert_eq!(scoped.by_actor[0].name, "admin");

        let global = compliance_report(&db, from, to, None).await.unwrap();
        assert_eq!(global.total_events, 4);
        assert_eq!(global.access_decisions.denied, 1);
    }

    #[tokio::test]
    async fn test_retention_respects_organization_override() {
        let db = create_test_db().await;
        let audit = AuditService::new(db.clone());

        let short = create_test_organization(&db, "Short", None).await;
        let mut active: organization::ActiveModel = short.clone().into();
        active.data_retention_days = Set(Some(5));
        active.update(&db).await.unwrap();
        let normal = create_test_organization(&db, "Normal", None).await;

        let event = |org: Option<i64>| {
            AuditEvent::new(AuditAction::EntityUpdated, ResourceType::Entity).organization(org)
        };

        let short_old = audit.log_success(event(Some(short.id))).await.unwrap();
        let normal_old = audit.log_success(event(Some(normal.id))).await.unwrap();
        let global_ancient = audit.log_success(event(None)).await.unwrap();
        audit.log_success(event(None)).await.unwrap();

        backdate(&db, short_old, 10).await;
        backdate(&db, normal_old, 10).await;
        backdate(&db, global_ancient, 120).await;

        let deleted = apply_retention(&db, 90).await.unwrap();
        assert_eq!(deleted, 2);

        let remaining = get_audit_logs(&db, AuditLogQuery::default()).await.unwrap();
        assert_eq!(remaining.total, 2);
        assert!(remaining
            .logs
            .iter()
            .all(|l| l.organization_id != Some(short.id)));
    }

    #[tokio::test]
    async fn test_clear_old_logs() {
        let db = create_test_db().await;
        let audit = AuditService::new(db.clone());
        let old = audit
            .log_success(AuditEvent::new(AuditAction::Login, ResourceType::Session))
            .await
            .unwrap();
        audit
            .log_success(AuditEvent::new(AuditAction::Logout, ResourceType::Session))
            .await
            .unwrap();
        backdate(&db, old, 40).await;

        assert_eq!(clear_old_logs(&db, 30).await.unwrap(), 1);
        assert_eq!(clear_old_logs(&db, 30).await.unwrap(), 0);
    }

    #[test]
    fn test_retention_cutoff_bounds() {
        let now = Utc::now();
        assert_eq!(retention_cutoff(now, 1), Some(now - Duration::days(1)));
        assert!(retention_cutoff(now, MAX_RETENTION_DAYS).is_some());
        assert!(retention_cutoff(now, 0).is_none());
        assert!(retention_cutoff(now, MAX_RETENTION_DAYS + 1).is_none());
        assert!(retention_cutoff(now, i64::MAX).is_none());
    }

    #[tokio::test]
    async fn test_clear_old_logs_rejects_huge_windows() {
        let db = create_test_db().await;
        let err = clear_old_logs(&db, 100_000_000_000).await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_retention_skips_out_of_range_override() {
        let db = create_test_db().await;
        let audit = AuditService::new(db.clone());

        // Stored before the API bound existed
        let legacy = create_test_organization(&db, "Legacy", None).await;
        let mut active: organization::ActiveModel = legacy.clone().into();
        active.data_retention_days = Set(Some(2_000_000_000));
        active.update(&db).await.unwrap();

        let kept = audit
            .log_success(
                AuditEvent::new(AuditAction::EntityUpdated, ResourceType::Entity)
                    .organization(Some(legacy.id)),
            )
            .await
            .unwrap();
        backdate(&db, kept, 400).await;
        let expired = audit
            .log_success(AuditEvent::new(AuditAction::Login, ResourceType::Session))
            .await
            .unwrap();
        backdate(&db, expired, 400).await;

        assert_eq!(apply_retention(&db, 90).await.unwrap(), 1);
        let remaining = get_audit_logs(&db, AuditLogQuery::default()).await.unwrap();
        assert_eq!(remaining.total, 1);
        assert_eq!(remaining.logs[0].organization_id, Some(legacy.id));
    }
}
