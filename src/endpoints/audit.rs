use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::middleware::permissions::{
    require_in_org, AuditManage, AuditView, Authenticated, Authorized, Permission,
};
use crate::models::audit_log::{AuditAction, ResourceType};
use crate::services::audit::{
    apply_retention, clear_old_logs, compliance_report, default_retention_days, get_audit_logs,
    get_audit_stats, AuditEvent, AuditLogQuery, AuditLogResponse, AuditStats, ComplianceReport,
    MAX_RETENTION_DAYS,
};
use crate::services::hierarchy;
use crate::state::AppState;

/// Create audit routes
pub fn audit_routes(state: AppState) -> Router {
    Router::new()
        .route("/", get(list_audit_logs))
        .route("/stats", get(audit_stats))
        .route("/compliance", get(get_compliance_report))
        .route("/clear", post(clear_audit_logs))
        .route("/retention", post(run_retention))
        .with_state(state)
}

/// List audit logs with filtering and pagination
async fn list_audit_logs(
    State(state): State<AppState>,
    _auth: Authorized<AuditView>,
    Query(query): Query<AuditLogQuery>,
) -> Result<Json<AuditLogResponse>> {
    let logs = get_audit_logs(&state.db, query).await?;
    Ok(Json(logs))
}

/// Get audit statistics
async fn audit_stats(
    State(state): State<AppState>,
    _auth: Authorized<AuditView>,
) -> Result<Json<AuditStats>> {
    let stats = get_audit_stats(&state.db).await?;
    Ok(Json(stats))
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct ComplianceQuery {
    /// Window start; 30 days before `to` when absent
    #[param(value_type = Option<String>, format = DateTime)]
    pub from: Option<DateTime<Utc>>,
    /// Window end; now when absent
    #[param(value_type = Option<String>, format = DateTime)]
    pub to: Option<DateTime<Utc>>,
    pub organization_id: Option<i64>,
}

/// Compliance report over a time window. Scoped to one organization, a
/// grant of `audit.view` on that organization is enough.
async fn get_compliance_report(
    State(state): State<AppState>,
    Authenticated(user): Authenticated,
    Query(query): Query<ComplianceQuery>,
) -> Result<Json<ComplianceReport>> {
    match query.organization_id {
        Some(org_id) => {
            hierarchy::find_organization(&state.db, org_id).await?;
            require_in_org::<AuditView>(&state.db, &user, org_id).await?;
        }
        None => {
            if !user.permissions.allows(AuditView::NAME) {
                return Err(AppError::Forbidden(format!(
                    "Permission denied: {} required",
                    AuditView::NAME
                )));
            }
        }
    }

    let to = query.to.unwrap_or_else(Utc::now);
    let from = query.from.unwrap_or(to - Duration::days(30));
    if from > to {
        return Err(AppError::BadRequest(
            "from must not be after to".to_string(),
        ));
    }

    let report = compliance_report(&state.db, from, to, query.organization_id).await?;
    Ok(Json(report))
}

/// Clear old audit logs
#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct ClearLogsRequest {
    pub days: Option<i64>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ClearLogsResponse {
    pub deleted: u64,
    pub message: String,
}

async fn clear_audit_logs(
    State(state): State<AppState>,
    Authorized(user, _): Authorized<AuditManage>,
    Json(request): Json<ClearLogsRequest>,
) -> Result<Json<ClearLogsResponse>> {
    let days = request.days.unwrap_or_else(default_retention_days);
    if !(1..=MAX_RETENTION_DAYS).contains(&days) {
        return Err(AppError::BadRequest(format!(
            "days must be between 1 and {}",
            MAX_RETENTION_DAYS
        )));
    }
    let deleted = clear_old_logs(&state.db, days).await?;

    let _ = state
        .audit
        .log_success(
            AuditEvent::new(AuditAction::AuditLogsCleared, ResourceType::AuditLog)
                .by(&user)
                .details(serde_json::json!({ "days": days, "deleted": deleted })),
        )
        .await;

    Ok(Json(ClearLogsResponse {
        deleted,
        message: format!(
            "Deleted {} audit log entries older than {} days",
            deleted, days
        ),
    }))
}

/// Run the retention policy now instead of waiting for the scheduler
async fn run_retention(
    State(state): State<AppState>,
    Authorized(user, _): Authorized<AuditManage>,
) -> Result<Json<ClearLogsResponse>> {
    let days = default_retention_days();
    let deleted = apply_retention(&state.db, days).await?;

    let _ = state
        .audit
        .log_success(
            AuditEvent::new(AuditAction::AuditLogsCleared, ResourceType::AuditLog)
                .by(&user)
                .details(serde_json::json!({
                    "retention": true,
                    "default_days": days,
                    "deleted": deleted,
                })),
        )
        .await;

    Ok(Json(ClearLogsResponse {
        deleted,
        message: format!(
            "Retention removed {} audit log entries (default window {} days)",
            deleted, days
        ),
    }))
}
