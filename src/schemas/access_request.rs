use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::access_request::{self, AccessRequestStatus};
use crate::models::access_request_decision::{self, Decision};
use crate::services::access_requests::DecisionOutcome;

#[derive(Debug, Clone, Default, Deserialize, Validate, utoipa::ToSchema)]
pub struct SubmitAccessRequest {
    #[validate(length(max = 2000))]
    pub reason: Option<String>,
    /// Membership lifetime once approved; permanent when absent
    #[validate(range(min = 1, max = 36500))]
    pub membership_days: Option<i32>,
}

#[derive(Debug, Clone, Deserialize, Validate, utoipa::ToSchema)]
pub struct DecideAccessRequest {
    pub decision: Decision,
    #[validate(length(max = 2000))]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct DecisionResponse {
    pub id: i64,
    pub approver_id: i64,
    pub decision: Decision,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<access_request_decision::Model> for DecisionResponse {
    fn from(d: access_request_decision::Model) -> Self {
        Self {
            id: d.id,
            approver_id: d.approver_id,
            decision: d.decision,
            comment: d.comment,
            created_at: d.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct AccessRequestResponse {
    pub id: i64,
    pub group_id: i64,
    pub requester_id: i64,
    pub reason: Option<String>,
    pub status: AccessRequestStatus,
    pub membership_days: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub decisions: Vec<DecisionResponse>,
}

impl AccessRequestResponse {
    pub fn new(
        request: access_request::Model,
        decisions: Vec<access_request_decision::Model>,
    ) -> Self {
        Self {
            id: request.id,
            group_id: request.group_id,
            requester_id: request.requester_id,
            reason: request.reason,
            status: request.status,
            membership_days: request.membership_days,
            created_at: request.created_at,
            decided_at: request.decided_at,
            decisions: decisions.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct DecisionOutcomeResponse {
    pub request_id: i64,
    pub status: AccessRequestStatus,
    pub decision: DecisionResponse,
    pub approvals: usize,
    pub required: usize,
    pub membership_granted: bool,
}

impl From<DecisionOutcome> for DecisionOutcomeResponse {
    fn from(outcome: DecisionOutcome) -> Self {
        Self {
            request_id: outcome.request.id,
            status: outcome.request.status,
            decision: outcome.decision.into(),
            approvals: outcome.approvals,
            required: outcome.required,
            membership_granted: outcome.membership.is_some(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, utoipa::IntoParams)]
pub struct AccessRequestListQuery {
    pub status: Option<AccessRequestStatus>,
    pub group_id: Option<i64>,
    pub requester_id: Option<i64>,
    /// Only requests the caller may decide
    #[serde(default)]
    pub awaiting_me: bool,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}
