use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::common::double_option;
use crate::models::issue::{self, IssuePriority, IssueStatus};

fn default_priority() -> IssuePriority {
    IssuePriority::Medium
}

#[derive(Debug, Clone, Deserialize, Validate, utoipa::ToSchema)]
pub struct CreateIssue {
    #[validate(length(min = 1, max = 500))]
    pub title: String,
    pub description: Option<String>,
    #[serde(default = "default_priority")]
    pub priority: IssuePriority,
    pub organization_id: Option<i64>,
    pub assignee_id: Option<i64>,
    #[serde(default)]
    pub entity_ids: Vec<i64>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate, utoipa::ToSchema)]
pub struct UpdateIssue {
    #[validate(length(min = 1, max = 500))]
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<IssueStatus>,
    pub priority: Option<IssuePriority>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<i64>)]
    pub assignee_id: Option<Option<i64>>,
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct IssueResponse {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub status: IssueStatus,
    pub priority: IssuePriority,
    pub organization_id: Option<i64>,
    pub reporter_id: Option<i64>,
    pub assignee_id: Option<i64>,
    pub entity_ids: Vec<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl IssueResponse {
    pub fn new(issue: issue::Model, entity_ids: Vec<i64>) -> Self {
        Self {
            id: issue.id,
            title: issue.title,
            description: issue.description,
            status: issue.status,
            priority: issue.priority,
            organization_id: issue.organization_id,
            reporter_id: issue.reporter_id,
            assignee_id: issue.assignee_id,
            entity_ids,
            created_at: issue.created_at,
            updated_at: issue.updated_at,
            closed_at: issue.closed_at,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, utoipa::IntoParams)]
pub struct IssueListQuery {
    pub status: Option<IssueStatus>,
    pub priority: Option<IssuePriority>,
    pub organization_id: Option<i64>,
    pub assignee_id: Option<i64>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}
