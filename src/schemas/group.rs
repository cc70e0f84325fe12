use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::common::double_option;
use crate::models::identity_group::{self, ApprovalMode};
use crate::models::{identity, identity_group_membership};

fn default_threshold() -> i32 {
    1
}

fn default_mode() -> ApprovalMode {
    ApprovalMode::Any
}

#[derive(Debug, Clone, Deserialize, Validate, utoipa::ToSchema)]
pub struct CreateGroup {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub description: Option<String>,
    pub owner_identity_id: Option<i64>,
    #[serde(default = "default_mode")]
    pub approval_mode: ApprovalMode,
    #[serde(default = "default_threshold")]
    #[validate(range(min = 1))]
    pub approval_threshold: i32,
    #[serde(default)]
    pub approver_ids: Vec<i64>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate, utoipa::ToSchema)]
pub struct UpdateGroup {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<i64>)]
    pub owner_identity_id: Option<Option<i64>>,
    pub approval_mode: Option<ApprovalMode>,
    #[validate(range(min = 1))]
    pub approval_threshold: Option<i32>,
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct GroupResponse {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub owner_identity_id: Option<i64>,
    pub approval_mode: ApprovalMode,
    pub approval_threshold: i32,
    pub approver_ids: Vec<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GroupResponse {
    pub fn new(group: identity_group::Model, approver_ids: Vec<i64>) -> Self {
        Self {
            id: group.id,
            name: group.name,
            description: group.description,
            owner_identity_id: group.owner_identity_id,
            approval_mode: group.approval_mode,
            approval_threshold: group.approval_threshold,
            approver_ids,
            created_at: group.created_at,
            updated_at: group.updated_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize, utoipa::ToSchema)]
pub struct SetApprovers {
    pub identity_ids: Vec<i64>,
}

#[derive(Debug, Clone, Deserialize, utoipa::ToSchema)]
pub struct AddMember {
    pub identity_id: i64,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct MemberResponse {
    pub id: i64,
    pub group_id: i64,
    pub identity_id: i64,
    pub username: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub access_request_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl MemberResponse {
    pub fn new(
        membership: identity_group_membership::Model,
        identity: Option<&identity::Model>,
    ) -> Self {
        Self {
            id: membership.id,
            group_id: membership.group_id,
            identity_id: membership.identity_id,
            username: identity.map(|i| i.username.clone()),
            expires_at: membership.expires_at,
            access_request_id: membership.access_request_id,
            created_at: membership.created_at,
        }
    }
}
