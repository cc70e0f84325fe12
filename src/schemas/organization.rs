use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::common::double_option;
use crate::models::organization;

#[derive(Debug, Clone, Deserialize, Validate, utoipa::ToSchema)]
pub struct CreateOrganization {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub description: Option<String>,
    pub parent_id: Option<i64>,
    pub owner_identity_id: Option<i64>,
    /// Between 1 and 36500
    #[validate(range(min = 1, max = 36500))]
    pub data_retention_days: Option<i32>,
}

/// `parent_id: null` moves the organization to the root
#[derive(Debug, Clone, Default, Deserialize, Validate, utoipa::ToSchema)]
pub struct UpdateOrganization {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<i64>)]
    pub parent_id: Option<Option<i64>>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<i64>)]
    pub owner_identity_id: Option<Option<i64>>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<i32>)]
    pub data_retention_days: Option<Option<i32>>,
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct OrganizationResponse {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub parent_id: Option<i64>,
    pub owner_identity_id: Option<i64>,
    pub data_retention_days: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<organization::Model> for OrganizationResponse {
    fn from(org: organization::Model) -> Self {
        Self {
            id: org.id,
            name: org.name,
            description: org.description,
            parent_id: org.parent_id,
            owner_identity_id: org.owner_identity_id,
            data_retention_days: org.data_retention_days,
            created_at: org.created_at,
            updated_at: org.updated_at,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, utoipa::IntoParams)]
pub struct OrganizationListQuery {
    pub parent_id: Option<i64>,
    /// Substring match
    pub name: Option<String>,
    #[serde(default)]
    pub roots_only: bool,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, utoipa::IntoParams)]
pub struct ChildrenQuery {
    /// Include every descendant instead of direct children only
    #[serde(default)]
    pub recursive: bool,
    pub depth: Option<u32>,
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct ChildOrganization {
    #[serde(flatten)]
    pub organization: OrganizationResponse,
    pub depth: u32,
}

#[derive(Debug, Clone, Default, Deserialize, utoipa::IntoParams)]
pub struct GraphQuery {
    pub depth: Option<u32>,
}
