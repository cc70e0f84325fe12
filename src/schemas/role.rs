use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::{permission, role};
use crate::services::rbac::PermissionSet;

#[derive(Debug, Clone, Deserialize, Validate, utoipa::ToSchema)]
pub struct CreateRole {
    #[validate(length(min = 1, max = 64))]
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate, utoipa::ToSchema)]
pub struct UpdateRole {
    #[validate(length(min = 1, max = 64))]
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize, utoipa::ToSchema)]
pub struct SetRolePermissions {
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct RoleResponse {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub is_system: bool,
    pub created_at: DateTime<Utc>,
    pub permissions: Vec<String>,
}

impl RoleResponse {
    pub fn new(role: role::Model, permissions: Vec<String>) -> Self {
        Self {
            id: role.id,
            name: role.name,
            description: role.description,
            is_system: role.is_system,
            created_at: role.created_at,
            permissions,
        }
    }
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct PermissionInfo {
    pub name: String,
    pub resource_type: String,
    pub action: String,
    pub description: Option<String>,
}

impl From<permission::Model> for PermissionInfo {
    fn from(p: permission::Model) -> Self {
        Self {
            name: p.name,
            resource_type: p.resource_type,
            action: p.action,
            description: p.description,
        }
    }
}

#[derive(Debug, Clone, Deserialize, utoipa::IntoParams)]
pub struct RbacCheckQuery {
    pub permission: String,
    pub organization_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct RbacCheckResponse {
    pub permission: String,
    pub organization_id: Option<i64>,
    pub allowed: bool,
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct MyPermissionsResponse {
    pub identity_id: i64,
    pub username: String,
    pub permissions: PermissionSet,
}
