use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::identity::{self, AuthProvider, IdentityType};
use crate::models::role;
use crate::models::user_role::{self, RoleScope};

fn default_identity_type() -> IdentityType {
    IdentityType::Human
}

#[derive(Debug, Clone, Deserialize, Validate, utoipa::ToSchema)]
pub struct CreateIdentity {
    #[validate(length(min = 3, max = 64))]
    pub username: String,
    #[validate(email)]
    pub email: Option<String>,
    pub full_name: Option<String>,
    /// Service accounts may be created without a password
    #[validate(length(min = 8))]
    pub password: Option<String>,
    #[serde(default = "default_identity_type")]
    pub identity_type: IdentityType,
    #[serde(default)]
    pub is_superuser: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Validate, utoipa::ToSchema)]
pub struct UpdateIdentity {
    #[validate(email)]
    pub email: Option<String>,
    pub full_name: Option<String>,
    #[validate(length(min = 8))]
    pub password: Option<String>,
    pub is_active: Option<bool>,
    pub is_superuser: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Validate, utoipa::ToSchema)]
pub struct ChangePassword {
    pub current_password: String,
    #[validate(length(min = 8))]
    pub new_password: String,
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct IdentityResponse {
    pub id: i64,
    pub identity_type: IdentityType,
    pub username: String,
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub auth_provider: AuthProvider,
    pub external_id: Option<String>,
    pub is_active: bool,
    pub is_superuser: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<identity::Model> for IdentityResponse {
    fn from(i: identity::Model) -> Self {
        Self {
            id: i.id,
            identity_type: i.identity_type,
            username: i.username,
            email: i.email,
            full_name: i.full_name,
            auth_provider: i.auth_provider,
            external_id: i.external_id,
            is_active: i.is_active,
            is_superuser: i.is_superuser,
            last_login_at: i.last_login_at,
            created_at: i.created_at,
            updated_at: i.updated_at,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, utoipa::IntoParams)]
pub struct IdentityListQuery {
    /// Substring of username, email or full name
    pub search: Option<String>,
    pub identity_type: Option<IdentityType>,
    pub is_active: Option<bool>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, utoipa::ToSchema)]
pub struct AssignRole {
    pub role_id: i64,
    pub scope: RoleScope,
    pub organization_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct RoleAssignmentResponse {
    pub id: i64,
    pub identity_id: i64,
    pub role_id: i64,
    pub role_name: String,
    pub scope: RoleScope,
    pub organization_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl RoleAssignmentResponse {
    pub fn new(assignment: user_role::Model, role: &role::Model) -> Self {
        Self {
            id: assignment.id,
            identity_id: assignment.identity_id,
            role_id: assignment.role_id,
            role_name: role.name.clone(),
            scope: assignment.scope,
            organization_id: assignment.organization_id,
            created_at: assignment.created_at,
        }
    }
}
