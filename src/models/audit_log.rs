use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize, utoipa::ToSchema)]
#[sea_orm(table_name = "audit_logs")]
#[schema(as = AuditLogEntry)]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[schema(value_type = String, format = DateTime)]
    pub timestamp: DateTimeUtc,
    pub actor_id: Option<i64>,
    pub actor_name: Option<String>,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub organization_id: Option<i64>,
    pub details: Option<String>, // JSON string for flexible data
    pub ip_address: Option<String>,
    pub success: bool,
    pub error_message: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

// Audit action types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditAction {
    // Authentication
    Login,
    LoginFailed,
    Logout,
    SsoProvisioned,

    // Identity management
    IdentityCreated,
    IdentityUpdated,
    IdentityDeactivated,
    PasswordChanged,

    // Organization and inventory
    OrganizationCreated,
    OrganizationUpdated,
    OrganizationDeleted,
    EntityCreated,
    EntityUpdated,
    EntityDeleted,
    DependencyCreated,
    DependencyDeleted,

    // RBAC
    RoleCreated,
    RoleUpdated,
    RoleDeleted,
    RolePermissionsChanged,
    RoleAssigned,
    RoleUnassigned,

    // Groups
    GroupCreated,
    GroupUpdated,
    GroupDeleted,
    MemberAdded,
    MemberRemoved,
    AccessRequested,
    AccessApproved,
    AccessDenied,
    AccessRequestCancelled,

    // Issues
    IssueCreated,
    IssueUpdated,
    IssueDeleted,

    // Provisioning
    ScimUserCreated,
    ScimUserUpdated,
    ScimUserDeactivated,

    // Audit maintenance
    AuditLogsCleared,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Login => "login",
            AuditAction::LoginFailed => "login_failed",
            AuditAction::Logout => "logout",
            AuditAction::SsoProvisioned => "sso_provisioned",
            AuditAction::IdentityCreated => "identity_created",
            AuditAction::IdentityUpdated => "identity_updated",
            AuditAction::IdentityDeactivated => "identity_deactivated",
            AuditAction::PasswordChanged => "password_changed",
            AuditAction::OrganizationCreated => "organization_created",
            AuditAction::OrganizationUpdated => "organization_updated",
            AuditAction::OrganizationDeleted => "organization_deleted",
            AuditAction::EntityCreated => "entity_created",
            AuditAction::EntityUpdated => "entity_updated",
            AuditAction::EntityDeleted => "entity_deleted",
            AuditAction::DependencyCreated => "dependency_created",
            AuditAction::DependencyDeleted => "dependency_deleted",
            AuditAction::RoleCreated => "role_created",
            AuditAction::RoleUpdated => "role_updated",
            AuditAction::RoleDeleted => "role_deleted",
            AuditAction::RolePermissionsChanged => "role_permissions_changed",
            AuditAction::RoleAssigned => "role_assigned",
            AuditAction::RoleUnassigned => "role_unassigned",
            AuditAction::GroupCreated => "group_created",
            AuditAction::GroupUpdated => "group_updated",
            AuditAction::GroupDeleted => "group_deleted",
            AuditAction::MemberAdded => "member_added",
            AuditAction::MemberRemoved => "member_removed",
            AuditAction::AccessRequested => "access_requested",
            AuditAction::AccessApproved => "access_approved",
            AuditAction::AccessDenied => "access_denied",
            AuditAction::AccessRequestCancelled => "access_request_cancelled",
            AuditAction::IssueCreated => "issue_created",
            AuditAction::IssueUpdated => "issue_updated",
            AuditAction::IssueDeleted => "issue_deleted",
            AuditAction::ScimUserCreated => "scim_user_created",
            AuditAction::ScimUserUpdated => "scim_user_updated",
            AuditAction::ScimUserDeactivated => "scim_user_deactivated",
            AuditAction::AuditLogsCleared => "audit_logs_cleared",
        }
    }

    /// Actions that change who may do what; surfaced separately in compliance reports
    pub fn is_permission_change(action: &str) -> bool {
        matches!(
            action,
            "role_created"
                | "role_updated"
                | "role_deleted"
                | "role_permissions_changed"
                | "role_assigned"
                | "role_unassigned"
                | "member_added"
                | "member_removed"
        )
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// Resource types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceType {
    Identity,
    Session,
    Organization,
    Entity,
    Dependency,
    Role,
    Group,
    AccessRequest,
    Issue,
    AuditLog,
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceType::Identity => write!(f, "identity"),
            ResourceType::Session => write!(f, "session"),
            ResourceType::Organization => write!(f, "organization"),
            ResourceType::Entity => write!(f, "entity"),
            ResourceType::Dependency => write!(f, "dependency"),
            ResourceType::Role => write!(f, "role"),
            ResourceType::Group => write!(f, "group"),
            ResourceType::AccessRequest => write!(f, "access_request"),
            ResourceType::Issue => write!(f, "issue"),
            ResourceType::AuditLog => write!(f, "audit_log"),
        }
    }
}
