pub mod access_request;
pub mod access_request_decision;
pub mod audit_log;
pub mod dependency;
pub mod entity;
pub mod group_approver;
pub mod identity;
pub mod identity_group;
pub mod identity_group_membership;
pub mod issue;
pub mod issue_entity;
pub mod organization;
pub mod permission;
pub mod role;
pub mod role_permission;
pub mod user_role;

#[allow(unused_imports)]
pub mod prelude {
    pub use super::access_request::{self, Entity as AccessRequest};
    pub use super::access_request_decision::{self, Entity as AccessRequestDecision};
    pub use super::audit_log::{self, Entity as AuditLog};
    pub use super::dependency::{self, Entity as Dependency};
    pub use super::entity::{self, Entity as TrackedEntity};
    pub use super::group_approver::{self, Entity as GroupApprover};
    pub use super::identity::{self, Entity as Identity};
    pub use super::identity_group::{self, Entity as IdentityGroup};
    pub use super::identity_group_membership::{self, Entity as IdentityGroupMembership};
    pub use super::issue::{self, Entity as Issue};
    pub use super::issue_entity::{self, Entity as IssueEntity};
    pub use super::organization::{self, Entity as Organization};
    pub use super::permission::{self, Entity as Permission};
    pub use super::role::{self, Entity as Role};
    pub use super::role_permission::{self, Entity as RolePermission};
    pub use super::user_role::{self, Entity as UserRole};
}
