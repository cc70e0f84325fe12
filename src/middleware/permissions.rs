//! Permission system with type-safe authorization extractors
//!
//! Usage in handlers:
//! ```ignore
//! use crate::middleware::{Authorized, permissions::*};
//!
//! async fn list_roles(
//!     Authorized(user, _): Authorized<RolesView>,
//!     State(state): State<AppState>,
//! ) -> Result<Json<Vec<RoleResponse>>> {
//!     // Permission already verified - just use user
//! }
//! ```
//!
//! `Authorized<P>` is a global check. Handlers that act on one organization
//! take `Authenticated` and call [`require_in_org`], which also accepts a
//! grant scoped to the organization or any of its ancestors.

use std::collections::BTreeSet;
use std::marker::PhantomData;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

use crate::db::DbConn;
use crate::error::{AppError, Result};
use crate::middleware::AuthenticatedUser;
use crate::services::hierarchy;

/// Trait for permission marker types
pub trait Permission: Send + Sync + 'static {
    /// The permission string (e.g., "entities.view")
    const NAME: &'static str;
}

/// Macro to define permission types
///
/// Creates zero-sized marker types that implement `Permission`, plus the
/// `ALL_PERMISSIONS` list the seed migration inserts.
macro_rules! define_permissions {
    ($($(#[$meta:meta])* $name:ident => $perm:expr),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy)]
            pub struct $name;

            impl Permission for $name {
                const NAME: &'static str = $perm;
            }
        )*

        /// Every built-in permission name
        pub const ALL_PERMISSIONS: &[&str] = &[$($perm),*];
    };
}

define_permissions! {
    // Organizations
    /// View organizations, their hierarchy and graph
    OrganizationsView => "organizations.view",
    /// Create, update, reparent, delete organizations
    OrganizationsManage => "organizations.manage",

    // Entities
    /// View entities
    EntitiesView => "entities.view",
    /// Create, update, delete entities
    EntitiesManage => "entities.manage",

    // Dependencies
    /// View dependency edges and walks
    DependenciesView => "dependencies.view",
    /// Create and delete dependency edges
    DependenciesManage => "dependencies.manage",

    // Identities
    /// View identities
    IdentitiesView => "identities.view",
    /// Create, update, deactivate identities
    IdentitiesManage => "identities.manage",

    // Groups
    /// View groups, members and access requests
    GroupsView => "groups.view",
    /// Manage groups, approvers and memberships
    GroupsManage => "groups.manage",

    // Roles
    /// View roles and assignments
    RolesView => "roles.view",
    /// Create, update, delete and assign roles
    RolesManage => "roles.manage",

    // Issues
    /// View issues
    IssuesView => "issues.view",
    /// Create, update, delete issues
    IssuesManage => "issues.manage",

    // Audit
    /// View audit logs and compliance reports
    AuditView => "audit.view",
    /// Clear old entries
    AuditManage => "audit.manage",
}

/// Permissions of the built-in `editor` role
pub const DEFAULT_EDITOR_PERMISSIONS: &[&str] = &[
    OrganizationsView::NAME,
    OrganizationsManage::NAME,
    EntitiesView::NAME,
    EntitiesManage::NAME,
    DependenciesView::NAME,
    DependenciesManage::NAME,
    IssuesView::NAME,
    IssuesManage::NAME,
    GroupsView::NAME,
];

/// Permissions of the built-in `viewer` role
pub const DEFAULT_VIEWER_PERMISSIONS: &[&str] = &[
    OrganizationsView::NAME,
    EntitiesView::NAME,
    DependenciesView::NAME,
    IdentitiesView::NAME,
    GroupsView::NAME,
    RolesView::NAME,
    IssuesView::NAME,
];

fn auth_user(parts: &Parts) -> Result<&AuthenticatedUser> {
    parts
        .extensions
        .get::<AuthenticatedUser>()
        .ok_or_else(|| AppError::Unauthorized("Authentication required".to_string()))
}

fn denied(permission: &str) -> AppError {
    AppError::Forbidden(format!("Permission denied: {} required", permission))
}

/// Extractor that requires a specific permission granted globally
///
/// If the permission check fails, a 403 Forbidden error is returned.
///
/// # Example
/// ```ignore
/// async fn delete_role(
///     Authorized(user, _): Authorized<RolesManage>,
///     Path(id): Path<i64>,
/// ) -> Result<()> {
///     // User is guaranteed to hold "roles.manage"
/// }
/// ```
#[derive(Debug, Clone)]
pub struct Authorized<P: Permission>(pub AuthenticatedUser, pub PhantomData<P>);

impl<P: Permission> Authorized<P> {
    pub fn user(&self) -> &AuthenticatedUser {
        &self.0
    }

    pub fn user_id(&self) -> i64 {
        self.0.identity.id
    }
}

#[async_trait]
impl<S, P> FromRequestParts<S> for Authorized<P>
where
    S: Send + Sync,
    P: Permission,
{
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        let user = auth_user(parts)?;

        if !user.permissions.allows(P::NAME) {
            return Err(denied(P::NAME));
        }

        Ok(Authorized(user.clone(), PhantomData))
    }
}

/// Extractor for any authenticated identity (no specific permission required)
#[derive(Debug, Clone)]
pub struct Authenticated(pub AuthenticatedUser);

impl Authenticated {
    pub fn user(&self) -> &AuthenticatedUser {
        &self.0
    }

    pub fn user_id(&self) -> i64 {
        self.0.identity.id
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Authenticated
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        Ok(Authenticated(auth_user(parts)?.clone()))
    }
}

/// Whether `user` holds `permission` on `org_id`, globally or through a
/// grant on the organization or one of its ancestors
pub async fn allowed_in_org(
    db: &DbConn,
    user: &AuthenticatedUser,
    permission: &str,
    org_id: i64,
) -> Result<bool> {
    if user.permissions.allows(permission) {
        return Ok(true);
    }
    if user.permissions.scoped.is_empty() {
        return Ok(false);
    }
    let lineage = hierarchy::lineage_ids(db, org_id).await?;
    Ok(user.permissions.allows_in(permission, &lineage))
}

/// Scoped counterpart of `Authorized<P>`
pub async fn require_in_org<P: Permission>(
    db: &DbConn,
    user: &AuthenticatedUser,
    org_id: i64,
) -> Result<()> {
    if allowed_in_org(db, user, P::NAME, org_id).await? {
        Ok(())
    } else {
        Err(denied(P::NAME))
    }
}

/// Organizations whose records `user` may see under `P`
///
/// `None` means unrestricted (global grant). Otherwise the scoped grants
/// expanded to their descendants; an empty set means nothing is visible.
pub async fn visible_organizations<P: Permission>(
    db: &DbConn,
    user: &AuthenticatedUser,
) -> Result<Option<BTreeSet<i64>>> {
    if user.permissions.allows(P::NAME) {
        return Ok(None);
    }

    let mut visible = BTreeSet::new();
    for org_id in user.permissions.scoped_organizations(P::NAME) {
        if !visible.insert(org_id) {
            continue;
        }
        for child in hierarchy::get_all_children(db, org_id, None).await? {
            visible.insert(child.organization.id);
        }
    }
    Ok(Some(visible))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::rbac;
    use crate::test_helpers::{
        assign_test_role, create_test_db, create_test_identity, create_test_organization,
    };

    #[test]
    fn test_permission_names() {
        assert_eq!(OrganizationsView::NAME, "organizations.view");
        assert_eq!(AuditManage::NAME, "audit.manage");
        assert_eq!(ALL_PERMISSIONS.len(), 16);
    }

    #[test]
    fn test_default_role_permissions_are_known() {
        for name in DEFAULT_EDITOR_PERMISSIONS.iter().chain(DEFAULT_VIEWER_PERMISSIONS) {
            assert!(ALL_PERMISSIONS.contains(name), "{name} is not defined");
        }
        assert!(!DEFAULT_VIEWER_PERMISSIONS.contains(&AuditView::NAME));
        assert!(DEFAULT_VIEWER_PERMISSIONS.iter().all(|p| p.ends_with(".view")));
    }

    #[tokio::test]
    async fn test_scoped_grant_covers_descendants_only() {
        let db = create_test_db().await;
        let root = create_test_organization(&db, "root", None).await;
        let team = create_test_organization(&db, "team", Some(root.id)).await;
        let squad = create_test_organization(&db, "squad", Some(team.id)).await;
        let other = create_test_organization(&db, "other", None).await;

        let identity = create_test_identity(&db, "scoped", false).await;
        assign_test_role(&db, identity.id, "editor", Some(team.id)).await;
        let user = AuthenticatedUser {
            permissions: rbac::load_permission_set(&db, &identity).await.unwrap(),
            identity,
            ip_address: None,
        };

        assert!(require_in_org::<EntitiesManage>(&db, &user, squad.id).await.is_ok());
        assert!(require_in_org::<EntitiesManage>(&db, &user, team.id).await.is_ok());
        assert!(require_in_org::<EntitiesManage>(&db, &user, root.id).await.is_err());
        assert!(require_in_org::<EntitiesManage>(&db, &user, other.id).await.is_err());
        assert!(require_in_org::<AuditView>(&db, &user, team.id).await.is_err());

        let visible = visible_organizations::<EntitiesView>(&db, &user)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(visible, BTreeSet::from([team.id, squad.id]));
    }

    #[tokio::test]
    async fn test_global_grant_is_unrestricted() {
        let db = create_test_db().await;
        let identity = create_test_identity(&db, "global", false).await;
        assign_test_role(&db, identity.id, "viewer", None).await;
        let user = AuthenticatedUser {
            permissions: rbac::load_permission_set(&db, &identity).await.unwrap(),
            identity,
            ip_address: None,
        };

        assert!(visible_organizations::<EntitiesView>(&db, &user)
            .await
            .unwrap()
            .is_none());
        let hidden = visible_organizations::<AuditView>(&db, &user)
            .await
            .unwrap()
            .unwrap();
        assert!(hidden.is_empty());
    }
}
