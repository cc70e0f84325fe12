//! Role-based access control
//!
//! Permissions come from role assignments. A global assignment grants its
//! permissions everywhere; an organization-scoped assignment grants them on
//! that organization and everything below it.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, ModelTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::Serialize;

use crate::db::DbConn;
use crate::error::{AppError, Result};
use crate::models::prelude::*;
use crate::models::user_role::RoleScope;
use crate::models::{identity, permission, role, role_permission, user_role};

/// Effective permissions of one identity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, utoipa::ToSchema)]
pub struct PermissionSet {
    pub superuser: bool,
    pub global: BTreeSet<String>,
    /// organization id -> permissions granted on that organization
    pub scoped: BTreeMap<i64, BTreeSet<String>>,
}

impl PermissionSet {
    pub fn superuser() -> Self {
        Self {
            superuser: true,
            ..Default::default()
        }
    }

    /// Global check
    pub fn allows(&self, permission: &str) -> bool {
        self.superuser || self.global.contains(permission)
    }

    /// Check against an organization given its hierarchy path (root first)
    pub fn allows_in(&self, permission: &str, lineage: &[i64]) -> bool {
        self.allows(permission)
            || lineage.iter().any(|org_id| {
                self.scoped
                    .get(org_id)
                    .is_some_and(|perms| perms.contains(permission))
            })
    }

    /// Organizations where `permission` was granted by a scoped assignment
    pub fn scoped_organizations(&self, permission: &str) -> Vec<i64> {
        self.scoped
            .iter()
            .filter(|(_, perms)| perms.contains(permission))
            .map(|(org_id, _)| *org_id)
            .collect()
    }
}

/// Permission names granted by each of the given roles
async fn permissions_by_role(
    db: &DbConn,
    role_ids: Vec<i64>,
) -> Result<HashMap<i64, Vec<String>>> {
    let rows = RolePermission::find()
        .filter(role_permission::Column::RoleId.is_in(role_ids))
        .find_also_related(Permission)
        .all(db)
        .await?;

    let mut by_role: HashMap<i64, Vec<String>> = HashMap::new();
    for (link, perm) in rows {
        if let Some(perm) = perm {
            by_role.entry(link.role_id).or_default().push(perm.name);
        }
    }
    Ok(by_role)
}

/// Build the effective permission set of an identity from its role assignments
pub async fn load_permission_set(db: &DbConn, identity: &identity::Model) -> Result<PermissionSet> {
    let mut set = PermissionSet {
        superuser: identity.is_superuser,
        ..Default::default()
    };

    let assignments = UserRole::find()
        .filter(user_role::Column::IdentityId.eq(identity.id))
        .all(db)
        .await?;
    if assignments.is_empty() {
        return Ok(set);
    }

    let role_ids: Vec<i64> = assignments.iter().map(|a| a.role_id).collect();
    let by_role = permissions_by_role(db, role_ids).await?;

    for assignment in assignments {
        let Some(perms) = by_role.get(&assignment.role_id) else {
            continue;
        };
        match (assignment.scope, assignment.organization_id) {
            (RoleScope::Global, _) => set.global.extend(perms.iter().cloned()),
            (RoleScope::Organization, Some(org_id)) => set
                .scoped
                .entry(org_id)
                .or_default()
                .extend(perms.iter().cloned()),
            (RoleScope::Organization, None) => {
                tracing::warn!(
                    assignment_id = assignment.id,
                    "Organization-scoped role assignment without organization; ignored"
                );
            }
        }
    }

    Ok(set)
}

pub async fn find_role(db: &DbConn, role_id: i64) -> Result<role::Model> {
    Role::find_by_id(role_id)
        .one(db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Role {} not found", role_id)))
}

pub async fn find_role_by_name(db: &DbConn, name: &str) -> Result<Option<role::Model>> {
    Ok(Role::find()
        .filter(role::Column::Name.eq(name))
        .one(db)
        .await?)
}

/// Permission names of a role, sorted
pub async fn role_permission_names(db: &DbConn, role_id: i64) -> Result<Vec<String>> {
    let mut names = permissions_by_role(db, vec![role_id])
        .await?
        .remove(&role_id)
        .unwrap_or_default();
    names.sort();
    Ok(names)
}

/// Replace the permissions of a role; unknown names are rejected
pub async fn set_role_permissions(
    db: &DbConn,
    role_id: i64,
    names: &[String],
) -> Result<Vec<String>> {
    find_role(db, role_id).await?;

    let wanted: BTreeSet<&str> = names.iter().map(String::as_str).collect();
    let found = Permission::find()
        .filter(permission::Column::Name.is_in(wanted.iter().copied()))
        .all(db)
        .await?;

    if found.len() != wanted.len() {
        let known: BTreeSet<&str> = found.iter().map(|p| p.name.as_str()).collect();
        let unknown: Vec<&str> = wanted.difference(&known).copied().collect();
        return Err(AppError::BadRequest(format!(
            "Unknown permission(s): {}",
            unknown.join(", ")
        )));
    }

    let txn = db.begin().await?;
    RolePermission::delete_many()
        .filter(role_permission::Column::RoleId.eq(role_id))
        .exec(&txn)
        .await?;
    for perm in &found {
        role_permission::ActiveModel {
            role_id: Set(role_id),
            permission_id: Set(perm.id),
            ..Default::default()
        }
        .insert(&txn)
        .await?;
    }
    txn.commit().await?;

    let mut names: Vec<String> = found.into_iter().map(|p| p.name).collect();
    names.sort();
    Ok(names)
}

/// Assign a role to an identity globally or on one organization
pub async fn assign_role(
    db: &DbConn,
    identity_id: i64,
    role_id: i64,
    scope: RoleScope,
    organization_id: Option<i64>,
) -> Result<user_role::Model> {
    match (scope, organization_id) {
        (RoleScope::Global, Some(_)) => {
            return Err(AppError::BadRequest(
                "Global role assignments cannot name an organization".to_string(),
            ))
        }
        (RoleScope::Organization, None) => {
            return Err(AppError::BadRequest(
                "Organization-scoped role assignments require organization_id".to_string(),
            ))
        }
        _ => {}
    }

    if Identity::find_by_id(identity_id).one(db).await?.is_none() {
        return Err(AppError::NotFound(format!(
            "Identity {} not found",
            identity_id
        )));
    }
    find_role(db, role_id).await?;
    if let Some(org_id) = organization_id {
        if Organization::find_by_id(org_id).one(db).await?.is_none() {
            return Err(AppError::NotFound(format!(
                "Organization {} not found",
                org_id
            )));
        }
    }

    let mut existing = UserRole::find()
        .filter(user_role::Column::IdentityId.eq(identity_id))
        .filter(user_role::Column::RoleId.eq(role_id));
    existing = match organization_id {
        Some(org_id) => existing.filter(user_role::Column::OrganizationId.eq(org_id)),
        None => existing.filter(user_role::Column::OrganizationId.is_null()),
    };
    if existing.count(db).await? > 0 {
        return Err(AppError::Conflict(
            "Role is already assigned with this scope".to_string(),
        ));
    }

    let assignment = user_role::ActiveModel {
        identity_id: Set(identity_id),
        role_id: Set(role_id),
        scope: Set(scope),
        organization_id: Set(organization_id),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await?;

    Ok(assignment)
}

/// Role assignments of an identity paired with their roles
pub async fn list_assignments(
    db: &DbConn,
    identity_id: i64,
) -> Result<Vec<(user_role::Model, role::Model)>> {
    let rows = UserRole::find()
        .filter(user_role::Column::IdentityId.eq(identity_id))
        .order_by_asc(user_role::Column::Id)
        .find_also_related(Role)
        .all(db)
        .await?;

    Ok(rows
        .into_iter()
        .filter_map(|(assignment, role)| role.map(|r| (assignment, r)))
        .collect())
}

/// Remove one role assignment of an identity
pub async fn unassign_role(
    db: &DbConn,
    identity_id: i64,
    assignment_id: i64,
) -> Result<user_role::Model> {
    let assignment = UserRole::find_by_id(assignment_id)
        .filter(user_role::Column::IdentityId.eq(identity_id))
        .one(db)
        .await?
        .ok_or_else(|| AppError::NotFound("Role assignment not found".to_string()))?;

    assignment.clone().delete(db).await?;
    Ok(assignment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{
        assign_test_role, create_test_db, create_test_identity, create_test_organization,
    };

    #[test]
    fn test_allows_is_set_membership() {
        let mut set = PermissionSet::default();
        set.global.insert("entities.view".into());
        assert!(set.allows("entities.view"));
        assert!(!set.allows("entities.manage"));
        assert!(PermissionSet::superuser().allows("anything.at_all"));
    }

    #[test]
    fn test_allows_in_covers_descendants() {
        let mut set = PermissionSet::default();
        set.scoped
            .entry(2)
            .or_default()
            .insert("entities.manage".into());

        // lineage root(1) -> 2 -> 3
        assert!(set.allows_in("entities.manage", &[1, 2, 3]));
        assert!(set.allows_in("entities.manage", &[1, 2]));
        assert!(!set.allows_in("entities.manage", &[1]));
        assert!(!set.allows_in("entities.view", &[1, 2, 3]));
        assert!(!set.allows("entities.manage"));
        assert_eq!(set.scoped_organizations("entities.manage"), vec![2]);
    }

    #[tokio::test]
    async fn test_load_permission_set_from_assignments() {
        let db = create_test_db().await;
        let alice = create_test_identity(&db, "alice", false).await;
        let org = create_test_organization(&db, "Ops", None).await;

        assign_test_role(&db, alice.id, "viewer", None).await;
        assign_test_role(&db, alice.id, "editor", Some(org.id)).await;

        let set = load_permission_set(&db, &alice).await.unwrap();
        assert!(!set.superuser);
        assert!(set.allows("entities.view"));
        assert!(!set.allows("entities.manage"));
        assert!(!set.allows("audit.view"));
        assert!(set.allows_in("entities.manage", &[org.id]));
    }

    #[tokio::test]
    async fn test_seeded_roles() {
        let db = create_test_db().await;
        let admin = find_role_by_name(&db, "admin").await.unwrap().unwrap();
        let viewer = find_role_by_name(&db, "viewer").await.unwrap().unwrap();

        let admin_perms = role_permission_names(&db, admin.id).await.unwrap();
        assert_eq!(admin_perms.len(), 16);

        let viewer_perms = role_permission_names(&db, viewer.id).await.unwrap();
        assert!(viewer_perms.iter().all(|p| p.ends_with(".view")));
        assert!(!viewer_perms.contains(&"audit.view".to_string()));
    }

    #[tokio::test]
    async fn test_assign_role_validation() {
        let db = create_test_db().await;
        let alice = create_test_identity(&db, "alice", false).await;
        let org = create_test_organization(&db, "Ops", None).await;
        let viewer = find_role_by_name(&db, "viewer").await.unwrap().unwrap();

        let err = assign_role(&db, alice.id, viewer.id, RoleScope::Organization, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));

        let err = assign_role(&db, alice.id, viewer.id, RoleScope::Global, Some(org.id))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));

        assign_role(&db, alice.id, viewer.id, RoleScope::Global, None)
            .await
            .unwrap();
        let err = assign_role(&db, alice.id, viewer.id, RoleScope::Global, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        // Same role on an organization is a different assignment
        let scoped = assign_role(&db, alice.id, viewer.id, RoleScope::Organization, Some(org.id))
            .await
            .unwrap();
        assert_eq!(list_assignments(&db, alice.id).await.unwrap().len(), 2);

        unassign_role(&db, alice.id, scoped.id).await.unwrap();
        assert_eq!(list_assignments(&db, alice.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_set_role_permissions_rejects_unknown() {
        let db = create_test_db().await;
        let viewer = find_role_by_name(&db, "viewer").await.unwrap().unwrap();

        let err = set_role_permissions(
            &db,
            viewer.id,
            &["entities.view".to_string(), "rockets.launch".to_string()],
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(msg) if msg.contains("rockets.launch")));

        let names = set_role_permissions(
            &db,
            viewer.id,
            &["issues.view".to_string(), "entities.view".to_string()],
        )
        .await
        .unwrap();
        assert_eq!(names, vec!["entities.view", "issues.view"]);
        assert_eq!(role_permission_names(&db, viewer.id).await.unwrap(), names);
    }
}
