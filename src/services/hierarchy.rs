//! Organization tree walks
//!
//! The tree is stored as an adjacency list (`organizations.parent_id`). Every
//! walk keeps a visited set so a corrupted parent chain cannot loop forever.

use std::collections::HashSet;

use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder};
use serde::Serialize;

use crate::db::DbConn;
use crate::error::{AppError, Result};
use crate::models::organization;
use crate::models::prelude::*;

/// An organization found below another one, with its distance in levels
#[derive(Debug, Clone, Serialize)]
pub struct Descendant {
    pub organization: organization::Model,
    pub depth: u32,
}

pub async fn find_organization(db: &DbConn, org_id: i64) -> Result<organization::Model> {
    Organization::find_by_id(org_id)
        .one(db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Organization {} not found", org_id)))
}

/// Organizations from the root down to `org_id`, inclusive
pub async fn hierarchy_path(db: &DbConn, org_id: i64) -> Result<Vec<organization::Model>> {
    let mut current = find_organization(db, org_id).await?;
    let mut visited = HashSet::new();
    let mut path = Vec::new();

    loop {
        if !visited.insert(current.id) {
            tracing::warn!(org_id, "Cycle detected in organization parent chain");
            break;
        }

        let parent_id = current.parent_id;
        path.push(current);

        let Some(parent_id) = parent_id else { break };
        match Organization::find_by_id(parent_id).one(db).await? {
            Some(parent) => current = parent,
            None => break,
        }
    }

    path.reverse();
    Ok(path)
}

/// Ids on the hierarchy path, root first
pub async fn lineage_ids(db: &DbConn, org_id: i64) -> Result<Vec<i64>> {
    Ok(hierarchy_path(db, org_id)
        .await?
        .into_iter()
        .map(|org| org.id)
        .collect())
}

/// Every descendant of `org_id`, breadth-first, optionally limited to `max_depth` levels
pub async fn get_all_children(
    db: &DbConn,
    org_id: i64,
    max_depth: Option<u32>,
) -> Result<Vec<Descendant>> {
    let mut visited: HashSet<i64> = HashSet::from([org_id]);
    let mut frontier = vec![org_id];
    let mut descendants = Vec::new();
    let mut depth = 0;

    while !frontier.is_empty() {
        if max_depth.is_some_and(|max| depth >= max) {
            break;
        }
        depth += 1;

        let children = Organization::find()
            .filter(organization::Column::ParentId.is_in(frontier.clone()))
            .order_by_asc(organization::Column::Id)
            .all(db)
            .await?;

        frontier.clear();
        for child in children {
            if !visited.insert(child.id) {
                continue;
            }
            frontier.push(child.id);
            descendants.push(Descendant {
                organization: child,
                depth,
            });
        }
    }

    Ok(descendants)
}

/// Check that `new_parent` may become the parent of `org_id` (`None` when creating)
pub async fn validate_parent(db: &DbConn, org_id: Option<i64>, new_parent: i64) -> Result<()> {
    if Organization::find_by_id(new_parent).one(db).await?.is_none() {
        return Err(AppError::BadRequest(format!(
            "Parent organization {} not found",
            new_parent
        )));
    }

    let Some(org_id) = org_id else {
        return Ok(());
    };

    if org_id == new_parent {
        return Err(AppError::BadRequest(
            "An organization cannot be its own parent".to_string(),
        ));
    }

    let descendants = get_all_children(db, org_id, None).await?;
    if descendants.iter().any(|d| d.organization.id == new_parent) {
        return Err(AppError::BadRequest(
            "An organization cannot be moved under one of its descendants".to_string(),
        ));
    }

    Ok(())
}

/// Deletion is blocked while child organizations exist
pub async fn ensure_deletable(db: &DbConn, org_id: i64) -> Result<()> {
    let children = Organization::find()
        .filter(organization::Column::ParentId.eq(org_id))
        .count(db)
        .await?;

    if children > 0 {
        return Err(AppError::Conflict(format!(
            "Organization has {} child organization(s); move or delete them first",
            children
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{create_test_db, create_test_organization};
    use sea_orm::{ActiveModelTrait, Set};

    #[tokio::test]
    async fn test_hierarchy_path_root_first() {
        let db = create_test_db().await;
        let root = create_test_organization(&db, "Root", None).await;
        let mid = create_test_organization(&db, "Mid", Some(root.id)).await;
        let leaf = create_test_organization(&db, "Leaf", Some(mid.id)).await;

        let path = hierarchy_path(&db, leaf.id).await.unwrap();
        let names: Vec<&str> = path.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["Root", "Mid", "Leaf"]);

        assert_eq!(lineage_ids(&db, root.id).await.unwrap(), vec![root.id]);
    }

    #[tokio::test]
    async fn test_hierarchy_path_missing_org() {
        let db = create_test_db().await;
        let err = hierarchy_path(&db, 999).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_get_all_children_depth_limit() {
        let db = create_test_db().await;
        let root = create_test_organization(&db, "Root", None).await;
        let a = create_test_organization(&db, "A", Some(root.id)).await;
        let b = create_test_organization(&db, "B", Some(root.id)).await;
        let a1 = create_test_organization(&db, "A1", Some(a.id)).await;
        create_test_organization(&db, "A1x", Some(a1.id)).await;

        let all = get_all_children(&db, root.id, None).await.unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all[0].organization.id, a.id);
        assert_eq!(all[1].organization.id, b.id);
        assert_eq!(all[2].depth, 2);
        assert_eq!(all[3].depth, 3);

        let direct = get_all_children(&db, root.id, Some(1)).await.unwrap();
        assert_eq!(direct.len(), 2);

        let two = get_all_children(&db, root.id, Some(2)).await.unwrap();
        assert_eq!(two.len(), 3);
    }

    #[tokio::test]
    async fn test_walks_terminate_on_cycle() {
        let db = create_test_db().await;
        let a = create_test_organization(&db, "A", None).await;
        let b = create_test_organization(&db, "B", Some(a.id)).await;

        // Force a cycle that the API would never allow
        let mut active: organization::ActiveModel = a.clone().into();
        active.parent_id = Set(Some(b.id));
        active.update(&db).await.unwrap();

        let path = hierarchy_path(&db, b.id).await.unwrap();
        assert_eq!(path.len(), 2);

        let children = get_all_children(&db, a.id, None).await.unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].organization.id, b.id);
    }

    #[tokio::test]
    async fn test_validate_parent_rejects_cycles() {
        let db = create_test_db().await;
        let root = create_test_organization(&db, "Root", None).await;
        let child = create_test_organization(&db, "Child", Some(root.id)).await;
        let other = create_test_organization(&db, "Other", None).await;

        assert!(validate_parent(&db, None, root.id).await.is_ok());
        assert!(validate_parent(&db, Some(child.id), other.id).await.is_ok());

        for (org, parent) in [(root.id, root.id), (root.id, child.id), (root.id, 12345)] {
            let err = validate_parent(&db, Some(org), parent).await.unwrap_err();
            assert!(matches!(err, AppError::BadRequest(_)));
        }
    }

    #[tokio::test]
    async fn test_ensure_deletable() {
        let db = create_test_db().await;
        let root = create_test_organization(&db, "Root", None).await;
        let child = create_test_organization(&db, "Child", Some(root.id)).await;

        assert!(matches!(
            ensure_deletable(&db, root.id).await.unwrap_err(),
            AppError::Conflict(_)
        ));
        assert!(ensure_deletable(&db, child.id).await.is_ok());
    }
}
