//! Dependency walks and the organization graph view
//!
//! Walks are breadth-first over the `dependencies` adjacency list, one query
//! per level. Dependency cycles are legal data; the visited set stops them.

use std::collections::{HashMap, HashSet};

use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder, QuerySelect};
use serde::Serialize;

use crate::config::graph::GraphConfig;
use crate::config::CONFIG;
use crate::db::DbConn;
use crate::error::{AppError, Result};
use crate::models::dependency::{self, DependencyType};
use crate::models::prelude::*;
use crate::models::{entity, organization};
use crate::services::hierarchy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Follow source -> target ("what does X depend on")
    Outgoing,
    /// Follow target -> source ("what depends on X")
    Incoming,
}

/// An entity reached by a walk
#[derive(Debug, Clone)]
pub struct ReachedEntity {
    pub entity: entity::Model,
    /// Hop distance at which the entity was first reached
    pub depth: u32,
    pub dependency_type: DependencyType,
    /// Entity on the previous hop
    pub via_entity_id: i64,
}

pub async fn find_entity(db: &DbConn, entity_id: i64) -> Result<entity::Model> {
    TrackedEntity::find_by_id(entity_id)
        .one(db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Entity {} not found", entity_id)))
}

/// Everything `entity_id` transitively depends on, up to `depth` hops
pub async fn get_all_dependencies(
    db: &DbConn,
    entity_id: i64,
    depth: u32,
) -> Result<Vec<ReachedEntity>> {
    walk(db, entity_id, depth, Direction::Outgoing).await
}

/// Everything that transitively depends on `entity_id`, up to `depth` hops
pub async fn get_all_dependents(
    db: &DbConn,
    entity_id: i64,
    depth: u32,
) -> Result<Vec<ReachedEntity>> {
    walk(db, entity_id, depth, Direction::Incoming).await
}

/// Breadth-first walk; the start entity is never reported and each reachable
/// entity is reported once, at the first level it appears
pub async fn walk(
    db: &DbConn,
    start: i64,
    depth: u32,
    direction: Direction,
) -> Result<Vec<ReachedEntity>> {
    find_entity(db, start).await?;

    let depth = depth.clamp(1, CONFIG.graph.max_depth.max(1));

    let mut visited: HashSet<i64> = HashSet::from([start]);
    let mut frontier = vec![start];
    // entity id -> (depth, type, via)
    let mut reached: Vec<(i64, u32, DependencyType, i64)> = Vec::new();

    for level in 1..=depth {
        if frontier.is_empty() {
            break;
        }

        let (from_col, order_col) = match direction {
            Direction::Outgoing => (
                dependency::Column::SourceEntityId,
                dependency::Column::TargetEntityId,
            ),
            Direction::Incoming => (
                dependency::Column::TargetEntityId,
                dependency::Column::SourceEntityId,
            ),
        };

        let edges = Dependency::find()
            .filter(from_col.is_in(frontier.clone()))
            .order_by_asc(order_col)
            .order_by_asc(dependency::Column::Id)
            .all(db)
            .await?;

        frontier.clear();
        for edge in edges {
            let (from, to) = match direction {
                Direction::Outgoing => (edge.source_entity_id, edge.target_entity_id),
                Direction::Incoming => (edge.target_entity_id, edge.source_entity_id),
            };
            if visited.insert(to) {
                frontier.push(to);
                reached.push((to, level, edge.dependency_type, from));
            }
        }
    }

    if reached.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<i64> = reached.iter().map(|(id, ..)| *id).collect();
    let mut entities: HashMap<i64, entity::Model> = TrackedEntity::find()
        .filter(entity::Column::Id.is_in(ids))
        .all(db)
        .await?
        .into_iter()
        .map(|e| (e.id, e))
        .collect();

    Ok(reached
        .into_iter()
        .filter_map(|(id, depth, dependency_type, via_entity_id)| {
            entities.remove(&id).map(|entity| ReachedEntity {
                entity,
                depth,
                dependency_type,
                via_entity_id,
            })
        })
        .collect())
}

/// Node of the organization graph view
#[derive(Debug, Clone, PartialEq, Serialize, utoipa::ToSchema)]
pub struct GraphNode {
    /// `org-<id>` or `entity-<id>`
    pub id: String,
    pub kind: String,
    pub label: String,
    pub record_id: i64,
    pub entity_type: Option<String>,
    pub organization_id: Option<i64>,
}

/// Edge of the organization graph view
#[derive(Debug, Clone, PartialEq, Serialize, utoipa::ToSchema)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    /// `hierarchy`, `contains`, or a dependency type
    pub edge_type: String,
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct OrganizationGraph {
    pub root_organization_id: i64,
    pub depth: u32,
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    /// A cap cut the result short
    pub truncated: bool,
}

fn org_node_id(id: i64) -> String {
    format!("org-{}", id)
}

fn entity_node_id(id: i64) -> String {
    format!("entity-{}", id)
}

/// Organizations, entities and dependencies reachable from `org_id` within
/// `depth` levels, bounded by the caps in `limits`
pub async fn build_organization_graph(
    db: &DbConn,
    org_id: i64,
    depth: u32,
    limits: &GraphConfig,
) -> Result<OrganizationGraph> {
    let root = hierarchy::find_organization(db, org_id).await?;
    let depth = depth.clamp(1, limits.max_depth.max(1));
    let org_cap = (limits.orgs_per_depth * u64::from(depth)).max(1) as usize;
    let mut truncated = false;

    let mut orgs: Vec<organization::Model> = vec![root];
    for descendant in hierarchy::get_all_children(db, org_id, Some(depth)).await? {
        if orgs.len() >= org_cap {
            truncated = true;
            break;
        }
        orgs.push(descendant.organization);
    }
    let org_ids: Vec<i64> = orgs.iter().map(|o| o.id).collect();
    let included_orgs: HashSet<i64> = org_ids.iter().copied().collect();

    let mut entities = TrackedEntity::find()
        .filter(entity::Column::OrganizationId.is_in(org_ids))
        .order_by_asc(entity::Column::Id)
        .limit(limits.max_entities + 1)
        .all(db)
        .await?;
    if entities.len() as u64 > limits.max_entities {
        entities.truncate(limits.max_entities as usize);
        truncated = true;
    }
    let entity_ids: Vec<i64> = entities.iter().map(|e| e.id).collect();

    let dependencies = if entity_ids.is_empty() {
        Vec::new()
    } else {
        Dependency::find()
            .filter(dependency::Column::SourceEntityId.is_in(entity_ids.clone()))
            .filter(dependency::Column::TargetEntityId.is_in(entity_ids))
            .order_by_asc(dependency::Column::Id)
            .all(db)
            .await?
    };

    let mut nodes = Vec::with_capacity(orgs.len() + entities.len());
    let mut edges = Vec::new();

    for org in &orgs {
        nodes.push(GraphNode {
            id: org_node_id(org.id),
            kind: "organization".to_string(),
            label: org.name.clone(),
            record_id: org.id,
            entity_type: None,
            organization_id: org.parent_id,
        });
        if let Some(parent_id) = org.parent_id {
            if org.id != org_id && included_orgs.contains(&parent_id) {
                edges.push(GraphEdge {
                    source: org_node_id(parent_id),
                    target: org_node_id(org.id),
                    edge_type: "hierarchy".to_string(),
                });
            }
        }
    }

    for e in &entities {
        nodes.push(GraphNode {
            id: entity_node_id(e.id),
            kind: "entity".to_string(),
            label: e.name.clone(),
            record_id: e.id,
            entity_type: Some(e.entity_type.as_str().to_string()),
            organization_id: Some(e.organization_id),
        });
        edges.push(GraphEdge {
            source: org_node_id(e.organization_id),
            target: entity_node_id(e.id),
            edge_type: "contains".to_string(),
        });
    }

    for dep in &dependencies {
        edges.push(GraphEdge {
            source: entity_node_id(dep.source_entity_id),
            target: entity_node_id(dep.target_entity_id),
            edge_type: dep.dependency_type.as_str().to_string(),
        });
    }

    Ok(OrganizationGraph {
        root_organization_id: org_id,
        depth,
        nodes,
        edges,
        truncated,
    })
}
