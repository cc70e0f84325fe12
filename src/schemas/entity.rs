use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::Validate;

use super::common::double_option;
use crate::models::dependency::DependencyType;
use crate::models::entity::{self, EntityType};
use crate::services::dependency_graph::ReachedEntity;

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Validate, utoipa::ToSchema)]
pub struct CreateEntity {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub description: Option<String>,
    pub entity_type: EntityType,
    pub organization_id: i64,
    #[schema(value_type = Option<Object>)]
    pub metadata: Option<Value>,
    pub owner_identity_id: Option<i64>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Validate, utoipa::ToSchema)]
pub struct UpdateEntity {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    pub description: Option<String>,
    pub entity_type: Option<EntityType>,
    /// Moving requires `entities.manage` in both organizations
    pub organization_id: Option<i64>,
    #[schema(value_type = Option<Object>)]
    pub metadata: Option<Value>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<i64>)]
    pub owner_identity_id: Option<Option<i64>>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct EntityResponse {
    pub id: i64,
    /// Serialized as a string: 63-bit values do not survive JavaScript numbers
    pub unique_id: String,
    pub name: String,
    pub description: Option<String>,
    pub entity_type: EntityType,
    pub organization_id: i64,
    #[schema(value_type = Object)]
    pub metadata: Value,
    pub owner_identity_id: Option<i64>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<entity::Model> for EntityResponse {
    fn from(e: entity::Model) -> Self {
        Self {
            id: e.id,
            unique_id: e.unique_id.to_string(),
            name: e.name,
            description: e.description,
            entity_type: e.entity_type,
            organization_id: e.organization_id,
            metadata: e.metadata,
            owner_identity_id: e.owner_identity_id,
            is_active: e.is_active,
            created_at: e.created_at,
            updated_at: e.updated_at,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, utoipa::IntoParams)]
pub struct EntityListQuery {
    pub organization_id: Option<i64>,
    pub entity_type: Option<EntityType>,
    /// Substring match
    pub name: Option<String>,
    pub is_active: Option<bool>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, utoipa::IntoParams)]
pub struct DepthQuery {
    pub depth: Option<u32>,
}

/// Entity found by a dependency walk
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct ReachedEntityResponse {
    pub entity: EntityResponse,
    pub depth: u32,
    pub dependency_type: DependencyType,
    pub via_entity_id: i64,
}

impl From<ReachedEntity> for ReachedEntityResponse {
    fn from(reached: ReachedEntity) -> Self {
        Self {
            entity: reached.entity.into(),
            depth: reached.depth,
            dependency_type: reached.dependency_type,
            via_entity_id: reached.via_entity_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct WalkResponse {
    pub entity_id: i64,
    pub depth: u32,
    pub entities: Vec<ReachedEntityResponse>,
}
