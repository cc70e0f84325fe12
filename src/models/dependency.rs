use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    utoipa::ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
pub enum DependencyType {
    #[sea_orm(string_value = "depends_on")]
    DependsOn,
    #[sea_orm(string_value = "related_to")]
    RelatedTo,
    #[sea_orm(string_value = "part_of")]
    PartOf,
}

impl DependencyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DependencyType::DependsOn => "depends_on",
            DependencyType::RelatedTo => "related_to",
            DependencyType::PartOf => "part_of",
        }
    }
}

/// Accepted values for the optional `criticality` metadata key
pub const CRITICALITY_LEVELS: [&str; 4] = ["low", "medium", "high", "critical"];

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "dependencies")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub source_entity_id: i64,
    pub target_entity_id: i64,
    pub dependency_type: DependencyType,
    pub metadata: Json,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::entity::Entity",
        from = "Column::SourceEntityId",
        to = "super::entity::Column::Id",
        on_delete = "Cascade"
    )]
    Source,
    #[sea_orm(
        belongs_to = "super::entity::Entity",
        from = "Column::TargetEntityId",
        to = "super::entity::Column::Id",
        on_delete = "Cascade"
    )]
    Target,
}

impl ActiveModelBehavior for ActiveModel {}
