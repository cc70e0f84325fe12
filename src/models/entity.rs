//! Tracked assets ("entities" in CMDB terms).
//!
//! Not to be confused with sea-orm's `Entity` type, which every model module
//! in this crate also defines.

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
pub enum EntityType {
    #[sea_orm(string_value = "datacenter")]
    Datacenter,
    #[sea_orm(string_value = "vpc")]
    Vpc,
    #[sea_orm(string_value = "subnet")]
    Subnet,
    #[sea_orm(string_value = "compute")]
    Compute,
    #[sea_orm(string_value = "network")]
    Network,
    #[sea_orm(string_value = "user")]
    User,
    #[sea_orm(string_value = "security_issue")]
    SecurityIssue,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Datacenter => "datacenter",
            EntityType::Vpc => "vpc",
            EntityType::Subnet => "subnet",
            EntityType::Compute => "compute",
            EntityType::Network => "network",
            EntityType::User => "user",
            EntityType::SecurityIssue => "security_issue",
        }
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "entities")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Random 63-bit public identifier
    #[sea_orm(unique)]
    pub unique_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub entity_type: EntityType,
    pub organization_id: i64,
    pub metadata: Json,
    pub owner_identity_id: Option<i64>,
    pub is_active: bool,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::organization::Entity",
        from = "Column::OrganizationId",
        to = "super::organization::Column::Id",
        on_delete = "Cascade"
    )]
    Organization,
}

impl Related<super::organization::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Organization.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use sea_orm::Iterable;
    use super::*;

    #[test]
    fn test_entity_type_serde_names() {
        let json = serde_json::to_string(&EntityType::SecurityIssue).unwrap();
        assert_eq!(json, "\"security_issue\"");

        let parsed: EntityType = serde_json::from_str("\"vpc\"").unwrap();
        assert_eq!(parsed, EntityType::Vpc);
        assert!(serde_json::from_str::<EntityType>("\"router\"").is_err());
    }

    #[test]
    fn test_entity_type_db_value_matches_as_str() {
        for variant in EntityType::iter() {
            assert_eq!(variant.to_value(), variant.as_str());
        }
    }
}
