use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// How many approvals an access request to the group needs
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, utoipa::ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum ApprovalMode {
    /// A single approver is enough
    #[sea_orm(string_value = "any")]
    Any,
    /// Every designated approver must approve
    #[sea_orm(string_value = "all")]
    All,
    /// `approval_threshold` distinct approvers must approve
    #[sea_orm(string_value = "threshold")]
    Threshold,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "identity_groups")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique)]
    pub name: String,
    pub description: Option<String>,
    pub owner_identity_id: Option<i64>,
    pub approval_mode: ApprovalMode,
    pub approval_threshold: i32,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::identity_group_membership::Entity")]
    Memberships,
    #[sea_orm(has_many = "super::group_approver::Entity")]
    Approvers,
    #[sea_orm(has_many = "super::access_request::Entity")]
    AccessRequests,
}

impl Related<super::identity_group_membership::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Memberships.def()
    }
}

impl Related<super::group_approver::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Approvers.def()
    }
}

impl Related<super::access_request::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::AccessRequests.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
