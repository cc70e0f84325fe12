//! Migration: Create identity groups, approvers and memberships

use sea_orm_migration::prelude::*;

use super::m20260301_000001_create_identities::Identities;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(IdentityGroups::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(IdentityGroups::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(IdentityGroups::Name)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(IdentityGroups::Description).text().null())
                    .col(
                        ColumnDef::new(IdentityGroups::OwnerIdentityId)
                            .big_integer()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(IdentityGroups::ApprovalMode)
                            .string_len(16)
                            .not_null()
                            .default("any"),
                    )
                    .col(
                        ColumnDef::new(IdentityGroups::ApprovalThreshold)
                            .integer()
                            .not_null()
                            .default(1),
                    )
                    .col(
                        ColumnDef::new(IdentityGroups::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(IdentityGroups::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(IdentityGroups::Table, IdentityGroups::OwnerIdentityId)
                            .to(Identities::Table, Identities::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(GroupApprovers::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(GroupApprovers::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(GroupApprovers::GroupId).big_integer().not_null())
                    .col(
                        ColumnDef::new(GroupApprovers::IdentityId)
                            .big_integer()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(GroupApprovers::Table, GroupApprovers::GroupId)
                            .to(IdentityGroups::Table, IdentityGroups::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(GroupApprovers::Table, GroupApprovers::IdentityId)
                            .to(Identities::Table, Identities::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_group_approvers_unique")
                    .table(GroupApprovers::Table)
                    .col(GroupApprovers::GroupId)
                    .col(GroupApprovers::IdentityId)
                    .unique()
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(IdentityGroupMemberships::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(IdentityGroupMemberships::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(IdentityGroupMemberships::GroupId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(IdentityGroupMemberships::IdentityId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(IdentityGroupMemberships::ExpiresAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(IdentityGroupMemberships::AccessRequestId)
                            .big_integer()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(IdentityGroupMemberships::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(
                                IdentityGroupMemberships::Table,
                                IdentityGroupMemberships::GroupId,
                            )
                            .to(IdentityGroups::Table, IdentityGroups::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(
                                IdentityGroupMemberships::Table,
                                IdentityGroupMemberships::IdentityId,
                            )
                            .to(Identities::Table, Identities::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // One membership row per (group, identity)
        manager
            .create_index(
                Index::create()
                    .name("idx_memberships_group_identity")
                    .table(IdentityGroupMemberships::Table)
                    .col(IdentityGroupMemberships::GroupId)
                    .col(IdentityGroupMemberships::IdentityId)
                    .unique()
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_memberships_expires_at")
                    .table(IdentityGroupMemberships::Table)
                    .col(IdentityGroupMemberships::ExpiresAt)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(
                Table::drop()
                    .table(IdentityGroupMemberships::Table)
                    .if_exists()
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(
                Table::drop()
                    .table(GroupApprovers::Table)
                    .if_exists()
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(
                Table::drop()
                    .table(IdentityGroups::Table)
                    .if_exists()
                    .to_owned(),
            )
            .await
    }
}

#[derive(DeriveIden)]
pub enum IdentityGroups {
    Table,
    Id,
    Name,
    Description,
    OwnerIdentityId,
    ApprovalMode,
    ApprovalThreshold,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum GroupApprovers {
    Table,
    Id,
    GroupId,
    IdentityId,
}

#[derive(DeriveIden)]
enum IdentityGroupMemberships {
    Table,
    Id,
    GroupId,
    IdentityId,
    ExpiresAt,
    AccessRequestId,
    CreatedAt,
}
