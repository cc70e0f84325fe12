//! Migration: Create access requests and approval decisions

use sea_orm_migration::prelude::*;

use super::m20260301_000001_create_identities::Identities;
use super::m20260301_000006_create_groups::IdentityGroups;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(AccessRequests::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AccessRequests::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(AccessRequests::GroupId).big_integer().not_null())
                    .col(
                        ColumnDef::new(AccessRequests::RequesterId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(AccessRequests::Reason).text().null())
                    .col(
                        ColumnDef::new(AccessRequests::Status)
                            .string_len(16)
                            .not_null()
                            .default("pending"),
                    )
                    .col(ColumnDef::new(AccessRequests::MembershipDays).integer().null())
                    .col(
                        ColumnDef::new(AccessRequests::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(AccessRequests::DecidedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(AccessRequests::Table, AccessRequests::GroupId)
                            .to(IdentityGroups::Table, IdentityGroups::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(AccessRequests::Table, AccessRequests::RequesterId)
                            .to(Identities::Table, Identities::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_access_requests_group_status")
                    .table(AccessRequests::Table)
                    .col(AccessRequests::GroupId)
                    .col(AccessRequests::Status)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(AccessRequestDecisions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AccessRequestDecisions::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(AccessRequestDecisions::RequestId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(AccessRequestDecisions::ApproverId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(AccessRequestDecisions::Decision)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(ColumnDef::new(AccessRequestDecisions::Comment).text().null())
                    .col(
                        ColumnDef::new(AccessRequestDecisions::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(
                                AccessRequestDecisions::Table,
                                AccessRequestDecisions::RequestId,
                            )
                            .to(AccessRequests::Table, AccessRequests::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(
                                AccessRequestDecisions::Table,
                                AccessRequestDecisions::ApproverId,
                            )
                            .to(Identities::Table, Identities::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // An approver decides a request at most once
        manager
            .create_index(
                Index::create()
                    .name("idx_decisions_request_approver")
                    .table(AccessRequestDecisions::Table)
                    .col(AccessRequestDecisions::RequestId)
                    .col(AccessRequestDecisions::ApproverId)
                    .unique()
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
                    .table(AccessRequestDecisions::Table)
                    .if_exists()
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(
                Table::drop()
                    .table(AccessRequests::Table)
                    .if_exists()
                    .to_owned(),
            )
            .await
    }
}

#[derive(DeriveIden)]
enum AccessRequests {
    Table,
    Id,
    GroupId,
    RequesterId,
    Reason,
    Status,
    MembershipDays,
    CreatedAt,
    DecidedAt,
}

#[derive(DeriveIden)]
enum AccessRequestDecisions {
    Table,
    Id,
    RequestId,
    ApproverId,
    Decision,
    Comment,
    CreatedAt,
}
