//! Migration: Create dependencies table

use sea_orm_migration::prelude::*;

use super::m20260301_000003_create_entities::Entities;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Dependencies::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Dependencies::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Dependencies::SourceEntityId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Dependencies::TargetEntityId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Dependencies::DependencyType)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(ColumnDef::new(Dependencies::Metadata).json().not_null())
                    .col(
                        ColumnDef::new(Dependencies::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(Dependencies::Table, Dependencies::SourceEntityId)
                            .to(Entities::Table, Entities::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(Dependencies::Table, Dependencies::TargetEntityId)
                            .to(Entities::Table, Entities::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_dependencies_edge")
                    .table(Dependencies::Table)
                    .col(Dependencies::SourceEntityId)
                    .col(Dependencies::TargetEntityId)
                    .col(Dependencies::DependencyType)
                    .unique()
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_dependencies_target")
                    .table(Dependencies::Table)
                    .col(Dependencies::TargetEntityId)
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
                    .table(Dependencies::Table)
                    .if_exists()
                    .to_owned(),
            )
            .await
    }
}

#[derive(DeriveIden)]
enum Dependencies {
    Table,
    Id,
    SourceEntityId,
    TargetEntityId,
    DependencyType,
    Metadata,
    CreatedAt,
}
