//! Migration: Create entities table

use sea_orm_migration::prelude::*;

use super::m20260301_000001_create_identities::Identities;
use super::m20260301_000002_create_organizations::Organizations;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Entities::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Entities::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Entities::UniqueId)
                            .big_integer()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(Entities::Name).string().not_null())
                    .col(ColumnDef::new(Entities::Description).text().null())
                    .col(ColumnDef::new(Entities::EntityType).string_len(32).not_null())
                    .col(
                        ColumnDef::new(Entities::OrganizationId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Entities::Metadata).json().not_null())
                    .col(ColumnDef::new(Entities::OwnerIdentityId).big_integer().null())
                    .col(
                        ColumnDef::new(Entities::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Entities::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Entities::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(Entities::Table, Entities::OrganizationId)
                            .to(Organizations::Table, Organizations::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(Entities::Table, Entities::OwnerIdentityId)
                            .to(Identities::Table, Identities::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_entities_organization_id")
                    .table(Entities::Table)
                    .col(Entities::OrganizationId)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_entities_entity_type")
                    .table(Entities::Table)
                    .col(Entities::EntityType)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Entities::Table).if_exists().to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Entities {
    Table,
    Id,
    UniqueId,
    Name,
    Description,
    EntityType,
    OrganizationId,
    Metadata,
    OwnerIdentityId,
    IsActive,
    CreatedAt,
    UpdatedAt,
}
