//! Migration: Create identities table

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Identities::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Identities::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Identities::IdentityType)
                            .string_len(32)
                            .not_null()
                            .default("human"),
                    )
                    .col(
                        ColumnDef::new(Identities::Username)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(Identities::Email).string().null())
                    .col(ColumnDef::new(Identities::FullName).string().null())
                    .col(ColumnDef::new(Identities::HashedPassword).string().null())
                    .col(
                        ColumnDef::new(Identities::AuthProvider)
                            .string_len(16)
                            .not_null()
                            .default("local"),
                    )
                    .col(ColumnDef::new(Identities::ExternalId).string().null())
                    .col(
                        ColumnDef::new(Identities::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Identities::IsSuperuser)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Identities::LastLoginAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Identities::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Identities::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_identities_email")
                    .table(Identities::Table)
                    .col(Identities::Email)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_identities_external_id")
                    .table(Identities::Table)
                    .col(Identities::ExternalId)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Identities::Table).if_exists().to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Identities {
    Table,
    Id,
    IdentityType,
    Username,
    Email,
    FullName,
    HashedPassword,
    AuthProvider,
    ExternalId,
    IsActive,
    IsSuperuser,
    LastLoginAt,
    CreatedAt,
    UpdatedAt,
}
