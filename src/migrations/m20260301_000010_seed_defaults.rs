use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, Set,
};

use crate::middleware::permissions::{
    ALL_PERMISSIONS, DEFAULT_EDITOR_PERMISSIONS, DEFAULT_VIEWER_PERMISSIONS,
};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();

        seed_permissions(db).await?;
        seed_roles(db).await?;

        Ok(())
    }

    async fn down(&self, _manager: &SchemaManager) -> Result<(), DbErr> {
        // Seeding is not reversible - roles may have been edited since
        Ok(())
    }
}

async fn seed_permissions(db: &SchemaManagerConnection<'_>) -> Result<(), DbErr> {
    use crate::models::permission;
    use crate::models::prelude::Permission;

    for &name in ALL_PERMISSIONS {
        let exists = Permission::find()
            .filter(permission::Column::Name.eq(name))
            .count(db)
            .await?;
        if exists > 0 {
            continue;
        }

        let (resource_type, action) = name.split_once('.').unwrap_or((name, ""));
        permission::ActiveModel {
            name: Set(name.to_string()),
            resource_type: Set(resource_type.to_string()),
            action: Set(action.to_string()),
            description: Set(Some(format!("{} {}", action, resource_type))),
            ..Default::default()
        }
        .insert(db)
        .await?;
    }

    Ok(())
}

async fn seed_roles(db: &SchemaManagerConnection<'_>) -> Result<(), DbErr> {
    use crate::models::prelude::{Permission, Role};
    use crate::models::{permission, role, role_permission};

    let role_count = Role::find().count(db).await?;
    if role_count > 0 {
        return Ok(());
    }

    let now = chrono::Utc::now();

    let default_roles: [(&str, &str, &[&str]); 3] = [
        ("admin", "Full administrator access", ALL_PERMISSIONS),
        (
            "editor",
            "Manage organizations, entities, dependencies and issues",
            DEFAULT_EDITOR_PERMISSIONS,
        ),
        ("viewer", "Read-only access", DEFAULT_VIEWER_PERMISSIONS),
    ];

    for (name, description, permissions) in default_roles {
        let created = role::ActiveModel {
            name: Set(name.to_string()),
            description: Set(Some(description.to_string())),
            is_system: Set(true),
            created_at: Set(now),
            ..Default::default()
        }
        .insert(db)
        .await?;

        for perm in permissions {
            let found = Permission::find()
                .filter(permission::Column::Name.eq(*perm))
                .one(db)
                .await?
                .ok_or(DbErr::Custom(format!("Permission {} not found", perm)))?;

            role_permission::ActiveModel {
                role_id: Set(created.id),
                permission_id: Set(found.id),
                ..Default::default()
            }
            .insert(db)
            .await?;
        }
    }

    Ok(())
}
