//! Test helpers for unit tests.
//!
//! Every database is an in-memory SQLite migrated with the real `Migrator`,
//! so the seeded permissions and system roles are present.

use chrono::Utc;
use sea_orm::{ActiveModelTrait, Database, DatabaseConnection, Set};
use sea_orm_migration::MigratorTrait;

use crate::migrations::Migrator;
use crate::models::dependency::DependencyType;
use crate::models::entity::EntityType;
use crate::models::identity::{AuthProvider, IdentityType};
use crate::models::identity_group::ApprovalMode;
use crate::models::user_role::RoleScope;
use crate::models::{
    dependency, entity, group_approver, identity, identity_group, organization,
};
use crate::services::{rbac, security};

/// Create an in-memory SQLite database for testing
pub async fn create_test_db() -> DatabaseConnection {
    let db = Database::connect("sqlite::memory:")
        .await
        .expect("Failed to create test database");

    Migrator::up(&db, None)
        .await
        .expect("Failed to run test migrations");

    db
}

/// Local identity `<username>` with email `<username>@example.com`
pub async fn create_test_identity(
    db: &DatabaseConnection,
    username: &str,
    is_superuser: bool,
) -> identity::Model {
    let now = Utc::now();
    identity::ActiveModel {
        identity_type: Set(IdentityType::Human),
        username: Set(username.to_string()),
        email: Set(Some(format!("{}@example.com", username))),
        full_name: Set(None),
        hashed_password: Set(Some(security::hash_password("password123").unwrap())),
        auth_provider: Set(AuthProvider::Local),
        external_id: Set(None),
        is_active: Set(true),
        is_superuser: Set(is_superuser),
        last_login_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("Failed to create test identity")
}

pub async fn create_test_organization(
    db: &DatabaseConnection,
    name: &str,
    parent_id: Option<i64>,
) -> organization::Model {
    let now = Utc::now();
    organization::ActiveModel {
        name: Set(name.to_string()),
        description: Set(None),
        parent_id: Set(parent_id),
        owner_identity_id: Set(None),
        data_retention_days: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("Failed to create test organization")
}

/// Compute entity in `organization_id`
pub async fn create_test_entity(
    db: &DatabaseConnection,
    name: &str,
    organization_id: i64,
) -> entity::Model {
    let now = Utc::now();
    entity::ActiveModel {
        unique_id: Set(security::generate_unique_id()),
        name: Set(name.to_string()),
        description: Set(None),
        entity_type: Set(EntityType::Compute),
        organization_id: Set(organization_id),
        metadata: Set(serde_json::json!({})),
        owner_identity_id: Set(None),
        is_active: Set(true),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("Failed to create test entity")
}

pub async fn create_test_dependency(
    db: &DatabaseConnection,
    source_entity_id: i64,
    target_entity_id: i64,
    dependency_type: DependencyType,
) -> dependency::Model {
    dependency::ActiveModel {
        source_entity_id: Set(source_entity_id),
        target_entity_id: Set(target_entity_id),
        dependency_type: Set(dependency_type),
        metadata: Set(serde_json::json!({})),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("Failed to create test dependency")
}

pub async fn create_test_group(
    db: &DatabaseConnection,
    name: &str,
    approval_mode: ApprovalMode,
    approval_threshold: i32,
    owner_identity_id: Option<i64>,
) -> identity_group::Model {
    let now = Utc::now();
    identity_group::ActiveModel {
        name: Set(name.to_string()),
        description: Set(None),
        owner_identity_id: Set(owner_identity_id),
        approval_mode: Set(approval_mode),
        approval_threshold: Set(approval_threshold),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("Failed to create test group")
}

pub async fn add_test_approver(
    db: &DatabaseConnection,
    group_id: i64,
    identity_id: i64,
) -> group_approver::Model {
    group_approver::ActiveModel {
        group_id: Set(group_id),
        identity_id: Set(identity_id),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("Failed to add test approver")
}

/// Assign a seeded role, globally or scoped to `organization_id`
pub async fn assign_test_role(
    db: &DatabaseConnection,
    identity_id: i64,
    role_name: &str,
    organization_id: Option<i64>,
) {
    let role = rbac::find_role_by_name(db, role_name)
        .await
        .unwrap()
        .expect("Seeded role missing");
    let scope = match organization_id {
        Some(_) => RoleScope::Organization,
        None => RoleScope::Global,
    };
    rbac::assign_role(db, identity_id, role.id, scope, organization_id)
        .await
        .expect("Failed to assign test role");
}
