pub use sea_orm_migration::prelude::*;

mod m20260301_000001_create_identities;
mod m20260301_000002_create_organizations;
mod m20260301_000003_create_entities;
mod m20260301_000004_create_dependencies;
mod m20260301_000005_create_rbac;
mod m20260301_000006_create_groups;
mod m20260301_000007_create_access_requests;
mod m20260301_000008_create_issues;
mod m20260301_000009_create_audit_logs;
mod m20260301_000010_seed_defaults;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260301_000001_create_identities::Migration),
            Box::new(m20260301_000002_create_organizations::Migration),
            Box::new(m20260301_000003_create_entities::Migration),
            Box::new(m20260301_000004_create_dependencies::Migration),
            Box::new(m20260301_000005_create_rbac::Migration),
            Box::new(m20260301_000006_create_groups::Migration),
            Box::new(m20260301_000007_create_access_requests::Migration),
            Box::new(m20260301_000008_create_issues::Migration),
            Box::new(m20260301_000009_create_audit_logs::Migration),
            Box::new(m20260301_000010_seed_defaults::Migration),
        ]
    }
}
