pub use sea_orm_migration::prelude::*;

mod m20260801_000001_create_hosts;
mod m20260801_000002_create_projects;
mod m20260801_000003_create_deploy_configs;
mod m20260801_000004_create_deploy_records;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260801_000001_create_hosts::Migration),
            Box::new(m20260801_000002_create_projects::Migration),
            Box::new(m20260801_000003_create_deploy_configs::Migration),
            Box::new(m20260801_000004_create_deploy_records::Migration),
        ]
    }
}
