//! Migration: Create deploy_configs table

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(DeployConfigs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DeployConfigs::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(DeployConfigs::ProjectId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(DeployConfigs::Branch).string().not_null())
                    .col(ColumnDef::new(DeployConfigs::Config).json().not_null())
                    .col(
                        ColumnDef::new(DeployConfigs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DeployConfigs::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // One active config per (project, branch)
        manager
            .create_index(
                Index::create()
                    .name("idx_deploy_configs_project_branch")
                    .table(DeployConfigs::Table)
                    .col(DeployConfigs::ProjectId)
                    .col(DeployConfigs::Branch)
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
                    .table(DeployConfigs::Table)
                    .if_exists()
                    .to_owned(),
            )
            .await
    }
}

#[derive(Iden)]
pub enum DeployConfigs {
    Table,
    Id,
    #[iden = "project_id"]
    ProjectId,
    Branch,
    Config,
    #[iden = "created_at"]
    CreatedAt,
    #[iden = "updated_at"]
    UpdatedAt,
}
