//! Migration: Create projects table

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Projects::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Projects::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Projects::Name).string().not_null())
                    .col(
                        ColumnDef::new(Projects::Code)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(Projects::Remark).string().null())
                    .col(ColumnDef::new(Projects::GitRepo).string().null())
                    .col(ColumnDef::new(Projects::GitUsername).string().null())
                    .col(ColumnDef::new(Projects::GitPassword).string().null())
                    .col(ColumnDef::new(Projects::WebhookPassword).string().null())
                    .col(ColumnDef::new(Projects::HostId).big_integer().null())
                    .col(ColumnDef::new(Projects::DeployPath).string().null())
                    .col(ColumnDef::new(Projects::Dockerfile).string().null())
                    .col(
                        ColumnDef::new(Projects::DeletedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Projects::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Projects::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_projects_code")
                    .table(Projects::Table)
                    .col(Projects::Code)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Projects::Table).if_exists().to_owned())
            .await
    }
}

#[derive(Iden)]
pub enum Projects {
    Table,
    Id,
    Name,
    Code,
    Remark,
    #[iden = "git_repo"]
    GitRepo,
    #[iden = "git_username"]
    GitUsername,
    #[iden = "git_password"]
    GitPassword,
    #[iden = "webhook_password"]
    WebhookPassword,
    #[iden = "host_id"]
    HostId,
    #[iden = "deploy_path"]
    DeployPath,
    Dockerfile,
    #[iden = "deleted_at"]
    DeletedAt,
    #[iden = "created_at"]
    CreatedAt,
    #[iden = "updated_at"]
    UpdatedAt,
}
