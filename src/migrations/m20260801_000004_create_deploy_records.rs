//! Migration: Create deploy_records table
//!
//! The partial unique index on (project_id, branch) WHERE
//! status = 'running' is the compare-and-create gate that keeps at
//! most one running deploy per branch, even under concurrent webhook
//! triggers.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(DeployRecords::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DeployRecords::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(DeployRecords::ProjectId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DeployRecords::ProjectName)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(DeployRecords::Branch).string().not_null())
                    .col(
                        ColumnDef::new(DeployRecords::Status)
                            .string_len(16)
                            .not_null()
                            .default("running"),
                    )
                    .col(
                        ColumnDef::new(DeployRecords::StartTime)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(DeployRecords::Duration).big_integer().null())
                    .col(ColumnDef::new(DeployRecords::LogPath).string().not_null())
                    .col(
                        ColumnDef::new(DeployRecords::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DeployRecords::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_deploy_records_project")
                    .table(DeployRecords::Table)
                    .col(DeployRecords::ProjectId)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_deploy_records_status")
                    .table(DeployRecords::Table)
                    .col(DeployRecords::Status)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        // Partial unique index; sea_query has no portable builder for
        // the WHERE clause, so raw SQL (SQLite syntax).
        manager
            .get_connection()
            .execute_unprepared(
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_deploy_records_running \
                 ON deploy_records (project_id, branch) WHERE status = 'running'",
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared("DROP INDEX IF EXISTS idx_deploy_records_running")
            .await?;

        manager
            .drop_table(
                Table::drop()
                    .table(DeployRecords::Table)
                    .if_exists()
                    .to_owned(),
            )
            .await
    }
}

#[derive(Iden)]
pub enum DeployRecords {
    Table,
    Id,
    #[iden = "project_id"]
    ProjectId,
    #[iden = "project_name"]
    ProjectName,
    Branch,
    Status,
    #[iden = "start_time"]
    StartTime,
    Duration,
    #[iden = "log_path"]
    LogPath,
    #[iden = "created_at"]
    CreatedAt,
    #[iden = "updated_at"]
    UpdatedAt,
}
