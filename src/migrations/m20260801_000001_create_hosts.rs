//! Migration: Create hosts table

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Hosts::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Hosts::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Hosts::Name).string().not_null())
                    .col(ColumnDef::new(Hosts::Host).string().not_null())
                    .col(
                        ColumnDef::new(Hosts::Port)
                            .integer()
                            .not_null()
                            .default(22),
                    )
                    .col(ColumnDef::new(Hosts::Username).string().not_null())
                    .col(ColumnDef::new(Hosts::Password).string().not_null())
                    .col(
                        ColumnDef::new(Hosts::AuthType)
                            .string_len(16)
                            .not_null()
                            .default("password"),
                    )
                    .col(
                        ColumnDef::new(Hosts::Status)
                            .string_len(16)
                            .not_null()
                            .default("inactive"),
                    )
                    .col(ColumnDef::new(Hosts::Remark).string().null())
                    .col(
                        ColumnDef::new(Hosts::DeletedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Hosts::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Hosts::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_hosts_status")
                    .table(Hosts::Table)
                    .col(Hosts::Status)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Hosts::Table).if_exists().to_owned())
            .await
    }
}

#[derive(Iden)]
pub enum Hosts {
    Table,
    Id,
    Name,
    Host,
    Port,
    Username,
    Password,
    #[iden = "auth_type"]
    AuthType,
    Status,
    Remark,
    #[iden = "deleted_at"]
    DeletedAt,
    #[iden = "created_at"]
    CreatedAt,
    #[iden = "updated_at"]
    UpdatedAt,
}
