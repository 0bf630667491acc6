use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "projects")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub name: String,
    /// Stable external routing key (webhook URL); unique and immutable
    /// after creation.
    #[sea_orm(unique)]
    pub code: String,
    pub remark: Option<String>,
    pub git_repo: Option<String>,
    pub git_username: Option<String>,
    #[serde(skip_serializing)]
    pub git_password: Option<String>,
    #[serde(skip_serializing)]
    pub webhook_password: Option<String>,
    /// Target host deploy pipelines run against
    pub host_id: Option<i64>,
    /// Checkout location on the target host; falls back to the
    /// configured remote workspace when unset
    pub deploy_path: Option<String>,
    /// Relative path to a Dockerfile inside the checkout; presence
    /// enables the Docker build/run pipeline step
    pub dockerfile: Option<String>,
    pub deleted_at: Option<DateTimeUtc>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::host::Entity",
        from = "Column::HostId",
        to = "super::host::Column::Id"
    )]
    Host,
    #[sea_orm(has_many = "super::deploy_config::Entity")]
    DeployConfigs,
    #[sea_orm(has_many = "super::deploy_record::Entity")]
    DeployRecords,
}

impl Related<super::host::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Host.def()
    }
}

impl Related<super::deploy_config::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DeployConfigs.def()
    }
}

impl Related<super::deploy_record::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DeployRecords.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
