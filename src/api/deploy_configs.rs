use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, DbErr, EntityTrait, QueryFilter, QueryOrder, Set};
use serde::Deserialize;

use crate::error::{AppError, Result};
use crate::models::deploy_config::{self, ConfigItem};
use crate::models::prelude::*;
use crate::models::project;
use crate::state::AppState;

/// Create deploy-config routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/", get(list_configs).post(create_config))
        .route(
            "/{config_id}",
            get(get_config).put(update_config).delete(delete_config),
        )
        .route("/project/{project_id}", get(list_for_project))
        .route(
            "/project/{project_id}/branch/{branch}",
            get(get_for_branch),
        )
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct CreateConfigRequest {
    pub project_id: i64,
    pub branch: String,
    pub items: Vec<ConfigItem>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateConfigRequest {
    pub items: Vec<ConfigItem>,
}

fn is_unique_violation(err: &DbErr) -> bool {
    err.to_string().contains("UNIQUE constraint failed")
}

fn validate_items(items: &[ConfigItem]) -> Result<()> {
    for item in items {
        if item.key.trim().is_empty() {
            return Err(AppError::Validation(
                "config item keys must not be empty".to_string(),
            ));
        }
    }
    Ok(())
}

async fn find_config(state: &AppState, config_id: i64) -> Result<deploy_config::Model> {
    DeployConfig::find_by_id(config_id)
        .one(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Deploy config {} not found", config_id)))
}

async fn list_configs(State(state): State<AppState>) -> Result<Json<Vec<deploy_config::Model>>> {
    Ok(Json(
        DeployConfig::find()
            .order_by_desc(deploy_config::Column::UpdatedAt)
            .all(&state.db)
            .await?,
    ))
}

/// Create the config for a (project, branch) pair. One config per
/// pair; a second create for the same pair is a conflict.
async fn create_config(
    State(state): State<AppState>,
    Json(req): Json<CreateConfigRequest>,
) -> Result<Json<deploy_config::Model>> {
    if req.branch.trim().is_empty() {
        return Err(AppError::Validation("branch must not be empty".to_string()));
    }
    validate_items(&req.items)?;

    // The project must exist and be live
    Project::find_by_id(req.project_id)
        .filter(project::Column::DeletedAt.is_null())
        .one(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Project {} not found", req.project_id)))?;

    let now = Utc::now();
    let active = deploy_config::ActiveModel {
        project_id: Set(req.project_id),
        branch: Set(req.branch.clone()),
        config: Set(serde_json::to_value(&req.items)?),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };

    match active.insert(&state.db).await {
        Ok(created) => Ok(Json(created)),
        Err(e) if is_unique_violation(&e) => Err(AppError::Conflict(format!(
            "a config for branch '{}' already exists",
            req.branch
        ))),
        Err(e) => Err(e.into()),
    }
}

async fn get_config(
    State(state): State<AppState>,
    Path(config_id): Path<i64>,
) -> Result<Json<deploy_config::Model>> {
    Ok(Json(find_config(&state, config_id).await?))
}

/// Replace the item list; project and branch are fixed at creation.
async fn update_config(
    State(state): State<AppState>,
    Path(config_id): Path<i64>,
    Json(req): Json<UpdateConfigRequest>,
) -> Result<Json<deploy_config::Model>> {
    validate_items(&req.items)?;

    let existing = find_config(&state, config_id).await?;
    let mut active: deploy_config::ActiveModel = existing.into();
    active.config = Set(serde_json::to_value(&req.items)?);
    active.updated_at = Set(Utc::now());
    Ok(Json(active.update(&state.db).await?))
}

async fn delete_config(
    State(state): State<AppState>,
    Path(config_id): Path<i64>,
) -> Result<Json<serde_json::Value>> {
    let existing = find_config(&state, config_id).await?;
    let active: deploy_config::ActiveModel = existing.into();
    active.delete(&state.db).await?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}

async fn list_for_project(
    State(state): State<AppState>,
    Path(project_id): Path<i64>,
) -> Result<Json<Vec<deploy_config::Model>>> {
    Ok(Json(
        DeployConfig::find()
            .filter(deploy_config::Column::ProjectId.eq(project_id))
            .order_by_asc(deploy_config::Column::Branch)
            .all(&state.db)
            .await?,
    ))
}

async fn get_for_branch(
    State(state): State<AppState>,
    Path((project_id, branch)): Path<(i64, String)>,
) -> Result<Json<deploy_config::Model>> {
    DeployConfig::find()
        .filter(deploy_config::Column::ProjectId.eq(project_id))
        .filter(deploy_config::Column::Branch.eq(branch.clone()))
        .one(&state.db)
        .await?
        .map(Json)
        .ok_or_else(|| {
            AppError::NotFound(format!(
                "No config for project {} branch '{}'",
                project_id, branch
            ))
        })
}
