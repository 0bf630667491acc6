use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DbErr, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    Set,
};
use serde::Deserialize;
use validator::Validate;

use crate::api::hosts::PageResponse;
use crate::error::{AppError, Result};
use crate::models::prelude::*;
use crate::models::project;
use crate::state::AppState;

/// Create project routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/", get(list_projects).post(create_project))
        .route(
            "/{project_id}",
            get(get_project).put(update_project).delete(delete_project),
        )
        .route("/code/{code}", get(get_project_by_code))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub page: Option<u64>,
    pub page_size: Option<u64>,
    pub keyword: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateProjectRequest {
    #[validate(length(min = 1, max = 64))]
    pub name: String,
    /// Routing key for the webhook URL; immutable once created
    #[validate(length(min = 1, max = 64))]
    pub code: String,
    pub remark: Option<String>,
    pub git_repo: Option<String>,
    pub git_username: Option<String>,
    pub git_password: Option<String>,
    pub webhook_password: Option<String>,
    pub host_id: Option<i64>,
    pub deploy_path: Option<String>,
    pub dockerfile: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateProjectRequest {
    #[validate(length(min = 1, max = 64))]
    pub name: Option<String>,
    /// Present only to give a clear rejection; the code cannot change
    pub code: Option<String>,
    pub remark: Option<String>,
    pub git_repo: Option<String>,
    pub git_username: Option<String>,
    pub git_password: Option<String>,
    pub webhook_password: Option<String>,
    pub host_id: Option<i64>,
    pub deploy_path: Option<String>,
    pub dockerfile: Option<String>,
}

fn is_unique_violation(err: &DbErr) -> bool {
    err.to_string().contains("UNIQUE constraint failed")
}

async fn find_project(state: &AppState, project_id: i64) -> Result<project::Model> {
    Project::find_by_id(project_id)
        .filter(project::Column::DeletedAt.is_null())
        .one(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Project {} not found", project_id)))
}

async fn list_projects(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<PageResponse<project::Model>>> {
    let page = params.page.unwrap_or(1).max(1);
    let page_size = params.page_size.unwrap_or(20).clamp(1, 100);

    let mut query = Project::find().filter(project::Column::DeletedAt.is_null());
    if let Some(keyword) = params.keyword.as_deref().filter(|k| !k.is_empty()) {
        let pattern = format!("%{}%", keyword);
        query = query.filter(
            project::Column::Name
                .like(pattern.clone())
                .or(project::Column::Code.like(pattern)),
        );
    }

    let paginator = query
        .order_by_desc(project::Column::CreatedAt)
        .paginate(&state.db, page_size);
    let total = paginator.num_items().await?;
    let items = paginator.fetch_page(page - 1).await?;

    Ok(Json(PageResponse { items, total }))
}

async fn create_project(
    State(state): State<AppState>,
    Json(req): Json<CreateProjectRequest>,
) -> Result<Json<project::Model>> {
    req.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let now = Utc::now();
    let active = project::ActiveModel {
        name: Set(req.name),
        code: Set(req.code.clone()),
        remark: Set(req.remark),
        git_repo: Set(req.git_repo),
        git_username: Set(req.git_username),
        git_password: Set(req.git_password),
        webhook_password: Set(req.webhook_password),
        host_id: Set(req.host_id),
        deploy_path: Set(req.deploy_path),
        dockerfile: Set(req.dockerfile),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };

    match active.insert(&state.db).await {
        Ok(created) => Ok(Json(created)),
        Err(e) if is_unique_violation(&e) => Err(AppError::Conflict(format!(
            "project code '{}' already exists",
            req.code
        ))),
        Err(e) => Err(e.into()),
    }
}

async fn get_project(
    State(state): State<AppState>,
    Path(project_id): Path<i64>,
) -> Result<Json<project::Model>> {
    Ok(Json(find_project(&state, project_id).await?))
}

async fn get_project_by_code(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<project::Model>> {
    let found = Project::find()
        .filter(project::Column::Code.eq(code.clone()))
        .filter(project::Column::DeletedAt.is_null())
        .one(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Project '{}' not found", code)))?;
    Ok(Json(found))
}

async fn update_project(
    State(state): State<AppState>,
    Path(project_id): Path<i64>,
    Json(req): Json<UpdateProjectRequest>,
) -> Result<Json<project::Model>> {
    req.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let existing = find_project(&state, project_id).await?;

    // The code is baked into webhook URLs; changing it would silently
    // break every caller
    if let Some(code) = &req.code {
        if *code != existing.code {
            return Err(AppError::BadRequest(
                "project code is immutable".to_string(),
            ));
        }
    }

    let mut active: project::ActiveModel = existing.into();
    if let Some(name) = req.name {
        active.name = Set(name);
    }
    if let Some(remark) = req.remark {
        active.remark = Set(Some(remark));
    }
    if let Some(git_repo) = req.git_repo {
        active.git_repo = Set(Some(git_repo));
    }
    if let Some(git_username) = req.git_username {
        active.git_username = Set(Some(git_username));
    }
    if let Some(git_password) = req.git_password.filter(|p| !p.is_empty()) {
        active.git_password = Set(Some(git_password));
    }
    if let Some(webhook_password) = req.webhook_password.filter(|p| !p.is_empty()) {
        active.webhook_password = Set(Some(webhook_password));
    }
    if let Some(host_id) = req.host_id {
        active.host_id = Set(Some(host_id));
    }
    if let Some(deploy_path) = req.deploy_path {
        active.deploy_path = Set(Some(deploy_path));
    }
    if let Some(dockerfile) = req.dockerfile {
        active.dockerfile = Set(Some(dockerfile));
    }
    active.updated_at = Set(Utc::now());

    Ok(Json(active.update(&state.db).await?))
}

async fn delete_project(
    State(state): State<AppState>,
    Path(project_id): Path<i64>,
) -> Result<Json<serde_json::Value>> {
    let existing = find_project(&state, project_id).await?;

    let mut active: project::ActiveModel = existing.into();
    active.deleted_at = Set(Some(Utc::now()));
    active.updated_at = Set(Utc::now());
    active.update(&state.db).await?;

    Ok(Json(serde_json::json!({ "deleted": true })))
}
