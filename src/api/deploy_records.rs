use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use sea_orm::ModelTrait;
use serde::Deserialize;

use crate::api::hosts::PageResponse;
use crate::error::{AppError, Result};
use crate::models::deploy_record::{self, DeployStatus};
use crate::services::records::{self, DeployStats, RecordFilter};
use crate::state::AppState;

/// Create deploy-record routes. Records are created and mutated only
/// by the pipeline engine; this surface is read plus history cleanup.
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/", get(list_records))
        .route("/stats", get(get_stats))
        .route("/project/{project_id}", get(list_by_project))
        .route("/branch/{branch}", get(list_by_branch))
        .route("/status/{status}", get(list_by_status))
        .route(
            "/project/{project_id}/branch/{branch}/latest",
            get(get_latest),
        )
        .route("/{record_id}", get(get_record).delete(delete_record))
        .route("/{record_id}/log", get(get_record_log))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub page: Option<u64>,
    pub page_size: Option<u64>,
    pub project_id: Option<i64>,
    pub branch: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PageParams {
    pub page: Option<u64>,
    pub page_size: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct StatsParams {
    pub project_id: Option<i64>,
}

fn page_bounds(page: Option<u64>, page_size: Option<u64>) -> (u64, u64) {
    (page.unwrap_or(1).max(1), page_size.unwrap_or(20).clamp(1, 100))
}

fn parse_status(raw: &str) -> Result<DeployStatus> {
    DeployStatus::parse(raw)
        .ok_or_else(|| AppError::BadRequest(format!("unknown deploy status '{}'", raw)))
}

async fn paged(
    state: &AppState,
    filter: RecordFilter,
    page: Option<u64>,
    page_size: Option<u64>,
) -> Result<Json<PageResponse<deploy_record::Model>>> {
    let (page, page_size) = page_bounds(page, page_size);
    let (items, total) = records::list(&state.db, &filter, page, page_size).await?;
    Ok(Json(PageResponse { items, total }))
}

async fn list_records(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<PageResponse<deploy_record::Model>>> {
    let status = match params.status.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => Some(parse_status(raw)?),
        None => None,
    };
    let filter = RecordFilter {
        project_id: params.project_id,
        branch: params.branch.filter(|b| !b.is_empty()),
        status,
    };
    paged(&state, filter, params.page, params.page_size).await
}

async fn list_by_project(
    State(state): State<AppState>,
    Path(project_id): Path<i64>,
    Query(params): Query<PageParams>,
) -> Result<Json<PageResponse<deploy_record::Model>>> {
    let filter = RecordFilter {
        project_id: Some(project_id),
        ..Default::default()
    };
    paged(&state, filter, params.page, params.page_size).await
}

async fn list_by_branch(
    State(state): State<AppState>,
    Path(branch): Path<String>,
    Query(params): Query<PageParams>,
) -> Result<Json<PageResponse<deploy_record::Model>>> {
    let filter = RecordFilter {
        branch: Some(branch),
        ..Default::default()
    };
    paged(&state, filter, params.page, params.page_size).await
}

async fn list_by_status(
    State(state): State<AppState>,
    Path(status): Path<String>,
    Query(params): Query<PageParams>,
) -> Result<Json<PageResponse<deploy_record::Model>>> {
    let filter = RecordFilter {
        status: Some(parse_status(&status)?),
        ..Default::default()
    };
    paged(&state, filter, params.page, params.page_size).await
}

async fn get_record(
    State(state): State<AppState>,
    Path(record_id): Path<i64>,
) -> Result<Json<deploy_record::Model>> {
    Ok(Json(records::get(&state.db, record_id).await?))
}

/// Raw content of the record's deploy log, or empty when the run has
/// not written anything yet.
async fn get_record_log(
    State(state): State<AppState>,
    Path(record_id): Path<i64>,
) -> Result<String> {
    let record = records::get(&state.db, record_id).await?;
    match tokio::fs::read_to_string(&record.log_path).await {
        Ok(content) => Ok(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(e.into()),
    }
}

/// Most recent record for a (project, branch) pair; 404 when the pair
/// has never deployed.
async fn get_latest(
    State(state): State<AppState>,
    Path((project_id, branch)): Path<(i64, String)>,
) -> Result<Json<deploy_record::Model>> {
    records::latest(&state.db, project_id, Some(&branch))
        .await?
        .map(Json)
        .ok_or_else(|| {
            AppError::NotFound(format!(
                "No deploy records for project {} branch '{}'",
                project_id, branch
            ))
        })
}

async fn get_stats(
    State(state): State<AppState>,
    Query(params): Query<StatsParams>,
) -> Result<Json<DeployStats>> {
    Ok(Json(records::stats(&state.db, params.project_id).await?))
}

/// Remove a record and its log file. Running records stay until they
/// reach a terminal status.
async fn delete_record(
    State(state): State<AppState>,
    Path(record_id): Path<i64>,
) -> Result<Json<serde_json::Value>> {
    let record = records::get(&state.db, record_id).await?;
    if record.status == DeployStatus::Running {
        return Err(AppError::Conflict(
            "cannot delete a running deploy record".to_string(),
        ));
    }

    let log_path = record.log_path.clone();
    record.delete(&state.db).await?;
    if let Err(e) = tokio::fs::remove_file(&log_path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %log_path, error = %e, "Failed to remove deploy log");
        }
    }

    Ok(Json(serde_json::json!({ "deleted": true })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::records::create_running;
    use crate::services::ssh::SessionManager;
    use crate::test_helpers::{create_test_db, insert_project};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn test_app() -> (Router, AppState) {
        let db = create_test_db().await;
        let state = AppState::new(db, SessionManager::default());
        (routes(state.clone()), state)
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_list_by_status_path() {
        let (app, state) = test_app().await;
        let project = insert_project(&state.db, "Web", "web").await;
        let running = create_running(&state.db, &project, "main").await.unwrap();
        records::finish(&state.db, running, DeployStatus::Success)
            .await
            .unwrap();
        create_running(&state.db, &project, "develop").await.unwrap();

        let response = app
            .clone()
            .oneshot(Request::get("/status/running").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let page = body_json(response).await;
        assert_eq!(page["total"], 1);
        assert_eq!(page["items"][0]["branch"], "develop");

        let response = app
            .oneshot(Request::get("/status/bogus").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_list_by_project_and_branch_paths() {
        let (app, state) = test_app().await;
        let project = insert_project(&state.db, "Web", "web").await;
        let other = insert_project(&state.db, "Api", "api").await;
        create_running(&state.db, &project, "main").await.unwrap();
        create_running(&state.db, &other, "main").await.unwrap();

        let response = app
            .clone()
            .oneshot(
                Request::get(format!("/project/{}", project.id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let page = body_json(response).await;
        assert_eq!(page["total"], 1);

        let response = app
            .oneshot(Request::get("/branch/main").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let page = body_json(response).await;
        assert_eq!(page["total"], 2);
    }

    #[tokio::test]
    async fn test_latest_and_stats() {
        let (app, state) = test_app().await;
        let project = insert_project(&state.db, "Web", "web").await;
        let first = create_running(&state.db, &project, "main").await.unwrap();
        records::finish(&state.db, first, DeployStatus::Failed)
            .await
            .unwrap();
        create_running(&state.db, &project, "main").await.unwrap();

        let response = app
            .clone()
            .oneshot(
                Request::get(format!("/project/{}/branch/main/latest", project.id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let latest = body_json(response).await;
        assert_eq!(latest["status"], "running");

        let response = app
            .clone()
            .oneshot(
                Request::get(format!("/project/{}/branch/develop/latest", project.id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .oneshot(
                Request::get(format!("/stats?project_id={}", project.id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let stats = body_json(response).await;
        assert_eq!(stats["total"], 2);
        assert_eq!(stats["running"], 1);
        assert_eq!(stats["failed"], 1);
    }

    #[tokio::test]
    async fn test_running_record_cannot_be_deleted() {
        let (app, state) = test_app().await;
        let project = insert_project(&state.db, "Web", "web").await;
        let running = create_running(&state.db, &project, "main").await.unwrap();

        let response = app
            .clone()
            .oneshot(
                Request::delete(format!("/{}", running.id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let finished = records::finish(&state.db, running, DeployStatus::Success)
            .await
            .unwrap();
        let response = app
            .oneshot(
                Request::delete(format!("/{}", finished.id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_log_for_record_without_file_is_empty() {
        let (app, state) = test_app().await;
        let project = insert_project(&state.db, "Web", "web").await;
        let record = create_running(&state.db, &project, "main").await.unwrap();

        let response = app
            .oneshot(
                Request::get(format!("/{}/log", record.id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
