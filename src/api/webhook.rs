use axum::{
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use serde::Deserialize;

use crate::error::{AppError, Result};
use crate::models::deploy_record;
use crate::models::prelude::*;
use crate::models::project;
use crate::services::pipeline;
use crate::state::AppState;

/// Create webhook routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/{project_code}", post(trigger_deploy))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct WebhookRequest {
    pub password: String,
    pub branch: String,
}

/// CI entry point. Authenticates with the project's webhook password,
/// opens the running record, and returns it immediately; the pipeline
/// itself runs detached.
async fn trigger_deploy(
    State(state): State<AppState>,
    Path(project_code): Path<String>,
    Json(req): Json<WebhookRequest>,
) -> Result<Json<deploy_record::Model>> {
    let target = Project::find()
        .filter(project::Column::Code.eq(project_code.clone()))
        .filter(project::Column::DeletedAt.is_null())
        .one(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Project '{}' not found", project_code)))?;

    let expected = target
        .webhook_password
        .as_deref()
        .filter(|p| !p.is_empty())
        .ok_or_else(|| {
            AppError::Unauthorized("project has no webhook password configured".to_string())
        })?;
    if req.password != expected {
        tracing::warn!(project = %project_code, "Webhook rejected: bad password");
        return Err(AppError::Unauthorized("invalid webhook password".to_string()));
    }

    let record = pipeline::trigger(&state, target, req.branch).await?;
    Ok(Json(record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ssh::SessionManager;
    use crate::test_helpers::{create_test_db, insert_host, insert_project};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use sea_orm::{ActiveModelTrait, Set};
    use tower::ServiceExt;

    async fn test_app() -> (Router, AppState) {
        let db = create_test_db().await;
        let state = AppState::new(
            db,
            SessionManager::new(
                std::time::Duration::from_secs(1),
                std::time::Duration::from_secs(60),
            ),
        );
        (routes(state.clone()), state)
    }

    fn hook(code: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(format!("/{}", code))
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_unknown_project_is_404() {
        let (app, _) = test_app().await;
        let response = app
            .oneshot(hook("nope", serde_json::json!({ "password": "x", "branch": "main" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_bad_password_is_401() {
        let (app, state) = test_app().await;
        insert_project(&state.db, "Web", "web").await;

        let response = app
            .oneshot(hook("web", serde_json::json!({ "password": "wrong", "branch": "main" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_valid_hook_returns_running_record() {
        let (app, state) = test_app().await;
        let host = insert_host(&state.db, "target", "127.0.0.1", 1).await;
        let project = insert_project(&state.db, "Web", "web").await;
        let mut active: crate::models::project::ActiveModel = project.into();
        active.host_id = Set(Some(host.id));
        active.git_repo = Set(Some("https://git.example.com/web.git".to_string()));
        active.update(&state.db).await.unwrap();

        let response = app
            .oneshot(hook(
                "web",
                serde_json::json!({ "password": "hook-secret", "branch": "main" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let record: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(record["status"], "running");
        assert_eq!(record["branch"], "main");
    }

    #[tokio::test]
    async fn test_project_without_host_is_400() {
        let (app, state) = test_app().await;
        insert_project(&state.db, "Web", "web").await;

        let response = app
            .oneshot(hook(
                "web",
                serde_json::json!({ "password": "hook-secret", "branch": "main" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
