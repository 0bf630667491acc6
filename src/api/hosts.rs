use axum::{
    extract::{Multipart, Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

use crate::config::CONFIG;
use crate::error::{AppError, Result};
use crate::models::host::{self, AuthType, HostStatus};
use crate::models::prelude::*;
use crate::services::docker;
use crate::services::health::{self, HostCheckResult};
use crate::services::ssh::{CommandError, DirectoryUploadResult, ExecOutput, ProbeResult};
use crate::state::AppState;

/// Create host routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/", get(list_hosts).post(create_host))
        .route("/execute", post(execute_command))
        .route("/batch-check", post(batch_check))
        .route("/upload/file", post(upload_file))
        .route("/upload/directory", post(upload_directory))
        .route("/docker/info", post(docker_info))
        .route("/docker/build", post(docker_build))
        .route("/docker/run", post(docker_run))
        .route("/docker/execute", post(docker_execute))
        .route(
            "/{host_id}",
            get(get_host).put(update_host).delete(delete_host),
        )
        .route("/{host_id}/test", post(test_host))
        .with_state(state)
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub page: Option<u64>,
    pub page_size: Option<u64>,
    pub keyword: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PageResponse<T> {
    pub items: Vec<T>,
    pub total: u64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateHostRequest {
    #[validate(length(min = 1, max = 64))]
    pub name: String,
    #[validate(length(min = 1, max = 255))]
    pub host: String,
    #[validate(range(min = 1, max = 65535))]
    #[serde(default = "default_ssh_port")]
    pub port: i32,
    #[validate(length(min = 1, max = 64))]
    pub username: String,
    #[validate(length(min = 1))]
    pub password: String,
    #[serde(default)]
    pub auth_type: Option<AuthType>,
    pub remark: Option<String>,
}

fn default_ssh_port() -> i32 {
    22
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateHostRequest {
    #[validate(length(min = 1, max = 64))]
    pub name: Option<String>,
    #[validate(length(min = 1, max = 255))]
    pub host: Option<String>,
    #[validate(range(min = 1, max = 65535))]
    pub port: Option<i32>,
    #[validate(length(min = 1, max = 64))]
    pub username: Option<String>,
    pub password: Option<String>,
    pub auth_type: Option<AuthType>,
    pub remark: Option<String>,
}

/// Execution target: either a saved host (cached session) or inline
/// one-shot credentials (uncached).
#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    pub host_id: Option<i64>,
    pub host: Option<String>,
    #[serde(default = "default_ssh_port")]
    pub port: i32,
    pub username: Option<String>,
    pub password: Option<String>,
    pub command: String,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct BatchCheckRequest {
    pub host_ids: Vec<i64>,
}

#[derive(Debug, Serialize)]
pub struct ExecResponse {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: i64,
    pub timed_out: bool,
}

#[derive(Debug, Deserialize)]
pub struct DockerInfoRequest {
    pub host_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct DockerBuildRequest {
    pub host_id: i64,
    #[serde(flatten)]
    pub spec: docker::BuildSpec,
}

#[derive(Debug, Deserialize)]
pub struct DockerRunRequest {
    pub host_id: i64,
    #[serde(flatten)]
    pub spec: docker::RunSpec,
}

#[derive(Debug, Deserialize)]
pub struct DockerExecRequest {
    pub host_id: i64,
    pub container: String,
    pub command: String,
}

// ============================================================================
// Helper Functions
// ============================================================================

async fn find_host(state: &AppState, host_id: i64) -> Result<host::Model> {
    Host::find_by_id(host_id)
        .filter(host::Column::DeletedAt.is_null())
        .one(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Host {} not found", host_id)))
}

fn command_timeout(requested: Option<u64>) -> Duration {
    Duration::from_secs(requested.unwrap_or(CONFIG.command_timeout_secs))
}

/// Flatten a command outcome into one response shape. Connection
/// failures are service errors; a timeout is a result with whatever
/// output was captured.
fn exec_response(
    result: std::result::Result<ExecOutput, CommandError>,
) -> Result<Json<ExecResponse>> {
    match result {
        Ok(output) => Ok(Json(ExecResponse {
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
            duration_ms: output.duration_ms,
            timed_out: false,
        })),
        Err(CommandError::Timeout {
            timeout_secs,
            stdout,
            stderr,
        }) => Ok(Json(ExecResponse {
            exit_code: -1,
            stdout,
            stderr,
            duration_ms: (timeout_secs * 1000) as i64,
            timed_out: true,
        })),
        Err(CommandError::Connection(e)) => Err(AppError::ServiceUnavailable(e.to_string())),
    }
}

// ============================================================================
// Endpoint Handlers
// ============================================================================

/// List hosts, newest first; keyword matches name or address.
async fn list_hosts(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<PageResponse<host::Model>>> {
    let page = params.page.unwrap_or(1).max(1);
    let page_size = params.page_size.unwrap_or(20).clamp(1, 100);

    let mut query = Host::find().filter(host::Column::DeletedAt.is_null());
    if let Some(keyword) = params.keyword.as_deref().filter(|k| !k.is_empty()) {
        let pattern = format!("%{}%", keyword);
        query = query.filter(
            host::Column::Name
                .like(pattern.clone())
                .or(host::Column::Host.like(pattern)),
        );
    }
    if let Some(raw) = params.status.as_deref().filter(|s| !s.is_empty()) {
        let status = HostStatus::parse(raw)
            .ok_or_else(|| AppError::BadRequest(format!("unknown host status '{}'", raw)))?;
        query = query.filter(host::Column::Status.eq(status));
    }

    let paginator = query
        .order_by_desc(host::Column::CreatedAt)
        .paginate(&state.db, page_size);
    let total = paginator.num_items().await?;
    let items = paginator.fetch_page(page - 1).await?;

    Ok(Json(PageResponse { items, total }))
}

async fn create_host(
    State(state): State<AppState>,
    Json(req): Json<CreateHostRequest>,
) -> Result<Json<host::Model>> {
    req.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let now = Utc::now();
    let created = host::ActiveModel {
        name: Set(req.name),
        host: Set(req.host),
        port: Set(req.port),
        username: Set(req.username),
        password: Set(req.password),
        auth_type: Set(req.auth_type.unwrap_or(AuthType::Password)),
        status: Set(HostStatus::Inactive),
        remark: Set(req.remark),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&state.db)
    .await?;

    Ok(Json(created))
}

async fn get_host(
    State(state): State<AppState>,
    Path(host_id): Path<i64>,
) -> Result<Json<host::Model>> {
    Ok(Json(find_host(&state, host_id).await?))
}

/// Update a host. The cached session is invalidated so the next
/// command dials with the current address and credentials.
async fn update_host(
    State(state): State<AppState>,
    Path(host_id): Path<i64>,
    Json(req): Json<UpdateHostRequest>,
) -> Result<Json<host::Model>> {
    req.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let existing = find_host(&state, host_id).await?;
    let mut active: host::ActiveModel = existing.into();

    if let Some(name) = req.name {
        active.name = Set(name);
    }
    if let Some(host_addr) = req.host {
        active.host = Set(host_addr);
    }
    if let Some(port) = req.port {
        active.port = Set(port);
    }
    if let Some(username) = req.username {
        active.username = Set(username);
    }
    if let Some(password) = req.password.filter(|p| !p.is_empty()) {
        active.password = Set(password);
    }
    if let Some(auth_type) = req.auth_type {
        active.auth_type = Set(auth_type);
    }
    if let Some(remark) = req.remark {
        active.remark = Set(Some(remark));
    }
    active.updated_at = Set(Utc::now());

    let updated = active.update(&state.db).await?;
    state.sessions.invalidate(host_id).await;
    Ok(Json(updated))
}

/// Soft-delete a host and drop its cached session.
async fn delete_host(
    State(state): State<AppState>,
    Path(host_id): Path<i64>,
) -> Result<Json<serde_json::Value>> {
    let existing = find_host(&state, host_id).await?;

    let mut active: host::ActiveModel = existing.into();
    active.deleted_at = Set(Some(Utc::now()));
    active.updated_at = Set(Utc::now());
    active.update(&state.db).await?;

    state.sessions.invalidate(host_id).await;
    Ok(Json(serde_json::json!({ "deleted": true })))
}

/// Probe connectivity and persist the observed online/offline status.
async fn test_host(
    State(state): State<AppState>,
    Path(host_id): Path<i64>,
) -> Result<Json<ProbeResult>> {
    let target = find_host(&state, host_id).await?;
    let probe = health::check_host(&state, &target).await?;
    Ok(Json(probe))
}

/// Run a command either on a saved host (cached session, by host_id)
/// or with inline credentials over a one-shot session. Inline targets
/// leave no cached session and no persisted status.
async fn execute_command(
    State(state): State<AppState>,
    Json(req): Json<ExecuteRequest>,
) -> Result<Json<ExecResponse>> {
    if req.command.trim().is_empty() {
        return Err(AppError::BadRequest("command must not be empty".to_string()));
    }
    let timeout = command_timeout(req.timeout_secs);

    if let Some(host_id) = req.host_id {
        let target = find_host(&state, host_id).await?;
        return exec_response(state.sessions.execute(&target, &req.command, timeout).await);
    }

    let (addr, username, password) = match (req.host, req.username, req.password) {
        (Some(h), Some(u), Some(p)) if !h.is_empty() && !u.is_empty() && !p.is_empty() => {
            (h, u, p)
        }
        _ => {
            return Err(AppError::BadRequest(
                "either host_id or host/username/password is required".to_string(),
            ))
        }
    };

    let now = Utc::now();
    let target = host::Model {
        id: 0,
        name: addr.clone(),
        host: addr,
        port: req.port,
        username,
        password,
        auth_type: AuthType::Password,
        status: HostStatus::Inactive,
        remark: None,
        deleted_at: None,
        created_at: now,
        updated_at: now,
    };
    exec_response(
        state
            .sessions
            .execute_transient(&target, &req.command, timeout)
            .await,
    )
}

/// Check a set of hosts concurrently; one result per requested id, in
/// request order.
async fn batch_check(
    State(state): State<AppState>,
    Json(req): Json<BatchCheckRequest>,
) -> Result<Json<Vec<HostCheckResult>>> {
    Ok(Json(health::check_batch(&state, &req.host_ids).await?))
}

/// Multipart upload of a single file. Fields: `host_id`, `path`
/// (remote file path), `file` (content).
async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>> {
    let mut host_id: Option<i64> = None;
    let mut remote_path: Option<String> = None;
    let mut content: Option<Vec<u8>> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("invalid multipart body: {}", e)))?
    {
        match field.name() {
            Some("host_id") => {
                let raw = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?;
                host_id = Some(raw.parse().map_err(|_| {
                    AppError::BadRequest(format!("invalid host_id '{}'", raw))
                })?);
            }
            Some("path") => {
                remote_path = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| AppError::BadRequest(e.to_string()))?,
                );
            }
            Some("file") => {
                content = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| AppError::BadRequest(e.to_string()))?
                        .to_vec(),
                );
            }
            _ => {}
        }
    }

    let host_id =
        host_id.ok_or_else(|| AppError::BadRequest("missing 'host_id' field".to_string()))?;
    let remote_path = remote_path
        .filter(|p| !p.is_empty())
        .ok_or_else(|| AppError::BadRequest("missing 'path' field".to_string()))?;
    let content =
        content.ok_or_else(|| AppError::BadRequest("missing 'file' field".to_string()))?;

    let target = find_host(&state, host_id).await?;
    match state
        .sessions
        .upload_file(&target, &content, &remote_path)
        .await
    {
        Ok(()) => Ok(Json(serde_json::json!({
            "path": remote_path,
            "size": content.len(),
        }))),
        Err(CommandError::Connection(e)) => Err(AppError::ServiceUnavailable(e.to_string())),
        Err(e) => Err(AppError::Internal(e.to_string())),
    }
}

/// Multipart upload of a directory tree. Fields: `host_id`, `path`
/// (remote base directory), then repeated `files` entries whose
/// filenames carry their path relative to the base. Partial failure is
/// reported per file, not as an error.
async fn upload_directory(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<DirectoryUploadResult>> {
    let mut host_id: Option<i64> = None;
    let mut remote_base: Option<String> = None;
    let mut files: Vec<(String, Vec<u8>)> = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("invalid multipart body: {}", e)))?
    {
        match field.name() {
            Some("host_id") => {
                let raw = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?;
                host_id = Some(raw.parse().map_err(|_| {
                    AppError::BadRequest(format!("invalid host_id '{}'", raw))
                })?);
            }
            Some("path") => {
                remote_base = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| AppError::BadRequest(e.to_string()))?,
                );
            }
            Some("files") => {
                let rel_path = field
                    .file_name()
                    .map(|f| f.to_string())
                    .filter(|f| !f.is_empty())
                    .ok_or_else(|| {
                        AppError::BadRequest("file entry without a filename".to_string())
                    })?;
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?;
                files.push((rel_path, bytes.to_vec()));
            }
            _ => {}
        }
    }

    let host_id =
        host_id.ok_or_else(|| AppError::BadRequest("missing 'host_id' field".to_string()))?;
    let remote_base = remote_base
        .filter(|p| !p.is_empty())
        .ok_or_else(|| AppError::BadRequest("missing 'path' field".to_string()))?;
    if files.is_empty() {
        return Err(AppError::BadRequest("no files in request".to_string()));
    }

    let target = find_host(&state, host_id).await?;
    let result = state
        .sessions
        .upload_directory(&target, &files, &remote_base)
        .await
        .map_err(|e| AppError::ServiceUnavailable(e.to_string()))?;
    Ok(Json(result))
}

async fn docker_info(
    State(state): State<AppState>,
    Json(req): Json<DockerInfoRequest>,
) -> Result<Json<serde_json::Value>> {
    let target = find_host(&state, req.host_id).await?;
    match docker::info(&state.sessions, &target).await {
        Ok(Ok(info)) => Ok(Json(info)),
        Ok(Err(output)) => Err(AppError::ServiceUnavailable(format!(
            "docker daemon not available: {}",
            output.stderr.trim()
        ))),
        Err(e) => Err(AppError::ServiceUnavailable(e.to_string())),
    }
}

async fn docker_build(
    State(state): State<AppState>,
    Json(req): Json<DockerBuildRequest>,
) -> Result<Json<ExecResponse>> {
    let target = find_host(&state, req.host_id).await?;
    exec_response(docker::build(&state.sessions, &target, &req.spec).await)
}

async fn docker_run(
    State(state): State<AppState>,
    Json(req): Json<DockerRunRequest>,
) -> Result<Json<ExecResponse>> {
    let target = find_host(&state, req.host_id).await?;
    exec_response(docker::run(&state.sessions, &target, &req.spec).await)
}

async fn docker_execute(
    State(state): State<AppState>,
    Json(req): Json<DockerExecRequest>,
) -> Result<Json<ExecResponse>> {
    if req.container.trim().is_empty() || req.command.trim().is_empty() {
        return Err(AppError::BadRequest(
            "container and command must not be empty".to_string(),
        ));
    }
    let target = find_host(&state, req.host_id).await?;
    exec_response(
        docker::exec_in_container(&state.sessions, &target, &req.container, &req.command).await,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ssh::SessionManager;
    use crate::test_helpers::{create_test_db, insert_host};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
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

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_create_and_get_host() {
        let (app, _) = test_app().await;

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/",
                serde_json::json!({
                    "name": "build-1",
                    "host": "10.0.0.5",
                    "username": "deploy",
                    "password": "secret",
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let created = body_json(response).await;
        assert_eq!(created["port"], 22);
        assert_eq!(created["status"], "inactive");
        // Credentials never leave the API
        assert!(created.get("password").is_none());

        let id = created["id"].as_i64().unwrap();
        let response = app
            .oneshot(Request::get(format!("/{}", id)).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_create_host_validation() {
        let (app, _) = test_app().await;

        let response = app
            .oneshot(json_request(
                "POST",
                "/",
                serde_json::json!({
                    "name": "",
                    "host": "10.0.0.5",
                    "username": "deploy",
                    "password": "secret",
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_delete_hides_host_from_listing() {
        let (app, state) = test_app().await;
        let target = insert_host(&state.db, "a", "10.0.0.5", 22).await;

        let response = app
            .clone()
            .oneshot(
                Request::delete(format!("/{}", target.id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let page = body_json(response).await;
        assert_eq!(page["total"], 0);

        let response = app
            .oneshot(
                Request::get(format!("/{}", target.id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_list_keyword_and_status_filters() {
        let (app, state) = test_app().await;
        insert_host(&state.db, "build-agent", "10.0.0.5", 22).await;
        insert_host(&state.db, "db-primary", "10.0.0.6", 22).await;

        let response = app
            .clone()
            .oneshot(Request::get("/?keyword=build").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let page = body_json(response).await;
        assert_eq!(page["total"], 1);
        assert_eq!(page["items"][0]["name"], "build-agent");

        // Both fixtures start inactive
        let response = app
            .clone()
            .oneshot(Request::get("/?status=online").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let page = body_json(response).await;
        assert_eq!(page["total"], 0);

        let response = app
            .oneshot(Request::get("/?status=bogus").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_execute_on_unknown_host_is_404() {
        let (app, _) = test_app().await;

        let response = app
            .oneshot(json_request(
                "POST",
                "/execute",
                serde_json::json!({ "host_id": 999, "command": "uptime" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_execute_without_target_is_400() {
        let (app, _) = test_app().await;

        let response = app
            .oneshot(json_request(
                "POST",
                "/execute",
                serde_json::json!({ "command": "uptime" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_execute_unreachable_host_is_503() {
        let (app, state) = test_app().await;
        let target = insert_host(&state.db, "a", "127.0.0.1", 1).await;

        let response = app
            .oneshot(json_request(
                "POST",
                "/execute",
                serde_json::json!({ "host_id": target.id, "command": "uptime" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = body_json(response).await;
        assert_eq!(body["error"], "service_unavailable");
    }

    #[tokio::test]
    async fn test_batch_check_reports_unknown_ids_in_place() {
        let (app, _) = test_app().await;

        let response = app
            .oneshot(json_request(
                "POST",
                "/batch-check",
                serde_json::json!({ "host_ids": [41, 42] }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let results = body_json(response).await;
        assert_eq!(results.as_array().unwrap().len(), 2);
        assert_eq!(results[0]["success"], false);
    }
}
