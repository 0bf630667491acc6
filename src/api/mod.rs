pub mod deploy_configs;
pub mod deploy_records;
pub mod hosts;
pub mod projects;
pub mod webhook;

use axum::{routing::get, Json, Router};

use crate::config::CONFIG;
use crate::state::AppState;

/// Create the main API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/system/version", get(version))
        .nest("/api/host", hosts::routes(state.clone()))
        .nest("/api/project", projects::routes(state.clone()))
        .nest("/api/deploy-config", deploy_configs::routes(state.clone()))
        .nest("/api/deploy-record", deploy_records::routes(state.clone()))
        .nest("/api/webhook", webhook::routes(state))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn version() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "version": CONFIG.version }))
}
