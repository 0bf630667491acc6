use std::net::SocketAddr;

use axum::Router;
use sea_orm::Database;
use sea_orm_migration::MigratorTrait;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use deployd::config::CONFIG;
use deployd::migrations::Migrator;
use deployd::services::records;
use deployd::services::scheduler::start_scheduler;
use deployd::services::ssh::SessionManager;
use deployd::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "deployd=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting deployd v{}", CONFIG.version);

    // Connect and migrate
    if let Some(parent) = CONFIG.db_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let db = Database::connect(CONFIG.db_url()).await?;
    Migrator::up(&db, None).await?;
    tracing::info!("Database connection established");

    // Records left running by a previous process are failed up front
    // so their branches are deployable again
    let swept = records::reconcile_stale_running(&db, 0).await?;
    if swept > 0 {
        tracing::warn!(swept, "Failed deploy records orphaned by restart");
    }

    let state = AppState::new(db, SessionManager::default());

    start_scheduler(state.clone());

    let app = create_app(state);

    let addr = SocketAddr::new(CONFIG.host.parse()?, CONFIG.port);
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn create_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    deployd::api::create_router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
