use sea_orm::DatabaseConnection;

use crate::services::ssh::SessionManager;

/// Database connection type alias
pub type DbConn = DatabaseConnection;

/// Application state containing all shared resources
#[derive(Clone)]
pub struct AppState {
    pub db: DbConn,
    pub sessions: SessionManager,
}

impl AppState {
    pub fn new(db: DbConn, sessions: SessionManager) -> Self {
        Self { db, sessions }
    }
}
