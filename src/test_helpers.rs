//! Test helpers and utilities for unit and integration testing.
//!
//! This module provides common utilities for setting up test environments,
//! creating mock data, and testing database operations.

use chrono::Utc;
use sea_orm::{ActiveModelTrait, Database, DatabaseConnection, Set};
use sea_orm_migration::MigratorTrait;

use crate::migrations::Migrator;
use crate::models::host::{self, AuthType, HostStatus};
use crate::models::project;

/// Create an in-memory SQLite database for testing
pub async fn create_test_db() -> DatabaseConnection {
    // Each connection gets its own in-memory database
    let db = Database::connect("sqlite::memory:")
        .await
        .expect("Failed to create test database");

    Migrator::up(&db, None)
        .await
        .expect("Failed to run test migrations");

    db
}

/// Build a host model without touching the database
pub fn make_host(id: i64, addr: &str, port: i32) -> host::Model {
    let now = Utc::now();
    host::Model {
        id,
        name: format!("host-{}", id),
        host: addr.to_string(),
        port,
        username: "deploy".to_string(),
        password: "secret".to_string(),
        auth_type: AuthType::Password,
        status: HostStatus::Inactive,
        remark: None,
        deleted_at: None,
        created_at: now,
        updated_at: now,
    }
}

/// Insert a password-auth host
pub async fn insert_host(
    db: &DatabaseConnection,
    name: &str,
    addr: &str,
    port: i32,
) -> host::Model {
    let now = Utc::now();
    host::ActiveModel {
        name: Set(name.to_string()),
        host: Set(addr.to_string()),
        port: Set(port),
        username: Set("deploy".to_string()),
        password: Set("secret".to_string()),
        auth_type: Set(AuthType::Password),
        status: Set(HostStatus::Inactive),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("Failed to insert test host")
}

/// Insert a minimal project
pub async fn insert_project(db: &DatabaseConnection, name: &str, code: &str) -> project::Model {
    let now = Utc::now();
    project::ActiveModel {
        name: Set(name.to_string()),
        code: Set(code.to_string()),
        webhook_password: Set(Some("hook-secret".to_string())),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("Failed to insert test project")
}
