use once_cell::sync::Lazy;
use std::env;
use std::path::PathBuf;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub host: String,
    pub port: u16,

    // Database
    pub db_path: PathBuf,

    // Deploy logs (one append-only file per deploy record)
    pub deploy_log_dir: PathBuf,

    // Default checkout location on target hosts when a project
    // does not set its own deploy_path
    pub remote_workspace: String,

    // SSH
    pub connect_timeout_secs: u64,
    pub command_timeout_secs: u64,
    pub session_idle_secs: u64,

    // Batch health checker
    pub batch_check_concurrency: usize,

    // Records stuck in `running` longer than this are failed by the
    // reconciliation sweep
    pub record_stale_secs: i64,

    // Logging
    pub log_level: String,

    // Build info
    pub version: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            // Server
            host: env::var("DEPLOYD_API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("DEPLOYD_API_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8000),

            // Database
            db_path: PathBuf::from(
                env::var("DEPLOYD_DB_PATH").unwrap_or_else(|_| "/data/deployd.db".to_string()),
            ),

            deploy_log_dir: PathBuf::from(
                env::var("DEPLOYD_LOG_DIR").unwrap_or_else(|_| "/data/deploy-logs".to_string()),
            ),

            remote_workspace: env::var("DEPLOYD_REMOTE_WORKSPACE")
                .unwrap_or_else(|_| "/opt/deployd/workspace".to_string()),

            // SSH
            connect_timeout_secs: env::var("DEPLOYD_CONNECT_TIMEOUT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            command_timeout_secs: env::var("DEPLOYD_COMMAND_TIMEOUT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(300),
            session_idle_secs: env::var("DEPLOYD_SESSION_IDLE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(600),

            // buffer_unordered(0) would never poll a probe, so the
            // floor is 1
            batch_check_concurrency: env::var("DEPLOYD_BATCH_CONCURRENCY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8)
                .max(1),

            record_stale_secs: env::var("DEPLOYD_RECORD_STALE_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3600),

            // Logging
            log_level: env::var("DEPLOYD_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            // Build info
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn db_url(&self) -> String {
        format!("sqlite://{}?mode=rwc", self.db_path.display())
    }
}

pub static CONFIG: Lazy<Config> = Lazy::new(Config::from_env);
