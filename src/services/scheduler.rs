//! Periodic task scheduler
//!
//! A simple scheduler for running background tasks at regular intervals.
//! Add new tasks by implementing the `PeriodicTask` trait.

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::interval;

use crate::config::CONFIG;
use crate::services::records;
use crate::state::AppState;

/// Trait for periodic background tasks
#[async_trait]
pub trait PeriodicTask: Send + Sync {
    /// Task name for logging
    fn name(&self) -> &'static str;

    /// How often to run
    fn interval(&self) -> Duration;

    /// Execute the task
    async fn run(&self, state: &AppState) -> anyhow::Result<()>;
}

/// Start all periodic tasks
pub fn start_scheduler(state: AppState) {
    let tasks: Vec<Box<dyn PeriodicTask>> = vec![
        Box::new(SessionEvictionTask),
        Box::new(StaleRecordSweepTask),
    ];

    for task in tasks {
        let state = state.clone();
        tokio::spawn(async move {
            run_task(task, state).await;
        });
    }

    tracing::info!("Periodic task scheduler started");
}

/// Run a single task on its interval
async fn run_task(task: Box<dyn PeriodicTask>, state: AppState) {
    let mut ticker = interval(task.interval());

    // Skip the first immediate tick
    ticker.tick().await;

    loop {
        ticker.tick().await;

        tracing::debug!(task = task.name(), "Running periodic task");

        match task.run(&state).await {
            Ok(()) => {
                tracing::debug!(task = task.name(), "Periodic task completed");
            }
            Err(e) => {
                tracing::error!(task = task.name(), error = %e, "Periodic task failed");
            }
        }
    }
}

/// Closes SSH sessions idle beyond the configured window
struct SessionEvictionTask;

#[async_trait]
impl PeriodicTask for SessionEvictionTask {
    fn name(&self) -> &'static str {
        "session_eviction"
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(60)
    }

    async fn run(&self, state: &AppState) -> anyhow::Result<()> {
        let evicted = state.sessions.evict_idle().await;
        if evicted > 0 {
            tracing::info!(evicted, "Evicted idle SSH sessions");
        }
        Ok(())
    }
}

/// Fails running deploy records orphaned by a crash or restart
struct StaleRecordSweepTask;

#[async_trait]
impl PeriodicTask for StaleRecordSweepTask {
    fn name(&self) -> &'static str {
        "stale_record_sweep"
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(5 * 60)
    }

    async fn run(&self, state: &AppState) -> anyhow::Result<()> {
        let swept = records::reconcile_stale_running(&state.db, CONFIG.record_stale_secs).await?;
        if swept > 0 {
            tracing::info!(swept, "Failed stale running deploy records");
        }
        Ok(())
    }
}
