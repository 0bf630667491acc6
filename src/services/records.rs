//! Durable store for deployment run records.
//!
//! The running-record gate lives here: at most one record per
//! (project, branch) may be in `running` at a time, enforced by a
//! partial unique index so concurrent triggers race at the database
//! instead of in application code. The loser surfaces as a conflict.

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DbErr, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    Set,
};
use serde::Serialize;
use uuid::Uuid;

use crate::config::CONFIG;
use crate::error::{AppError, Result};
use crate::models::deploy_record::{self, DeployStatus};
use crate::models::prelude::*;
use crate::models::project;
use crate::state::DbConn;

/// Aggregate counts over deploy records
#[derive(Debug, Clone, Serialize)]
pub struct DeployStats {
    pub total: u64,
    pub running: u64,
    pub success: u64,
    pub failed: u64,
}

fn is_unique_violation(err: &DbErr) -> bool {
    err.to_string().contains("UNIQUE constraint failed")
}

fn new_log_path(project: &project::Model, branch: &str) -> String {
    let safe_branch: String = branch
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
            c
        } else {
            '_'
        })
        .collect();
    CONFIG
        .deploy_log_dir
        .join(format!("{}_{}_{}.log", project.code, safe_branch, Uuid::new_v4()))
        .display()
        .to_string()
}

/// Atomically open a running record for a (project, branch) pair.
///
/// The insert itself is the gate: if another running record already
/// exists for the pair, the partial unique index rejects it and the
/// caller gets a conflict.
pub async fn create_running(
    db: &DbConn,
    project: &project::Model,
    branch: &str,
) -> Result<deploy_record::Model> {
    let now = Utc::now();
    let active = deploy_record::ActiveModel {
        project_id: Set(project.id),
        project_name: Set(project.name.clone()),
        branch: Set(branch.to_string()),
        status: Set(DeployStatus::Running),
        start_time: Set(now),
        duration: Set(None),
        log_path: Set(new_log_path(project, branch)),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };

    match active.insert(db).await {
        Ok(record) => Ok(record),
        Err(e) if is_unique_violation(&e) => Err(AppError::Conflict(format!(
            "a deployment of '{}' branch '{}' is already running",
            project.name, branch
        ))),
        Err(e) => Err(e.into()),
    }
}

/// Move a running record to its terminal status. Duration is the
/// whole-second wall time since `start_time`, never negative.
///
/// Compare-and-set on `status = running`: a record the stale sweep (or
/// anyone else) already closed keeps its first terminal status, and the
/// current row is returned unchanged.
pub async fn finish(
    db: &DbConn,
    record: deploy_record::Model,
    status: DeployStatus,
) -> Result<deploy_record::Model> {
    debug_assert!(status != DeployStatus::Running);

    let now = Utc::now();
    let duration = (now - record.start_time).num_seconds().max(0);

    let updated = DeployRecord::update_many()
        .col_expr(deploy_record::Column::Status, Expr::value(status))
        .col_expr(deploy_record::Column::Duration, Expr::value(Some(duration)))
        .col_expr(deploy_record::Column::UpdatedAt, Expr::value(now))
        .filter(deploy_record::Column::Id.eq(record.id))
        .filter(deploy_record::Column::Status.eq(DeployStatus::Running))
        .exec(db)
        .await?;
    if updated.rows_affected == 0 {
        tracing::debug!(record_id = record.id, "Deploy record was already closed");
    }

    get(db, record.id).await
}

pub async fn get(db: &DbConn, id: i64) -> Result<deploy_record::Model> {
    DeployRecord::find_by_id(id)
        .one(db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Deploy record {} not found", id)))
}

/// Query filters for record listings; all optional, combined with AND.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub project_id: Option<i64>,
    pub branch: Option<String>,
    pub status: Option<DeployStatus>,
}

/// List records newest first (by start time), paginated.
pub async fn list(
    db: &DbConn,
    filter: &RecordFilter,
    page: u64,
    page_size: u64,
) -> Result<(Vec<deploy_record::Model>, u64)> {
    let mut query = DeployRecord::find();
    if let Some(project_id) = filter.project_id {
        query = query.filter(deploy_record::Column::ProjectId.eq(project_id));
    }
    if let Some(branch) = &filter.branch {
        query = query.filter(deploy_record::Column::Branch.eq(branch.clone()));
    }
    if let Some(status) = &filter.status {
        query = query.filter(deploy_record::Column::Status.eq(status.clone()));
    }

    let paginator = query
        .order_by_desc(deploy_record::Column::StartTime)
        .paginate(db, page_size.max(1));
    let total = paginator.num_items().await?;
    let items = paginator.fetch_page(page.saturating_sub(1)).await?;
    Ok((items, total))
}

/// Most recent record for a project, optionally narrowed to a branch.
pub async fn latest(
    db: &DbConn,
    project_id: i64,
    branch: Option<&str>,
) -> Result<Option<deploy_record::Model>> {
    let mut query = DeployRecord::find()
        .filter(deploy_record::Column::ProjectId.eq(project_id));
    if let Some(branch) = branch {
        query = query.filter(deploy_record::Column::Branch.eq(branch));
    }
    Ok(query
        .order_by_desc(deploy_record::Column::StartTime)
        .one(db)
        .await?)
}

/// Counts by status, scoped to one project or global.
pub async fn stats(db: &DbConn, project_id: Option<i64>) -> Result<DeployStats> {
    let scoped = |status: Option<DeployStatus>| {
        let mut query = DeployRecord::find();
        if let Some(project_id) = project_id {
            query = query.filter(deploy_record::Column::ProjectId.eq(project_id));
        }
        if let Some(status) = status {
            query = query.filter(deploy_record::Column::Status.eq(status));
        }
        query
    };

    Ok(DeployStats {
        total: scoped(None).count(db).await?,
        running: scoped(Some(DeployStatus::Running)).count(db).await?,
        success: scoped(Some(DeployStatus::Success)).count(db).await?,
        failed: scoped(Some(DeployStatus::Failed)).count(db).await?,
    })
}

/// Fail running records whose start time is older than the staleness
/// window. Covers runs orphaned by a crash; the gate for their
/// (project, branch) pair reopens when they flip to failed.
pub async fn reconcile_stale_running(db: &DbConn, stale_secs: i64) -> Result<u64> {
    let cutoff = Utc::now() - chrono::Duration::seconds(stale_secs);
    let stale = DeployRecord::find()
        .filter(deploy_record::Column::Status.eq(DeployStatus::Running))
        .filter(deploy_record::Column::StartTime.lt(cutoff))
        .all(db)
        .await?;

    let count = stale.len() as u64;
    for record in stale {
        let id = record.id;
        append_log_note(&record.log_path, "deploy failed: possibly aborted (stale running record)")
            .await;
        finish(db, record, DeployStatus::Failed).await?;
        tracing::warn!(record_id = id, "Failed stale running deploy record");
    }
    Ok(count)
}

/// Best-effort note in the record's deploy log; the status flip is
/// what matters, a missing log directory must not fail the sweep.
async fn append_log_note(log_path: &str, note: &str) {
    use tokio::io::AsyncWriteExt;

    let open = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .await;
    match open {
        Ok(mut file) => {
            let line = format!("[{}] {}\n", Utc::now().format("%Y-%m-%d %H:%M:%S"), note);
            if let Err(e) = file.write_all(line.as_bytes()).await {
                tracing::debug!(path = log_path, error = %e, "Could not annotate deploy log");
            }
        }
        Err(e) => {
            tracing::debug!(path = log_path, error = %e, "Could not annotate deploy log");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{create_test_db, insert_project};

    #[tokio::test]
    async fn test_running_record_is_exclusive_per_branch() {
        let db = create_test_db().await;
        let project = insert_project(&db, "web", "web").await;

        let first = create_running(&db, &project, "main").await.unwrap();
        assert_eq!(first.status, DeployStatus::Running);

        let second = create_running(&db, &project, "main").await;
        assert!(matches!(second, Err(AppError::Conflict(_))));

        // A different branch of the same project is independent
        create_running(&db, &project, "develop").await.unwrap();
    }

    #[tokio::test]
    async fn test_gate_reopens_after_terminal_transition() {
        let db = create_test_db().await;
        let project = insert_project(&db, "web", "web").await;

        let record = create_running(&db, &project, "main").await.unwrap();
        let finished = finish(&db, record, DeployStatus::Failed).await.unwrap();
        assert_eq!(finished.status, DeployStatus::Failed);
        assert!(finished.duration.unwrap() >= 0);

        create_running(&db, &project, "main").await.unwrap();
    }

    #[tokio::test]
    async fn test_latest_prefers_newest_start_time() {
        let db = create_test_db().await;
        let project = insert_project(&db, "web", "web").await;

        let older = create_running(&db, &project, "main").await.unwrap();
        finish(&db, older, DeployStatus::Success).await.unwrap();
        let newer = create_running(&db, &project, "main").await.unwrap();

        let found = latest(&db, project.id, Some("main")).await.unwrap().unwrap();
        assert_eq!(found.id, newer.id);

        let any_branch = latest(&db, project.id, None).await.unwrap().unwrap();
        assert_eq!(any_branch.id, newer.id);

        assert!(latest(&db, project.id + 1, None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stats_counts_by_status() {
        let db = create_test_db().await;
        let project = insert_project(&db, "web", "web").await;

        let a = create_running(&db, &project, "main").await.unwrap();
        finish(&db, a, DeployStatus::Success).await.unwrap();
        let b = create_running(&db, &project, "main").await.unwrap();
        finish(&db, b, DeployStatus::Failed).await.unwrap();
        create_running(&db, &project, "main").await.unwrap();

        let stats = stats(&db, Some(project.id)).await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.running, 1);
        assert_eq!(stats.success, 1);
        assert_eq!(stats.failed, 1);
    }

    #[tokio::test]
    async fn test_reconcile_only_touches_stale_records() {
        let db = create_test_db().await;
        let project = insert_project(&db, "web", "web").await;

        let fresh = create_running(&db, &project, "main").await.unwrap();
        let swept = reconcile_stale_running(&db, 3600).await.unwrap();
        assert_eq!(swept, 0);

        // With a zero window every running record is stale
        let swept = reconcile_stale_running(&db, 0).await.unwrap();
        assert_eq!(swept, 1);

        let reloaded = get(&db, fresh.id).await.unwrap();
        assert_eq!(reloaded.status, DeployStatus::Failed);
    }

    #[tokio::test]
    async fn test_terminal_status_is_not_overwritten() {
        let db = create_test_db().await;
        let project = insert_project(&db, "web", "web").await;

        let record = create_running(&db, &project, "main").await.unwrap();
        // Sweep closes the record while its pipeline still holds a
        // pre-sweep copy
        reconcile_stale_running(&db, 0).await.unwrap();

        let after = finish(&db, record, DeployStatus::Success).await.unwrap();
        assert_eq!(after.status, DeployStatus::Failed);

        let reloaded = get(&db, after.id).await.unwrap();
        assert_eq!(reloaded.status, DeployStatus::Failed);
    }

    #[tokio::test]
    async fn test_list_filters_and_orders() {
        let db = create_test_db().await;
        let project = insert_project(&db, "web", "web").await;

        let a = create_running(&db, &project, "main").await.unwrap();
        finish(&db, a, DeployStatus::Success).await.unwrap();
        let b = create_running(&db, &project, "develop").await.unwrap();
        finish(&db, b, DeployStatus::Failed).await.unwrap();

        let (all, total) = list(
            &db,
            &RecordFilter {
                project_id: Some(project.id),
                ..Default::default()
            },
            1,
            20,
        )
        .await
        .unwrap();
        assert_eq!(total, 2);
        assert_eq!(all.len(), 2);

        let (failed, total) = list(
            &db,
            &RecordFilter {
                status: Some(DeployStatus::Failed),
                ..Default::default()
            },
            1,
            20,
        )
        .await
        .unwrap();
        assert_eq!(total, 1);
        assert_eq!(failed[0].branch, "develop");
    }
}
