//! Connectivity checks for managed hosts.
//!
//! Single-host probes and the bounded-concurrency batch check both
//! live here. A connection attempt is the only thing that moves a
//! host between online and offline; CRUD writes never touch status.

use std::collections::HashMap;

use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use serde::Serialize;

use crate::config::CONFIG;
use crate::error::Result;
use crate::models::host::{self, HostStatus};
use crate::models::prelude::*;
use crate::services::ssh::ProbeResult;
use crate::state::AppState;

/// One row of a batch check response, positionally aligned with the
/// requested id list.
#[derive(Debug, Clone, Serialize)]
pub struct HostCheckResult {
    pub host_id: i64,
    pub success: bool,
    pub status: HostStatus,
    pub message: String,
    pub latency_ms: Option<u64>,
}

/// Probe one host and persist the observed status.
pub async fn check_host(state: &AppState, target: &host::Model) -> Result<ProbeResult> {
    let probe = state.sessions.test_connection(target).await;
    persist_status(state, target.id, probe.success).await?;
    Ok(probe)
}

/// Check a list of hosts with at most `batch_check_concurrency` probes
/// in flight. The result always has one entry per requested id, in
/// request order; unknown ids fail in place instead of failing the
/// batch.
pub async fn check_batch(state: &AppState, host_ids: &[i64]) -> Result<Vec<HostCheckResult>> {
    let hosts: HashMap<i64, host::Model> = Host::find()
        .filter(host::Column::Id.is_in(host_ids.iter().copied()))
        .filter(host::Column::DeletedAt.is_null())
        .all(&state.db)
        .await?
        .into_iter()
        .map(|h| (h.id, h))
        .collect();

    // Owned ids keep the probe futures free of borrows into the
    // request slice
    let ids: Vec<i64> = host_ids.to_vec();
    let checks = ids.into_iter().enumerate().map(|(idx, host_id)| {
        let target = hosts.get(&host_id).cloned();
        async move {
            let result = match target {
                Some(target) => {
                    let probe = state.sessions.test_connection(&target).await;
                    if let Err(e) = persist_status(state, host_id, probe.success).await {
                        tracing::warn!(host_id, error = %e, "Failed to persist host status");
                    }
                    HostCheckResult {
                        host_id,
                        success: probe.success,
                        status: observed_status(probe.success),
                        message: probe.message,
                        latency_ms: probe.latency_ms,
                    }
                }
                None => HostCheckResult {
                    host_id,
                    success: false,
                    status: HostStatus::Offline,
                    message: "host not found".to_string(),
                    latency_ms: None,
                },
            };
            (idx, result)
        }
    });

    let mut indexed: Vec<(usize, HostCheckResult)> = stream::iter(checks)
        .buffer_unordered(CONFIG.batch_check_concurrency)
        .collect()
        .await;
    indexed.sort_by_key(|(idx, _)| *idx);

    Ok(indexed.into_iter().map(|(_, result)| result).collect())
}

fn observed_status(online: bool) -> HostStatus {
    if online {
        HostStatus::Online
    } else {
        HostStatus::Offline
    }
}

async fn persist_status(state: &AppState, host_id: i64, online: bool) -> Result<()> {
    let status = observed_status(online);

    let active = host::ActiveModel {
        id: Set(host_id),
        status: Set(status),
        updated_at: Set(Utc::now()),
        ..Default::default()
    };
    active.update(&state.db).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ssh::SessionManager;
    use crate::test_helpers::{create_test_db, insert_host};

    fn test_state(db: crate::state::DbConn) -> AppState {
        AppState::new(
            db,
            SessionManager::new(
                std::time::Duration::from_secs(1),
                std::time::Duration::from_secs(60),
            ),
        )
    }

    #[tokio::test]
    async fn test_batch_result_aligned_with_request() {
        let db = create_test_db().await;
        // Loopback port 1 refuses connections immediately
        let a = insert_host(&db, "a", "127.0.0.1", 1).await;
        let state = test_state(db);

        let results = check_batch(&state, &[999, a.id, 998]).await.unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].host_id, 999);
        assert_eq!(results[0].message, "host not found");
        assert_eq!(results[0].status, HostStatus::Offline);
        assert_eq!(results[1].host_id, a.id);
        assert!(!results[1].success);
        assert_eq!(results[2].host_id, 998);
    }

    #[tokio::test]
    async fn test_failed_probe_marks_host_offline() {
        let db = create_test_db().await;
        let a = insert_host(&db, "a", "127.0.0.1", 1).await;
        assert_eq!(a.status, HostStatus::Inactive);
        let state = test_state(db);

        let results = check_batch(&state, &[a.id]).await.unwrap();
        assert!(!results[0].success);
        assert_eq!(results[0].status, HostStatus::Offline);

        let reloaded = Host::find_by_id(a.id)
            .one(&state.db)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reloaded.status, HostStatus::Offline);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let db = create_test_db().await;
        let state = test_state(db);
        let results = check_batch(&state, &[]).await.unwrap();
        assert!(results.is_empty());
    }
}
