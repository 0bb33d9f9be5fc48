//! Retention/Cleanup Service
//!
//! Purges old execution history and orphaned rollback artifacts. Both
//! deletions are best-effort and independently toggled; a failure in one does
//! not block the other.

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::repository::Store;

#[derive(Debug, Clone, Deserialize)]
pub struct CleanupOptions {
    #[serde(default = "crate::model::default_true")]
    pub remove_old_executions: bool,
    /// Completed executions older than this many days are purged
    #[serde(default = "default_cleanup_days")]
    pub cleanup_days: i64,
    #[serde(default = "crate::model::default_true")]
    pub remove_orphan_rollback_points: bool,
}

fn default_cleanup_days() -> i64 {
    30
}

impl Default for CleanupOptions {
    fn default() -> Self {
        Self {
            remove_old_executions: true,
            cleanup_days: default_cleanup_days(),
            remove_orphan_rollback_points: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupReport {
    pub executions_removed: u64,
    pub rollback_points_removed: u64,
    pub errors: Vec<String>,
}

#[derive(Clone)]
pub struct CleanupService {
    store: Store,
}

impl CleanupService {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Only `completed` executions are eligible for purging; `failed` and
    /// `rolled_back` rows are kept as an audit trail.
    pub async fn cleanup(&self, options: &CleanupOptions) -> CleanupReport {
        let mut report = CleanupReport::default();

        if options.remove_old_executions {
            let cutoff = Utc::now() - Duration::days(options.cleanup_days);
            match self.store.executions.delete_completed_before(cutoff).await {
                Ok(removed) => report.executions_removed = removed,
                Err(err) => report
                    .errors
                    .push(format!("Execution cleanup failed: {}", err)),
            }
        }

        if options.remove_orphan_rollback_points {
            match self.store.rollback_points.delete_orphaned().await {
                Ok(removed) => report.rollback_points_removed = removed,
                Err(err) => report
                    .errors
                    .push(format!("Rollback point cleanup failed: {}", err)),
            }
        }

        tracing::info!(
            executions_removed = report.executions_removed,
            rollback_points_removed = report.rollback_points_removed,
            errors = report.errors.len(),
            "cleanup finished"
        );
        report
    }
}
