//! Batch Orchestrator - drives the execution engine over an ordered list
//!
//! Items run strictly sequentially; migrations are assumed to have ordering
//! dependencies even when not formally declared. A failure is recorded and
//! the remaining items are still attempted; the batch is not transactional.

use serde::Serialize;
use uuid::Uuid;

use crate::executor::{ExecuteOptions, ExecutionEngine};

/// Overall batch verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Completed,
    PartialFailure,
}

/// Per-item outcome, in input order
#[derive(Debug, Clone, Serialize)]
pub struct BatchItem {
    pub migration_id: String,
    pub succeeded: bool,
    pub execution_id: Option<Uuid>,
    pub duration_ms: Option<i64>,
    pub error: Option<String>,
}

/// Detail row for each failed item
#[derive(Debug, Clone, Serialize)]
pub struct BatchFailure {
    pub migration_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub results: Vec<BatchItem>,
    pub failed_details: Vec<BatchFailure>,
    pub batch_status: BatchStatus,
}

#[derive(Clone)]
pub struct BatchOrchestrator {
    engine: ExecutionEngine,
}

impl BatchOrchestrator {
    pub fn new(engine: ExecutionEngine) -> Self {
        Self { engine }
    }

    /// Execute `migration_ids` in the given order with continue-on-error
    /// isolation. Earlier successes are not rolled back when a later item
    /// fails; each migration is independently reversible via the rollback
    /// manager.
    pub async fn execute_batch(
        &self,
        migration_ids: &[String],
        options: &ExecuteOptions,
    ) -> BatchReport {
        let mut results = Vec::with_capacity(migration_ids.len());
        let mut failed_details = Vec::new();

        for migration_id in migration_ids {
            match self.engine.execute(migration_id, options).await {
                Ok(outcome) => results.push(BatchItem {
                    migration_id: migration_id.clone(),
                    succeeded: true,
                    execution_id: Some(outcome.execution_id),
                    duration_ms: Some(outcome.duration_ms),
                    error: None,
                }),
                Err(err) => {
                    tracing::warn!(
                        migration_id = %migration_id,
                        error = %err,
                        "batch item failed, continuing"
                    );
                    failed_details.push(BatchFailure {
                        migration_id: migration_id.clone(),
                        error: err.to_string(),
                    });
                    results.push(BatchItem {
                        migration_id: migration_id.clone(),
                        succeeded: false,
                        execution_id: None,
                        duration_ms: None,
                        error: Some(err.to_string()),
                    });
                }
            }
        }

        let failed = failed_details.len();
        BatchReport {
            total: migration_ids.len(),
            successful: migration_ids.len() - failed,
            failed,
            results,
            failed_details,
            batch_status: if failed == 0 {
                BatchStatus::Completed
            } else {
                BatchStatus::PartialFailure
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::ScriptedSqlRunner;
    use crate::registry::{MigrationRegistry, NewMigration};
    use crate::repository::Store;
    use std::sync::Arc;

    async fn setup(ids: &[&str]) -> (Store, Arc<ScriptedSqlRunner>, BatchOrchestrator) {
        let store = Store::in_memory();
        let runner = Arc::new(ScriptedSqlRunner::new());
        let registry = MigrationRegistry::new(store.clone());
        for id in ids {
            registry
                .register(NewMigration {
                    id: id.to_string(),
                    version: "1".into(),
                    name: id.to_string(),
                    description: "test".into(),
                    author: "tests".into(),
                    up_sql: format!("SELECT '{}'", id),
                    risk_level: "low".into(),
                    ..NewMigration::default()
                })
                .await
                .unwrap();
        }
        let orchestrator =
            BatchOrchestrator::new(ExecutionEngine::new(store.clone(), runner.clone()));
        (store, runner, orchestrator)
    }

    #[tokio::test]
    async fn middle_failure_does_not_abort_the_batch() {
        let (_store, runner, orchestrator) = setup(&["a", "b", "c"]).await;
        runner.push_ok(1);
        runner.push_err("b exploded");
        runner.push_ok(1);

        let ids: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        let report = orchestrator
            .execute_batch(&ids, &ExecuteOptions::default())
            .await;

        assert_eq!(report.total, 3);
        assert_eq!(report.successful, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.batch_status, BatchStatus::PartialFailure);
        assert!(report.results[0].succeeded);
        assert!(!report.results[1].succeeded);
        // C was still attempted after B failed
        assert!(report.results[2].succeeded);
        assert_eq!(report.failed_details[0].migration_id, "b");
        assert_eq!(runner.executed().len(), 3);
    }

    #[tokio::test]
    async fn all_successes_complete_the_batch() {
        let (_store, _runner, orchestrator) = setup(&["a", "b"]).await;
        let ids: Vec<String> = ["a", "b"].iter().map(|s| s.to_string()).collect();
        let report = orchestrator
            .execute_batch(&ids, &ExecuteOptions::default())
            .await;
        assert_eq!(report.batch_status, BatchStatus::Completed);
        assert_eq!(report.failed, 0);
        assert!(report.failed_details.is_empty());
    }

    #[tokio::test]
    async fn unknown_id_is_isolated_like_any_failure() {
        let (_store, _runner, orchestrator) = setup(&["a"]).await;
        let ids: Vec<String> = ["a", "ghost"].iter().map(|s| s.to_string()).collect();
        let report = orchestrator
            .execute_batch(&ids, &ExecuteOptions::default())
            .await;
        assert_eq!(report.successful, 1);
        assert_eq!(report.failed, 1);
        assert!(report.failed_details[0].error.contains("not found"));
    }
}
