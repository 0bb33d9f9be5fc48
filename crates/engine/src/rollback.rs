//! Rollback Manager - reverses a previously completed migration
//!
//! Sole writer of `RollbackOperation` and the only actor permitted to move an
//! execution to `rolled_back`. A failed reversal leaves the original
//! execution `completed` so the system never claims a rollback succeeded when
//! it did not.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::database::SqlRunner;
use crate::error::{EngineError, EngineResult};
use crate::model::{AlertSeverity, MigrationAlert, RollbackOperation, RollbackStatus};
use crate::repository::Store;

/// Caller options for one rollback
#[derive(Debug, Clone, Deserialize)]
pub struct RollbackOptions {
    #[serde(default = "default_reason")]
    pub reason: String,
    #[serde(default = "default_executed_by")]
    pub executed_by: String,
    /// Upper bound on DOWN SQL execution, in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_reason() -> String {
    "manual rollback".into()
}

fn default_executed_by() -> String {
    "system".into()
}

fn default_timeout_secs() -> u64 {
    300
}

impl Default for RollbackOptions {
    fn default() -> Self {
        Self {
            reason: default_reason(),
            executed_by: default_executed_by(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Result of a completed rollback
#[derive(Debug, Clone, Serialize)]
pub struct RollbackOutcome {
    pub rollback_operation_id: Uuid,
    pub migration_id: String,
    pub execution_id: Uuid,
    pub status: RollbackStatus,
}

#[derive(Clone)]
pub struct RollbackManager {
    store: Store,
    runner: Arc<dyn SqlRunner>,
}

impl RollbackManager {
    pub fn new(store: Store, runner: Arc<dyn SqlRunner>) -> Self {
        Self { store, runner }
    }

    /// Reverse the most recent completed execution of `migration_id`.
    ///
    /// Requires a rollback point: a migration registered with
    /// `requires_rollback = false` cannot be rolled back. An absent
    /// `down_sql` reverses as a no-op that still succeeds; the rollback point
    /// is what gates reversibility, not the DOWN payload.
    pub async fn rollback(
        &self,
        migration_id: &str,
        options: &RollbackOptions,
    ) -> EngineResult<RollbackOutcome> {
        let definition = self
            .store
            .definitions
            .get(migration_id)
            .await?
            .ok_or_else(|| {
                EngineError::not_found(format!("Migration '{}' not found", migration_id))
            })?;

        let execution = self
            .store
            .executions
            .latest_completed(migration_id)
            .await?
            .ok_or_else(|| {
                EngineError::not_found(format!(
                    "No completed execution for migration '{}'",
                    migration_id
                ))
            })?;

        let point = self
            .store
            .rollback_points
            .latest_for_execution(execution.id)
            .await?
            .ok_or_else(|| {
                EngineError::not_found(format!(
                    "No rollback point for execution '{}'",
                    execution.id
                ))
            })?;

        let mut operation = RollbackOperation {
            id: Uuid::new_v4(),
            original_migration_id: execution.id,
            start_time: Utc::now(),
            end_time: None,
            status: RollbackStatus::Running,
            progress: 0,
            executed_by: options.executed_by.clone(),
            reason: options.reason.clone(),
        };
        self.store.rollback_operations.insert(&operation).await?;

        let down_sql = definition.down_sql.as_deref().unwrap_or("").trim().to_string();
        if !down_sql.is_empty() {
            let timeout = Duration::from_secs(options.timeout_secs);
            if let Err(err) = self.runner.run(&down_sql, timeout).await {
                operation.status = RollbackStatus::Failed;
                operation.end_time = Some(Utc::now());
                self.store.rollback_operations.update(&operation).await?;
                self.raise_failure_alert(migration_id, &err).await;
                tracing::warn!(
                    migration_id = %migration_id,
                    rollback_operation_id = %operation.id,
                    error = %err,
                    "rollback failed; original execution left completed"
                );
                return Err(err);
            }
        }

        operation.status = RollbackStatus::Completed;
        operation.progress = 100;
        operation.end_time = Some(Utc::now());
        self.store.rollback_operations.update(&operation).await?;
        self.store.executions.mark_rolled_back(execution.id).await?;

        tracing::info!(
            migration_id = %migration_id,
            execution_id = %execution.id,
            rollback_point_id = %point.id,
            rollback_operation_id = %operation.id,
            "migration rolled back"
        );
        Ok(RollbackOutcome {
            rollback_operation_id: operation.id,
            migration_id: migration_id.to_string(),
            execution_id: execution.id,
            status: RollbackStatus::Completed,
        })
    }

    async fn raise_failure_alert(&self, migration_id: &str, err: &EngineError) {
        let alert = MigrationAlert {
            id: Uuid::new_v4(),
            severity: AlertSeverity::Critical,
            message: format!("Rollback of migration '{}' failed: {}", migration_id, err),
            created_at: Utc::now(),
            acknowledged: false,
        };
        if let Err(alert_err) = self.store.alerts.insert(&alert).await {
            tracing::warn!(error = %alert_err, "failed to record rollback alert");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::ScriptedSqlRunner;
    use crate::executor::{ExecuteOptions, ExecutionEngine};
    use crate::model::ExecutionStatus;
    use crate::registry::{MigrationRegistry, NewMigration};

    struct Fixture {
        store: Store,
        runner: Arc<ScriptedSqlRunner>,
        manager: RollbackManager,
        engine: ExecutionEngine,
    }

    async fn setup(down_sql: Option<&str>, requires_rollback: bool) -> Fixture {
        let store = Store::in_memory();
        let runner = Arc::new(ScriptedSqlRunner::new());
        MigrationRegistry::new(store.clone())
            .register(NewMigration {
                id: "m1".into(),
                version: "1".into(),
                name: "add column".into(),
                description: "adds a column".into(),
                author: "tests".into(),
                up_sql: "ALTER TABLE t ADD COLUMN c".into(),
                down_sql: down_sql.map(String::from),
                risk_level: "low".into(),
                requires_rollback,
                ..NewMigration::default()
            })
            .await
            .unwrap();
        Fixture {
            store: store.clone(),
            runner: runner.clone(),
            manager: RollbackManager::new(store.clone(), runner.clone()),
            engine: ExecutionEngine::new(store, runner),
        }
    }

    #[tokio::test]
    async fn rollback_reverses_a_completed_execution() {
        let fx = setup(Some("ALTER TABLE t DROP COLUMN c"), true).await;
        fx.engine
            .execute("m1", &ExecuteOptions::default())
            .await
            .unwrap();

        let outcome = fx
            .manager
            .rollback("m1", &RollbackOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome.status, RollbackStatus::Completed);

        let executions = fx.store.executions.list_for_migration("m1").await.unwrap();
        assert_eq!(executions[0].status, ExecutionStatus::RolledBack);
        // Both the UP and the DOWN payloads went through the runner
        assert_eq!(fx.runner.executed().len(), 2);
        assert!(fx.runner.executed()[1].contains("DROP COLUMN"));
    }

    #[tokio::test]
    async fn rollback_without_completed_execution_is_not_found() {
        let fx = setup(Some("x"), true).await;
        let err = fx
            .manager
            .rollback("m1", &RollbackOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(msg) if msg.contains("No completed execution")));
    }

    #[tokio::test]
    async fn rollback_without_rollback_point_is_not_found() {
        let fx = setup(Some("x"), false).await;
        fx.engine
            .execute("m1", &ExecuteOptions::default())
            .await
            .unwrap();

        let err = fx
            .manager
            .rollback("m1", &RollbackOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(msg) if msg.contains("No rollback point")));

        // the execution is untouched
        let executions = fx.store.executions.list_for_migration("m1").await.unwrap();
        assert_eq!(executions[0].status, ExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn missing_down_sql_is_a_noop_reversal_that_succeeds() {
        let fx = setup(None, true).await;
        fx.engine
            .execute("m1", &ExecuteOptions::default())
            .await
            .unwrap();

        let outcome = fx
            .manager
            .rollback("m1", &RollbackOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome.status, RollbackStatus::Completed);
        // only the UP payload ever reached the runner
        assert_eq!(fx.runner.executed().len(), 1);

        let executions = fx.store.executions.list_for_migration("m1").await.unwrap();
        assert_eq!(executions[0].status, ExecutionStatus::RolledBack);
    }

    #[tokio::test]
    async fn failed_down_sql_leaves_execution_completed() {
        let fx = setup(Some("ALTER TABLE t DROP COLUMN c"), true).await;
        fx.engine
            .execute("m1", &ExecuteOptions::default())
            .await
            .unwrap();
        fx.runner.push_err("column is referenced by a view");

        let err = fx
            .manager
            .rollback("m1", &RollbackOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Execution(_)));

        let executions = fx.store.executions.list_for_migration("m1").await.unwrap();
        assert_eq!(executions[0].status, ExecutionStatus::Completed);

        let alerts = fx.store.alerts.unacknowledged().await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, AlertSeverity::Critical);
    }
}
