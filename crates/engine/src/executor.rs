//! Execution Engine - applies a single migration's forward SQL
//!
//! Sole writer of `MigrationExecution` and `SchemaVersion`. Guards against
//! concurrent re-entry per migration, records the outcome, and advances the
//! current schema version pointer.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::database::SqlRunner;
use crate::error::{EngineError, EngineResult};
use crate::model::{
    AlertSeverity, ExecutionResult, ExecutionStatus, MigrationAlert, MigrationDefinition,
    MigrationExecution, RiskLevel, RollbackPoint, SchemaVersion, VersionStatus,
};
use crate::repository::Store;

/// Caller options for one execution
#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteOptions {
    #[serde(default = "default_executor")]
    pub executor: String,
    #[serde(default = "default_environment")]
    pub environment: String,
    /// Upper bound on SQL execution, in seconds
    #[serde(default = "default_timeout_secs", alias = "timeout")]
    pub timeout_secs: u64,
    /// Bypass the single-in-flight-execution guard
    #[serde(default)]
    pub force: bool,
}

fn default_executor() -> String {
    "system".into()
}

fn default_environment() -> String {
    "production".into()
}

fn default_timeout_secs() -> u64 {
    300
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            executor: default_executor(),
            environment: default_environment(),
            timeout_secs: default_timeout_secs(),
            force: false,
        }
    }
}

/// Result of a successful execution
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionOutcome {
    pub execution_id: Uuid,
    pub migration_id: String,
    pub status: ExecutionStatus,
    pub duration_ms: i64,
    pub result: ExecutionResult,
}

#[derive(Clone)]
pub struct ExecutionEngine {
    store: Store,
    runner: Arc<dyn SqlRunner>,
}

impl ExecutionEngine {
    pub fn new(store: Store, runner: Arc<dyn SqlRunner>) -> Self {
        Self { store, runner }
    }

    /// Apply one migration's forward SQL.
    ///
    /// A failed execution is moved to its terminal `failed` state before the
    /// error propagates; no record is ever left `running` on error.
    pub async fn execute(
        &self,
        migration_id: &str,
        options: &ExecuteOptions,
    ) -> EngineResult<ExecutionOutcome> {
        let definition = self
            .store
            .definitions
            .get(migration_id)
            .await?
            .ok_or_else(|| {
                EngineError::not_found(format!("Migration '{}' not found", migration_id))
            })?;

        let mut execution = MigrationExecution {
            id: Uuid::new_v4(),
            migration_id: migration_id.to_string(),
            start_time: Utc::now(),
            end_time: None,
            status: ExecutionStatus::Running,
            executor: options.executor.clone(),
            environment: options.environment.clone(),
            result: None,
            error_message: None,
        };
        // Fails with Concurrency when another execution is in flight, unless
        // forced; the guard and insert are one atomic repository step.
        self.store
            .executions
            .insert_running(&execution, options.force)
            .await?;

        let timeout = Duration::from_secs(options.timeout_secs);
        match self.runner.run(&definition.up_sql, timeout).await {
            Err(err) => {
                execution.status = ExecutionStatus::Failed;
                execution.end_time = Some(Utc::now());
                execution.error_message = Some(err.to_string());
                self.store.executions.update(&execution).await?;
                self.raise_failure_alert(&definition, &err).await;
                tracing::warn!(
                    migration_id = %migration_id,
                    execution_id = %execution.id,
                    error = %err,
                    "migration execution failed"
                );
                Err(err)
            }
            Ok(outcome) => {
                let end_time = Utc::now();
                let duration_ms = (end_time - execution.start_time).num_milliseconds();
                let result = ExecutionResult {
                    duration_ms,
                    rows_affected: outcome.rows_affected,
                    success: true,
                };
                execution.status = ExecutionStatus::Completed;
                execution.end_time = Some(end_time);
                execution.result = Some(result.clone());
                self.store.executions.update(&execution).await?;

                let version = SchemaVersion {
                    version: migration_id.to_string(),
                    description: definition.description.clone(),
                    applied_at: end_time,
                    checksum: definition.up_sql_checksum(),
                    migration_id: migration_id.to_string(),
                    status: VersionStatus::Current,
                };
                self.store.versions.promote(&version).await?;

                if definition.requires_rollback {
                    self.store
                        .rollback_points
                        .insert(&RollbackPoint {
                            id: Uuid::new_v4(),
                            migration_execution_id: execution.id,
                            created_at: end_time,
                            snapshot: json!({
                                "schema_version": version.version,
                                "checksum": version.checksum,
                            }),
                        })
                        .await?;
                }

                tracing::info!(
                    migration_id = %migration_id,
                    execution_id = %execution.id,
                    duration_ms,
                    rows_affected = outcome.rows_affected,
                    "migration executed"
                );
                Ok(ExecutionOutcome {
                    execution_id: execution.id,
                    migration_id: migration_id.to_string(),
                    status: ExecutionStatus::Completed,
                    duration_ms,
                    result,
                })
            }
        }
    }

    /// Best effort: an alert insert failure must not mask the execution error
    async fn raise_failure_alert(&self, definition: &MigrationDefinition, err: &EngineError) {
        let severity = if definition.risk_level == RiskLevel::Critical {
            AlertSeverity::Critical
        } else {
            AlertSeverity::Warning
        };
        let alert = MigrationAlert {
            id: Uuid::new_v4(),
            severity,
            message: format!("Migration '{}' failed: {}", definition.id, err),
            created_at: Utc::now(),
            acknowledged: false,
        };
        if let Err(alert_err) = self.store.alerts.insert(&alert).await {
            tracing::warn!(error = %alert_err, "failed to record migration alert");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::ScriptedSqlRunner;
    use crate::registry::{MigrationRegistry, NewMigration};

    async fn setup(risk_level: &str) -> (Store, Arc<ScriptedSqlRunner>, ExecutionEngine) {
        let store = Store::in_memory();
        let runner = Arc::new(ScriptedSqlRunner::new());
        let registry = MigrationRegistry::new(store.clone());
        registry
            .register(NewMigration {
                id: "m1".into(),
                version: "1".into(),
                name: "add column".into(),
                description: "adds a column".into(),
                author: "tests".into(),
                up_sql: "ALTER TABLE t ADD COLUMN c".into(),
                down_sql: Some("ALTER TABLE t DROP COLUMN c".into()),
                risk_level: risk_level.into(),
                ..NewMigration::default()
            })
            .await
            .unwrap();
        let engine = ExecutionEngine::new(store.clone(), runner.clone());
        (store, runner, engine)
    }

    #[tokio::test]
    async fn successful_execution_completes_and_promotes_version() {
        let (store, runner, engine) = setup("low").await;
        runner.push_ok(7);

        let outcome = engine
            .execute("m1", &ExecuteOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome.status, ExecutionStatus::Completed);
        assert_eq!(outcome.result.rows_affected, 7);
        assert!(outcome.result.success);

        let executions = store.executions.list_for_migration("m1").await.unwrap();
        assert_eq!(executions.len(), 1);
        assert_eq!(executions[0].status, ExecutionStatus::Completed);
        assert!(executions[0].end_time.is_some());

        let current = store.versions.current().await.unwrap().unwrap();
        assert_eq!(current.version, "m1");
        assert_eq!(current.checksum.len(), 64);

        let point = store
            .rollback_points
            .latest_for_execution(outcome.execution_id)
            .await
            .unwrap();
        assert!(point.is_some());
    }

    #[tokio::test]
    async fn unknown_migration_fails_without_side_effects() {
        let (store, _runner, engine) = setup("low").await;
        let err = engine
            .execute("missing", &ExecuteOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
        assert!(store
            .executions
            .list_for_migration("missing")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn failed_execution_is_terminal_and_promotes_nothing() {
        let (store, runner, engine) = setup("low").await;
        runner.push_err("column already exists");

        let err = engine
            .execute("m1", &ExecuteOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Execution(_)));

        let executions = store.executions.list_for_migration("m1").await.unwrap();
        assert_eq!(executions[0].status, ExecutionStatus::Failed);
        assert!(executions[0]
            .error_message
            .as_deref()
            .unwrap()
            .contains("column already exists"));
        assert!(store.versions.current().await.unwrap().is_none());

        // non-critical failure raises a warning alert
        let alerts = store.alerts.unacknowledged().await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, AlertSeverity::Warning);
    }

    #[tokio::test]
    async fn critical_migration_failure_raises_critical_alert() {
        let (store, runner, engine) = setup("critical").await;
        runner.push_err("deadlock");

        let _ = engine.execute("m1", &ExecuteOptions::default()).await;
        let alerts = store.alerts.unacknowledged().await.unwrap();
        assert_eq!(alerts[0].severity, AlertSeverity::Critical);
    }

    #[tokio::test]
    async fn second_concurrent_execution_is_rejected_without_force() {
        let (store, _runner, engine) = setup("low").await;
        // Simulate an in-flight execution left by another caller
        store
            .executions
            .insert_running(
                &MigrationExecution {
                    id: Uuid::new_v4(),
                    migration_id: "m1".into(),
                    start_time: Utc::now(),
                    end_time: None,
                    status: ExecutionStatus::Running,
                    executor: "other".into(),
                    environment: "production".into(),
                    result: None,
                    error_message: None,
                },
                false,
            )
            .await
            .unwrap();

        let err = engine
            .execute("m1", &ExecuteOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Concurrency(id) if id == "m1"));

        let forced = engine
            .execute(
                "m1",
                &ExecuteOptions {
                    force: true,
                    ..ExecuteOptions::default()
                },
            )
            .await;
        assert!(forced.is_ok());
    }
}
