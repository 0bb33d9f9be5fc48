//! PostgreSQL repository implementations
//!
//! Owns the engine's seven tables. Enum-valued columns are stored as text and
//! parsed on the way out; list- and map-valued columns are JSONB.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::model::{
    AlertSeverity, ExecutionResult, ExecutionStatus, MigrationAlert, MigrationDefinition,
    MigrationExecution, MigrationTest, RiskLevel, RollbackOperation, RollbackPoint, SchemaVersion,
    VersionStatus,
};

use super::{
    AlertRepository, DefinitionFilter, DefinitionRepository, ExecutionRepository,
    RollbackOperationRepository, RollbackPointRepository, SchemaVersionRepository, TestRepository,
};

/// All repositories implemented against one PostgreSQL pool
pub struct PostgresStore {
    pool: PgPool,
}

const BOOTSTRAP_SQL: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS registered_migrations (
        id TEXT PRIMARY KEY,
        version TEXT NOT NULL,
        name TEXT NOT NULL,
        description TEXT NOT NULL,
        author TEXT NOT NULL,
        up_sql TEXT NOT NULL,
        down_sql TEXT,
        dependencies JSONB NOT NULL DEFAULT '[]',
        batch TEXT,
        tags JSONB NOT NULL DEFAULT '[]',
        risk_level TEXT NOT NULL,
        requires_rollback BOOLEAN NOT NULL DEFAULT TRUE,
        estimated_duration_secs BIGINT,
        metadata JSONB NOT NULL DEFAULT 'null',
        created_at TIMESTAMPTZ NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS migration_executions (
        id UUID PRIMARY KEY,
        migration_id TEXT NOT NULL,
        start_time TIMESTAMPTZ NOT NULL,
        end_time TIMESTAMPTZ,
        status TEXT NOT NULL,
        executor TEXT NOT NULL,
        environment TEXT NOT NULL,
        duration_ms BIGINT,
        rows_affected BIGINT,
        success BOOLEAN,
        error_message TEXT
    )",
    "CREATE INDEX IF NOT EXISTS migration_executions_migration_idx
        ON migration_executions (migration_id, start_time DESC)",
    "CREATE TABLE IF NOT EXISTS schema_versions (
        version TEXT PRIMARY KEY,
        description TEXT NOT NULL,
        applied_at TIMESTAMPTZ NOT NULL,
        checksum TEXT NOT NULL,
        migration_id TEXT NOT NULL,
        status TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS rollback_points (
        id UUID PRIMARY KEY,
        migration_execution_id UUID NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        snapshot JSONB NOT NULL DEFAULT 'null'
    )",
    "CREATE TABLE IF NOT EXISTS rollback_operations (
        id UUID PRIMARY KEY,
        original_migration_id UUID NOT NULL,
        start_time TIMESTAMPTZ NOT NULL,
        end_time TIMESTAMPTZ,
        status TEXT NOT NULL,
        progress SMALLINT NOT NULL DEFAULT 0,
        executed_by TEXT NOT NULL,
        reason TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS migration_tests (
        id UUID PRIMARY KEY,
        migration_id TEXT NOT NULL,
        name TEXT NOT NULL,
        test_type TEXT NOT NULL,
        test_sql TEXT NOT NULL,
        expected_result JSONB NOT NULL DEFAULT 'null',
        enabled BOOLEAN NOT NULL DEFAULT TRUE,
        critical BOOLEAN NOT NULL DEFAULT FALSE,
        timeout_secs BIGINT NOT NULL,
        retry_attempts INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS migration_alerts (
        id UUID PRIMARY KEY,
        severity TEXT NOT NULL,
        message TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        acknowledged BOOLEAN NOT NULL DEFAULT FALSE
    )",
];

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the engine's tables if they do not exist yet
    pub async fn bootstrap(&self) -> EngineResult<()> {
        for statement in BOOTSTRAP_SQL {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    EngineError::Database(format!("Failed to bootstrap engine tables: {}", e))
                })?;
        }
        Ok(())
    }
}

fn map_definition(row: &PgRow) -> EngineResult<MigrationDefinition> {
    let risk_level: String = row.try_get("risk_level")?;
    Ok(MigrationDefinition {
        id: row.try_get("id")?,
        version: row.try_get("version")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        author: row.try_get("author")?,
        up_sql: row.try_get("up_sql")?,
        down_sql: row.try_get("down_sql")?,
        dependencies: row.try_get::<Json<Vec<String>>, _>("dependencies")?.0,
        batch: row.try_get("batch")?,
        tags: row.try_get::<Json<Vec<String>>, _>("tags")?.0,
        risk_level: risk_level.parse::<RiskLevel>()?,
        requires_rollback: row.try_get("requires_rollback")?,
        estimated_duration_secs: row.try_get("estimated_duration_secs")?,
        metadata: row.try_get::<Json<serde_json::Value>, _>("metadata")?.0,
        created_at: row.try_get("created_at")?,
    })
}

fn map_execution(row: &PgRow) -> EngineResult<MigrationExecution> {
    let status: String = row.try_get("status")?;
    let duration_ms: Option<i64> = row.try_get("duration_ms")?;
    let rows_affected: Option<i64> = row.try_get("rows_affected")?;
    let success: Option<bool> = row.try_get("success")?;
    let result = match (duration_ms, success) {
        (Some(duration_ms), Some(success)) => Some(ExecutionResult {
            duration_ms,
            rows_affected: rows_affected.unwrap_or(0) as u64,
            success,
        }),
        _ => None,
    };
    Ok(MigrationExecution {
        id: row.try_get("id")?,
        migration_id: row.try_get("migration_id")?,
        start_time: row.try_get("start_time")?,
        end_time: row.try_get("end_time")?,
        status: status.parse::<ExecutionStatus>()?,
        executor: row.try_get("executor")?,
        environment: row.try_get("environment")?,
        result,
        error_message: row.try_get("error_message")?,
    })
}

fn map_version(row: &PgRow) -> EngineResult<SchemaVersion> {
    let status: String = row.try_get("status")?;
    Ok(SchemaVersion {
        version: row.try_get("version")?,
        description: row.try_get("description")?,
        applied_at: row.try_get("applied_at")?,
        checksum: row.try_get("checksum")?,
        migration_id: row.try_get("migration_id")?,
        status: status.parse::<VersionStatus>()?,
    })
}

fn map_test(row: &PgRow) -> EngineResult<MigrationTest> {
    Ok(MigrationTest {
        id: row.try_get("id")?,
        migration_id: row.try_get("migration_id")?,
        name: row.try_get("name")?,
        test_type: row.try_get("test_type")?,
        test_sql: row.try_get("test_sql")?,
        expected_result: row.try_get::<Json<serde_json::Value>, _>("expected_result")?.0,
        enabled: row.try_get("enabled")?,
        critical: row.try_get("critical")?,
        timeout_secs: row.try_get("timeout_secs")?,
        retry_attempts: row.try_get("retry_attempts")?,
    })
}

fn map_alert(row: &PgRow) -> EngineResult<MigrationAlert> {
    let severity: String = row.try_get("severity")?;
    Ok(MigrationAlert {
        id: row.try_get("id")?,
        severity: severity.parse::<AlertSeverity>()?,
        message: row.try_get("message")?,
        created_at: row.try_get("created_at")?,
        acknowledged: row.try_get("acknowledged")?,
    })
}

#[async_trait]
impl DefinitionRepository for PostgresStore {
    async fn insert(&self, definition: &MigrationDefinition) -> EngineResult<()> {
        sqlx::query(
            "INSERT INTO registered_migrations
                (id, version, name, description, author, up_sql, down_sql, dependencies,
                 batch, tags, risk_level, requires_rollback, estimated_duration_secs,
                 metadata, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
        )
        .bind(&definition.id)
        .bind(&definition.version)
        .bind(&definition.name)
        .bind(&definition.description)
        .bind(&definition.author)
        .bind(&definition.up_sql)
        .bind(&definition.down_sql)
        .bind(Json(&definition.dependencies))
        .bind(&definition.batch)
        .bind(Json(&definition.tags))
        .bind(definition.risk_level.to_string())
        .bind(definition.requires_rollback)
        .bind(definition.estimated_duration_secs)
        .bind(Json(&definition.metadata))
        .bind(definition.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> EngineResult<Option<MigrationDefinition>> {
        let row = sqlx::query("SELECT * FROM registered_migrations WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_definition).transpose()
    }

    async fn exists(&self, id: &str) -> EngineResult<bool> {
        let row = sqlx::query("SELECT 1 FROM registered_migrations WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn list(&self, filter: &DefinitionFilter) -> EngineResult<Vec<MigrationDefinition>> {
        let rows = sqlx::query(
            "SELECT * FROM registered_migrations
             WHERE ($1::TEXT IS NULL OR batch = $1)
               AND ($2::TEXT IS NULL OR risk_level = $2)
             ORDER BY created_at",
        )
        .bind(&filter.batch)
        .bind(filter.risk_level.map(|r| r.to_string()))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_definition).collect()
    }

    async fn count(&self) -> EngineResult<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM registered_migrations")
            .fetch_one(&self.pool)
            .await?;
        let total: i64 = row.try_get("total")?;
        Ok(total as u64)
    }
}

#[async_trait]
impl ExecutionRepository for PostgresStore {
    async fn insert_running(
        &self,
        execution: &MigrationExecution,
        force: bool,
    ) -> EngineResult<()> {
        // The guard and the insert are one statement, so two racing callers
        // cannot both observe "nothing in flight" and insert.
        let sql = if force {
            "INSERT INTO migration_executions
                (id, migration_id, start_time, status, executor, environment)
             SELECT $1, $2, $3, $4, $5, $6"
        } else {
            "INSERT INTO migration_executions
                (id, migration_id, start_time, status, executor, environment)
             SELECT $1, $2, $3, $4, $5, $6
             WHERE NOT EXISTS (
                 SELECT 1 FROM migration_executions
                 WHERE migration_id = $2 AND status IN ('pending', 'running')
             )"
        };
        let done = sqlx::query(sql)
            .bind(execution.id)
            .bind(&execution.migration_id)
            .bind(execution.start_time)
            .bind(execution.status.to_string())
            .bind(&execution.executor)
            .bind(&execution.environment)
            .execute(&self.pool)
            .await?;
        if done.rows_affected() == 0 {
            return Err(EngineError::Concurrency(execution.migration_id.clone()));
        }
        Ok(())
    }

    async fn update(&self, execution: &MigrationExecution) -> EngineResult<()> {
        sqlx::query(
            "UPDATE migration_executions
             SET end_time = $2, status = $3, duration_ms = $4, rows_affected = $5,
                 success = $6, error_message = $7
             WHERE id = $1",
        )
        .bind(execution.id)
        .bind(execution.end_time)
        .bind(execution.status.to_string())
        .bind(execution.result.as_ref().map(|r| r.duration_ms))
        .bind(execution.result.as_ref().map(|r| r.rows_affected as i64))
        .bind(execution.result.as_ref().map(|r| r.success))
        .bind(&execution.error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_for_migration(
        &self,
        migration_id: &str,
    ) -> EngineResult<Vec<MigrationExecution>> {
        let rows = sqlx::query(
            "SELECT * FROM migration_executions WHERE migration_id = $1 ORDER BY start_time DESC",
        )
        .bind(migration_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_execution).collect()
    }

    async fn latest_completed(
        &self,
        migration_id: &str,
    ) -> EngineResult<Option<MigrationExecution>> {
        let row = sqlx::query(
            "SELECT * FROM migration_executions
             WHERE migration_id = $1 AND status = 'completed'
             ORDER BY start_time DESC
             LIMIT 1",
        )
        .bind(migration_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(map_execution).transpose()
    }

    async fn list_since(&self, cutoff: DateTime<Utc>) -> EngineResult<Vec<MigrationExecution>> {
        let rows = sqlx::query(
            "SELECT * FROM migration_executions WHERE start_time >= $1 ORDER BY start_time DESC",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_execution).collect()
    }

    async fn mark_rolled_back(&self, id: Uuid) -> EngineResult<()> {
        let done = sqlx::query(
            "UPDATE migration_executions SET status = 'rolled_back' WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        if done.rows_affected() == 0 {
            return Err(EngineError::not_found(format!("Execution '{}' not found", id)));
        }
        Ok(())
    }

    async fn delete_completed_before(&self, cutoff: DateTime<Utc>) -> EngineResult<u64> {
        let done = sqlx::query(
            "DELETE FROM migration_executions WHERE status = 'completed' AND end_time < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(done.rows_affected())
    }
}

#[async_trait]
impl SchemaVersionRepository for PostgresStore {
    async fn promote(&self, version: &SchemaVersion) -> EngineResult<()> {
        // Deprecate-then-insert runs inside one transaction so no reader ever
        // observes zero or two current rows.
        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE schema_versions SET status = 'deprecated' WHERE status = 'current'")
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO schema_versions (version, description, applied_at, checksum, migration_id, status)
             VALUES ($1, $2, $3, $4, $5, 'current')
             ON CONFLICT (version) DO UPDATE
             SET applied_at = EXCLUDED.applied_at,
                 checksum = EXCLUDED.checksum,
                 status = 'current'",
        )
        .bind(&version.version)
        .bind(&version.description)
        .bind(version.applied_at)
        .bind(&version.checksum)
        .bind(&version.migration_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn current(&self) -> EngineResult<Option<SchemaVersion>> {
        let row = sqlx::query("SELECT * FROM schema_versions WHERE status = 'current'")
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_version).transpose()
    }
}

#[async_trait]
impl RollbackPointRepository for PostgresStore {
    async fn insert(&self, point: &RollbackPoint) -> EngineResult<()> {
        sqlx::query(
            "INSERT INTO rollback_points (id, migration_execution_id, created_at, snapshot)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(point.id)
        .bind(point.migration_execution_id)
        .bind(point.created_at)
        .bind(Json(&point.snapshot))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn latest_for_execution(
        &self,
        execution_id: Uuid,
    ) -> EngineResult<Option<RollbackPoint>> {
        let row = sqlx::query(
            "SELECT * FROM rollback_points
             WHERE migration_execution_id = $1
             ORDER BY created_at DESC
             LIMIT 1",
        )
        .bind(execution_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| {
            Ok(RollbackPoint {
                id: row.try_get("id")?,
                migration_execution_id: row.try_get("migration_execution_id")?,
                created_at: row.try_get("created_at")?,
                snapshot: row.try_get::<Json<serde_json::Value>, _>("snapshot")?.0,
            })
        })
        .transpose()
    }

    async fn delete_orphaned(&self) -> EngineResult<u64> {
        let done = sqlx::query(
            "DELETE FROM rollback_points rp
             WHERE NOT EXISTS (
                 SELECT 1 FROM migration_executions e WHERE e.id = rp.migration_execution_id
             )",
        )
        .execute(&self.pool)
        .await?;
        Ok(done.rows_affected())
    }
}

#[async_trait]
impl RollbackOperationRepository for PostgresStore {
    async fn insert(&self, operation: &RollbackOperation) -> EngineResult<()> {
        sqlx::query(
            "INSERT INTO rollback_operations
                (id, original_migration_id, start_time, end_time, status, progress, executed_by, reason)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(operation.id)
        .bind(operation.original_migration_id)
        .bind(operation.start_time)
        .bind(operation.end_time)
        .bind(operation.status.to_string())
        .bind(operation.progress)
        .bind(&operation.executed_by)
        .bind(&operation.reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update(&self, operation: &RollbackOperation) -> EngineResult<()> {
        sqlx::query(
            "UPDATE rollback_operations
             SET end_time = $2, status = $3, progress = $4
             WHERE id = $1",
        )
        .bind(operation.id)
        .bind(operation.end_time)
        .bind(operation.status.to_string())
        .bind(operation.progress)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl TestRepository for PostgresStore {
    async fn insert(&self, test: &MigrationTest) -> EngineResult<()> {
        sqlx::query(
            "INSERT INTO migration_tests
                (id, migration_id, name, test_type, test_sql, expected_result,
                 enabled, critical, timeout_secs, retry_attempts)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(test.id)
        .bind(&test.migration_id)
        .bind(&test.name)
        .bind(&test.test_type)
        .bind(&test.test_sql)
        .bind(Json(&test.expected_result))
        .bind(test.enabled)
        .bind(test.critical)
        .bind(test.timeout_secs)
        .bind(test.retry_attempts)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_for_migration(&self, migration_id: &str) -> EngineResult<Vec<MigrationTest>> {
        let rows = sqlx::query("SELECT * FROM migration_tests WHERE migration_id = $1")
            .bind(migration_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(map_test).collect()
    }

    async fn list_enabled(&self) -> EngineResult<Vec<MigrationTest>> {
        let rows = sqlx::query("SELECT * FROM migration_tests WHERE enabled = TRUE")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(map_test).collect()
    }
}

#[async_trait]
impl AlertRepository for PostgresStore {
    async fn insert(&self, alert: &MigrationAlert) -> EngineResult<()> {
        sqlx::query(
            "INSERT INTO migration_alerts (id, severity, message, created_at, acknowledged)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(alert.id)
        .bind(alert.severity.to_string())
        .bind(&alert.message)
        .bind(alert.created_at)
        .bind(alert.acknowledged)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn unacknowledged(&self) -> EngineResult<Vec<MigrationAlert>> {
        let rows = sqlx::query(
            "SELECT * FROM migration_alerts WHERE acknowledged = FALSE ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_alert).collect()
    }

    async fn acknowledge(&self, id: Uuid) -> EngineResult<bool> {
        let done = sqlx::query("UPDATE migration_alerts SET acknowledged = TRUE WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected() > 0)
    }
}
