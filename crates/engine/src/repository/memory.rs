//! In-memory repository implementations
//!
//! Backs the test suite. Semantics mirror the PostgreSQL store: the
//! concurrency guard and schema-version promotion each happen under a single
//! lock hold, so the same invariants hold under concurrent callers.

use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::model::{
    ExecutionStatus, MigrationAlert, MigrationDefinition, MigrationExecution, MigrationTest,
    RollbackOperation, RollbackPoint, SchemaVersion, VersionStatus,
};

use super::{
    AlertRepository, DefinitionFilter, DefinitionRepository, ExecutionRepository,
    RollbackOperationRepository, RollbackPointRepository, SchemaVersionRepository, TestRepository,
};

#[derive(Default)]
struct Inner {
    definitions: Vec<MigrationDefinition>,
    executions: Vec<MigrationExecution>,
    versions: Vec<SchemaVersion>,
    rollback_points: Vec<RollbackPoint>,
    rollback_operations: Vec<RollbackOperation>,
    tests: Vec<MigrationTest>,
    alerts: Vec<MigrationAlert>,
}

/// All repositories over process-local state
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DefinitionRepository for MemoryStore {
    async fn insert(&self, definition: &MigrationDefinition) -> EngineResult<()> {
        self.inner.write().unwrap().definitions.push(definition.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> EngineResult<Option<MigrationDefinition>> {
        let inner = self.inner.read().unwrap();
        Ok(inner.definitions.iter().find(|d| d.id == id).cloned())
    }

    async fn exists(&self, id: &str) -> EngineResult<bool> {
        let inner = self.inner.read().unwrap();
        Ok(inner.definitions.iter().any(|d| d.id == id))
    }

    async fn list(&self, filter: &DefinitionFilter) -> EngineResult<Vec<MigrationDefinition>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .definitions
            .iter()
            .filter(|d| filter.batch.as_ref().map_or(true, |b| d.batch.as_deref() == Some(b)))
            .filter(|d| filter.risk_level.map_or(true, |r| d.risk_level == r))
            .cloned()
            .collect())
    }

    async fn count(&self) -> EngineResult<u64> {
        Ok(self.inner.read().unwrap().definitions.len() as u64)
    }
}

#[async_trait]
impl ExecutionRepository for MemoryStore {
    async fn insert_running(
        &self,
        execution: &MigrationExecution,
        force: bool,
    ) -> EngineResult<()> {
        let mut inner = self.inner.write().unwrap();
        if !force {
            let in_flight = inner
                .executions
                .iter()
                .any(|e| e.migration_id == execution.migration_id && e.status.is_in_flight());
            if in_flight {
                return Err(EngineError::Concurrency(execution.migration_id.clone()));
            }
        }
        inner.executions.push(execution.clone());
        Ok(())
    }

    async fn update(&self, execution: &MigrationExecution) -> EngineResult<()> {
        let mut inner = self.inner.write().unwrap();
        match inner.executions.iter_mut().find(|e| e.id == execution.id) {
            Some(stored) => {
                *stored = execution.clone();
                Ok(())
            }
            None => Err(EngineError::not_found(format!(
                "Execution '{}' not found",
                execution.id
            ))),
        }
    }

    async fn list_for_migration(
        &self,
        migration_id: &str,
    ) -> EngineResult<Vec<MigrationExecution>> {
        let inner = self.inner.read().unwrap();
        let mut executions: Vec<_> = inner
            .executions
            .iter()
            .filter(|e| e.migration_id == migration_id)
            .cloned()
            .collect();
        executions.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(executions)
    }

    async fn latest_completed(
        &self,
        migration_id: &str,
    ) -> EngineResult<Option<MigrationExecution>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .executions
            .iter()
            .filter(|e| e.migration_id == migration_id && e.status == ExecutionStatus::Completed)
            .max_by_key(|e| e.start_time)
            .cloned())
    }

    async fn list_since(&self, cutoff: DateTime<Utc>) -> EngineResult<Vec<MigrationExecution>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .executions
            .iter()
            .filter(|e| e.start_time >= cutoff)
            .cloned()
            .collect())
    }

    async fn mark_rolled_back(&self, id: Uuid) -> EngineResult<()> {
        let mut inner = self.inner.write().unwrap();
        match inner.executions.iter_mut().find(|e| e.id == id) {
            Some(execution) => {
                execution.status = ExecutionStatus::RolledBack;
                Ok(())
            }
            None => Err(EngineError::not_found(format!("Execution '{}' not found", id))),
        }
    }

    async fn delete_completed_before(&self, cutoff: DateTime<Utc>) -> EngineResult<u64> {
        let mut inner = self.inner.write().unwrap();
        let before = inner.executions.len();
        inner.executions.retain(|e| {
            !(e.status == ExecutionStatus::Completed
                && e.end_time.map_or(false, |end| end < cutoff))
        });
        Ok((before - inner.executions.len()) as u64)
    }
}

#[async_trait]
impl SchemaVersionRepository for MemoryStore {
    async fn promote(&self, version: &SchemaVersion) -> EngineResult<()> {
        let mut inner = self.inner.write().unwrap();
        for stored in inner.versions.iter_mut() {
            stored.status = VersionStatus::Deprecated;
        }
        match inner.versions.iter_mut().find(|v| v.version == version.version) {
            Some(stored) => *stored = version.clone(),
            None => inner.versions.push(version.clone()),
        }
        Ok(())
    }

    async fn current(&self) -> EngineResult<Option<SchemaVersion>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .versions
            .iter()
            .find(|v| v.status == VersionStatus::Current)
            .cloned())
    }
}

#[async_trait]
impl RollbackPointRepository for MemoryStore {
    async fn insert(&self, point: &RollbackPoint) -> EngineResult<()> {
        self.inner.write().unwrap().rollback_points.push(point.clone());
        Ok(())
    }

    async fn latest_for_execution(
        &self,
        execution_id: Uuid,
    ) -> EngineResult<Option<RollbackPoint>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .rollback_points
            .iter()
            .filter(|p| p.migration_execution_id == execution_id)
            .max_by_key(|p| p.created_at)
            .cloned())
    }

    async fn delete_orphaned(&self) -> EngineResult<u64> {
        let mut inner = self.inner.write().unwrap();
        let execution_ids: Vec<Uuid> = inner.executions.iter().map(|e| e.id).collect();
        let before = inner.rollback_points.len();
        inner
            .rollback_points
            .retain(|p| execution_ids.contains(&p.migration_execution_id));
        Ok((before - inner.rollback_points.len()) as u64)
    }
}

#[async_trait]
impl RollbackOperationRepository for MemoryStore {
    async fn insert(&self, operation: &RollbackOperation) -> EngineResult<()> {
        self.inner
            .write()
            .unwrap()
            .rollback_operations
            .push(operation.clone());
        Ok(())
    }

    async fn update(&self, operation: &RollbackOperation) -> EngineResult<()> {
        let mut inner = self.inner.write().unwrap();
        match inner
            .rollback_operations
            .iter_mut()
            .find(|o| o.id == operation.id)
        {
            Some(stored) => {
                *stored = operation.clone();
                Ok(())
            }
            None => Err(EngineError::not_found(format!(
                "Rollback operation '{}' not found",
                operation.id
            ))),
        }
    }
}

#[async_trait]
impl TestRepository for MemoryStore {
    async fn insert(&self, test: &MigrationTest) -> EngineResult<()> {
        self.inner.write().unwrap().tests.push(test.clone());
        Ok(())
    }

    async fn list_for_migration(&self, migration_id: &str) -> EngineResult<Vec<MigrationTest>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .tests
            .iter()
            .filter(|t| t.migration_id == migration_id)
            .cloned()
            .collect())
    }

    async fn list_enabled(&self) -> EngineResult<Vec<MigrationTest>> {
        let inner = self.inner.read().unwrap();
        Ok(inner.tests.iter().filter(|t| t.enabled).cloned().collect())
    }
}

#[async_trait]
impl AlertRepository for MemoryStore {
    async fn insert(&self, alert: &MigrationAlert) -> EngineResult<()> {
        self.inner.write().unwrap().alerts.push(alert.clone());
        Ok(())
    }

    async fn unacknowledged(&self) -> EngineResult<Vec<MigrationAlert>> {
        let inner = self.inner.read().unwrap();
        Ok(inner.alerts.iter().filter(|a| !a.acknowledged).cloned().collect())
    }

    async fn acknowledge(&self, id: Uuid) -> EngineResult<bool> {
        let mut inner = self.inner.write().unwrap();
        match inner.alerts.iter_mut().find(|a| a.id == id) {
            Some(alert) => {
                alert.acknowledged = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
