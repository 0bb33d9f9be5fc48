//! Typed repositories over the engine's persisted state
//!
//! One trait per entity, per the ownership rules of the domain model. The
//! engine components hold a [`Store`] bundle of trait objects so the same
//! orchestration code runs against PostgreSQL in production and the in-memory
//! store in tests.

pub mod memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::EngineResult;
use crate::model::{
    MigrationAlert, MigrationDefinition, MigrationExecution, MigrationTest, RiskLevel,
    RollbackOperation, RollbackPoint, SchemaVersion,
};

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

/// Filters for listing registered migrations
#[derive(Debug, Clone, Default)]
pub struct DefinitionFilter {
    pub batch: Option<String>,
    pub risk_level: Option<RiskLevel>,
}

#[async_trait]
pub trait DefinitionRepository: Send + Sync {
    async fn insert(&self, definition: &MigrationDefinition) -> EngineResult<()>;
    async fn get(&self, id: &str) -> EngineResult<Option<MigrationDefinition>>;
    async fn exists(&self, id: &str) -> EngineResult<bool>;
    /// Definitions matching `filter`, ordered by registration time
    async fn list(&self, filter: &DefinitionFilter) -> EngineResult<Vec<MigrationDefinition>>;
    async fn count(&self) -> EngineResult<u64>;
}

#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    /// Insert a new `running` execution. Without `force` the insert is
    /// conditional and fails with [`EngineError::Concurrency`] when another
    /// execution of the same migration is still in flight; the check and the
    /// insert are one atomic step.
    ///
    /// [`EngineError::Concurrency`]: crate::error::EngineError::Concurrency
    async fn insert_running(
        &self,
        execution: &MigrationExecution,
        force: bool,
    ) -> EngineResult<()>;
    async fn update(&self, execution: &MigrationExecution) -> EngineResult<()>;
    /// Executions of one migration, newest first
    async fn list_for_migration(&self, migration_id: &str)
        -> EngineResult<Vec<MigrationExecution>>;
    /// Most recent `completed` execution of one migration
    async fn latest_completed(&self, migration_id: &str)
        -> EngineResult<Option<MigrationExecution>>;
    /// Executions started at or after `cutoff`
    async fn list_since(&self, cutoff: DateTime<Utc>) -> EngineResult<Vec<MigrationExecution>>;
    /// One-way transition to `rolled_back`; reserved to the rollback manager
    async fn mark_rolled_back(&self, id: Uuid) -> EngineResult<()>;
    /// Purge `completed` executions finished before `cutoff`; `failed` and
    /// `rolled_back` rows are an audit trail and are never deleted here.
    async fn delete_completed_before(&self, cutoff: DateTime<Utc>) -> EngineResult<u64>;
}

#[async_trait]
pub trait SchemaVersionRepository: Send + Sync {
    /// Record `version` as current and deprecate every other row, as one
    /// atomic step, so "exactly one current" holds at every observable point.
    async fn promote(&self, version: &SchemaVersion) -> EngineResult<()>;
    async fn current(&self) -> EngineResult<Option<SchemaVersion>>;
}

#[async_trait]
pub trait RollbackPointRepository: Send + Sync {
    async fn insert(&self, point: &RollbackPoint) -> EngineResult<()>;
    async fn latest_for_execution(
        &self,
        execution_id: Uuid,
    ) -> EngineResult<Option<RollbackPoint>>;
    /// Delete points whose referenced execution no longer exists
    async fn delete_orphaned(&self) -> EngineResult<u64>;
}

#[async_trait]
pub trait RollbackOperationRepository: Send + Sync {
    async fn insert(&self, operation: &RollbackOperation) -> EngineResult<()>;
    async fn update(&self, operation: &RollbackOperation) -> EngineResult<()>;
}

#[async_trait]
pub trait TestRepository: Send + Sync {
    async fn insert(&self, test: &MigrationTest) -> EngineResult<()>;
    async fn list_for_migration(&self, migration_id: &str) -> EngineResult<Vec<MigrationTest>>;
    async fn list_enabled(&self) -> EngineResult<Vec<MigrationTest>>;
}

#[async_trait]
pub trait AlertRepository: Send + Sync {
    async fn insert(&self, alert: &MigrationAlert) -> EngineResult<()>;
    async fn unacknowledged(&self) -> EngineResult<Vec<MigrationAlert>>;
    /// Returns false when no alert with `id` exists
    async fn acknowledge(&self, id: Uuid) -> EngineResult<bool>;
}

/// Bundle of repository handles shared by the engine components
#[derive(Clone)]
pub struct Store {
    pub definitions: Arc<dyn DefinitionRepository>,
    pub executions: Arc<dyn ExecutionRepository>,
    pub versions: Arc<dyn SchemaVersionRepository>,
    pub rollback_points: Arc<dyn RollbackPointRepository>,
    pub rollback_operations: Arc<dyn RollbackOperationRepository>,
    pub tests: Arc<dyn TestRepository>,
    pub alerts: Arc<dyn AlertRepository>,
}

impl Store {
    /// Wire every repository to one PostgreSQL store
    pub fn postgres(store: PostgresStore) -> Self {
        let store = Arc::new(store);
        Self {
            definitions: store.clone(),
            executions: store.clone(),
            versions: store.clone(),
            rollback_points: store.clone(),
            rollback_operations: store.clone(),
            tests: store.clone(),
            alerts: store,
        }
    }

    /// Wire every repository to one in-memory store (test support)
    pub fn in_memory() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self {
            definitions: store.clone(),
            executions: store.clone(),
            versions: store.clone(),
            rollback_points: store.clone(),
            rollback_operations: store.clone(),
            tests: store.clone(),
            alerts: store,
        }
    }
}
