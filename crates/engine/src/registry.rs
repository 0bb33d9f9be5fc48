//! Migration Registry - durable catalog of migration definitions
//!
//! Validates and stores new definitions and serves aggregate read views. No
//! SQL is parsed or executed at registration time; the payload is persisted
//! verbatim.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::model::{
    ExecutionStatus, MigrationDefinition, MigrationExecution, MigrationTest, RiskLevel,
    SchemaVersion,
};
use crate::repository::{DefinitionFilter, Store};

/// Caller-supplied definition fields, as received from the API
#[derive(Debug, Clone, Deserialize)]
pub struct NewMigration {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub up_sql: String,
    pub down_sql: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    pub batch: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub risk_level: String,
    #[serde(default = "crate::model::default_true")]
    pub requires_rollback: bool,
    #[serde(alias = "estimated_duration")]
    pub estimated_duration_secs: Option<i64>,
    #[serde(default)]
    pub metadata: Value,
}

impl Default for NewMigration {
    fn default() -> Self {
        Self {
            id: String::new(),
            version: String::new(),
            name: String::new(),
            description: String::new(),
            author: String::new(),
            up_sql: String::new(),
            down_sql: None,
            dependencies: Vec::new(),
            batch: None,
            tags: Vec::new(),
            risk_level: String::new(),
            requires_rollback: true,
            estimated_duration_secs: None,
            metadata: Value::Null,
        }
    }
}

/// Derived execution statistics for one migration
#[derive(Debug, Clone, Serialize)]
pub struct MigrationStats {
    pub total_executions: usize,
    pub successful: usize,
    pub failed: usize,
    pub last_run: Option<DateTime<Utc>>,
}

/// Aggregate read view of one migration
#[derive(Debug, Clone, Serialize)]
pub struct MigrationDetails {
    pub definition: MigrationDefinition,
    pub executions: Vec<MigrationExecution>,
    pub current_schema_version: Option<SchemaVersion>,
    pub tests: Vec<MigrationTest>,
    pub stats: MigrationStats,
}

/// One row of the migration listing
#[derive(Debug, Clone, Serialize)]
pub struct MigrationSummary {
    #[serde(flatten)]
    pub definition: MigrationDefinition,
    /// Status of the most recent execution; `pending` when never executed
    pub last_status: ExecutionStatus,
    pub last_run: Option<DateTime<Utc>>,
}

/// Listing filters backing `GET /api/migrations`
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub batch: Option<String>,
    pub risk_level: Option<RiskLevel>,
    pub status: Option<ExecutionStatus>,
    pub limit: Option<usize>,
}

#[derive(Clone)]
pub struct MigrationRegistry {
    store: Store,
}

impl MigrationRegistry {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Register a new migration definition.
    ///
    /// Fails with `Validation` when required fields are missing or the risk
    /// level is unknown, and with `DuplicateId` when the id is taken. On
    /// success a default verification test is attached asserting that a
    /// completed execution exists for the id.
    pub async fn register(&self, new: NewMigration) -> EngineResult<MigrationDefinition> {
        let risk_level = validate(&new)?;

        if self.store.definitions.exists(&new.id).await? {
            return Err(EngineError::DuplicateId(new.id));
        }

        let definition = MigrationDefinition {
            id: new.id,
            version: new.version,
            name: new.name,
            description: new.description,
            author: new.author,
            up_sql: new.up_sql,
            down_sql: new.down_sql,
            dependencies: new.dependencies,
            batch: new.batch,
            tags: new.tags,
            risk_level,
            requires_rollback: new.requires_rollback,
            estimated_duration_secs: new.estimated_duration_secs,
            metadata: new.metadata,
            created_at: Utc::now(),
        };
        self.store.definitions.insert(&definition).await?;
        self.store
            .tests
            .insert(&default_verification_test(&definition.id))
            .await?;

        tracing::info!(
            migration_id = %definition.id,
            risk_level = %definition.risk_level,
            "registered migration"
        );
        Ok(definition)
    }

    /// Aggregate view of one migration across related entities
    pub async fn get(&self, id: &str) -> EngineResult<MigrationDetails> {
        let definition = self
            .store
            .definitions
            .get(id)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("Migration '{}' not found", id)))?;

        let executions = self.store.executions.list_for_migration(id).await?;
        let tests = self.store.tests.list_for_migration(id).await?;
        let current_schema_version = self.store.versions.current().await?;
        let stats = derive_stats(&executions);

        Ok(MigrationDetails {
            definition,
            executions,
            current_schema_version,
            tests,
            stats,
        })
    }

    /// Registered migrations matching `filter`, annotated with their latest
    /// execution status
    pub async fn list(&self, filter: &ListFilter) -> EngineResult<Vec<MigrationSummary>> {
        let definitions = self
            .store
            .definitions
            .list(&DefinitionFilter {
                batch: filter.batch.clone(),
                risk_level: filter.risk_level,
            })
            .await?;

        let mut summaries = Vec::with_capacity(definitions.len());
        for definition in definitions {
            let executions = self
                .store
                .executions
                .list_for_migration(&definition.id)
                .await?;
            let last_status = executions
                .first()
                .map(|e| e.status)
                .unwrap_or(ExecutionStatus::Pending);
            if filter.status.map_or(false, |wanted| wanted != last_status) {
                continue;
            }
            let last_run = executions.first().map(|e| e.start_time);
            summaries.push(MigrationSummary {
                definition,
                last_status,
                last_run,
            });
            if filter.limit.map_or(false, |limit| summaries.len() >= limit) {
                break;
            }
        }
        Ok(summaries)
    }
}

fn validate(new: &NewMigration) -> EngineResult<RiskLevel> {
    let mut missing = Vec::new();
    for (field, value) in [
        ("id", &new.id),
        ("name", &new.name),
        ("version", &new.version),
        ("description", &new.description),
        ("up_sql", &new.up_sql),
    ] {
        if value.trim().is_empty() {
            missing.push(field);
        }
    }
    if !missing.is_empty() {
        return Err(EngineError::validation(format!(
            "Missing required fields: {}",
            missing.join(", ")
        )));
    }
    new.risk_level.parse::<RiskLevel>()
}

fn default_verification_test(migration_id: &str) -> MigrationTest {
    MigrationTest {
        id: Uuid::new_v4(),
        migration_id: migration_id.to_string(),
        name: format!("{} was applied", migration_id),
        test_type: "post_execution".into(),
        test_sql: format!(
            "SELECT COUNT(*) FROM migration_executions WHERE migration_id = '{}' AND status = 'completed'",
            migration_id
        ),
        expected_result: json!({ "min_count": 1 }),
        enabled: true,
        critical: false,
        timeout_secs: 30,
        retry_attempts: 0,
    }
}

fn derive_stats(executions: &[MigrationExecution]) -> MigrationStats {
    MigrationStats {
        total_executions: executions.len(),
        successful: executions
            .iter()
            .filter(|e| e.status == ExecutionStatus::Completed)
            .count(),
        failed: executions
            .iter()
            .filter(|e| e.status == ExecutionStatus::Failed)
            .count(),
        last_run: executions.iter().map(|e| e.start_time).max(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> MigrationRegistry {
        MigrationRegistry::new(Store::in_memory())
    }

    fn new_migration(id: &str) -> NewMigration {
        NewMigration {
            id: id.to_string(),
            version: "1.0.0".into(),
            name: "add column".into(),
            description: "adds a column".into(),
            author: "ops".into(),
            up_sql: "ALTER TABLE t ADD COLUMN c TEXT".into(),
            risk_level: "low".into(),
            requires_rollback: true,
            ..NewMigration::default()
        }
    }

    #[tokio::test]
    async fn register_rejects_missing_fields() {
        let registry = registry();
        let mut incomplete = new_migration("m1");
        incomplete.up_sql = String::new();
        incomplete.description = String::new();

        let err = registry.register(incomplete).await.unwrap_err();
        match err {
            EngineError::Validation(message) => {
                assert!(message.contains("description"));
                assert!(message.contains("up_sql"));
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn register_rejects_unknown_risk_level() {
        let registry = registry();
        let mut bad = new_migration("m1");
        bad.risk_level = "catastrophic".into();
        assert!(matches!(
            registry.register(bad).await,
            Err(EngineError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn duplicate_registration_fails_on_second_call() {
        let registry = registry();
        registry.register(new_migration("m1")).await.unwrap();

        let err = registry.register(new_migration("m1")).await.unwrap_err();
        assert!(matches!(err, EngineError::DuplicateId(id) if id == "m1"));
    }

    #[tokio::test]
    async fn register_attaches_default_verification_test() {
        let registry = registry();
        registry.register(new_migration("m1")).await.unwrap();

        let details = registry.get("m1").await.unwrap();
        assert_eq!(details.tests.len(), 1);
        assert_eq!(details.tests[0].test_type, "post_execution");
        assert!(details.tests[0].test_sql.contains("m1"));
        assert_eq!(details.stats.total_executions, 0);
    }

    #[tokio::test]
    async fn get_unknown_migration_is_not_found() {
        let registry = registry();
        assert!(matches!(
            registry.get("missing").await,
            Err(EngineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn list_reports_pending_for_unexecuted_migrations() {
        let registry = registry();
        registry.register(new_migration("m1")).await.unwrap();
        registry.register(new_migration("m2")).await.unwrap();

        let all = registry.list(&ListFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|m| m.last_status == ExecutionStatus::Pending));

        let limited = registry
            .list(&ListFilter {
                limit: Some(1),
                ..ListFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
    }
}
