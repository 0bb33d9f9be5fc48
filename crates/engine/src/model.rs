//! Domain model for the migration engine
//!
//! Defines the persisted entities: migration definitions, executions, schema
//! versions, rollback bookkeeping, verification tests and alerts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::EngineError;

/// Blast-radius classification of a migration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl FromStr for RiskLevel {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(RiskLevel::Low),
            "medium" => Ok(RiskLevel::Medium),
            "high" => Ok(RiskLevel::High),
            "critical" => Ok(RiskLevel::Critical),
            _ => Err(EngineError::validation(
                "risk_level must be one of: low, medium, high, critical",
            )),
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        };
        write!(f, "{}", s)
    }
}

/// An immutable-once-created record of one schema change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationDefinition {
    /// Caller-chosen, globally unique identifier
    pub id: String,
    /// Version label for the change
    pub version: String,
    /// Human-readable name
    pub name: String,
    pub description: String,
    pub author: String,
    /// Forward SQL, required and non-empty
    pub up_sql: String,
    /// Reverse SQL; absent means the change reverses as a no-op
    pub down_sql: Option<String>,
    /// Ids of migrations that must be registered before this one runs
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Grouping label
    pub batch: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub risk_level: RiskLevel,
    /// Whether a rollback point is captured on successful execution
    #[serde(default = "default_true")]
    pub requires_rollback: bool,
    pub estimated_duration_secs: Option<i64>,
    #[serde(default)]
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

pub(crate) fn default_true() -> bool {
    true
}

impl MigrationDefinition {
    /// SHA-256 of the forward SQL, hex-encoded. Stored on the schema version
    /// row so drift between the registered payload and the applied payload is
    /// detectable.
    pub fn up_sql_checksum(&self) -> String {
        hex::encode(Sha256::digest(self.up_sql.as_bytes()))
    }
}

/// Lifecycle of a migration execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    RolledBack,
}

impl ExecutionStatus {
    /// Statuses counted as in flight by the concurrency guard
    pub fn is_in_flight(&self) -> bool {
        matches!(self, ExecutionStatus::Pending | ExecutionStatus::Running)
    }
}

impl FromStr for ExecutionStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ExecutionStatus::Pending),
            "running" => Ok(ExecutionStatus::Running),
            "completed" => Ok(ExecutionStatus::Completed),
            "failed" => Ok(ExecutionStatus::Failed),
            "rolled_back" => Ok(ExecutionStatus::RolledBack),
            other => Err(EngineError::validation(format!(
                "Unknown execution status '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::RolledBack => "rolled_back",
        };
        write!(f, "{}", s)
    }
}

/// Outcome recorded on a finished execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub duration_ms: i64,
    pub rows_affected: u64,
    pub success: bool,
}

/// One attempt to apply a migration definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationExecution {
    pub id: Uuid,
    pub migration_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: ExecutionStatus,
    pub executor: String,
    pub environment: String,
    pub result: Option<ExecutionResult>,
    pub error_message: Option<String>,
}

/// Status of a schema version marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionStatus {
    Current,
    Deprecated,
}

impl FromStr for VersionStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "current" => Ok(VersionStatus::Current),
            "deprecated" => Ok(VersionStatus::Deprecated),
            other => Err(EngineError::validation(format!(
                "Unknown version status '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for VersionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionStatus::Current => write!(f, "current"),
            VersionStatus::Deprecated => write!(f, "deprecated"),
        }
    }
}

/// Historical marker of the schema state after a migration was applied.
/// Exactly one row is `current` at any time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaVersion {
    /// Equal to the migration id
    pub version: String,
    pub description: String,
    pub applied_at: DateTime<Utc>,
    /// SHA-256 hex of the applied `up_sql`
    pub checksum: String,
    pub migration_id: String,
    pub status: VersionStatus,
}

/// Snapshot reference captured alongside a completed execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackPoint {
    pub id: Uuid,
    pub migration_execution_id: Uuid,
    pub created_at: DateTime<Utc>,
    /// Opaque snapshot metadata
    pub snapshot: Value,
}

/// Lifecycle of a rollback operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackStatus {
    Running,
    Completed,
    Failed,
}

impl FromStr for RollbackStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RollbackStatus::Running),
            "completed" => Ok(RollbackStatus::Completed),
            "failed" => Ok(RollbackStatus::Failed),
            other => Err(EngineError::validation(format!(
                "Unknown rollback status '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for RollbackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RollbackStatus::Running => write!(f, "running"),
            RollbackStatus::Completed => write!(f, "completed"),
            RollbackStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One attempt to reverse a completed execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackOperation {
    pub id: Uuid,
    /// Id of the execution being reversed
    pub original_migration_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: RollbackStatus,
    /// 0-100
    pub progress: i16,
    pub executed_by: String,
    pub reason: String,
}

/// Advisory post-execution assertion attached to a migration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationTest {
    pub id: Uuid,
    pub migration_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub test_type: String,
    pub test_sql: String,
    pub expected_result: Value,
    pub enabled: bool,
    pub critical: bool,
    pub timeout_secs: i64,
    pub retry_attempts: i32,
}

/// Severity of a standing alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl FromStr for AlertSeverity {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(AlertSeverity::Info),
            "warning" => Ok(AlertSeverity::Warning),
            "critical" => Ok(AlertSeverity::Critical),
            other => Err(EngineError::validation(format!(
                "Unknown alert severity '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertSeverity::Info => write!(f, "info"),
            AlertSeverity::Warning => write!(f, "warning"),
            AlertSeverity::Critical => write!(f, "critical"),
        }
    }
}

/// Standing notice surfaced by the health service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationAlert {
    pub id: Uuid,
    pub severity: AlertSeverity,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub acknowledged: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn risk_level_parses_case_insensitively() {
        assert_eq!("LOW".parse::<RiskLevel>().unwrap(), RiskLevel::Low);
        assert_eq!("critical".parse::<RiskLevel>().unwrap(), RiskLevel::Critical);
        assert!("severe".parse::<RiskLevel>().is_err());
    }

    #[test]
    fn execution_status_round_trips_through_display() {
        for status in [
            ExecutionStatus::Pending,
            ExecutionStatus::Running,
            ExecutionStatus::Completed,
            ExecutionStatus::Failed,
            ExecutionStatus::RolledBack,
        ] {
            assert_eq!(status.to_string().parse::<ExecutionStatus>().unwrap(), status);
        }
    }

    #[test]
    fn checksum_is_stable_and_content_addressed() {
        let mut definition = sample_definition();
        let first = definition.up_sql_checksum();
        assert_eq!(first, definition.up_sql_checksum());
        definition.up_sql.push_str(" NOT NULL");
        assert_ne!(first, definition.up_sql_checksum());
    }

    fn sample_definition() -> MigrationDefinition {
        MigrationDefinition {
            id: "m1".into(),
            version: "1.0.0".into(),
            name: "add users".into(),
            description: "adds the users table".into(),
            author: "ops".into(),
            up_sql: "CREATE TABLE users (id BIGINT)".into(),
            down_sql: Some("DROP TABLE users".into()),
            dependencies: Vec::new(),
            batch: None,
            tags: Vec::new(),
            risk_level: RiskLevel::Low,
            requires_rollback: true,
            estimated_duration_secs: None,
            metadata: Value::Null,
            created_at: Utc::now(),
        }
    }
}
