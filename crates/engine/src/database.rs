//! Database connectivity and the SQL execution collaborator
//!
//! The engine never interprets migration SQL itself; it hands payloads to a
//! [`SqlRunner`] and consumes `{rows_affected, error}`-shaped outcomes.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::error::{EngineError, EngineResult};

/// Connection pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            acquire_timeout_secs: 30,
        }
    }
}

/// Connect a PostgreSQL pool with the given configuration
pub async fn connect_pool(database_url: &str, config: &PoolConfig) -> EngineResult<PgPool> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .connect(database_url)
        .await
        .map_err(|e| EngineError::Database(format!("Failed to connect to database: {}", e)))
}

/// Outcome of one SQL execution request
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlOutcome {
    pub rows_affected: u64,
}

/// The database collaborator the engine submits migration SQL to
#[async_trait]
pub trait SqlRunner: Send + Sync {
    /// Execute a SQL payload, bounded by `timeout`. Timeout expiry surfaces
    /// as a normal execution failure.
    async fn run(&self, sql: &str, timeout: Duration) -> EngineResult<SqlOutcome>;

    /// Cheap connectivity probe used by the health service.
    async fn probe(&self) -> bool;
}

/// [`SqlRunner`] backed by a PostgreSQL pool
pub struct PgSqlRunner {
    pool: PgPool,
}

impl PgSqlRunner {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SqlRunner for PgSqlRunner {
    async fn run(&self, sql: &str, timeout: Duration) -> EngineResult<SqlOutcome> {
        let work = async {
            let mut rows_affected = 0u64;
            for statement in split_sql_statements(sql) {
                let done = sqlx::query(&statement)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| EngineError::execution(e.to_string()))?;
                rows_affected += done.rows_affected();
            }
            Ok(SqlOutcome { rows_affected })
        };

        match tokio::time::timeout(timeout, work).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::execution(format!(
                "Timed out after {}s",
                timeout.as_secs()
            ))),
        }
    }

    async fn probe(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}

/// Split a SQL payload into individual statements using proper SQL parsing
pub fn split_sql_statements(sql: &str) -> Vec<String> {
    let dialect = GenericDialect {};
    match Parser::parse_sql(&dialect, sql) {
        Ok(parsed) => parsed.into_iter().map(|stmt| format!("{};", stmt)).collect(),
        Err(e) => {
            // Fall back to naive semicolon splitting for dialect-specific SQL
            tracing::warn!("SQL parsing failed, using naive semicolon splitting: {}", e);
            sql.split(';')
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(|s| format!("{};", s))
                .collect()
        }
    }
}

/// Scripted [`SqlRunner`] for tests: replays queued outcomes in order, then
/// succeeds, recording every payload it was handed.
#[derive(Default)]
pub struct ScriptedSqlRunner {
    script: Mutex<VecDeque<EngineResult<SqlOutcome>>>,
    executed: Mutex<Vec<String>>,
    unhealthy: AtomicBool,
}

impl ScriptedSqlRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful outcome affecting `rows_affected` rows
    pub fn push_ok(&self, rows_affected: u64) {
        self.script
            .lock()
            .unwrap()
            .push_back(Ok(SqlOutcome { rows_affected }));
    }

    /// Queue a failure
    pub fn push_err<T: Into<String>>(&self, message: T) {
        self.script
            .lock()
            .unwrap()
            .push_back(Err(EngineError::execution(message)));
    }

    /// Make the connectivity probe fail
    pub fn set_unhealthy(&self) {
        self.unhealthy.store(true, Ordering::SeqCst);
    }

    /// Payloads submitted so far, in order
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl SqlRunner for ScriptedSqlRunner {
    async fn run(&self, sql: &str, _timeout: Duration) -> EngineResult<SqlOutcome> {
        self.executed.lock().unwrap().push(sql.to_string());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(SqlOutcome { rows_affected: 0 }))
    }

    async fn probe(&self) -> bool {
        !self.unhealthy.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_multi_statement_payloads() {
        let statements = split_sql_statements(
            "CREATE TABLE t (id BIGINT); ALTER TABLE t ADD COLUMN name TEXT",
        );
        assert_eq!(statements.len(), 2);
        assert!(statements[0].starts_with("CREATE TABLE"));
        assert!(statements[1].ends_with(";"));
    }

    #[tokio::test]
    async fn scripted_runner_replays_outcomes_in_order() {
        let runner = ScriptedSqlRunner::new();
        runner.push_ok(3);
        runner.push_err("syntax error");

        let first = runner.run("SELECT 1", Duration::from_secs(1)).await.unwrap();
        assert_eq!(first.rows_affected, 3);
        assert!(runner.run("SELECT 2", Duration::from_secs(1)).await.is_err());
        // Exhausted script defaults to success
        assert!(runner.run("SELECT 3", Duration::from_secs(1)).await.is_ok());
        assert_eq!(runner.executed().len(), 3);
    }
}
