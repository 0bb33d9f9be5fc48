//! Health & Reporting Service
//!
//! Aggregates execution, test and deployment history into a health score and
//! periodic reports, and surfaces standing alerts.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::database::SqlRunner;
use crate::error::{EngineError, EngineResult};
use crate::model::{AlertSeverity, ExecutionStatus, MigrationAlert};
use crate::repository::Store;

/// Overall health band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Critical,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub health_score: i32,
    pub status: HealthStatus,
    pub issues: Vec<String>,
}

/// Execution counts within the report window
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionCounts {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub running: usize,
}

/// Most recent failures within the report window
#[derive(Debug, Clone, Serialize)]
pub struct FailureSummary {
    pub migration_id: String,
    pub error_message: Option<String>,
    pub failed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportAnalysis {
    pub period_days: i64,
    pub generated_at: DateTime<Utc>,
    pub total_migrations: u64,
    pub executions: ExecutionCounts,
    pub test_pass_rate: f64,
    pub deployment_success_rate: f64,
    pub recent_failures: Vec<FailureSummary>,
}

#[derive(Clone)]
pub struct HealthService {
    store: Store,
    runner: Arc<dyn SqlRunner>,
}

impl HealthService {
    pub fn new(store: Store, runner: Arc<dyn SqlRunner>) -> Self {
        Self { store, runner }
    }

    /// Score starts at 100 and is penalized: -30 on a failed connectivity
    /// probe, -20 when the trailing 7-day success rate drops below 95%, -25
    /// when an unacknowledged critical alert is standing. Clamped at 0.
    pub async fn health(&self) -> EngineResult<HealthReport> {
        let mut score = 100i32;
        let mut issues = Vec::new();

        if !self.runner.probe().await {
            score -= 30;
            issues.push("Database connectivity probe failed".to_string());
        }

        let cutoff = Utc::now() - Duration::days(7);
        let recent = self.store.executions.list_since(cutoff).await?;
        let completed = count_status(&recent, ExecutionStatus::Completed);
        let failed = count_status(&recent, ExecutionStatus::Failed);
        let rate = success_rate(completed, completed + failed);
        if rate < 95.0 {
            score -= 20;
            issues.push(format!(
                "Migration success rate over the last 7 days is {:.2}%",
                rate
            ));
        }

        let alerts = self.store.alerts.unacknowledged().await?;
        if alerts.iter().any(|a| a.severity == AlertSeverity::Critical) {
            score -= 25;
            issues.push("Unacknowledged critical alert".to_string());
        }

        let score = score.max(0);
        let status = if score >= 80 {
            HealthStatus::Healthy
        } else if score >= 60 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Critical
        };
        Ok(HealthReport {
            health_score: score,
            status,
            issues,
        })
    }

    /// Aggregate history over the trailing `period_days`
    pub async fn report(&self, period_days: i64) -> EngineResult<ReportAnalysis> {
        let cutoff = Utc::now() - Duration::days(period_days);
        let executions = self.store.executions.list_since(cutoff).await?;

        let completed = count_status(&executions, ExecutionStatus::Completed);
        let failed = count_status(&executions, ExecutionStatus::Failed);
        let running = count_status(&executions, ExecutionStatus::Running);

        let mut recent_failures: Vec<FailureSummary> = executions
            .iter()
            .filter(|e| e.status == ExecutionStatus::Failed)
            .map(|e| FailureSummary {
                migration_id: e.migration_id.clone(),
                error_message: e.error_message.clone(),
                failed_at: e.end_time,
            })
            .collect();
        recent_failures.sort_by(|a, b| b.failed_at.cmp(&a.failed_at));
        recent_failures.truncate(5);

        Ok(ReportAnalysis {
            period_days,
            generated_at: Utc::now(),
            total_migrations: self.store.definitions.count().await?,
            executions: ExecutionCounts {
                total: executions.len(),
                completed,
                failed,
                running,
            },
            test_pass_rate: self.test_pass_rate().await?,
            deployment_success_rate: success_rate(completed, completed + failed),
            recent_failures,
        })
    }

    /// An enabled test passes iff its migration's latest execution completed,
    /// matching the registry's auto-generated verification test.
    async fn test_pass_rate(&self) -> EngineResult<f64> {
        let tests = self.store.tests.list_enabled().await?;
        if tests.is_empty() {
            return Ok(100.0);
        }
        let mut passed = 0usize;
        for test in &tests {
            let executions = self
                .store
                .executions
                .list_for_migration(&test.migration_id)
                .await?;
            if executions
                .first()
                .map_or(false, |e| e.status == ExecutionStatus::Completed)
            {
                passed += 1;
            }
        }
        Ok(success_rate(passed, tests.len()))
    }

    /// Unacknowledged standing alerts, newest first
    pub async fn alerts(&self) -> EngineResult<Vec<MigrationAlert>> {
        self.store.alerts.unacknowledged().await
    }

    pub async fn acknowledge(&self, alert_id: Uuid) -> EngineResult<()> {
        if self.store.alerts.acknowledge(alert_id).await? {
            Ok(())
        } else {
            Err(EngineError::not_found(format!(
                "Alert '{}' not found",
                alert_id
            )))
        }
    }
}

fn count_status(executions: &[crate::model::MigrationExecution], status: ExecutionStatus) -> usize {
    executions.iter().filter(|e| e.status == status).count()
}

/// `round(successful / total * 100, 2)`, defined as 100 for an empty set
pub fn success_rate(successful: usize, total: usize) -> f64 {
    if total == 0 {
        return 100.0;
    }
    let rate = successful as f64 / total as f64 * 100.0;
    (rate * 100.0).round() / 100.0
}

/// Alternate serialization of the same analysis; no additional computation
pub fn render_html(analysis: &ReportAnalysis) -> String {
    use html_escape::encode_text;

    let mut failures = String::new();
    for failure in &analysis.recent_failures {
        failures.push_str(&format!(
            "<tr><td>{}</td><td>{}</td></tr>",
            encode_text(&failure.migration_id),
            encode_text(failure.error_message.as_deref().unwrap_or("-")),
        ));
    }
    if failures.is_empty() {
        failures = "<tr><td colspan=\"2\">none</td></tr>".to_string();
    }

    format!(
        "<!DOCTYPE html>\n<html>\n<head><title>Migration Report</title></head>\n<body>\n\
         <h1>Migration Report - last {period} days</h1>\n\
         <p>Generated at {generated}</p>\n\
         <table border=\"1\">\n\
         <tr><th>Registered migrations</th><td>{migrations}</td></tr>\n\
         <tr><th>Executions</th><td>{total} (completed {completed}, failed {failed}, running {running})</td></tr>\n\
         <tr><th>Test pass rate</th><td>{tests:.2}%</td></tr>\n\
         <tr><th>Deployment success rate</th><td>{deploys:.2}%</td></tr>\n\
         </table>\n\
         <h2>Recent failures</h2>\n\
         <table border=\"1\"><tr><th>Migration</th><th>Error</th></tr>{failures}</table>\n\
         </body>\n</html>\n",
        period = analysis.period_days,
        generated = analysis.generated_at.format("%Y-%m-%d %H:%M:%S UTC"),
        migrations = analysis.total_migrations,
        total = analysis.executions.total,
        completed = analysis.executions.completed,
        failed = analysis.executions.failed,
        running = analysis.executions.running,
        tests = analysis.test_pass_rate,
        deploys = analysis.deployment_success_rate,
        failures = failures,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::ScriptedSqlRunner;
    use crate::model::MigrationExecution;

    fn finished_execution(migration_id: &str, status: ExecutionStatus) -> MigrationExecution {
        MigrationExecution {
            id: Uuid::new_v4(),
            migration_id: migration_id.to_string(),
            start_time: Utc::now(),
            end_time: Some(Utc::now()),
            status,
            executor: "tests".into(),
            environment: "testing".into(),
            result: None,
            error_message: Some("boom".into()).filter(|_| status == ExecutionStatus::Failed),
        }
    }

    async fn seed_executions(store: &Store, completed: usize, failed: usize) {
        for i in 0..completed {
            store
                .executions
                .insert_running(&finished_execution(&format!("c{}", i), ExecutionStatus::Completed), true)
                .await
                .unwrap();
        }
        for i in 0..failed {
            store
                .executions
                .insert_running(&finished_execution(&format!("f{}", i), ExecutionStatus::Failed), true)
                .await
                .unwrap();
        }
    }

    #[test]
    fn success_rate_of_empty_set_is_vacuously_100() {
        assert_eq!(success_rate(0, 0), 100.0);
        assert_eq!(success_rate(1, 3), 33.33);
    }

    #[tokio::test]
    async fn low_success_rate_penalizes_twenty_points() {
        let store = Store::in_memory();
        // 47 of 50 succeeded: 94%, below the 95% threshold
        seed_executions(&store, 47, 3).await;
        let service = HealthService::new(store, Arc::new(ScriptedSqlRunner::new()));

        let report = service.health().await.unwrap();
        assert_eq!(report.health_score, 80);
        assert_eq!(report.status, HealthStatus::Healthy);
        assert!(report.issues[0].contains("94.00%"));
    }

    #[tokio::test]
    async fn healthy_system_scores_100() {
        let store = Store::in_memory();
        seed_executions(&store, 20, 0).await;
        let service = HealthService::new(store, Arc::new(ScriptedSqlRunner::new()));

        let report = service.health().await.unwrap();
        assert_eq!(report.health_score, 100);
        assert!(report.issues.is_empty());
    }

    #[tokio::test]
    async fn probe_failure_and_critical_alert_stack_penalties() {
        let store = Store::in_memory();
        seed_executions(&store, 1, 1).await; // 50% success rate
        store
            .alerts
            .insert(&MigrationAlert {
                id: Uuid::new_v4(),
                severity: AlertSeverity::Critical,
                message: "rollback failed".into(),
                created_at: Utc::now(),
                acknowledged: false,
            })
            .await
            .unwrap();
        let runner = Arc::new(ScriptedSqlRunner::new());
        runner.set_unhealthy();
        let service = HealthService::new(store, runner);

        let report = service.health().await.unwrap();
        assert_eq!(report.health_score, 25);
        assert_eq!(report.status, HealthStatus::Critical);
        assert_eq!(report.issues.len(), 3);
    }

    #[tokio::test]
    async fn acknowledged_critical_alert_carries_no_penalty() {
        let store = Store::in_memory();
        let alert_id = Uuid::new_v4();
        store
            .alerts
            .insert(&MigrationAlert {
                id: alert_id,
                severity: AlertSeverity::Critical,
                message: "old incident".into(),
                created_at: Utc::now(),
                acknowledged: false,
            })
            .await
            .unwrap();
        let service = HealthService::new(store, Arc::new(ScriptedSqlRunner::new()));

        service.acknowledge(alert_id).await.unwrap();
        let report = service.health().await.unwrap();
        assert_eq!(report.health_score, 100);

        assert!(matches!(
            service.acknowledge(Uuid::new_v4()).await,
            Err(EngineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn report_counts_window_and_renders_html() {
        let store = Store::in_memory();
        seed_executions(&store, 3, 1).await;
        let service = HealthService::new(store, Arc::new(ScriptedSqlRunner::new()));

        let analysis = service.report(7).await.unwrap();
        assert_eq!(analysis.executions.total, 4);
        assert_eq!(analysis.executions.completed, 3);
        assert_eq!(analysis.executions.failed, 1);
        assert_eq!(analysis.deployment_success_rate, 75.0);
        // no enabled tests registered: vacuously 100
        assert_eq!(analysis.test_pass_rate, 100.0);
        assert_eq!(analysis.recent_failures.len(), 1);

        let html = render_html(&analysis);
        assert!(html.contains("<h1>Migration Report - last 7 days</h1>"));
        assert!(html.contains("75.00%"));
        assert!(html.contains("boom"));
    }
}
