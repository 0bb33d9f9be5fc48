//! Route table and handlers
//!
//! A thin adapter: each handler deserializes the request, calls one engine
//! operation and serializes the result. Request bodies accept both snake_case
//! and the dashboard's camelCase field spellings.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use schemaflow_engine::{
    health::render_html, CleanupOptions, Engine, ExecuteOptions, ExecutionStatus, ListFilter,
    NewMigration, RiskLevel, RollbackOptions,
};

use crate::error::{ApiError, ApiResult};

pub type AppState = Arc<Engine>;

/// Build the migration API router
pub fn router(engine: AppState) -> Router {
    Router::new()
        .route("/api/migrations", get(list_migrations).post(register_migration))
        .route("/api/migrations/health", get(health))
        .route("/api/migrations/report", get(report))
        .route("/api/migrations/alerts", get(list_alerts))
        .route("/api/migrations/alerts/:id/acknowledge", post(acknowledge_alert))
        .route("/api/migrations/validate", post(validate))
        .route("/api/migrations/batch", post(execute_batch))
        .route("/api/migrations/rollback", post(rollback))
        .route("/api/migrations/cleanup", post(cleanup))
        .route("/api/migrations/execute/:id", post(execute))
        .route("/api/migrations/:id", get(get_migration))
        .with_state(engine)
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    batch: Option<String>,
    risk_level: Option<String>,
    status: Option<String>,
    limit: Option<usize>,
}

async fn list_migrations(
    State(engine): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<impl IntoResponse> {
    let filter = ListFilter {
        batch: query.batch,
        risk_level: query
            .risk_level
            .as_deref()
            .map(str::parse::<RiskLevel>)
            .transpose()?,
        status: query
            .status
            .as_deref()
            .map(str::parse::<ExecutionStatus>)
            .transpose()?,
        limit: query.limit,
    };
    let migrations = engine.registry.list(&filter).await?;
    Ok(Json(migrations))
}

async fn register_migration(
    State(engine): State<AppState>,
    Json(body): Json<NewMigration>,
) -> ApiResult<impl IntoResponse> {
    let definition = engine.registry.register(body).await?;
    Ok((StatusCode::CREATED, Json(definition)))
}

async fn get_migration(
    State(engine): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let details = engine.registry.get(&id).await?;
    Ok(Json(details))
}

async fn execute(
    State(engine): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<ExecuteOptions>>,
) -> ApiResult<impl IntoResponse> {
    let options = body.map(|Json(options)| options).unwrap_or_default();
    let outcome = engine.executor.execute(&id, &options).await?;
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
struct BatchRequest {
    #[serde(alias = "migrationIds")]
    migration_ids: Vec<String>,
    #[serde(default)]
    options: Option<ExecuteOptions>,
}

async fn execute_batch(
    State(engine): State<AppState>,
    Json(body): Json<BatchRequest>,
) -> ApiResult<impl IntoResponse> {
    let options = body.options.unwrap_or_default();
    let report = engine.batch.execute_batch(&body.migration_ids, &options).await;
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
struct RollbackRequest {
    #[serde(alias = "migrationId")]
    migration_id: String,
    reason: Option<String>,
    #[serde(alias = "executedBy")]
    executed_by: Option<String>,
}

async fn rollback(
    State(engine): State<AppState>,
    Json(body): Json<RollbackRequest>,
) -> ApiResult<impl IntoResponse> {
    let mut options = RollbackOptions::default();
    if let Some(reason) = body.reason {
        options.reason = reason;
    }
    if let Some(executed_by) = body.executed_by {
        options.executed_by = executed_by;
    }
    let outcome = engine.rollback.rollback(&body.migration_id, &options).await?;
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
struct ValidateRequest {
    #[serde(alias = "migrationIds")]
    migration_ids: Vec<String>,
}

async fn validate(
    State(engine): State<AppState>,
    Json(body): Json<ValidateRequest>,
) -> ApiResult<impl IntoResponse> {
    let report = engine.validator.validate(&body.migration_ids).await?;
    Ok(Json(report))
}

async fn health(State(engine): State<AppState>) -> ApiResult<impl IntoResponse> {
    let report = engine.health.health().await?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
struct ReportQuery {
    period: Option<String>,
    format: Option<String>,
}

async fn report(
    State(engine): State<AppState>,
    Query(query): Query<ReportQuery>,
) -> ApiResult<Response> {
    let period_days = parse_period(query.period.as_deref().unwrap_or("7d"))?;
    let analysis = engine.health.report(period_days).await?;
    match query.format.as_deref() {
        Some("html") => Ok(Html(render_html(&analysis)).into_response()),
        None | Some("json") => Ok(Json(analysis).into_response()),
        Some(other) => Err(ApiError::bad_request(format!(
            "Unknown report format '{}': expected json or html",
            other
        ))),
    }
}

/// Accepts `7d`-style suffixed periods and plain day counts
fn parse_period(period: &str) -> ApiResult<i64> {
    let digits = period.strip_suffix('d').unwrap_or(period);
    let days: i64 = digits
        .parse()
        .map_err(|_| ApiError::bad_request(format!("Invalid report period '{}'", period)))?;
    if days <= 0 {
        return Err(ApiError::bad_request("Report period must be positive"));
    }
    Ok(days)
}

async fn cleanup(
    State(engine): State<AppState>,
    body: Option<Json<CleanupOptions>>,
) -> ApiResult<impl IntoResponse> {
    let options = body.map(|Json(options)| options).unwrap_or_default();
    let report = engine.cleanup.cleanup(&options).await;
    Ok(Json(report))
}

async fn list_alerts(State(engine): State<AppState>) -> ApiResult<impl IntoResponse> {
    let alerts = engine.health.alerts().await?;
    Ok(Json(alerts))
}

async fn acknowledge_alert(
    State(engine): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    engine.health.acknowledge(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
