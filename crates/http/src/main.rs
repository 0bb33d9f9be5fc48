use std::sync::Arc;

use clap::Parser;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use schemaflow_engine::{connect_pool, Engine, PgSqlRunner, PoolConfig, PostgresStore, Store};
use schemaflow_http::router;

#[derive(Parser)]
#[command(name = "schemaflow")]
#[command(about = "Schema migration orchestration service")]
struct Cli {
    /// Address to bind the HTTP listener on
    #[arg(long, default_value = "0.0.0.0:8080", env = "SCHEMAFLOW_BIND")]
    bind: String,

    /// PostgreSQL connection string
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Maximum connections in the database pool
    #[arg(long, default_value_t = 10)]
    max_connections: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let pool_config = PoolConfig {
        max_connections: cli.max_connections,
        ..PoolConfig::default()
    };
    let pool = connect_pool(&cli.database_url, &pool_config).await?;

    let postgres = PostgresStore::new(pool.clone());
    postgres.bootstrap().await?;
    let store = Store::postgres(postgres);
    let runner = Arc::new(PgSqlRunner::new(pool));
    let engine = Arc::new(Engine::new(store, runner));

    let app = router(engine)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&cli.bind).await?;
    tracing::info!(addr = %cli.bind, "schemaflow listening");
    axum::serve(listener, app).await?;

    Ok(())
}
