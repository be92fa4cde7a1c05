//! Postgres-backed persistence for OHLCV bars and the continuous-aggregate
//! view configuration.

pub mod ohlcv;
pub mod views;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

pub use ohlcv::{
    distinct_providers, distinct_symbols, fetch_ohlcv_bars, gap_check, ingest_bars, FetchBarsArgs,
    GapCheck, IngestOutcome, OhlcvBarRow, QualityReport,
};
pub use views::{fetch_from_view, load_active_views, ViewConfig};

pub const ENV_DB_URL: &str = "MD_DATABASE_URL";

/// Connects to Postgres using [`ENV_DB_URL`].
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .context("failed to connect to Postgres")?;
    Ok(pool)
}

/// Test helper: connect via [`ENV_DB_URL`] and ensure migrations are applied.
pub async fn testkit_db_pool() -> Result<PgPool> {
    let pool = connect_from_env().await?;
    migrate(&pool).await?;
    Ok(pool)
}

/// Runs the embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await.context("db migrate failed")?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_ohlcv_table: bool,
}

/// Connectivity + schema-presence check, consumed by the CLI's `db status`.
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as("select 1").fetch_one(pool).await.context("status connectivity query failed")?;

    let (exists,): (bool,) = sqlx::query_as(
        r#"
        select exists (
            select 1 from information_schema.tables
            where table_schema = 'public' and table_name = 'ohlcv_data'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus { ok: one == 1, has_ohlcv_table: exists })
}
