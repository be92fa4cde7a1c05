//! Loads the active continuous-aggregate view configuration
//! (`target_timeframe -> view_name`). The in-memory cache this feeds is
//! owned by `md-core`'s `AggregateViewSource`; this module only knows how
//! to query the table.

use anyhow::{Context, Result};
use sqlx::PgPool;

#[derive(Debug, Clone)]
pub struct ViewConfig {
    pub view_name: String,
    pub target_timeframe: String,
    pub base_timeframe: String,
}

/// Loads every row flagged `is_active = true`. A query failure is the
/// caller's to handle; per the design note this carries over from the
/// original aggregate source, a failed load should be cached as "no views
/// configured" rather than retried on every request.
pub async fn load_active_views(pool: &PgPool) -> Result<Vec<ViewConfig>> {
    let rows: Vec<(String, String, String)> = sqlx::query_as(
        r#"
        select view_name, target_timeframe, base_timeframe
        from preaggregation_configs
        where is_active = true
        "#,
    )
    .fetch_all(pool)
    .await
    .context("load_active_views query failed")?;

    Ok(rows
        .into_iter()
        .map(|(view_name, target_timeframe, base_timeframe)| ViewConfig { view_name, target_timeframe, base_timeframe })
        .collect())
}

/// Reads bars from a precomputed continuous-aggregate view by name. The
/// view name comes only from [`load_active_views`] (trusted, not
/// user-supplied), so interpolating it into the query text is safe; all
/// other predicates remain bound parameters.
pub async fn fetch_from_view(
    pool: &PgPool,
    view_name: &str,
    market: &str,
    provider: &str,
    symbol: &str,
    since_ts: Option<i64>,
    before_ts: i64,
    limit: i64,
) -> Result<Vec<crate::OhlcvBarRow>> {
    use sqlx::Row;

    let sql = format!(
        r#"
        select symbol, bucketed_time as timestamp, open, high, low, close, volume
        from {view_name}
        where market = $1 and provider = $2 and symbol = $3
          and ($4::bigint is null or bucketed_time >= $4)
          and bucketed_time < $5
        order by bucketed_time asc
        limit $6
        "#
    );

    let rows = sqlx::query(&sql)
        .bind(market)
        .bind(provider)
        .bind(symbol)
        .bind(since_ts)
        .bind(before_ts)
        .bind(limit)
        .fetch_all(pool)
        .await
        .context("fetch_from_view query failed")?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(crate::OhlcvBarRow {
            symbol: row.try_get("symbol")?,
            timeframe: String::new(),
            timestamp: row.try_get("timestamp")?,
            open: row.try_get("open")?,
            high: row.try_get("high")?,
            low: row.try_get("low")?,
            close: row.try_get("close")?,
            volume: row.try_get("volume")?,
        });
    }
    Ok(out)
}
