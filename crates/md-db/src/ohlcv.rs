//! Reads and upserts against `ohlcv_data`, plus per-ingest quality
//! reporting. The validation-reject-but-keep-going shape and the
//! `ON CONFLICT ... RETURNING (xmax = 0)` upsert idiom are carried over
//! from this workspace's existing market-data ingest path; the price
//! columns here are `double precision`, not integer micros, per the
//! float64 `OHLCVBar` data model.

use std::collections::HashMap;

use anyhow::{Context, Result};
use md_schemas::OHLCVBar;
use serde::Serialize;
use sqlx::{PgPool, Row};

#[derive(Debug, Clone)]
pub struct OhlcvBarRow {
    pub symbol: String,
    pub timeframe: String,
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl OhlcvBarRow {
    pub fn bar(&self) -> OHLCVBar {
        OHLCVBar::new(self.timestamp, self.open, self.high, self.low, self.close, self.volume)
    }
}

#[derive(Debug, Clone)]
pub struct FetchBarsArgs {
    pub market: String,
    pub provider: String,
    pub symbols: Vec<String>,
    pub timeframe: String,
    pub since_ts: Option<i64>,
    pub before_ts: Option<i64>,
    pub limit: Option<i64>,
}

/// Returns rows ordered `(symbol ASC, timestamp ASC)`, matching the
/// ordering a caller iterating multiple symbols in one chart expects.
pub async fn fetch_ohlcv_bars(pool: &PgPool, args: &FetchBarsArgs) -> Result<Vec<OhlcvBarRow>> {
    let rows = sqlx::query(
        r#"
        select symbol, timeframe, timestamp, open, high, low, close, volume
        from ohlcv_data
        where market = $1
          and provider = $2
          and timeframe = $3
          and symbol = any($4)
          and ($5::bigint is null or timestamp >= $5)
          and ($6::bigint is null or timestamp < $6)
        order by symbol asc, timestamp asc
        limit $7
        "#,
    )
    .bind(&args.market)
    .bind(&args.provider)
    .bind(&args.timeframe)
    .bind(&args.symbols)
    .bind(args.since_ts)
    .bind(args.before_ts)
    .bind(args.limit.unwrap_or(i64::MAX))
    .fetch_all(pool)
    .await
    .context("fetch_ohlcv_bars query failed")?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(OhlcvBarRow {
            symbol: row.try_get("symbol")?,
            timeframe: row.try_get("timeframe")?,
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

#[derive(Debug, Clone, Default)]
pub struct GapCheck {
    pub min_stored_ts: Option<i64>,
}

/// `MIN(timestamp)` of stored 1m bars for an asset, the input to the
/// backfill manager's gap-detection formula.
pub async fn gap_check(pool: &PgPool, market: &str, provider: &str, symbol: &str) -> Result<GapCheck> {
    let row: (Option<i64>,) = sqlx::query_as(
        r#"
        select min(timestamp)
        from ohlcv_data
        where market = $1 and provider = $2 and symbol = $3 and timeframe = '1m'
        "#,
    )
    .bind(market)
    .bind(provider)
    .bind(symbol)
    .fetch_one(pool)
    .await
    .context("gap_check query failed")?;

    Ok(GapCheck { min_stored_ts: row.0 })
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct QualityReport {
    pub total_bars: usize,
    pub inserted: usize,
    pub updated: usize,
    pub rejected_duplicate_in_batch: usize,
    pub rejected_out_of_order: usize,
    pub rejected_ohlc_sanity: usize,
    pub rejected_negative_volume: usize,
    pub rejected_non_finite: usize,
}

#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub report: QualityReport,
}

/// Validates then upserts a batch of bars for a single `(market, provider,
/// symbol, timeframe)`. Invalid rows are rejected and counted by category;
/// the batch is never aborted wholesale because of a few bad rows, matching
/// this workspace's existing ingest contract.
pub async fn ingest_bars(
    pool: &PgPool,
    market: &str,
    provider: &str,
    symbol: &str,
    timeframe: &str,
    bars: &[OHLCVBar],
) -> Result<IngestOutcome> {
    let mut report = QualityReport { total_bars: bars.len(), ..Default::default() };
    let mut seen_in_batch: HashMap<i64, ()> = HashMap::new();
    let mut last_ts: Option<i64> = None;
    let mut valid: Vec<&OHLCVBar> = Vec::with_capacity(bars.len());

    for bar in bars {
        if !bar.is_finite() {
            report.rejected_non_finite += 1;
            continue;
        }
        if bar.volume < 0.0 {
            report.rejected_negative_volume += 1;
            continue;
        }
        if !bar.is_sane() {
            report.rejected_ohlc_sanity += 1;
            continue;
        }
        if seen_in_batch.insert(bar.timestamp, ()).is_some() {
            report.rejected_duplicate_in_batch += 1;
            continue;
        }
        if let Some(prev) = last_ts {
            if bar.timestamp <= prev {
                report.rejected_out_of_order += 1;
                continue;
            }
        }
        last_ts = Some(bar.timestamp);
        valid.push(bar);
    }

    for bar in valid {
        let inserted: (bool,) = sqlx::query_as(
            r#"
            insert into ohlcv_data
                (market, provider, symbol, timeframe, timestamp, open, high, low, close, volume, updated_at_utc)
            values
                ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, now())
            on conflict (market, provider, symbol, timeframe, timestamp) do update
                set open = excluded.open,
                    high = excluded.high,
                    low = excluded.low,
                    close = excluded.close,
                    volume = excluded.volume,
                    updated_at_utc = now()
            returning (xmax = 0) as inserted
            "#,
        )
        .bind(market)
        .bind(provider)
        .bind(symbol)
        .bind(timeframe)
        .bind(bar.timestamp)
        .bind(bar.open)
        .bind(bar.high)
        .bind(bar.low)
        .bind(bar.close)
        .bind(bar.volume)
        .fetch_one(pool)
        .await
        .context("ohlcv_data upsert failed")?;

        if inserted.0 {
            report.inserted += 1;
        } else {
            report.updated += 1;
        }
    }

    sqlx::query(
        r#"
        insert into md_quality_reports (market, provider, symbol, timeframe, stats_json)
        values ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(market)
    .bind(provider)
    .bind(symbol)
    .bind(timeframe)
    .bind(serde_json::to_value(&report).context("quality report serialization failed")?)
    .execute(pool)
    .await
    .context("md_quality_reports insert failed")?;

    Ok(IngestOutcome { report })
}

/// Distinct symbols stored for `(market, provider)`, backing `GET
/// /symbols`. Sourced from `ohlcv_data` rather than a plugin's own
/// `get_symbols` (not every `Plugin` implementation supports that
/// feature, e.g. [`crate`]'s reference HTTP plugin).
pub async fn distinct_symbols(pool: &PgPool, market: &str, provider: &str) -> Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        r#"
        select distinct symbol
        from ohlcv_data
        where market = $1 and provider = $2
        order by symbol asc
        "#,
    )
    .bind(market)
    .bind(provider)
    .fetch_all(pool)
    .await
    .context("distinct_symbols query failed")?;

    Ok(rows.into_iter().map(|(s,)| s).collect())
}

/// Distinct providers stored for `market`, backing `GET /providers`.
pub async fn distinct_providers(pool: &PgPool, market: &str) -> Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        r#"
        select distinct provider
        from ohlcv_data
        where market = $1
        order by provider asc
        "#,
    )
    .bind(market)
    .fetch_all(pool)
    .await
    .context("distinct_providers query failed")?;

    Ok(rows.into_iter().map(|(p,)| p).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_report_starts_empty() {
        let report = QualityReport::default();
        assert_eq!(report.inserted, 0);
        assert_eq!(report.rejected_duplicate_in_batch, 0);
    }
}
