//! For `timeframe != 1m`: serve from the resampled cache when present.
//! On miss, or for `1m` itself, read the 1m window (cache, then database)
//! and resample on the way out, scheduling a best-effort cache fill.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use md_cache::Cache;
use md_schemas::{AssetKey, OHLCVBar, Timeframe};
use sqlx::PgPool;

use crate::resample::resample;
use crate::source::{filter_bars, DataSource};

const SAFETY_BARS: usize = 200;

pub struct CacheSource {
    cache: Arc<dyn Cache>,
    pool: PgPool,
    resampled_ttl: Duration,
}

impl CacheSource {
    pub fn new(cache: Arc<dyn Cache>, pool: PgPool, resampled_ttl: Duration) -> Self {
        Self { cache, pool, resampled_ttl }
    }

    fn limit_1m_for(target: Timeframe, limit: usize) -> usize {
        let ratio = (target.period_ms() / Timeframe::ONE_MINUTE.period_ms()).max(1) as usize;
        limit * ratio + ratio + SAFETY_BARS
    }

    async fn fetch_1m_window(&self, market: &str, provider: &str, symbol: &str, since: Option<i64>, before: i64, limit_1m: usize) -> anyhow::Result<Vec<OHLCVBar>> {
        let triple = (market.to_string(), provider.to_string(), symbol.to_string());
        if let Some(bars) = self.cache.get_1m(&triple, since, Some(before), Some(limit_1m)).await {
            return Ok(bars);
        }

        let rows = md_db::fetch_ohlcv_bars(
            &self.pool,
            &md_db::FetchBarsArgs {
                market: market.to_string(),
                provider: provider.to_string(),
                symbols: vec![symbol.to_string()],
                timeframe: "1m".to_string(),
                since_ts: since,
                before_ts: Some(before),
                limit: Some(limit_1m as i64),
            },
        )
        .await?;
        let bars: Vec<OHLCVBar> = rows.into_iter().map(|r| r.bar()).collect();
        self.cache.store_1m(&triple, &bars).await;
        Ok(bars)
    }
}

#[async_trait]
impl DataSource for CacheSource {
    fn name(&self) -> &'static str {
        "cache"
    }

    fn supports(&self, _timeframe: Timeframe) -> bool {
        true
    }

    async fn fetch(
        &self,
        market: &str,
        provider: &str,
        symbol: &str,
        timeframe: Timeframe,
        since: Option<i64>,
        before: i64,
        limit: usize,
    ) -> anyhow::Result<Vec<OHLCVBar>> {
        if !timeframe.is_one_minute() {
            let key = AssetKey::new(market, provider, symbol, timeframe);
            if let Some(cached) = self.cache.get_resampled(&key).await {
                return Ok(filter_bars(cached, since, before, limit));
            }
        }

        let limit_1m = if timeframe.is_one_minute() { limit } else { Self::limit_1m_for(timeframe, limit) };
        let since_1m = since.or_else(|| Some(before - limit_1m as i64 * Timeframe::ONE_MINUTE.period_ms()));
        let one_minute_bars = self.fetch_1m_window(market, provider, symbol, since_1m, before, limit_1m).await?;

        if timeframe.is_one_minute() {
            return Ok(filter_bars(one_minute_bars, since, before, limit));
        }

        let resampled = resample(&one_minute_bars, timeframe);
        let result = filter_bars(resampled.clone(), since, before, limit);

        let cache = self.cache.clone();
        let key = AssetKey::new(market, provider, symbol, timeframe);
        let ttl = self.resampled_ttl;
        tokio::spawn(async move {
            cache.set_resampled(&key, &resampled, ttl).await;
        });

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_1m_for_adds_ratio_and_safety_margin() {
        let limit = CacheSource::limit_1m_for("5m".parse().unwrap(), 10);
        assert_eq!(limit, 10 * 5 + 5 + SAFETY_BARS);
    }
}
