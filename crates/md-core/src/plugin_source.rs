//! Fetches directly from a provider plugin when neither the aggregate
//! view nor the cache/database tier has what's needed. Chunks backward
//! or forward depending on whether the caller supplied `since`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use md_cache::Cache;
use md_plugin::{FetchHistoricalArgs, Plugin};
use md_schemas::{OHLCVBar, Timeframe};
use sqlx::PgPool;
use tracing::warn;

use crate::resample::resample;
use crate::source::DataSource;

const MAX_CHUNKS: usize = 50;

pub struct PluginSource {
    plugin: Arc<dyn Plugin>,
    cache: Arc<dyn Cache>,
    pool: PgPool,
}

impl PluginSource {
    pub fn new(plugin: Arc<dyn Plugin>, cache: Arc<dyn Cache>, pool: PgPool) -> Self {
        Self { plugin, cache, pool }
    }

    async fn fetch_native(&self, symbol: &str, fetch_timeframe: Timeframe, since: Option<i64>, before: i64, needed: usize) -> anyhow::Result<Vec<OHLCVBar>> {
        let plugin_limit = (needed as u32).min(self.plugin.get_max_fetch_limit(&fetch_timeframe.to_string()));
        let mut merged: HashMap<i64, OHLCVBar> = HashMap::new();
        let mut cursor_since = since;
        let mut cursor_before = before;

        for _ in 0..MAX_CHUNKS {
            if merged.len() >= needed {
                break;
            }

            let args = FetchHistoricalArgs {
                symbol: symbol.to_string(),
                timeframe_str: fetch_timeframe.to_string(),
                since: cursor_since,
                until: if cursor_since.is_some() { None } else { Some(cursor_before) },
                limit: Some(plugin_limit),
            };

            let chunk = self
                .plugin
                .fetch_historical_ohlcv(args)
                .await
                .map_err(|err| anyhow::anyhow!("plugin chunk fetch failed: {err}"))?;

            if chunk.is_empty() {
                break;
            }
            let chunk_len = chunk.len();

            let mut oldest = i64::MAX;
            let mut newest = i64::MIN;
            for bar in &chunk {
                oldest = oldest.min(bar.timestamp);
                newest = newest.max(bar.timestamp);
                merged.entry(bar.timestamp).or_insert(*bar);
            }

            if (chunk_len as u32) < plugin_limit {
                break;
            }

            if cursor_since.is_some() {
                cursor_since = Some(newest + fetch_timeframe.period_ms());
            } else {
                let next_before = oldest;
                if next_before >= cursor_before {
                    break;
                }
                cursor_before = next_before;
            }
        }

        let mut bars: Vec<OHLCVBar> = merged.into_values().collect();
        bars.sort_by_key(|b| b.timestamp);
        Ok(bars)
    }
}

#[async_trait]
impl DataSource for PluginSource {
    fn name(&self) -> &'static str {
        "plugin"
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
        if !self.plugin.validate_symbol(symbol).await.unwrap_or(false) {
            warn!(%symbol, "symbol failed plugin validation, skipping plugin source");
            return Ok(Vec::new());
        }

        let native = self.plugin.get_supported_timeframes().iter().any(|tf| *tf == timeframe.to_string());
        let fetch_timeframe = if native { timeframe } else { Timeframe::ONE_MINUTE };

        let bars = self.fetch_native(symbol, fetch_timeframe, since, before, limit.max(1)).await?;

        if fetch_timeframe.is_one_minute() {
            let triple = (market.to_string(), provider.to_string(), symbol.to_string());
            let cache = self.cache.clone();
            let bars_for_cache = bars.clone();
            tokio::spawn(async move {
                cache.store_1m(&triple, &bars_for_cache).await;
            });

            let pool = self.pool.clone();
            let market = market.to_string();
            let provider = provider.to_string();
            let symbol = symbol.to_string();
            let bars_for_db = bars.clone();
            tokio::spawn(async move {
                if let Err(err) = md_db::ingest_bars(&pool, &market, &provider, &symbol, "1m", &bars_for_db).await {
                    warn!(%err, "best-effort db upsert from plugin source failed");
                }
            });
        }

        if fetch_timeframe != timeframe {
            Ok(resample(&bars, timeframe))
        } else {
            Ok(bars)
        }
    }
}
