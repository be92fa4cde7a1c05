//! Reads bars for non-1m timeframes from precomputed continuous
//! aggregates. A failed config load is cached as "nothing configured"
//! rather than retried on every request, matching the original's
//! class-level cache.

use std::collections::HashMap;

use async_trait::async_trait;
use md_schemas::{OHLCVBar, Timeframe};
use sqlx::PgPool;
use tokio::sync::OnceCell;
use tracing::warn;

use crate::source::DataSource;

pub struct AggregateViewSource {
    pool: PgPool,
    views: OnceCell<HashMap<String, String>>,
}

impl AggregateViewSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool, views: OnceCell::new() }
    }

    async fn view_for(&self, timeframe_str: &str) -> Option<String> {
        let views = self
            .views
            .get_or_init(|| async {
                match md_db::load_active_views(&self.pool).await {
                    Ok(configs) => configs.into_iter().map(|c| (c.target_timeframe, c.view_name)).collect(),
                    Err(err) => {
                        warn!(%err, "failed to load active view configuration, caching as empty");
                        HashMap::new()
                    }
                }
            })
            .await;
        views.get(timeframe_str).cloned()
    }
}

#[async_trait]
impl DataSource for AggregateViewSource {
    fn name(&self) -> &'static str {
        "aggregate_view"
    }

    fn supports(&self, timeframe: Timeframe) -> bool {
        !timeframe.is_one_minute()
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
        if timeframe.is_one_minute() {
            return Ok(Vec::new());
        }
        let Some(view_name) = self.view_for(&timeframe.to_string()).await else {
            return Ok(Vec::new());
        };
        let rows = md_db::fetch_from_view(&self.pool, &view_name, market, provider, symbol, since, before, limit as i64).await?;
        Ok(rows.into_iter().map(|r| r.bar()).collect())
    }
}
