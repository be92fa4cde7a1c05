//! The single read-path entry point for OHLCV data. Walks its sources in
//! priority order, merges, and dedups; never fails the whole request as
//! long as at least one source returned something.

use std::sync::Arc;

use md_schemas::{OHLCVBar, Timeframe};
use tracing::warn;

use crate::source::{dedup_by_timestamp_first_wins, filter_bars, DataSource};

pub struct DataOrchestrator {
    sources: Vec<Arc<dyn DataSource>>,
    default_limit: usize,
}

impl DataOrchestrator {
    /// `sources` must be given in priority order, most authoritative
    /// first: aggregate view, then cache, then plugin.
    pub fn new(sources: Vec<Arc<dyn DataSource>>, default_limit: usize) -> Self {
        Self { sources, default_limit }
    }

    pub async fn fetch(
        &self,
        market: &str,
        provider: &str,
        symbol: &str,
        timeframe: Timeframe,
        since: Option<i64>,
        before: Option<i64>,
        limit: Option<usize>,
        now_ms: i64,
    ) -> Vec<OHLCVBar> {
        let target = limit.unwrap_or(self.default_limit);
        let end = before.unwrap_or(now_ms);

        let mut collected = Vec::new();
        for source in &self.sources {
            if !source.supports(timeframe) {
                continue;
            }
            match source.fetch(market, provider, symbol, timeframe, since, end, target).await {
                Ok(bars) => {
                    let gained_new = !bars.is_empty();
                    collected.push(bars);
                    if since.is_none() && gained_new {
                        let unique_so_far = dedup_by_timestamp_first_wins(collected.iter().cloned()).len();
                        if unique_so_far >= target {
                            break;
                        }
                    }
                }
                Err(err) => {
                    warn!(source = source.name(), %err, "data source failed, skipping");
                }
            }
        }

        let merged = dedup_by_timestamp_first_wins(collected);
        filter_bars(merged, since, end, target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubSource {
        bars: Vec<OHLCVBar>,
        calls: AtomicUsize,
        fails: bool,
    }

    #[async_trait]
    impl DataSource for StubSource {
        fn name(&self) -> &'static str {
            "stub"
        }
        fn supports(&self, _timeframe: Timeframe) -> bool {
            true
        }
        async fn fetch(&self, _m: &str, _p: &str, _s: &str, _tf: Timeframe, _since: Option<i64>, _before: i64, _limit: usize) -> anyhow::Result<Vec<OHLCVBar>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fails {
                anyhow::bail!("stub failure");
            }
            Ok(self.bars.clone())
        }
    }

    fn bar(ts: i64, close: f64) -> OHLCVBar {
        OHLCVBar::new(ts, close, close, close, close, 1.0)
    }

    #[tokio::test]
    async fn earlier_source_wins_on_collision() {
        let high = Arc::new(StubSource { bars: vec![bar(100, 1.0)], calls: AtomicUsize::new(0), fails: false });
        let low = Arc::new(StubSource { bars: vec![bar(100, 99.0)], calls: AtomicUsize::new(0), fails: false });
        let orch = DataOrchestrator::new(vec![high, low], 200);
        let out = orch.fetch("crypto", "testvenue", "BTCUSD", Timeframe::ONE_MINUTE, None, None, None, 1_000_000).await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].close, 1.0);
    }

    #[tokio::test]
    async fn a_failing_source_does_not_fail_the_whole_request() {
        let failing = Arc::new(StubSource { bars: vec![], calls: AtomicUsize::new(0), fails: true });
        let working = Arc::new(StubSource { bars: vec![bar(100, 1.0)], calls: AtomicUsize::new(0), fails: false });
        let orch = DataOrchestrator::new(vec![failing, working], 200);
        let out = orch.fetch("crypto", "testvenue", "BTCUSD", Timeframe::ONE_MINUTE, None, None, None, 1_000_000).await;
        assert_eq!(out.len(), 1);
    }

    #[tokio::test]
    async fn all_sources_failing_returns_empty_not_error() {
        let a = Arc::new(StubSource { bars: vec![], calls: AtomicUsize::new(0), fails: true });
        let b = Arc::new(StubSource { bars: vec![], calls: AtomicUsize::new(0), fails: true });
        let orch = DataOrchestrator::new(vec![a, b], 200);
        let out = orch.fetch("crypto", "testvenue", "BTCUSD", Timeframe::ONE_MINUTE, None, None, None, 1_000_000).await;
        assert!(out.is_empty());
    }
}
