use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use md_plugin::{Capabilities, FetchHistoricalArgs, Plugin, PluginError, FEATURE_FETCH_HISTORICAL_OHLCV, FEATURE_VALIDATE_SYMBOL};
use md_schemas::OHLCVBar;

/// A `Plugin` backed by a fixed in-memory bar universe instead of a
/// network call, plus an optional countdown of forced transient
/// failures, for tests that need to observe retry and backoff behavior
/// deterministically rather than against a live provider.
pub struct ScriptedPlugin {
    universe: Vec<OHLCVBar>,
    max_fetch_limit: u32,
    supported_timeframes: Vec<&'static str>,
    capabilities: Capabilities,
    forced_failures: AtomicUsize,
    calls: AtomicUsize,
}

impl ScriptedPlugin {
    pub fn new(universe: Vec<OHLCVBar>) -> Self {
        Self {
            universe,
            max_fetch_limit: 500,
            supported_timeframes: vec!["1m"],
            capabilities: Capabilities::new().with(FEATURE_FETCH_HISTORICAL_OHLCV, true).with(FEATURE_VALIDATE_SYMBOL, true),
            forced_failures: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_max_fetch_limit(mut self, limit: u32) -> Self {
        self.max_fetch_limit = limit;
        self
    }

    pub fn with_supported_timeframes(mut self, timeframes: Vec<&'static str>) -> Self {
        self.supported_timeframes = timeframes;
        self
    }

    /// The next `n` calls to `fetch_historical_ohlcv` return
    /// `PluginError::Network` instead of consulting the bar universe.
    pub fn with_forced_failures(self, n: usize) -> Self {
        self.forced_failures.store(n, Ordering::SeqCst);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Plugin for ScriptedPlugin {
    fn plugin_key(&self) -> &'static str {
        "scripted"
    }

    async fn get_symbols(&self, _market: &str) -> Result<Vec<String>, PluginError> {
        Ok(Vec::new())
    }

    async fn get_market_info(&self, _symbol: &str) -> Result<Option<serde_json::Value>, PluginError> {
        Ok(None)
    }

    async fn fetch_historical_ohlcv(&self, args: FetchHistoricalArgs) -> Result<Vec<OHLCVBar>, PluginError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let mut remaining = self.forced_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            remaining -= 1;
            self.forced_failures.store(remaining, Ordering::SeqCst);
            return Err(PluginError::Network("scripted transient failure".to_string()));
        }

        let mut bars: Vec<OHLCVBar> = self
            .universe
            .iter()
            .copied()
            .filter(|b| args.since.map(|s| b.timestamp >= s).unwrap_or(true))
            .filter(|b| args.until.map(|u| b.timestamp <= u).unwrap_or(true))
            .collect();
        bars.sort_by_key(|b| b.timestamp);
        if let Some(limit) = args.limit {
            bars.truncate(limit as usize);
        }
        Ok(bars)
    }

    async fn fetch_latest_ohlcv(&self, symbol: &str, timeframe_str: &str) -> Result<Option<OHLCVBar>, PluginError> {
        let args = FetchHistoricalArgs { symbol: symbol.to_string(), timeframe_str: timeframe_str.to_string(), since: None, until: None, limit: None };
        let bars = self.fetch_historical_ohlcv(args).await?;
        Ok(bars.into_iter().last())
    }

    async fn validate_symbol(&self, _symbol: &str) -> Result<bool, PluginError> {
        Ok(true)
    }

    fn get_supported_timeframes(&self) -> Vec<&'static str> {
        self.supported_timeframes.clone()
    }

    fn get_max_fetch_limit(&self, _timeframe_str: &str) -> u32 {
        self.max_fetch_limit
    }

    fn supported_features(&self) -> &Capabilities {
        &self.capabilities
    }

    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bars::sequential_1m_bars;

    #[tokio::test]
    async fn returns_bars_within_range() {
        let plugin = ScriptedPlugin::new(sequential_1m_bars(0, 10, 1.0));
        let args = FetchHistoricalArgs { symbol: "X".into(), timeframe_str: "1m".into(), since: Some(3 * 60_000), until: None, limit: Some(2) };
        let bars = plugin.fetch_historical_ohlcv(args).await.unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].timestamp, 3 * 60_000);
    }

    #[tokio::test]
    async fn forced_failures_are_consumed_then_succeed() {
        let plugin = ScriptedPlugin::new(sequential_1m_bars(0, 3, 1.0)).with_forced_failures(1);
        let args = FetchHistoricalArgs { symbol: "X".into(), timeframe_str: "1m".into(), since: None, until: None, limit: None };
        let first = plugin.fetch_historical_ohlcv(args.clone()).await;
        assert!(matches!(first, Err(PluginError::Network(_))));
        let second = plugin.fetch_historical_ohlcv(args).await;
        assert!(second.is_ok());
        assert_eq!(plugin.call_count(), 2);
    }
}
