//! The normalized provider contract. A `Plugin` wraps one specific
//! exchange/vendor behind a fixed set of operations; callers never see
//! the provider's own wire format.

mod error;
mod http_plugin;

pub use error::PluginError;
pub use http_plugin::HttpOhlcvPlugin;

use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use md_schemas::OHLCVBar;
use tokio::sync::Mutex;

/// `(value, monotonic expiry)` pair, per this workspace's ad-hoc
/// per-plugin cache convention: never shared across plugin instances,
/// always behind a mutex local to the owning instance.
pub struct AdHocCache<T> {
    inner: Mutex<Option<(T, Instant)>>,
}

impl<T: Clone> AdHocCache<T> {
    pub fn new() -> Self {
        Self { inner: Mutex::new(None) }
    }

    pub async fn get_or_refresh<F, Fut>(&self, ttl: std::time::Duration, refresh: F) -> Result<T, PluginError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, PluginError>>,
    {
        let mut guard = self.inner.lock().await;
        if let Some((value, expiry)) = guard.as_ref() {
            if Instant::now() < *expiry {
                return Ok(value.clone());
            }
        }
        let value = refresh().await?;
        *guard = Some((value.clone(), Instant::now() + ttl));
        Ok(value)
    }
}

impl<T: Clone> Default for AdHocCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Feature flags a plugin instance declares support for, consumed by
/// `PluginSource` and the backfill manager to decide whether to attempt a
/// native-timeframe fetch or degrade to 1m.
#[derive(Debug, Clone, Default)]
pub struct Capabilities(HashMap<&'static str, bool>);

impl Capabilities {
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    pub fn with(mut self, feature: &'static str, supported: bool) -> Self {
        self.0.insert(feature, supported);
        self
    }

    pub fn supports(&self, feature: &str) -> bool {
        self.0.get(feature).copied().unwrap_or(false)
    }
}

pub const FEATURE_FETCH_HISTORICAL_OHLCV: &str = "fetch_historical_ohlcv";
pub const FEATURE_GET_MARKET_INFO: &str = "get_market_info";
pub const FEATURE_VALIDATE_SYMBOL: &str = "validate_symbol";
pub const FEATURE_TRADING_API: &str = "trading_api";

#[derive(Debug, Clone)]
pub struct FetchHistoricalArgs {
    pub symbol: String,
    pub timeframe_str: String,
    pub since: Option<i64>,
    pub until: Option<i64>,
    pub limit: Option<u32>,
}

/// The normalized provider contract. Object-safe via
/// `async_trait`, so callers hold `Arc<dyn Plugin>` without knowing the
/// concrete provider type. A plugin instance is constructed once with its
/// credentials and reused for the lifetime of its owning service.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn plugin_key(&self) -> &'static str;

    async fn get_symbols(&self, market: &str) -> Result<Vec<String>, PluginError>;

    /// Provider-specific metadata for `symbol` (e.g. tick size, trading
    /// hours), or `None` if the provider has nothing to report. A plugin
    /// that doesn't expose this at all returns `FeatureNotSupported`.
    async fn get_market_info(&self, symbol: &str) -> Result<Option<serde_json::Value>, PluginError>;

    /// Returns bars sorted oldest-first. `limit` is an upper bound; fewer
    /// bars may come back. The caller resamples afterward if the plugin
    /// does not natively support the requested timeframe.
    async fn fetch_historical_ohlcv(&self, args: FetchHistoricalArgs) -> Result<Vec<OHLCVBar>, PluginError>;

    /// The most recent **completed** bar, or `None` if unavailable.
    async fn fetch_latest_ohlcv(&self, symbol: &str, timeframe_str: &str) -> Result<Option<OHLCVBar>, PluginError>;

    async fn validate_symbol(&self, symbol: &str) -> Result<bool, PluginError>;

    fn get_supported_timeframes(&self) -> Vec<&'static str>;

    fn get_max_fetch_limit(&self, timeframe_str: &str) -> u32;

    fn supported_features(&self) -> &Capabilities;

    /// Idempotent resource release; a second call must be a no-op.
    async fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capabilities_default_to_unsupported() {
        let caps = Capabilities::new().with(FEATURE_TRADING_API, false);
        assert!(!caps.supports(FEATURE_TRADING_API));
        assert!(!caps.supports("never_declared"));
    }

    #[tokio::test]
    async fn ad_hoc_cache_refreshes_once_per_ttl() {
        let cache: AdHocCache<u32> = AdHocCache::new();
        let mut calls = 0;
        let first = cache
            .get_or_refresh(std::time::Duration::from_secs(60), || {
                calls += 1;
                async { Ok(1u32) }
            })
            .await
            .unwrap();
        let second = cache
            .get_or_refresh(std::time::Duration::from_secs(60), || {
                calls += 1;
                async { Ok(2u32) }
            })
            .await
            .unwrap();
        assert_eq!(first, 1);
        assert_eq!(second, 1, "second call should be served from cache, not refreshed");
        assert_eq!(calls, 1);
    }
}
