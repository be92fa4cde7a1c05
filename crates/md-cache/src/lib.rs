//! In-process bar cache: a short-lived window of 1m bars per asset, plus
//! resampled results for non-1m timeframes. Both namespaces are
//! best-effort; a cache failure degrades to a miss, never a user-facing
//! error.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use md_schemas::{AssetKey, OHLCVBar};
use tokio::sync::RwLock;
use tracing::warn;

/// `(market, provider, symbol)`, the 1m-group cache key. Distinct from
/// [`AssetKey`] because the 1m namespace is timeframe-independent: every
/// resampled view for an asset is built from the same 1m window.
pub type AssetTriple = (String, String, String);

fn coerce_bar(bar: OHLCVBar) -> OHLCVBar {
    if bar.is_finite() {
        bar
    } else {
        warn!(timestamp = bar.timestamp, "coercing non-finite bar fields to 0.0 before caching");
        bar.normalized()
    }
}

/// Normalizes a batch before it enters the cache: non-finite numerics
/// become `0.0`, matching the resampler's malformed-bar handling so a bar
/// that entered the cache can never fail a later sanity check because of
/// `NaN`/`Inf`.
pub fn normalize_for_cache(bars: &[OHLCVBar]) -> Vec<OHLCVBar> {
    bars.iter().copied().map(coerce_bar).collect()
}

#[async_trait]
pub trait Cache: Send + Sync {
    async fn get_1m(&self, key: &AssetTriple, since: Option<i64>, before: Option<i64>, limit: Option<usize>) -> Option<Vec<OHLCVBar>>;

    async fn store_1m(&self, key: &AssetTriple, bars: &[OHLCVBar]);

    async fn get_resampled(&self, key: &AssetKey) -> Option<Vec<OHLCVBar>>;

    async fn set_resampled(&self, key: &AssetKey, bars: &[OHLCVBar], ttl: Duration);
}

struct Entry {
    bars: Vec<OHLCVBar>,
    expiry: Instant,
}

impl Entry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expiry
    }
}

/// The reference in-process implementation: two `RwLock`-guarded maps.
/// Expired entries are detected lazily on read rather than swept by a
/// background task; the per-asset bar lists here are small enough that a
/// sweep would be pure overhead.
pub struct InMemoryCache {
    one_minute_ttl: Duration,
    resampled_ttl: Duration,
    one_minute: RwLock<HashMap<AssetTriple, Entry>>,
    resampled: RwLock<HashMap<AssetKey, Entry>>,
}

impl InMemoryCache {
    pub fn new(one_minute_ttl: Duration, resampled_ttl: Duration) -> Self {
        Self {
            one_minute_ttl,
            resampled_ttl,
            one_minute: RwLock::new(HashMap::new()),
            resampled: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_config(cfg: &md_config::PipelineConfig) -> Self {
        Self::new(
            Duration::from_secs(cfg.cache_ttl_1m_bar_group_sec),
            Duration::from_secs(cfg.cache_ttl_resampled_bars_sec),
        )
    }

    fn filter(bars: &[OHLCVBar], since: Option<i64>, before: Option<i64>, limit: Option<usize>) -> Vec<OHLCVBar> {
        let mut out: Vec<OHLCVBar> = bars
            .iter()
            .copied()
            .filter(|bar| since.map(|s| bar.timestamp >= s).unwrap_or(true))
            .filter(|bar| before.map(|b| bar.timestamp < b).unwrap_or(true))
            .collect();
        if let Some(limit) = limit {
            if since.is_some() {
                out.truncate(limit);
            } else if out.len() > limit {
                out = out.split_off(out.len() - limit);
            }
        }
        out
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get_1m(&self, key: &AssetTriple, since: Option<i64>, before: Option<i64>, limit: Option<usize>) -> Option<Vec<OHLCVBar>> {
        let guard = self.one_minute.read().await;
        let entry = guard.get(key)?;
        if entry.is_expired() {
            return None;
        }
        Some(Self::filter(&entry.bars, since, before, limit))
    }

    async fn store_1m(&self, key: &AssetTriple, bars: &[OHLCVBar]) {
        let normalized = normalize_for_cache(bars);
        let mut guard = self.one_minute.write().await;
        guard.insert(key.clone(), Entry { bars: normalized, expiry: Instant::now() + self.one_minute_ttl });
    }

    async fn get_resampled(&self, key: &AssetKey) -> Option<Vec<OHLCVBar>> {
        let guard = self.resampled.read().await;
        let entry = guard.get(key)?;
        if entry.is_expired() {
            return None;
        }
        Some(entry.bars.clone())
    }

    async fn set_resampled(&self, key: &AssetKey, bars: &[OHLCVBar], ttl: Duration) {
        let normalized = normalize_for_cache(bars);
        let mut guard = self.resampled.write().await;
        guard.insert(key.clone(), Entry { bars: normalized, expiry: Instant::now() + ttl });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use md_schemas::Timeframe;

    fn triple() -> AssetTriple {
        ("crypto".into(), "testvenue".into(), "BTCUSD".into())
    }

    #[tokio::test]
    async fn store_then_get_round_trips() {
        let cache = InMemoryCache::new(Duration::from_secs(60), Duration::from_secs(60));
        let bars = vec![OHLCVBar::new(0, 1.0, 1.0, 1.0, 1.0, 1.0), OHLCVBar::new(60_000, 1.0, 1.0, 1.0, 1.0, 1.0)];
        cache.store_1m(&triple(), &bars).await;
        let got = cache.get_1m(&triple(), None, None, None).await.unwrap();
        assert_eq!(got.len(), 2);
    }

    #[tokio::test]
    async fn expired_entry_is_a_miss() {
        let cache = InMemoryCache::new(Duration::from_millis(1), Duration::from_secs(60));
        cache.store_1m(&triple(), &[OHLCVBar::new(0, 1.0, 1.0, 1.0, 1.0, 1.0)]).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(cache.get_1m(&triple(), None, None, None).await.is_none());
    }

    #[tokio::test]
    async fn limit_without_since_keeps_newest() {
        let cache = InMemoryCache::new(Duration::from_secs(60), Duration::from_secs(60));
        let bars: Vec<_> = (0..5).map(|i| OHLCVBar::new(i * 60_000, 1.0, 1.0, 1.0, 1.0, 1.0)).collect();
        cache.store_1m(&triple(), &bars).await;
        let got = cache.get_1m(&triple(), None, None, Some(2)).await.unwrap();
        assert_eq!(got.iter().map(|b| b.timestamp).collect::<Vec<_>>(), vec![3 * 60_000, 4 * 60_000]);
    }

    #[tokio::test]
    async fn non_finite_bars_are_coerced_on_store() {
        let cache = InMemoryCache::new(Duration::from_secs(60), Duration::from_secs(60));
        cache.store_1m(&triple(), &[OHLCVBar::new(0, f64::NAN, 1.0, 1.0, 1.0, 1.0)]).await;
        let got = cache.get_1m(&triple(), None, None, None).await.unwrap();
        assert_eq!(got[0].open, 0.0);
    }

    #[tokio::test]
    async fn resampled_namespace_is_keyed_by_timeframe() {
        let cache = InMemoryCache::new(Duration::from_secs(60), Duration::from_secs(60));
        let key_5m = AssetKey::new("crypto", "testvenue", "BTCUSD", "5m".parse::<Timeframe>().unwrap());
        assert!(cache.get_resampled(&key_5m).await.is_none());
        cache.set_resampled(&key_5m, &[OHLCVBar::new(0, 1.0, 1.0, 1.0, 1.0, 1.0)], Duration::from_secs(30)).await;
        assert_eq!(cache.get_resampled(&key_5m).await.unwrap().len(), 1);
    }
}
