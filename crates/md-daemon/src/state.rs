//! Shared runtime state for md-daemon.
//!
//! One [`MarketService`] is built per configured `(market, provider)` pair
//! at startup and lives for the process lifetime: no per-user or per-
//! request plugin instances. `AppState` is the `Arc`-wrapped handle every
//! Axum handler receives via `State`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use md_cache::{Cache, InMemoryCache};
use md_config::PipelineConfig;
use md_core::{build_default_sources, BackfillManager, DataOrchestrator};
use md_plugin::{HttpOhlcvPlugin, Plugin};
use md_subscription::SubscriptionManager;
use sqlx::PgPool;
use tracing::info;

/// Every asset-source for a single `(market, provider)`: the plugin, its
/// in-process cache, the orchestrator built over the standard three-tier
/// source chain, the backfill manager, and the subscription manager that
/// owns the live poll/broadcast tasks for this pair.
///
/// An `InMemoryCache` is always constructed here, so the original facade's
/// "cache tier dropped when unconfigured" branch never applies to this
/// implementation — every pair gets the full `[Aggregate, Cache, Plugin]`
/// source chain.
pub struct MarketService {
    pub market: String,
    pub provider: String,
    pub plugin: Arc<dyn Plugin>,
    pub cache: Arc<dyn Cache>,
    pub orchestrator: Arc<DataOrchestrator>,
    pub backfill: Arc<BackfillManager>,
    pub subscriptions: Arc<SubscriptionManager>,
}

pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<PipelineConfig>,
    services: HashMap<(String, String), Arc<MarketService>>,
}

impl AppState {
    /// Builds one `MarketService` per entry in [`configured_market_providers`].
    pub async fn build(pool: PgPool, config: Arc<PipelineConfig>) -> Result<Arc<Self>> {
        let mut services = HashMap::new();
        for (market, provider) in configured_market_providers() {
            let service = build_market_service(&market, &provider, pool.clone(), config.clone())?;
            info!(%market, %provider, plugin = service.plugin.plugin_key(), "market service configured");
            services.insert((market, provider), Arc::new(service));
        }
        Ok(Arc::new(Self { pool, config, services }))
    }

    pub fn service(&self, market: &str, provider: &str) -> Option<&Arc<MarketService>> {
        self.services.get(&(market.to_string(), provider.to_string()))
    }

    pub fn services(&self) -> impl Iterator<Item = &Arc<MarketService>> {
        self.services.values()
    }

    /// Tears down every subscription manager and backfill task. Called
    /// once at process shutdown, within a bounded grace period.
    pub async fn shutdown(&self) {
        for service in self.services.values() {
            service.subscriptions.shutdown().await;
            service.backfill.shutdown().await;
        }
    }
}

fn build_market_service(market: &str, provider: &str, pool: PgPool, config: Arc<PipelineConfig>) -> Result<MarketService> {
    let base_url = env_for(provider, "BASE_URL").unwrap_or_else(|| "http://localhost:9999".to_string());
    let api_key = env_for(provider, "API_KEY").unwrap_or_default();

    let plugin: Arc<dyn Plugin> =
        Arc::new(HttpOhlcvPlugin::new(base_url, api_key).map_err(|err| anyhow::anyhow!(err)).with_context(|| format!("failed to construct plugin for provider {provider}"))?);
    let cache: Arc<dyn Cache> = Arc::new(InMemoryCache::new(Duration::from_secs(config.cache_ttl_1m_bar_group_sec), Duration::from_secs(config.cache_ttl_resampled_bars_sec)));

    let sources = build_default_sources(pool.clone(), cache.clone(), plugin.clone(), Duration::from_secs(config.cache_ttl_resampled_bars_sec));
    let orchestrator = Arc::new(DataOrchestrator::new(sources, config.default_chart_points as usize));
    let backfill = Arc::new(BackfillManager::new(
        pool.clone(),
        cache.clone(),
        config.default_backfill_period_ms,
        config.max_backfill_chunks as usize,
        Duration::from_secs_f64(config.backfill_chunk_delay_sec),
    ));
    let subscriptions = Arc::new(SubscriptionManager::new(orchestrator.clone(), backfill.clone(), plugin.clone(), cache.clone(), pool, config));

    Ok(MarketService { market: market.to_string(), provider: provider.to_string(), plugin, cache, orchestrator, backfill, subscriptions })
}

const DEFAULT_MARKETS: &str = "crypto:default";

/// `MD_MARKETS` is a comma-separated list of `market:provider` pairs, e.g.
/// `crypto:binance,stocks:polygon`. Defaults to a single `crypto:default`
/// pair so the daemon has something to serve out of the box.
fn configured_market_providers() -> Vec<(String, String)> {
    let raw = std::env::var("MD_MARKETS").unwrap_or_else(|_| DEFAULT_MARKETS.to_string());
    parse_market_providers(&raw)
}

fn parse_market_providers(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .filter_map(|entry| {
            let entry = entry.trim();
            if entry.is_empty() {
                return None;
            }
            let (market, provider) = entry.split_once(':')?;
            Some((market.trim().to_string(), provider.trim().to_string()))
        })
        .collect()
}

/// Reads `MD_PROVIDER_<PROVIDER>_<SUFFIX>`, upper-cased and with non-
/// alphanumeric characters replaced by `_`.
fn env_for(provider: &str, suffix: &str) -> Option<String> {
    std::env::var(provider_env_key(provider, suffix)).ok()
}

fn provider_env_key(provider: &str, suffix: &str) -> String {
    let key_provider: String = provider.chars().map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' }).collect();
    format!("MD_PROVIDER_{key_provider}_{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_multiple_market_provider_pairs() {
        let pairs = parse_market_providers("crypto:binance, stocks:polygon");
        assert_eq!(pairs, vec![("crypto".to_string(), "binance".to_string()), ("stocks".to_string(), "polygon".to_string())]);
    }

    #[test]
    fn default_markets_constant_is_a_single_pair() {
        assert_eq!(parse_market_providers(DEFAULT_MARKETS), vec![("crypto".to_string(), "default".to_string())]);
    }

    #[test]
    fn skips_blank_entries() {
        assert_eq!(parse_market_providers("crypto:binance,, stocks:polygon"), vec![("crypto".to_string(), "binance".to_string()), ("stocks".to_string(), "polygon".to_string())]);
    }

    #[test]
    fn provider_env_key_normalizes_non_alphanumeric() {
        assert_eq!(provider_env_key("my-venue", "BASE_URL"), "MD_PROVIDER_MY_VENUE_BASE_URL");
    }
}
