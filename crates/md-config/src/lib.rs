//! Process-wide configuration for the market-data pipeline.
//!
//! Every constant here is read once, at startup, from its own `MD_*`
//! environment variable with a documented default applied when the
//! variable is unset or fails to parse. Nothing downstream re-reads the
//! environment after [`PipelineConfig::from_env`] returns.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Env var naming the Postgres connection string. Kept separate from
/// [`PipelineConfig`] since `md-db` reads it directly at pool-construction
/// time, before a `PipelineConfig` necessarily exists (e.g. in CLI
/// subcommands that only touch the database).
pub const ENV_DB_URL: &str = "MD_DATABASE_URL";

/// Env var naming the daemon's bind address, e.g. `127.0.0.1:8787`.
pub const ENV_DAEMON_ADDR: &str = "MD_DAEMON_ADDR";
pub const DEFAULT_DAEMON_ADDR: &str = "127.0.0.1:8787";

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub default_chart_points: u32,
    pub default_plugin_chunk_size: u32,
    pub max_backfill_chunks: u32,
    pub backfill_chunk_delay_sec: f64,
    pub default_backfill_period_ms: i64,

    pub cache_ttl_1m_bar_group_sec: u64,
    pub cache_ttl_resampled_bars_sec: u64,

    pub min_poll_interval_sec: f64,
    pub max_poll_interval_sec: f64,
    pub initial_poll_delay_sec: f64,
    pub poll_jitter_factor: f64,

    pub max_poll_failures_before_backoff: u32,
    pub poll_backoff_base_sec: f64,
    pub max_poll_backoff_sec: f64,

    pub ws_ping_interval_sec: u64,
    pub provider_request_timeout_sec: u64,
    pub shutdown_grace_period_sec: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_chart_points: 200,
            default_plugin_chunk_size: 500,
            max_backfill_chunks: 100,
            backfill_chunk_delay_sec: 1.5,
            default_backfill_period_ms: 30 * 24 * 60 * 60 * 1000,

            cache_ttl_1m_bar_group_sec: 3600,
            cache_ttl_resampled_bars_sec: 300,

            min_poll_interval_sec: 1.0,
            max_poll_interval_sec: 60.0,
            initial_poll_delay_sec: 2.0,
            poll_jitter_factor: 0.1,

            max_poll_failures_before_backoff: 5,
            poll_backoff_base_sec: 5.0,
            max_poll_backoff_sec: 300.0,

            ws_ping_interval_sec: 30,
            provider_request_timeout_sec: 30,
            shutdown_grace_period_sec: 10,
        }
    }
}

impl PipelineConfig {
    /// Loads every field from its `MD_*` environment variable, falling
    /// back to the documented default on absence or parse failure, and
    /// logs the resolved configuration once at `info`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let cfg = Self {
            default_chart_points: env_or("MD_DEFAULT_CHART_POINTS", defaults.default_chart_points),
            default_plugin_chunk_size: env_or("MD_DEFAULT_PLUGIN_CHUNK_SIZE", defaults.default_plugin_chunk_size),
            max_backfill_chunks: env_or("MD_MAX_BACKFILL_CHUNKS", defaults.max_backfill_chunks),
            backfill_chunk_delay_sec: env_or("MD_BACKFILL_CHUNK_DELAY_SEC", defaults.backfill_chunk_delay_sec),
            default_backfill_period_ms: env_or("MD_DEFAULT_BACKFILL_PERIOD_MS", defaults.default_backfill_period_ms),

            cache_ttl_1m_bar_group_sec: env_or("MD_CACHE_TTL_1M_BAR_GROUP", defaults.cache_ttl_1m_bar_group_sec),
            cache_ttl_resampled_bars_sec: env_or("MD_CACHE_TTL_RESAMPLED_BARS", defaults.cache_ttl_resampled_bars_sec),

            min_poll_interval_sec: env_or("MD_MIN_POLL_INTERVAL_SEC", defaults.min_poll_interval_sec),
            max_poll_interval_sec: env_or("MD_MAX_POLL_INTERVAL_SEC", defaults.max_poll_interval_sec),
            initial_poll_delay_sec: env_or("MD_INITIAL_POLL_DELAY_SEC", defaults.initial_poll_delay_sec),
            poll_jitter_factor: env_or("MD_POLL_JITTER_FACTOR", defaults.poll_jitter_factor),

            max_poll_failures_before_backoff: env_or(
                "MD_MAX_POLL_FAILURES_BEFORE_BACKOFF",
                defaults.max_poll_failures_before_backoff,
            ),
            poll_backoff_base_sec: env_or("MD_POLL_BACKOFF_BASE_SEC", defaults.poll_backoff_base_sec),
            max_poll_backoff_sec: env_or("MD_MAX_POLL_BACKOFF_SEC", defaults.max_poll_backoff_sec),

            ws_ping_interval_sec: env_or("MD_WS_PING_INTERVAL_SEC", defaults.ws_ping_interval_sec),
            provider_request_timeout_sec: env_or("MD_PROVIDER_REQUEST_TIMEOUT_SEC", defaults.provider_request_timeout_sec),
            shutdown_grace_period_sec: env_or("MD_SHUTDOWN_GRACE_PERIOD_SEC", defaults.shutdown_grace_period_sec),
        };
        tracing::info!(?cfg, "pipeline configuration resolved");
        cfg
    }

    pub fn provider_request_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_request_timeout_sec)
    }

    pub fn shutdown_grace_period(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_period_sec)
    }

    pub fn ws_ping_interval(&self) -> Duration {
        Duration::from_secs(self.ws_ping_interval_sec)
    }

    /// Clamps the raw `period_ms / 10` poll cadence into the configured
    /// min/max bounds, per the subscription poll task's base interval rule.
    pub fn base_poll_interval(&self, period_ms: i64) -> f64 {
        let raw = (period_ms as f64 / 10.0) / 1000.0;
        raw.clamp(self.min_poll_interval_sec, self.max_poll_interval_sec)
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(key, raw, "failed to parse config env var, using default");
            default
        }),
        Err(_) => default,
    }
}

/// Resolves the daemon's bind address from [`ENV_DAEMON_ADDR`], falling
/// back to [`DEFAULT_DAEMON_ADDR`].
pub fn daemon_addr_from_env() -> String {
    env::var(ENV_DAEMON_ADDR).unwrap_or_else(|_| DEFAULT_DAEMON_ADDR.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.default_chart_points, 200);
        assert_eq!(cfg.default_plugin_chunk_size, 500);
        assert_eq!(cfg.max_backfill_chunks, 100);
        assert_eq!(cfg.backfill_chunk_delay_sec, 1.5);
        assert_eq!(cfg.default_backfill_period_ms, 30 * 24 * 60 * 60 * 1000);
        assert_eq!(cfg.ws_ping_interval_sec, 30);
    }

    #[test]
    fn base_poll_interval_clamps() {
        let cfg = PipelineConfig::default();
        // 1m period -> raw 6s, within [1, 60]
        assert_eq!(cfg.base_poll_interval(60_000), 6.0);
        // absurdly small period clamps up to the minimum
        assert_eq!(cfg.base_poll_interval(1), cfg.min_poll_interval_sec);
        // absurdly large period clamps down to the maximum
        assert_eq!(cfg.base_poll_interval(i64::MAX / 2), cfg.max_poll_interval_sec);
    }
}
