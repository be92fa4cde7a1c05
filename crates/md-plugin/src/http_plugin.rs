//! Reference plugin: a generic REST-over-HTTP OHLCV provider, modeled on
//! the query-param-GET shape of a typical market-data vendor API. Ships
//! as a concrete, usable plugin rather than a mock, so the daemon has at
//! least one real data path end to end.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use md_schemas::OHLCVBar;
use rand::Rng;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::{Capabilities, FetchHistoricalArgs, Plugin, PluginError, FEATURE_FETCH_HISTORICAL_OHLCV, FEATURE_VALIDATE_SYMBOL};

const MAX_RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY_MS: u64 = 250;

pub struct HttpOhlcvPlugin {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
    capabilities: Capabilities,
}

impl HttpOhlcvPlugin {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, PluginError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(PluginError::from)?;

        let capabilities = Capabilities::new()
            .with(FEATURE_FETCH_HISTORICAL_OHLCV, true)
            .with(FEATURE_VALIDATE_SYMBOL, true);

        Ok(Self { base_url: base_url.into(), api_key: api_key.into(), client, capabilities })
    }

    /// Retries transient (`Network`/`RateLimited`) failures with
    /// exponential backoff plus jitter; anything else returns immediately.
    async fn with_retry<T, F, Fut>(&self, mut attempt: F) -> Result<T, PluginError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, PluginError>>,
    {
        let mut last_err = None;
        for attempt_no in 0..MAX_RETRY_ATTEMPTS {
            match attempt().await {
                Ok(value) => return Ok(value),
                Err(err) if err.retryable() && attempt_no + 1 < MAX_RETRY_ATTEMPTS => {
                    let backoff_ms = RETRY_BASE_DELAY_MS * 2u64.pow(attempt_no);
                    let jitter_ms = rand::thread_rng().gen_range(0..backoff_ms / 2 + 1);
                    warn!(attempt = attempt_no + 1, %err, "plugin request failed, retrying");
                    tokio::time::sleep(Duration::from_millis(backoff_ms + jitter_ms)).await;
                    last_err = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_err.unwrap_or(PluginError::Other(anyhow::anyhow!("retry loop exited without attempting"))))
    }

    fn timestamp_of(candle: &RemoteCandle) -> Result<i64, PluginError> {
        let dt = DateTime::parse_from_rfc3339(&candle.time)
            .map(|dt| dt.with_timezone(&Utc))
            .or_else(|_| {
                chrono::NaiveDateTime::parse_from_str(&candle.time, "%Y-%m-%d %H:%M:%S")
                    .map(|naive| DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
            })
            .map_err(|err| PluginError::Other(anyhow::anyhow!("unparseable candle timestamp {}: {err}", candle.time)))?;
        Ok(dt.timestamp_millis())
    }
}

#[derive(Debug, Deserialize)]
struct RemoteCandle {
    time: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

#[derive(Debug, Deserialize)]
struct RemoteSeriesResponse {
    #[serde(default)]
    candles: Vec<RemoteCandle>,
    #[serde(default)]
    error: Option<String>,
}

#[async_trait]
impl Plugin for HttpOhlcvPlugin {
    fn plugin_key(&self) -> &'static str {
        "http_ohlcv"
    }

    async fn get_symbols(&self, market: &str) -> Result<Vec<String>, PluginError> {
        debug!(%market, "get_symbols not implemented for http_ohlcv");
        Err(PluginError::FeatureNotSupported("get_symbols"))
    }

    async fn get_market_info(&self, symbol: &str) -> Result<Option<serde_json::Value>, PluginError> {
        debug!(%symbol, "get_market_info not implemented for http_ohlcv");
        Err(PluginError::FeatureNotSupported("get_market_info"))
    }

    async fn fetch_historical_ohlcv(&self, args: FetchHistoricalArgs) -> Result<Vec<OHLCVBar>, PluginError> {
        let url = format!("{}/time_series", self.base_url);
        let limit = args.limit.unwrap_or(500).min(self.get_max_fetch_limit(&args.timeframe_str));

        let response: RemoteSeriesResponse = self
            .with_retry(|| {
                let url = url.clone();
                let symbol = args.symbol.clone();
                let interval = args.timeframe_str.clone();
                async move {
                    let resp = self
                        .client
                        .get(&url)
                        .query(&[
                            ("symbol", symbol.as_str()),
                            ("interval", interval.as_str()),
                            ("apikey", self.api_key.as_str()),
                            ("outputsize", &limit.to_string()),
                        ])
                        .send()
                        .await?;
                    let status = resp.status();
                    if status.as_u16() == 401 || status.as_u16() == 403 {
                        return Err(PluginError::Auth(format!("http {status}")));
                    }
                    if status.as_u16() == 429 {
                        return Err(PluginError::RateLimited);
                    }
                    resp.json::<RemoteSeriesResponse>().await.map_err(PluginError::from)
                }
            })
            .await?;

        if let Some(message) = response.error {
            return Err(PluginError::Other(anyhow::anyhow!("provider returned error: {message}")));
        }

        let mut bars = Vec::with_capacity(response.candles.len());
        for candle in &response.candles {
            let timestamp = Self::timestamp_of(candle)?;
            bars.push(OHLCVBar::new(timestamp, candle.open, candle.high, candle.low, candle.close, candle.volume));
        }

        if let Some(since) = args.since {
            bars.retain(|bar| bar.timestamp >= since);
        }
        if let Some(until) = args.until {
            bars.retain(|bar| bar.timestamp <= until);
        }

        bars.sort_by_key(|bar| bar.timestamp);
        Ok(bars)
    }

    async fn fetch_latest_ohlcv(&self, symbol: &str, timeframe_str: &str) -> Result<Option<OHLCVBar>, PluginError> {
        let bars = self
            .fetch_historical_ohlcv(FetchHistoricalArgs {
                symbol: symbol.to_string(),
                timeframe_str: timeframe_str.to_string(),
                since: None,
                until: None,
                limit: Some(1),
            })
            .await?;
        Ok(bars.into_iter().last())
    }

    async fn validate_symbol(&self, symbol: &str) -> Result<bool, PluginError> {
        match self
            .fetch_historical_ohlcv(FetchHistoricalArgs {
                symbol: symbol.to_string(),
                timeframe_str: "1d".to_string(),
                since: None,
                until: None,
                limit: Some(1),
            })
            .await
        {
            Ok(bars) => Ok(!bars.is_empty()),
            Err(PluginError::InvalidSymbol(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn get_supported_timeframes(&self) -> Vec<&'static str> {
        vec!["1m", "5m", "15m", "1h", "1d"]
    }

    fn get_max_fetch_limit(&self, _timeframe_str: &str) -> u32 {
        5000
    }

    fn supported_features(&self) -> &Capabilities {
        &self.capabilities
    }

    async fn close(&self) {}
}
