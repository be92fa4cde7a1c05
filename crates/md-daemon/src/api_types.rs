//! Request and response types for md-daemon's HTTP endpoints.
//!
//! These types are `Serialize`/`Deserialize` so Axum can decode query
//! strings and encode JSON bodies directly. No business logic lives here.

use md_schemas::OHLCVBar;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OhlcvQuery {
    pub market: String,
    pub provider: String,
    pub symbol: String,
    pub timeframe: String,
    pub since: Option<i64>,
    pub until: Option<i64>,
    pub limit: Option<usize>,
}

/// `{"ohlc":[[ts,o,h,l,c],...],"volume":[[ts,v],...]}`, the HTTP-surface
/// counterpart of [`md_schemas::StreamPayload`] (no `initial_batch` flag,
/// since a plain fetch isn't part of a stream).
#[derive(Debug, Clone, Serialize, Default)]
pub struct OhlcvResponse {
    pub ohlc: Vec<[f64; 5]>,
    pub volume: Vec<[f64; 2]>,
}

impl OhlcvResponse {
    pub fn from_bars(bars: &[OHLCVBar]) -> Self {
        let ohlc = bars.iter().map(|b| [b.timestamp as f64, b.open, b.high, b.low, b.close]).collect();
        let volume = bars.iter().map(|b| [b.timestamp as f64, b.volume]).collect();
        Self { ohlc, volume }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SymbolsQuery {
    pub market: String,
    pub provider: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SymbolsResponse {
    pub symbols: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProvidersQuery {
    pub market: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProvidersResponse {
    pub providers: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ohlcv_response_shapes_bars() {
        let bars = [OHLCVBar::new(1000, 1.0, 2.0, 0.5, 1.5, 10.0)];
        let resp = OhlcvResponse::from_bars(&bars);
        assert_eq!(resp.ohlc[0], [1000.0, 1.0, 2.0, 0.5, 1.5]);
        assert_eq!(resp.volume[0], [1000.0, 10.0]);
    }
}
