use serde::{Deserialize, Serialize};

use crate::Timeframe;

/// `(market, provider, symbol, timeframe)`. Keys the subscription
/// registry and the backfill task map, so it derives `Hash + Eq`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetKey {
    pub market: String,
    pub provider: String,
    pub symbol: String,
    pub timeframe: Timeframe,
}

impl AssetKey {
    pub fn new(market: impl Into<String>, provider: impl Into<String>, symbol: impl Into<String>, timeframe: Timeframe) -> Self {
        Self { market: market.into(), provider: provider.into(), symbol: symbol.into(), timeframe }
    }

    /// The backfill task is keyed on `(market, provider, symbol)` alone;
    /// its timeframe is always fixed at 1m.
    pub fn asset_triple(&self) -> (String, String, String) {
        (self.market.clone(), self.provider.clone(), self.symbol.clone())
    }
}
