use serde::{Deserialize, Serialize};

/// A single OHLCV bar. Prices and volume are float64; the timestamp is
/// milliseconds since the Unix epoch, UTC, aligned to the bar's timeframe
/// period (`timestamp % period_ms == 0`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OHLCVBar {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl OHLCVBar {
    pub fn new(timestamp: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self { timestamp, open, high, low, close, volume }
    }

    /// `low <= min(open, close) <= max(open, close) <= high` and `volume >= 0`.
    pub fn is_sane(&self) -> bool {
        let lo = self.open.min(self.close);
        let hi = self.open.max(self.close);
        self.low <= lo && lo <= hi && hi <= self.high && self.volume >= 0.0
    }

    /// True if every numeric field is finite. Malformed bars are skipped
    /// by the resampler and normalized away before entering the cache.
    pub fn is_finite(&self) -> bool {
        self.open.is_finite()
            && self.high.is_finite()
            && self.low.is_finite()
            && self.close.is_finite()
            && self.volume.is_finite()
    }

    /// Coerces non-finite numerics to `0.0`, matching the cache
    /// serializer's contract.
    pub fn normalized(mut self) -> Self {
        for v in [&mut self.open, &mut self.high, &mut self.low, &mut self.close, &mut self.volume] {
            if !v.is_finite() {
                *v = 0.0;
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sane_bar_passes() {
        let bar = OHLCVBar::new(0, 1.0, 2.0, 0.5, 1.5, 10.0);
        assert!(bar.is_sane());
    }

    #[test]
    fn high_below_close_fails() {
        let bar = OHLCVBar::new(0, 1.0, 1.2, 0.5, 1.5, 10.0);
        assert!(!bar.is_sane());
    }

    #[test]
    fn negative_volume_fails() {
        let bar = OHLCVBar::new(0, 1.0, 2.0, 0.5, 1.5, -1.0);
        assert!(!bar.is_sane());
    }

    #[test]
    fn nan_is_normalized_to_zero() {
        let bar = OHLCVBar::new(0, f64::NAN, f64::INFINITY, 0.0, 1.0, f64::NEG_INFINITY).normalized();
        assert_eq!(bar.open, 0.0);
        assert_eq!(bar.high, 0.0);
        assert_eq!(bar.volume, 0.0);
    }
}
