use md_schemas::OHLCVBar;

/// `count` consecutive 1m bars starting at `start_ts`, each a small ramp:
/// `open=close=base+i`, `high=open+1`, `low=open-1`, `volume=10`.
pub fn sequential_1m_bars(start_ts: i64, count: i64, base_price: f64) -> Vec<OHLCVBar> {
    (0..count).map(|i| bar_at(start_ts + i * 60_000, base_price + i as f64)).collect()
}

/// A single sane bar at `timestamp` with `price` as both open and close.
pub fn bar_at(timestamp: i64, price: f64) -> OHLCVBar {
    OHLCVBar::new(timestamp, price, price + 1.0, price - 1.0, price, 10.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_bars_are_one_minute_apart_and_sane() {
        let bars = sequential_1m_bars(0, 5, 100.0);
        assert_eq!(bars.len(), 5);
        assert_eq!(bars[1].timestamp - bars[0].timestamp, 60_000);
        assert!(bars.iter().all(|b| b.is_sane()));
    }
}
