//! Pure bucketing transform from 1m bars to a coarser timeframe.

use std::collections::BTreeMap;

use md_schemas::{OHLCVBar, Timeframe};
use tracing::warn;

struct BucketAcc {
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
    open_ts: i64,
    close_ts: i64,
}

impl BucketAcc {
    fn start(bar: &OHLCVBar) -> Self {
        Self {
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            volume: bar.volume,
            open_ts: bar.timestamp,
            close_ts: bar.timestamp,
        }
    }

    /// Input is not assumed sorted within a bucket, so open/close are
    /// tracked by timestamp extremes rather than arrival order.
    fn fold(&mut self, bar: &OHLCVBar) {
        if bar.timestamp <= self.open_ts {
            self.open = bar.open;
            self.open_ts = bar.timestamp;
        }
        if bar.timestamp >= self.close_ts {
            self.close = bar.close;
            self.close_ts = bar.timestamp;
        }
        self.high = self.high.max(bar.high);
        self.low = self.low.min(bar.low);
        self.volume += bar.volume;
    }
}

/// Buckets an oldest-first slice of 1m bars into `target`. Buckets with no
/// input bars are omitted; there is no forward-fill. If `target` is at or
/// below one minute, `bars` is returned unchanged (already sorted).
pub fn resample(bars: &[OHLCVBar], target: Timeframe) -> Vec<OHLCVBar> {
    if target.period_ms() <= Timeframe::ONE_MINUTE.period_ms() {
        let mut sorted: Vec<OHLCVBar> = bars.to_vec();
        sorted.sort_by_key(|b| b.timestamp);
        return sorted;
    }

    let mut buckets: BTreeMap<i64, BucketAcc> = BTreeMap::new();
    for bar in bars {
        if !bar.is_finite() {
            warn!(timestamp = bar.timestamp, "skipping non-finite bar during resample");
            continue;
        }
        let bucket_start = target.bucket_start(bar.timestamp);
        buckets
            .entry(bucket_start)
            .and_modify(|acc| acc.fold(bar))
            .or_insert_with(|| BucketAcc::start(bar));
    }

    buckets
        .into_iter()
        .map(|(bucket_start, acc)| OHLCVBar::new(bucket_start, acc.open, acc.high, acc.low, acc.close, acc.volume))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn one_minute_bars() -> Vec<OHLCVBar> {
        (0..5)
            .map(|i| {
                let ts = i * 60_000;
                OHLCVBar::new(ts, 10.0 + i as f64, 11.0 + i as f64, 9.0 + i as f64, 10.5 + i as f64, 1.0)
            })
            .collect()
    }

    #[test]
    fn resample_to_5m_produces_one_bucket() {
        let bars = one_minute_bars();
        let out = resample(&bars, Timeframe::from_str("5m").unwrap());
        assert_eq!(out.len(), 1);
        let bucket = &out[0];
        assert_eq!(bucket.timestamp, 0);
        assert_eq!(bucket.open, bars[0].open);
        assert_eq!(bucket.close, bars[4].close);
        assert_eq!(bucket.high, bars.iter().map(|b| b.high).fold(f64::MIN, f64::max));
        assert_eq!(bucket.low, bars.iter().map(|b| b.low).fold(f64::MAX, f64::min));
        assert_eq!(bucket.volume, 5.0);
    }

    #[test]
    fn empty_buckets_are_omitted() {
        let bars = vec![OHLCVBar::new(0, 1.0, 1.0, 1.0, 1.0, 1.0), OHLCVBar::new(10 * 60_000, 1.0, 1.0, 1.0, 1.0, 1.0)];
        let out = resample(&bars, Timeframe::from_str("5m").unwrap());
        assert_eq!(out.len(), 2, "no forward-fill between the two occupied buckets");
    }

    #[test]
    fn sub_minute_target_returns_sorted_input_unchanged() {
        let mut bars = one_minute_bars();
        bars.reverse();
        let out = resample(&bars, Timeframe::ONE_MINUTE);
        assert_eq!(out.first().unwrap().timestamp, 0);
        assert_eq!(out.last().unwrap().timestamp, 4 * 60_000);
    }

    #[test]
    fn non_finite_bars_are_skipped_without_corrupting_bucket() {
        let bars = vec![
            OHLCVBar::new(0, 1.0, 2.0, 0.5, 1.5, 1.0),
            OHLCVBar::new(60_000, f64::NAN, 2.0, 0.5, 1.5, 1.0),
            OHLCVBar::new(120_000, 1.0, 2.0, 0.5, 1.5, 1.0),
        ];
        let out = resample(&bars, Timeframe::from_str("5m").unwrap());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].volume, 2.0, "the NaN bar's volume must not be summed in");
    }
}
