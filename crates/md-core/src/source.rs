use async_trait::async_trait;
use md_schemas::{OHLCVBar, Timeframe};

/// One tier of the read-path chain. `symbol` is passed per call rather
/// than bound onto the source instance, since a single `DataSource` is
/// shared across concurrent requests for different symbols.
#[async_trait]
pub trait DataSource: Send + Sync {
    fn name(&self) -> &'static str;

    fn supports(&self, timeframe: Timeframe) -> bool;

    async fn fetch(
        &self,
        market: &str,
        provider: &str,
        symbol: &str,
        timeframe: Timeframe,
        since: Option<i64>,
        before: i64,
        limit: usize,
    ) -> anyhow::Result<Vec<OHLCVBar>>;
}

/// Keeps the **first** occurrence of each timestamp, preserving the
/// insertion order of first appearance. Used both by the orchestrator
/// across source tiers and by the plugin source across fetched chunks,
/// so both levels of deduplication share this one rule.
pub fn dedup_by_timestamp_first_wins(chunks: impl IntoIterator<Item = Vec<OHLCVBar>>) -> Vec<OHLCVBar> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for chunk in chunks {
        for bar in chunk {
            if seen.insert(bar.timestamp) {
                out.push(bar);
            }
        }
    }
    out
}

/// Applies the shared `(since, before, limit)` post-filter: when `since`
/// is absent, keep the newest `limit` bars; when present, keep the first
/// `limit` bars at or after it.
pub fn filter_bars(bars: Vec<OHLCVBar>, since: Option<i64>, before: i64, limit: usize) -> Vec<OHLCVBar> {
    let mut filtered: Vec<OHLCVBar> =
        bars.into_iter().filter(|b| since.map(|s| b.timestamp >= s).unwrap_or(true)).filter(|b| b.timestamp < before).collect();
    filtered.sort_by_key(|b| b.timestamp);
    if since.is_some() {
        filtered.truncate(limit);
    } else if filtered.len() > limit {
        filtered = filtered.split_off(filtered.len() - limit);
    }
    filtered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(ts: i64) -> OHLCVBar {
        OHLCVBar::new(ts, 1.0, 1.0, 1.0, 1.0, 1.0)
    }

    #[test]
    fn earlier_chunk_wins_on_timestamp_collision() {
        let mut high_priority = bar(100);
        high_priority.close = 1.0;
        let mut low_priority = bar(100);
        low_priority.close = 99.0;
        let out = dedup_by_timestamp_first_wins([vec![high_priority], vec![low_priority]]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].close, 1.0);
    }

    #[test]
    fn filter_without_since_keeps_newest_limit() {
        let bars = (0..10).map(bar).collect::<Vec<_>>();
        let out = filter_bars(bars, None, 100, 3);
        assert_eq!(out.iter().map(|b| b.timestamp).collect::<Vec<_>>(), vec![7, 8, 9]);
    }

    #[test]
    fn filter_with_since_keeps_earliest_limit() {
        let bars = (0..10).map(bar).collect::<Vec<_>>();
        let out = filter_bars(bars, Some(3), 100, 3);
        assert_eq!(out.iter().map(|b| b.timestamp).collect::<Vec<_>>(), vec![3, 4, 5]);
    }
}
