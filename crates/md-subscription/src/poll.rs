//! The per-entry poll task: periodically asks the orchestrator for bars
//! newer than the last one sent, emits a data frame per new bar, and
//! backs off on repeated provider timeouts.

use std::sync::Arc;
use std::time::Duration;

use md_cache::Cache;
use md_config::PipelineConfig;
use md_core::DataOrchestrator;
use md_schemas::{AssetKey, MessagePayload, OHLCVBar, ServerFrame, StreamPayload};
use rand::Rng;
use sqlx::PgPool;
use tokio::sync::mpsc;
use tracing::{info_span, warn, Instrument};

use crate::entry::Registry;

#[allow(clippy::too_many_arguments)]
pub(crate) fn spawn(
    key: AssetKey,
    registry: Registry,
    orchestrator: Arc<DataOrchestrator>,
    cache: Arc<dyn Cache>,
    pool: PgPool,
    config: Arc<PipelineConfig>,
    outbound_tx: mpsc::Sender<ServerFrame>,
) -> tokio::task::JoinHandle<()> {
    let span = info_span!("md_subscription_poll", market = %key.market, provider = %key.provider, symbol = %key.symbol, timeframe = %key.timeframe);
    tokio::spawn(run(key, registry, orchestrator, cache, pool, config, outbound_tx).instrument(span))
}

#[allow(clippy::too_many_arguments)]
async fn run(
    key: AssetKey,
    registry: Registry,
    orchestrator: Arc<DataOrchestrator>,
    cache: Arc<dyn Cache>,
    pool: PgPool,
    config: Arc<PipelineConfig>,
    outbound_tx: mpsc::Sender<ServerFrame>,
) {
    tokio::time::sleep(Duration::from_secs_f64(config.initial_poll_delay_sec)).await;

    loop {
        let (last_sent_ts, cooldown_until_ms) = {
            let guard = registry.lock().await;
            match guard.get(&key) {
                Some(entry) => (entry.last_sent_ts, entry.cooldown_until_ms),
                None => return, // entry was torn down between iterations
            }
        };

        let now_ms = chrono::Utc::now().timestamp_millis();
        if cooldown_until_ms > now_ms {
            tokio::time::sleep(Duration::from_millis((cooldown_until_ms - now_ms) as u64)).await;
            continue;
        }

        let fetch = orchestrator.fetch(&key.market, &key.provider, &key.symbol, key.timeframe, Some(last_sent_ts), None, None, now_ms);
        match tokio::time::timeout(config.provider_request_timeout(), fetch).await {
            Ok(bars) => {
                if !on_fetch_success(&key, &registry, &cache, &pool, &outbound_tx, bars, last_sent_ts).await {
                    return;
                }
            }
            Err(_elapsed) => {
                if !on_fetch_timeout(&key, &registry, &config, &outbound_tx).await {
                    return;
                }
            }
        }

        let base = config.base_poll_interval(key.timeframe.period_ms());
        let jitter = base * config.poll_jitter_factor * rand::thread_rng().gen_range(-1.0..=1.0);
        tokio::time::sleep(Duration::from_secs_f64((base + jitter).max(0.05))).await;
    }
}

/// Sends one data frame per fresh bar, persists the delta for 1m assets,
/// and advances the entry's bookkeeping. Returns `false` if the entry
/// was torn down underneath this task (signals the poll loop to stop).
async fn on_fetch_success(
    key: &AssetKey,
    registry: &Registry,
    cache: &Arc<dyn Cache>,
    pool: &PgPool,
    outbound_tx: &mpsc::Sender<ServerFrame>,
    bars: Vec<OHLCVBar>,
    last_sent_ts: i64,
) -> bool {
    let fresh: Vec<OHLCVBar> = bars.into_iter().filter(|b| b.timestamp > last_sent_ts).collect();
    if fresh.is_empty() {
        return true;
    }

    for bar in &fresh {
        let frame = ServerFrame::Data {
            symbol: key.symbol.clone(),
            timeframe: key.timeframe,
            payload: StreamPayload::from_bars(std::slice::from_ref(bar), false),
        };
        if outbound_tx.send(frame).await.is_err() {
            return false;
        }
    }

    let new_last_sent = fresh.iter().map(|b| b.timestamp).max().unwrap_or(last_sent_ts);

    if key.timeframe.is_one_minute() {
        let pool = pool.clone();
        let cache = cache.clone();
        let triple = key.asset_triple();
        let persist_bars = fresh.clone();
        tokio::spawn(async move {
            if let Err(err) = md_db::ingest_bars(&pool, &triple.0, &triple.1, &triple.2, "1m", &persist_bars).await {
                warn!(%err, "poll-loop best-effort db persistence failed");
            }
            cache.store_1m(&triple, &persist_bars).await;
        });
    }

    let mut guard = registry.lock().await;
    let Some(entry) = guard.get_mut(key) else { return false };
    entry.last_sent_ts = entry.last_sent_ts.max(new_last_sent);
    entry.failures = 0;
    entry.cooldown_until_ms = 0;
    true
}

/// Records a timeout, backing off once `failures` crosses the configured
/// threshold. Returns `false` if the entry was torn down.
async fn on_fetch_timeout(key: &AssetKey, registry: &Registry, config: &PipelineConfig, outbound_tx: &mpsc::Sender<ServerFrame>) -> bool {
    warn!(symbol = %key.symbol, timeframe = %key.timeframe, "poll fetch timed out");

    let backoff_secs = {
        let mut guard = registry.lock().await;
        let Some(entry) = guard.get_mut(key) else { return false };
        entry.failures += 1;
        if entry.failures < config.max_poll_failures_before_backoff {
            return true;
        }
        let backoff_exp = entry.failures - config.max_poll_failures_before_backoff;
        let backoff_secs = (config.poll_backoff_base_sec * 2f64.powi(backoff_exp as i32)).min(config.max_poll_backoff_sec);
        entry.cooldown_until_ms = chrono::Utc::now().timestamp_millis() + (backoff_secs * 1000.0) as i64;
        entry.failures = 0;
        backoff_secs
    };

    let notice = ServerFrame::Notice {
        symbol: key.symbol.clone(),
        timeframe: key.timeframe,
        payload: MessagePayload { message: format!("polling backing off for {backoff_secs:.1}s after repeated failures") },
    };
    outbound_tx.send(notice).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_geometrically_and_clamps() {
        let base = 5.0;
        let max = 300.0;
        let at_zero = (base * 2f64.powi(0)).min(max);
        let at_three = (base * 2f64.powi(3)).min(max);
        let at_huge = (base * 2f64.powi(20)).min(max);
        assert_eq!(at_zero, 5.0);
        assert_eq!(at_three, 40.0);
        assert_eq!(at_huge, 300.0);
    }
}
