//! Triggered after an orchestrator read serves a request: fills the gap
//! between the oldest stored 1m bar and the configured retention horizon,
//! one task per `(market, provider, symbol)`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use md_cache::Cache;
use md_plugin::{FetchHistoricalArgs, Plugin};
use md_schemas::{OHLCVBar, Timeframe};
use sqlx::PgPool;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

type AssetTriple = (String, String, String);

struct TaskState {
    handle: JoinHandle<()>,
    cancel: tokio::sync::watch::Sender<bool>,
}

pub struct BackfillManager {
    pool: PgPool,
    cache: Arc<dyn Cache>,
    tasks: Mutex<HashMap<AssetTriple, TaskState>>,
    target_period_ms: i64,
    max_chunks: usize,
    chunk_delay: Duration,
    one_day_margin_ms: i64,
}

impl BackfillManager {
    pub fn new(pool: PgPool, cache: Arc<dyn Cache>, target_period_ms: i64, max_chunks: usize, chunk_delay: Duration) -> Self {
        Self { pool, cache, tasks: Mutex::new(HashMap::new()), target_period_ms, max_chunks, chunk_delay, one_day_margin_ms: 86_400_000 }
    }

    /// Checks for a gap and spawns a backfill task if one exists and none
    /// is already running for this asset. Re-checks "already running"
    /// under the same lock it uses to register the new task, to close the
    /// race between the gap check and the spawn. Takes `self` behind an
    /// `Arc` so the spawned task can clone it back to deregister itself
    /// from `tasks` on completion.
    pub async fn trigger_if_needed(self: &Arc<Self>, plugin: Arc<dyn Plugin>, market: &str, provider: &str, symbol: &str, now_ms: i64) {
        let triple = (market.to_string(), provider.to_string(), symbol.to_string());

        let target_oldest = now_ms - self.target_period_ms;
        let min_stored = match md_db::gap_check(&self.pool, market, provider, symbol).await {
            Ok(check) => check.min_stored_ts,
            Err(err) => {
                warn!(%err, %symbol, "gap check failed, skipping backfill trigger");
                return;
            }
        };

        let gap_exists = match min_stored {
            None => true,
            Some(ts) => ts > target_oldest + self.one_day_margin_ms,
        };
        if !gap_exists {
            return;
        }

        let mut tasks = self.tasks.lock().await;
        if tasks.contains_key(&triple) {
            return;
        }

        let (cancel_tx, cancel_rx) = tokio::sync::watch::channel(false);
        let pool = self.pool.clone();
        let cache = self.cache.clone();
        let max_chunks = self.max_chunks;
        let chunk_delay = self.chunk_delay;
        let task_triple = triple.clone();
        let earliest_known = min_stored.unwrap_or(now_ms);

        // Deregister on completion so a later trigger for the same asset can
        // spawn again once the gap reopens, instead of finding a stale entry
        // in `tasks` forever.
        let manager = self.clone();
        let cleanup_triple = triple.clone();
        let handle = tokio::spawn(async move {
            run_backfill(pool, cache, plugin, task_triple, earliest_known, target_oldest, max_chunks, chunk_delay, cancel_rx).await;
            manager.tasks.lock().await.remove(&cleanup_triple);
        });
        tasks.insert(triple, TaskState { handle, cancel: cancel_tx });
    }

    /// Cancels every running backfill task and waits for them to exit.
    pub async fn shutdown(&self) {
        let mut tasks = self.tasks.lock().await;
        for (_, state) in tasks.drain() {
            let _ = state.cancel.send(true);
            let _ = state.handle.await;
        }
    }

    pub async fn is_running(&self, market: &str, provider: &str, symbol: &str) -> bool {
        let tasks = self.tasks.lock().await;
        tasks.contains_key(&(market.to_string(), provider.to_string(), symbol.to_string()))
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_backfill(
    pool: PgPool,
    cache: Arc<dyn Cache>,
    plugin: Arc<dyn Plugin>,
    triple: AssetTriple,
    mut current_earliest: i64,
    target_oldest: i64,
    max_chunks: usize,
    chunk_delay: Duration,
    mut cancel: tokio::sync::watch::Receiver<bool>,
) {
    let (market, provider, symbol) = triple;
    let chunk_period_ms = Timeframe::ONE_MINUTE.period_ms();
    let chunk_size_bars = 500i64;

    for chunk_no in 0..max_chunks {
        if current_earliest <= target_oldest {
            break;
        }
        if *cancel.borrow() {
            info!(%symbol, "backfill cancelled");
            break;
        }

        let since = current_earliest - chunk_size_bars * chunk_period_ms;
        let args = FetchHistoricalArgs {
            symbol: symbol.clone(),
            timeframe_str: "1m".to_string(),
            since: Some(since.max(target_oldest)),
            until: Some(current_earliest),
            limit: Some(chunk_size_bars as u32),
        };

        let chunk = match plugin.fetch_historical_ohlcv(args).await {
            Ok(bars) => bars,
            Err(err) if err.retryable() => {
                warn!(%err, %symbol, chunk_no, "transient backfill chunk error, aborting task");
                break;
            }
            Err(err) => {
                warn!(%err, %symbol, chunk_no, "permanent backfill chunk error, aborting task");
                break;
            }
        };

        if chunk.is_empty() {
            break;
        }

        let filtered: Vec<OHLCVBar> = chunk.into_iter().filter(|b| b.timestamp < current_earliest && b.timestamp >= target_oldest).collect();
        if filtered.is_empty() {
            break;
        }

        let new_earliest = filtered.iter().map(|b| b.timestamp).min().unwrap();
        if new_earliest >= current_earliest {
            break;
        }

        if let Err(err) = md_db::ingest_bars(&pool, &market, &provider, &symbol, "1m", &filtered).await {
            warn!(%err, %symbol, "backfill chunk upsert failed, aborting task");
            break;
        }
        cache.store_1m(&(market.clone(), provider.clone(), symbol.clone()), &filtered).await;

        current_earliest = new_earliest;

        tokio::select! {
            _ = tokio::time::sleep(chunk_delay) => {}
            _ = cancel.changed() => {
                if *cancel.borrow() {
                    info!(%symbol, "backfill cancelled between chunks");
                    break;
                }
            }
        }
    }
}
