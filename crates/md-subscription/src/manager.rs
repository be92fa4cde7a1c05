use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use md_cache::Cache;
use md_config::PipelineConfig;
use md_core::{parse_timeframe, BackfillManager, DataOrchestrator};
use md_plugin::Plugin;
use md_schemas::{AssetKey, MessagePayload, ServerFrame, StreamPayload, Timeframe};
use sqlx::PgPool;
use tokio::sync::mpsc;
use tracing::info;

use crate::entry::{Entry, Registry, Subscriber, OUTBOUND_QUEUE_CAPACITY};
use crate::{broadcaster, poll};

/// Owns the `AssetKey -> Entry` registry and is the only way callers
/// (the daemon's WebSocket handler) reach the poll/broadcast machinery.
/// Cheap to clone-by-`Arc`; every method takes `&self`.
pub struct SubscriptionManager {
    registry: Registry,
    orchestrator: Arc<DataOrchestrator>,
    backfill: Arc<BackfillManager>,
    plugin: Arc<dyn Plugin>,
    cache: Arc<dyn Cache>,
    pool: PgPool,
    config: Arc<PipelineConfig>,
    next_subscriber_id: AtomicU64,
}

impl SubscriptionManager {
    pub fn new(
        orchestrator: Arc<DataOrchestrator>,
        backfill: Arc<BackfillManager>,
        plugin: Arc<dyn Plugin>,
        cache: Arc<dyn Cache>,
        pool: PgPool,
        config: Arc<PipelineConfig>,
    ) -> Self {
        Self {
            registry: Default::default(),
            orchestrator,
            backfill,
            plugin,
            cache,
            pool,
            config,
            next_subscriber_id: AtomicU64::new(1),
        }
    }

    /// Subscribes `tx` to `(market, provider, symbol, timeframe_str)`.
    ///
    /// Validates `timeframe_str`, sending a single `Error` frame and
    /// returning `None` on failure. Otherwise sends a `Subscribed`
    /// acknowledgement, fetches and sends the initial historical batch,
    /// schedules a best-effort backfill trigger, and registers `tx` with
    /// the asset's entry (creating poll/broadcaster tasks on first
    /// subscriber). Returns the key and subscriber id for a later
    /// `unsubscribe` call.
    pub async fn subscribe(
        &self,
        market: &str,
        provider: &str,
        symbol: &str,
        timeframe_str: &str,
        since: Option<i64>,
        tx: mpsc::Sender<ServerFrame>,
    ) -> Option<(AssetKey, u64)> {
        let timeframe = match parse_timeframe(timeframe_str) {
            Ok(tf) => tf,
            Err(err) => {
                // No valid timeframe to report back; ONE_MINUTE is a
                // placeholder, the message carries the real detail.
                let _ = tx
                    .send(ServerFrame::Error {
                        symbol: symbol.to_string(),
                        timeframe: Timeframe::ONE_MINUTE,
                        payload: MessagePayload { message: err.message() },
                    })
                    .await;
                return None;
            }
        };

        let key = AssetKey::new(market, provider, symbol, timeframe);
        let subscriber_id = self.next_subscriber_id.fetch_add(1, Ordering::SeqCst);

        let _ = tx
            .send(ServerFrame::Subscribed { symbol: symbol.to_string(), timeframe, payload: MessagePayload { message: "subscribed".to_string() } })
            .await;

        let now_ms = chrono::Utc::now().timestamp_millis();
        let initial_bars = match since {
            Some(s) => self.orchestrator.fetch(market, provider, symbol, timeframe, Some(s), None, None, now_ms).await,
            None => self.orchestrator.fetch(market, provider, symbol, timeframe, None, None, Some(self.config.default_chart_points as usize), now_ms).await,
        };
        let initial_last_sent = initial_bars.iter().map(|b| b.timestamp).max().unwrap_or(0);

        let _ = tx
            .send(ServerFrame::Data { symbol: symbol.to_string(), timeframe, payload: StreamPayload::from_bars(&initial_bars, true) })
            .await;

        self.spawn_backfill_trigger(market, provider, symbol, now_ms);

        let mut guard = self.registry.lock().await;
        let entry = guard.entry(key.clone()).or_insert_with(|| self.spawn_entry(key.clone()));
        entry.last_sent_ts = entry.last_sent_ts.max(initial_last_sent);
        entry.subscribers.push(Subscriber { id: subscriber_id, tx });

        info!(%market, %provider, %symbol, %timeframe, subscriber_id, "subscribed");
        Some((key, subscriber_id))
    }

    /// Removes one subscriber. If it was the asset's last subscriber,
    /// tears down the entry's poll/broadcaster tasks.
    pub async fn unsubscribe(&self, key: &AssetKey, subscriber_id: u64) {
        remove_subscribers_and_maybe_teardown(&self.registry, key, &[subscriber_id]).await;
    }

    /// Tears down every entry. Used at process shutdown.
    pub async fn shutdown(&self) {
        let mut guard = self.registry.lock().await;
        for (key, entry) in guard.drain() {
            entry.poll_handle.abort();
            entry.broadcaster_handle.abort();
            info!(market = %key.market, provider = %key.provider, symbol = %key.symbol, "subscription entry torn down on shutdown");
        }
    }

    pub async fn subscriber_count(&self, key: &AssetKey) -> usize {
        let guard = self.registry.lock().await;
        guard.get(key).map(|entry| entry.subscribers.len()).unwrap_or(0)
    }

    fn spawn_entry(&self, key: AssetKey) -> Entry {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let poll_handle =
            poll::spawn(key.clone(), self.registry.clone(), self.orchestrator.clone(), self.cache.clone(), self.pool.clone(), self.config.clone(), outbound_tx.clone());
        let broadcaster_handle = broadcaster::spawn(key, self.registry.clone(), outbound_rx);
        Entry { subscribers: Vec::new(), outbound_tx, last_sent_ts: 0, failures: 0, cooldown_until_ms: 0, poll_handle, broadcaster_handle }
    }

    fn spawn_backfill_trigger(&self, market: &str, provider: &str, symbol: &str, now_ms: i64) {
        let backfill = self.backfill.clone();
        let plugin = self.plugin.clone();
        let (market, provider, symbol) = (market.to_string(), provider.to_string(), symbol.to_string());
        tokio::spawn(async move {
            backfill.trigger_if_needed(plugin, &market, &provider, &symbol, now_ms).await;
        });
    }
}

/// Removes `dead_ids` from `key`'s subscriber list; if the list becomes
/// empty, removes the entry from the registry and aborts its poll task
/// (the broadcaster task is left to exit on its own once its sender
/// half drops, avoiding a task aborting itself). Returns whether the
/// entry was torn down. Shared by explicit `unsubscribe` calls and the
/// broadcaster's own dead-subscriber sweep.
pub(crate) async fn remove_subscribers_and_maybe_teardown(registry: &Registry, key: &AssetKey, dead_ids: &[u64]) -> bool {
    let mut guard = registry.lock().await;
    let Some(entry) = guard.get_mut(key) else { return true };
    entry.subscribers.retain(|s| !dead_ids.contains(&s.id));
    if entry.subscribers.is_empty() {
        if let Some(entry) = guard.remove(key) {
            entry.poll_handle.abort();
        }
        true
    } else {
        false
    }
}
