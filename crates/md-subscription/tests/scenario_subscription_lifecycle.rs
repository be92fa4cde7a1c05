use std::sync::Arc;
use std::time::Duration;

use md_cache::{Cache, InMemoryCache};
use md_config::PipelineConfig;
use md_core::{build_default_sources, BackfillManager, DataOrchestrator};
use md_db::{ingest_bars, testkit_db_pool};
use md_plugin::Plugin;
use md_schemas::ServerFrame;
use md_subscription::SubscriptionManager;
use md_testkit::{sequential_1m_bars, ScriptedPlugin};
use tokio::sync::mpsc;

async fn wait_for_data_frame(rx: &mut mpsc::Receiver<ServerFrame>) -> ServerFrame {
    loop {
        match rx.recv().await.expect("channel closed before a data frame arrived") {
            frame @ ServerFrame::Data { .. } => return frame,
            _ => continue,
        }
    }
}

#[tokio::test]
#[ignore = "requires a running Postgres database reachable via MD_DATABASE_URL"]
async fn fresh_subscribe_sends_ack_then_historical_batch() {
    let pool = testkit_db_pool().await.expect("db pool");
    let cache: Arc<dyn Cache> = Arc::new(InMemoryCache::new(Duration::from_secs(60), Duration::from_secs(60)));
    let plugin: Arc<dyn Plugin> = Arc::new(ScriptedPlugin::new(sequential_1m_bars(0, 5, 1.0)));
    let config = Arc::new(PipelineConfig::default());

    let sources = build_default_sources(pool.clone(), cache.clone(), plugin.clone(), Duration::from_secs(config.cache_ttl_resampled_bars_sec));
    let orchestrator = Arc::new(DataOrchestrator::new(sources, config.default_chart_points as usize));
    let backfill = Arc::new(BackfillManager::new(pool.clone(), cache.clone(), config.default_backfill_period_ms, config.max_backfill_chunks as usize, Duration::from_millis(1)));

    let manager = SubscriptionManager::new(orchestrator, backfill, plugin, cache, pool, config);
    let (tx, mut rx) = mpsc::channel(32);

    let subscribed = manager.subscribe("crypto", "testvenue", "SUBLIFE1", "1m", None, tx).await;
    assert!(subscribed.is_some());

    let ack = rx.recv().await.unwrap();
    assert!(matches!(ack, ServerFrame::Subscribed { .. }));

    let historical = rx.recv().await.unwrap();
    match historical {
        ServerFrame::Data { payload, .. } => assert!(payload.initial_batch),
        other => panic!("expected a historical data frame, got {other:?}"),
    }

    let (key, subscriber_id) = subscribed.unwrap();
    manager.unsubscribe(&key, subscriber_id).await;
}

#[tokio::test]
#[ignore = "requires a running Postgres database reachable via MD_DATABASE_URL"]
async fn poll_loop_only_forwards_bars_newer_than_last_sent() {
    let pool = testkit_db_pool().await.expect("db pool");
    let cache: Arc<dyn Cache> = Arc::new(InMemoryCache::new(Duration::from_secs(60), Duration::from_secs(60)));

    // Seed the database with bars the initial historical fetch will
    // pick up, so last_sent_ts starts past them.
    let seed = sequential_1m_bars(0, 3, 1.0);
    ingest_bars(&pool, "crypto", "testvenue", "SUBLIFE2", "1m", &seed).await.expect("seed ingest");

    let plugin: Arc<dyn Plugin> = Arc::new(ScriptedPlugin::new(sequential_1m_bars(0, 3, 1.0)));
    let config = Arc::new(PipelineConfig::default());
    let sources = build_default_sources(pool.clone(), cache.clone(), plugin.clone(), Duration::from_secs(config.cache_ttl_resampled_bars_sec));
    let orchestrator = Arc::new(DataOrchestrator::new(sources, config.default_chart_points as usize));
    let backfill = Arc::new(BackfillManager::new(pool.clone(), cache.clone(), config.default_backfill_period_ms, config.max_backfill_chunks as usize, Duration::from_millis(1)));

    let manager = SubscriptionManager::new(orchestrator, backfill, plugin, cache, pool, config);
    let (tx, mut rx) = mpsc::channel(32);

    let subscribed = manager.subscribe("crypto", "testvenue", "SUBLIFE2", "1m", None, tx).await;
    let _ = rx.recv().await.unwrap(); // Subscribed
    let _ = rx.recv().await.unwrap(); // historical Data

    // No new bars exist beyond the seeded ones, so no further data frame
    // should show up quickly; this is a smoke check that the subscribe
    // call itself does not emit duplicate frames for already-seen bars.
    let immediate = tokio::time::timeout(Duration::from_millis(50), wait_for_data_frame(&mut rx)).await;
    assert!(immediate.is_err(), "no new data frame should arrive before the poll loop's first tick");

    let (key, subscriber_id) = subscribed.unwrap();
    manager.unsubscribe(&key, subscriber_id).await;
}
