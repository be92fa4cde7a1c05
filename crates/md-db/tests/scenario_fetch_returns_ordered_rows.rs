use md_db::{fetch_ohlcv_bars, ingest_bars, testkit_db_pool, FetchBarsArgs};
use md_schemas::OHLCVBar;

#[tokio::test]
#[ignore = "requires a running Postgres database reachable via MD_DATABASE_URL"]
async fn fetch_returns_rows_ordered_by_symbol_then_timestamp() {
    let pool = testkit_db_pool().await.expect("db pool");

    ingest_bars(&pool, "crypto", "testvenue", "ZZZ1", "1m", &[
        OHLCVBar::new(100, 1.0, 1.0, 1.0, 1.0, 1.0),
        OHLCVBar::new(300, 1.0, 1.0, 1.0, 1.0, 1.0),
    ])
    .await
    .expect("ingest ZZZ1");

    ingest_bars(&pool, "crypto", "testvenue", "AAA1", "1m", &[OHLCVBar::new(200, 1.0, 1.0, 1.0, 1.0, 1.0)])
        .await
        .expect("ingest AAA1");

    let rows = fetch_ohlcv_bars(
        &pool,
        &FetchBarsArgs {
            market: "crypto".into(),
            provider: "testvenue".into(),
            symbols: vec!["AAA1".into(), "ZZZ1".into()],
            timeframe: "1m".into(),
            since_ts: None,
            before_ts: None,
            limit: None,
        },
    )
    .await
    .expect("fetch");

    let key: Vec<(String, i64)> = rows.iter().map(|r| (r.symbol.clone(), r.timestamp)).collect();
    assert_eq!(key, vec![("AAA1".into(), 200), ("ZZZ1".into(), 100), ("ZZZ1".into(), 300)]);
}

#[tokio::test]
#[ignore = "requires a running Postgres database reachable via MD_DATABASE_URL"]
async fn ingest_rejects_invalid_rows_but_keeps_valid_ones() {
    let pool = testkit_db_pool().await.expect("db pool");

    let outcome = ingest_bars(&pool, "crypto", "testvenue", "BADROWS", "1m", &[
        OHLCVBar::new(100, 1.0, 2.0, 0.5, 1.5, 10.0),
        OHLCVBar::new(100, 1.0, 2.0, 0.5, 1.5, 10.0), // duplicate timestamp in batch
        OHLCVBar::new(50, 1.0, 2.0, 0.5, 1.5, 10.0),  // out of order vs. previous valid row
        OHLCVBar::new(200, 1.0, 0.5, 2.0, 1.5, 10.0), // high < low
        OHLCVBar::new(300, 1.0, 2.0, 0.5, 1.5, -1.0), // negative volume
    ])
    .await
    .expect("ingest");

    assert_eq!(outcome.report.inserted, 1);
    assert_eq!(outcome.report.rejected_duplicate_in_batch, 1);
    assert_eq!(outcome.report.rejected_out_of_order, 1);
    assert_eq!(outcome.report.rejected_ohlc_sanity, 1);
    assert_eq!(outcome.report.rejected_negative_volume, 1);
}

#[tokio::test]
#[ignore = "requires a running Postgres database reachable via MD_DATABASE_URL"]
async fn ingest_is_idempotent_on_conflict() {
    let pool = testkit_db_pool().await.expect("db pool");

    ingest_bars(&pool, "crypto", "testvenue", "DUPKEY", "1m", &[OHLCVBar::new(100, 1.0, 2.0, 0.5, 1.0, 5.0)])
        .await
        .expect("first ingest");
    let second = ingest_bars(&pool, "crypto", "testvenue", "DUPKEY", "1m", &[OHLCVBar::new(100, 1.0, 2.0, 0.5, 1.8, 5.0)])
        .await
        .expect("second ingest");

    assert_eq!(second.report.updated, 1);
    assert_eq!(second.report.inserted, 0);

    let rows = fetch_ohlcv_bars(
        &pool,
        &FetchBarsArgs {
            market: "crypto".into(),
            provider: "testvenue".into(),
            symbols: vec!["DUPKEY".into()],
            timeframe: "1m".into(),
            since_ts: None,
            before_ts: None,
            limit: None,
        },
    )
    .await
    .expect("fetch");

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].close, 1.8);
}
