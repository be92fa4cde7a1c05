//! Operator CLI for the market-data pipeline: database migrations and
//! status, CSV bar ingestion, and a manual backfill trigger. All
//! subcommands talk to the same database the daemon uses.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use md_plugin::{HttpOhlcvPlugin, Plugin};
use md_schemas::OHLCVBar;

#[derive(Parser)]
#[command(name = "md")]
#[command(about = "market-data pipeline operator CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Load OHLCV bars from a CSV file into the database
    Ingest {
        #[arg(long)]
        market: String,
        #[arg(long)]
        provider: String,
        #[arg(long)]
        symbol: String,
        #[arg(long)]
        timeframe: String,
        /// CSV file with header `timestamp,open,high,low,close,volume`
        #[arg(long)]
        file: PathBuf,
    },

    /// Manually trigger a historical backfill for one asset and wait for it
    /// to finish (or be cut off by `--timeout-sec`)
    Backfill {
        #[arg(long)]
        market: String,
        #[arg(long)]
        provider: String,
        #[arg(long)]
        symbol: String,
        #[arg(long, default_value_t = 120)]
        timeout_sec: u64,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())).init();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => {
            let pool = md_db::connect_from_env().await?;
            match cmd {
                DbCmd::Status => {
                    let s = md_db::status(&pool).await?;
                    println!("db_ok={} has_ohlcv_table={}", s.ok, s.has_ohlcv_table);
                }
                DbCmd::Migrate => {
                    md_db::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
            }
        }

        Commands::Ingest { market, provider, symbol, timeframe, file } => {
            let pool = md_db::connect_from_env().await?;
            let bars = read_bars_csv(&file)?;
            let count = bars.len();
            let outcome = md_db::ingest_bars(&pool, &market, &provider, &symbol, &timeframe, &bars).await?;
            println!("read_bars={count}");
            println!(
                "inserted={} updated={} rejected_non_finite={} rejected_ohlc_sanity={} rejected_negative_volume={} rejected_duplicate_in_batch={} rejected_out_of_order={}",
                outcome.report.inserted,
                outcome.report.updated,
                outcome.report.rejected_non_finite,
                outcome.report.rejected_ohlc_sanity,
                outcome.report.rejected_negative_volume,
                outcome.report.rejected_duplicate_in_batch,
                outcome.report.rejected_out_of_order,
            );
        }

        Commands::Backfill { market, provider, symbol, timeout_sec } => {
            let pool = md_db::connect_from_env().await?;
            let config = md_config::PipelineConfig::from_env();

            let plugin = build_plugin_from_env(&provider)?;
            let cache: Arc<dyn md_cache::Cache> = Arc::new(md_cache::InMemoryCache::new(
                Duration::from_secs(config.cache_ttl_1m_bar_group_sec),
                Duration::from_secs(config.cache_ttl_resampled_bars_sec),
            ));
            let manager = Arc::new(md_core::BackfillManager::new(
                pool,
                cache,
                config.default_backfill_period_ms,
                config.max_backfill_chunks as usize,
                Duration::from_secs_f64(config.backfill_chunk_delay_sec),
            ));

            let now_ms = chrono::Utc::now().timestamp_millis();
            manager.trigger_if_needed(plugin, &market, &provider, &symbol, now_ms).await;

            if !manager.is_running(&market, &provider, &symbol).await {
                println!("no gap found, nothing to backfill");
                return Ok(());
            }

            println!("backfill started, waiting up to {timeout_sec}s");
            let deadline = tokio::time::Instant::now() + Duration::from_secs(timeout_sec);
            while manager.is_running(&market, &provider, &symbol).await {
                if tokio::time::Instant::now() >= deadline {
                    println!("timed out waiting for backfill to finish; it keeps running in the background");
                    return Ok(());
                }
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
            println!("backfill finished");
        }
    }

    Ok(())
}

/// Reads a CSV with header `timestamp,open,high,low,close,volume`.
fn read_bars_csv(path: &PathBuf) -> Result<Vec<OHLCVBar>> {
    let mut reader = csv::Reader::from_path(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut bars = Vec::new();
    for record in reader.deserialize() {
        let row: CsvBarRow = record.context("malformed CSV row")?;
        bars.push(OHLCVBar::new(row.timestamp, row.open, row.high, row.low, row.close, row.volume));
    }
    Ok(bars)
}

#[derive(serde::Deserialize)]
struct CsvBarRow {
    timestamp: i64,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

/// Reads `MD_PROVIDER_<PROVIDER>_BASE_URL`/`..._API_KEY`, the same env-var
/// convention md-daemon uses to build one plugin per configured provider.
fn build_plugin_from_env(provider: &str) -> Result<Arc<dyn Plugin>> {
    let key_provider: String = provider.chars().map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' }).collect();
    let base_url = std::env::var(format!("MD_PROVIDER_{key_provider}_BASE_URL")).unwrap_or_else(|_| "http://localhost:9999".to_string());
    let api_key = std::env::var(format!("MD_PROVIDER_{key_provider}_API_KEY")).unwrap_or_default();
    let plugin = HttpOhlcvPlugin::new(base_url, api_key).map_err(|err| anyhow::anyhow!(err)).context("failed to construct plugin")?;
    Ok(Arc::new(plugin))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn reads_valid_csv_bars() {
        let mut file = tempfile_with_content("timestamp,open,high,low,close,volume\n60000,1.0,2.0,0.5,1.5,10.0\n120000,1.5,2.5,1.0,2.0,12.0\n");
        let bars = read_bars_csv(&file.path_buf()).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0], OHLCVBar::new(60000, 1.0, 2.0, 0.5, 1.5, 10.0));
        file.close();
    }

    #[test]
    fn rejects_malformed_csv_row() {
        let mut file = tempfile_with_content("timestamp,open,high,low,close,volume\nnot-a-number,1.0,2.0,0.5,1.5,10.0\n");
        assert!(read_bars_csv(&file.path_buf()).is_err());
        file.close();
    }

    struct TempCsv {
        path: std::path::PathBuf,
    }

    impl TempCsv {
        fn path_buf(&self) -> std::path::PathBuf {
            self.path.clone()
        }

        fn close(&mut self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }

    fn tempfile_with_content(content: &str) -> TempCsv {
        let path = std::env::temp_dir().join(format!("md_cli_test_{:?}.csv", std::thread::current().id()));
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        TempCsv { path }
    }
}
