//! The read-path pipeline: resampling, the tiered data sources, the
//! orchestrator that merges them, and the backfill manager that keeps
//! the database warm behind it.

mod aggregate_source;
mod backfill;
mod cache_source;
mod error;
mod orchestrator;
mod plugin_source;
mod resample;
mod source;

pub use aggregate_source::AggregateViewSource;
pub use backfill::BackfillManager;
pub use cache_source::CacheSource;
pub use error::{parse_timeframe, PipelineError};
pub use orchestrator::DataOrchestrator;
pub use plugin_source::PluginSource;
pub use resample::resample;
pub use source::{dedup_by_timestamp_first_wins, filter_bars, DataSource};

use std::sync::Arc;
use std::time::Duration;

use md_cache::Cache;
use md_plugin::Plugin;
use sqlx::PgPool;

/// Builds the standard three-tier source chain in priority order:
/// aggregate view, cache, plugin.
pub fn build_default_sources(pool: PgPool, cache: Arc<dyn Cache>, plugin: Arc<dyn Plugin>, resampled_ttl: Duration) -> Vec<Arc<dyn DataSource>> {
    vec![
        Arc::new(AggregateViewSource::new(pool.clone())),
        Arc::new(CacheSource::new(cache.clone(), pool.clone(), resampled_ttl)),
        Arc::new(PluginSource::new(plugin, cache, pool)),
    ]
}
