//! Shared test fixtures for the market-data pipeline: a scripted mock
//! `Plugin` driven by a fixed bar universe, and terse `OHLCVBar`
//! builders. Every crate's tests build the same fakes through this crate
//! instead of duplicating them inline.

mod bars;
mod mock_plugin;

pub use bars::{bar_at, sequential_1m_bars};
pub use mock_plugin::ScriptedPlugin;
