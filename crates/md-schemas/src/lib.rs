//! Shared data types for the market-data pipeline.
//!
//! This crate sits at the bottom of the dependency graph: it has no
//! awareness of HTTP, the database, or any provider. Every other
//! `md-*` crate depends on it.

mod asset_key;
mod bar;
mod timeframe;
mod wire;

pub use asset_key::AssetKey;
pub use bar::OHLCVBar;
pub use timeframe::{Timeframe, TimeframeUnit};
pub use wire::{ClientFrame, MessagePayload, ServerFrame, StreamPayload};
