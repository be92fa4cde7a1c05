//! The process that serves the market-data pipeline: HTTP read endpoints,
//! a WebSocket subscribe endpoint, and the facade wiring one plugin, cache,
//! orchestrator, backfill manager and subscription manager per configured
//! `(market, provider)` pair.

pub mod api_types;
pub mod routes;
pub mod state;
