//! md-daemon entry point.
//!
//! This file is intentionally thin: it sets up tracing, connects to
//! Postgres, builds the shared state, wires middleware, and starts the
//! HTTP/WebSocket server. All route handlers live in `routes.rs`; all
//! shared state types live in `state.rs`.

use std::net::SocketAddr;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use md_daemon::{routes, state};
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{info, warn, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env.local if present (dev convenience); silent if absent,
    // since production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let config = std::sync::Arc::new(md_config::PipelineConfig::from_env());

    let pool = md_db::connect_from_env().await.context("failed to connect to postgres")?;
    md_db::migrate(&pool).await.context("failed to run database migrations")?;

    let shared = state::AppState::build(pool, config.clone()).await.context("failed to build market services")?;

    let app = routes::build_router(shared.clone())
        .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::new().level(Level::INFO)).on_response(DefaultOnResponse::new().level(Level::INFO)))
        .layer(cors_localhost_only());

    let addr: SocketAddr = md_config::daemon_addr_from_env().parse().context("invalid daemon bind address")?;
    info!("md-daemon listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr).await.context("failed to bind daemon socket")?;
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await.context("server crashed")?;

    info!("shutting down subscription and backfill tasks");
    if tokio::time::timeout(config.shutdown_grace_period(), shared.shutdown()).await.is_err() {
        warn!("not all subscription/backfill tasks finished within the shutdown grace period");
    }

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())).init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).expect("failed to install SIGTERM handler").recv().await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// CORS: allow only localhost origins.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = ["http://localhost", "http://127.0.0.1", "http://localhost:3000", "http://127.0.0.1:3000", "http://localhost:5173", "http://127.0.0.1:5173"];

    let origins: Vec<HeaderValue> = allowed_origins.iter().filter_map(|o| HeaderValue::from_str(o).ok()).collect();

    CorsLayer::new().allow_origin(origins).allow_methods([Method::GET, Method::POST]).allow_headers(tower_http::cors::Any)
}
