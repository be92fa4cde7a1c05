//! Axum router and all HTTP/WebSocket handlers for md-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. All handlers are `pub(crate)` so the scenario tests in
//! `tests/` can compose the router directly.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Json, Router};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use md_core::{parse_timeframe, PipelineError};
use md_schemas::{AssetKey, ClientFrame, MessagePayload, ServerFrame, Timeframe};
use md_subscription::SubscriptionManager;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::api_types::{HealthResponse, OhlcvQuery, OhlcvResponse, ProvidersQuery, ProvidersResponse, SymbolsQuery, SymbolsResponse};
use crate::state::{AppState, MarketService};

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/ohlcv", get(ohlcv))
        .route("/v1/symbols", get(symbols))
        .route("/v1/providers", get(providers))
        .route("/v1/stream", get(ws_subscribe))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { ok: true, service: "md-daemon", version: env!("CARGO_PKG_VERSION") }))
}

// ---------------------------------------------------------------------------
// GET /v1/ohlcv
// ---------------------------------------------------------------------------

pub(crate) async fn ohlcv(State(st): State<Arc<AppState>>, Query(q): Query<OhlcvQuery>) -> Response {
    let timeframe = match parse_timeframe(&q.timeframe) {
        Ok(tf) => tf,
        Err(err) => return err.into_response(),
    };
    if matches!(q.limit, Some(0)) {
        return PipelineError::Validation("limit must be positive".to_string()).into_response();
    }

    let Some(service) = st.service(&q.market, &q.provider) else {
        return PipelineError::NotFound(format!("no market/provider configured for {}/{}", q.market, q.provider)).into_response();
    };

    let now_ms = chrono::Utc::now().timestamp_millis();
    let bars = service.orchestrator.fetch(&q.market, &q.provider, &q.symbol, timeframe, q.since, q.until, q.limit, now_ms).await;
    spawn_backfill_trigger(service, &q.market, &q.provider, &q.symbol, now_ms);
    (StatusCode::OK, Json(OhlcvResponse::from_bars(&bars))).into_response()
}

/// Fires the same best-effort backfill check the subscribe path runs
/// after its initial fetch, so a plain HTTP read also repairs a gap
/// instead of only ever serving what's already cached or stored.
fn spawn_backfill_trigger(service: &Arc<MarketService>, market: &str, provider: &str, symbol: &str, now_ms: i64) {
    let backfill = service.backfill.clone();
    let plugin = service.plugin.clone();
    let (market, provider, symbol) = (market.to_string(), provider.to_string(), symbol.to_string());
    tokio::spawn(async move {
        backfill.trigger_if_needed(plugin, &market, &provider, &symbol, now_ms).await;
    });
}

// ---------------------------------------------------------------------------
// GET /v1/symbols
// ---------------------------------------------------------------------------

pub(crate) async fn symbols(State(st): State<Arc<AppState>>, Query(q): Query<SymbolsQuery>) -> Response {
    match md_db::distinct_symbols(&st.pool, &q.market, &q.provider).await {
        Ok(symbols) => (StatusCode::OK, Json(SymbolsResponse { symbols })).into_response(),
        Err(err) => {
            warn!(%err, "distinct_symbols query failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": "database query failed" }))).into_response()
        }
    }
}

// ---------------------------------------------------------------------------
// GET /v1/providers
// ---------------------------------------------------------------------------

pub(crate) async fn providers(State(st): State<Arc<AppState>>, Query(q): Query<ProvidersQuery>) -> Response {
    match md_db::distinct_providers(&st.pool, &q.market).await {
        Ok(providers) => (StatusCode::OK, Json(ProvidersResponse { providers })).into_response(),
        Err(err) => {
            warn!(%err, "distinct_providers query failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": "database query failed" }))).into_response()
        }
    }
}

// ---------------------------------------------------------------------------
// GET /v1/stream  (WebSocket subscribe endpoint)
// ---------------------------------------------------------------------------

pub(crate) async fn ws_subscribe(ws: WebSocketUpgrade, State(st): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, st))
}

/// One registered subscription this connection owns, kept so it can be
/// torn down on unsubscribe or when the socket closes.
type OwnedSubscription = (Arc<SubscriptionManager>, AssetKey, u64);

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let (frame_tx, mut frame_rx) = mpsc::channel::<ServerFrame>(64);
    let mut owned: Vec<OwnedSubscription> = Vec::new();
    let mut ping_ticker = tokio::time::interval(state.config.ws_ping_interval());
    ping_ticker.tick().await; // first tick fires immediately; consume it

    loop {
        tokio::select! {
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        handle_client_frame(&text, &state, &frame_tx, &mut owned).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // binary/ping/pong control frames: axum answers ws-level pings itself
                    Some(Err(err)) => {
                        warn!(%err, "websocket receive error");
                        break;
                    }
                }
            }
            outgoing = frame_rx.recv() => {
                let Some(frame) = outgoing else { break };
                if !send_frame(&mut sender, &frame).await {
                    break;
                }
            }
            _ = ping_ticker.tick() => {
                if !send_frame(&mut sender, &ServerFrame::Ping).await {
                    break;
                }
            }
        }
    }

    for (manager, key, subscriber_id) in owned {
        manager.unsubscribe(&key, subscriber_id).await;
    }
}

async fn send_frame(sender: &mut SplitSink<WebSocket, Message>, frame: &ServerFrame) -> bool {
    let Ok(text) = serde_json::to_string(frame) else { return false };
    sender.send(Message::Text(text)).await.is_ok()
}

async fn handle_client_frame(text: &str, state: &Arc<AppState>, frame_tx: &mpsc::Sender<ServerFrame>, owned: &mut Vec<OwnedSubscription>) {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(err) => {
            let _ = frame_tx.send(ServerFrame::Error { symbol: String::new(), timeframe: Timeframe::ONE_MINUTE, payload: MessagePayload { message: format!("malformed frame: {err}") } }).await;
            return;
        }
    };

    match frame {
        ClientFrame::Subscribe { market, provider, symbol, timeframe, since, .. } => {
            let Some(service) = state.service(&market, &provider) else {
                let _ = frame_tx
                    .send(ServerFrame::Error { symbol, timeframe: Timeframe::ONE_MINUTE, payload: MessagePayload { message: format!("no market/provider configured for {market}/{provider}") } })
                    .await;
                return;
            };
            if let Some((key, subscriber_id)) = service.subscriptions.subscribe(&market, &provider, &symbol, &timeframe, since, frame_tx.clone()).await {
                info!(%market, %provider, %symbol, %timeframe, subscriber_id, "websocket client subscribed");
                owned.push((service.subscriptions.clone(), key, subscriber_id));
            }
        }
        ClientFrame::Unsubscribe { market, provider, symbol, timeframe, .. } => {
            let Ok(tf) = timeframe.parse::<Timeframe>() else { return };
            let key = AssetKey::new(&market, &provider, &symbol, tf);
            if let Some(pos) = owned.iter().position(|(_, owned_key, _)| *owned_key == key) {
                let (manager, key, subscriber_id) = owned.remove(pos);
                manager.unsubscribe(&key, subscriber_id).await;
            }
        }
        ClientFrame::Ping => {
            let _ = frame_tx.send(ServerFrame::Pong).await;
        }
        ClientFrame::Pong => {}
    }
}
