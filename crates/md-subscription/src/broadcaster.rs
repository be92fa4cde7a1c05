//! The per-entry broadcaster task: drains the poll task's outbound
//! queue and fans each frame out to every current subscriber via a
//! non-blocking `try_send`, dropping any subscriber whose own queue is
//! full or closed.

use md_schemas::{AssetKey, ServerFrame};
use tokio::sync::mpsc;
use tracing::{info_span, Instrument};

use crate::entry::Registry;
use crate::manager::remove_subscribers_and_maybe_teardown;

pub(crate) fn spawn(key: AssetKey, registry: Registry, outbound_rx: mpsc::Receiver<ServerFrame>) -> tokio::task::JoinHandle<()> {
    let span = info_span!("md_subscription_broadcast", market = %key.market, provider = %key.provider, symbol = %key.symbol, timeframe = %key.timeframe);
    tokio::spawn(run(key, registry, outbound_rx).instrument(span))
}

async fn run(key: AssetKey, registry: Registry, mut outbound_rx: mpsc::Receiver<ServerFrame>) {
    while let Some(frame) = outbound_rx.recv().await {
        let snapshot: Vec<(u64, mpsc::Sender<ServerFrame>)> = {
            let guard = registry.lock().await;
            match guard.get(&key) {
                Some(entry) => entry.subscribers.iter().map(|s| (s.id, s.tx.clone())).collect(),
                None => return, // entry already torn down
            }
        };

        let dead: Vec<u64> = snapshot.iter().filter(|(_, tx)| tx.try_send(frame.clone()).is_err()).map(|(id, _)| *id).collect();

        if !dead.is_empty() {
            let became_empty = remove_subscribers_and_maybe_teardown(&registry, &key, &dead).await;
            if became_empty {
                return;
            }
        }
    }
}
