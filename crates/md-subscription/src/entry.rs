use std::collections::HashMap;
use std::sync::Arc;

use md_schemas::{AssetKey, ServerFrame};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// Capacity of a subscriber's own outbound queue. A subscriber whose
/// queue fills (its connection can't keep up) is dropped by the
/// broadcaster rather than letting the queue grow unboundedly or
/// stalling delivery to every other subscriber of the same asset.
pub const SUBSCRIBER_QUEUE_CAPACITY: usize = 64;

/// Capacity of the poll-task-to-broadcaster queue. This one is not a
/// backpressure boundary in the same sense: the broadcaster only ever
/// blocks on this receive, never on a subscriber send, so it should
/// drain promptly.
pub(crate) const OUTBOUND_QUEUE_CAPACITY: usize = 1024;

/// One registered listener on an `AssetKey`'s stream. `tx` is this
/// subscriber's own bounded queue; a full or closed queue marks it dead.
pub struct Subscriber {
    pub id: u64,
    pub tx: mpsc::Sender<ServerFrame>,
}

/// Per-`AssetKey` runtime state, created on first subscriber and torn
/// down when its subscriber set empties. Every field here is mutated
/// only by the entry's own poll/broadcaster tasks or under the registry
/// lock that guards the whole map — never via an independent per-entry
/// lock, since these fields change together.
pub(crate) struct Entry {
    pub subscribers: Vec<Subscriber>,
    pub outbound_tx: mpsc::Sender<ServerFrame>,
    pub last_sent_ts: i64,
    pub failures: u32,
    pub cooldown_until_ms: i64,
    pub poll_handle: JoinHandle<()>,
    pub broadcaster_handle: JoinHandle<()>,
}

pub(crate) type Registry = Arc<Mutex<HashMap<AssetKey, Entry>>>;
