//! Id-keyed pending-slot table and the receive loop that feeds it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use wsfs_channel::{Channel, ChannelError};
use wsfs_proto::{Command, OpKind, Operation, RequestId, Response};

use crate::BridgeError;

/// Default per-call deadline.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// How long one `receive` blocks before the loop re-checks channel state.
const RECEIVE_POLL: Duration = Duration::from_millis(500);

/// What a resolved slot delivers: the reply's `data` (absent for plain
/// acknowledgements), or the call's failure.
type SlotResult = Result<Option<serde_json::Value>, BridgeError>;

/// One in-flight call, parked until its reply arrives.
struct PendingSlot {
    kind: OpKind,
    reply: oneshot::Sender<SlotResult>,
}

/// Matches inbound replies to blocked callers by request id.
///
/// The pending table is the only shared mutable state; each map entry
/// operation is atomic, so insert/lookup/remove never race. Ids come from a
/// monotonic counter and are never reused while their slot is outstanding.
pub struct Correlator {
    channel: Arc<Channel>,
    pending: DashMap<RequestId, PendingSlot>,
    next_id: AtomicU64,
    call_timeout: Duration,
}

impl Correlator {
    pub fn new(channel: Arc<Channel>, call_timeout: Duration) -> Self {
        Self {
            channel,
            pending: DashMap::new(),
            next_id: AtomicU64::new(1),
            call_timeout,
        }
    }

    /// Send one command and suspend until its reply resolves the slot.
    ///
    /// `Ok(None)` is a bare acknowledgement; `Ok(Some(data))` carries the
    /// operation payload for the dispatcher to decode. On timeout the slot
    /// is removed first, so a late reply to this id becomes an orphan and is
    /// never delivered to a different caller.
    pub async fn call(&self, op: Operation) -> SlotResult {
        let id = RequestId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let kind = op.kind();
        let (tx, rx) = oneshot::channel();

        self.pending.insert(id, PendingSlot { kind, reply: tx });
        trace!(%id, command = %kind, path = op.path(), "call registered");

        let command = Command::new(id, op);
        if let Err(e) = self.channel.send(&command) {
            self.pending.remove(&id);
            return Err(match e {
                ChannelError::Malformed(m) => BridgeError::MalformedResponse(m),
                _ => BridgeError::ChannelClosed,
            });
        }

        match tokio::time::timeout(self.call_timeout, rx).await {
            Ok(Ok(result)) => result,
            // Slot dropped without a reply value; treat as transport loss.
            Ok(Err(_)) => Err(BridgeError::ChannelClosed),
            Err(_) => {
                self.pending.remove(&id);
                debug!(%id, command = %kind, "call timed out; slot removed");
                Err(BridgeError::Timeout)
            }
        }
    }

    /// Route one inbound reply to its slot, or discard it as an orphan.
    ///
    /// At-most-once: the slot is removed in the same map operation that
    /// finds it, so a reply can never resolve two calls.
    pub fn dispatch_incoming(&self, response: Response) {
        let Some((_, slot)) = self.pending.remove(&response.id) else {
            warn!(id = %response.id, command = %response.command, "orphan response discarded");
            return;
        };

        let result = if slot.kind != response.command {
            warn!(
                id = %response.id,
                expected = %slot.kind,
                got = %response.command,
                "reply kind does not match its id; failing the call"
            );
            Err(BridgeError::MalformedResponse(format!(
                "id {} answered as {} but was sent as {}",
                response.id, response.command, slot.kind
            )))
        } else if let Some(err) = response.error {
            Err(BridgeError::Remote(err))
        } else {
            Ok(response.data)
        };

        if slot.reply.send(result).is_err() {
            // Caller gave up between slot removal and delivery.
            debug!(id = %response.id, "caller gone before reply delivery");
        }
    }

    /// Fail every outstanding call with `ChannelClosed`. Called by the
    /// receive loop when the peer disconnects so nothing blocks forever.
    pub fn fail_all_pending(&self) {
        let ids: Vec<RequestId> = self.pending.iter().map(|entry| *entry.key()).collect();
        if !ids.is_empty() {
            warn!(count = ids.len(), "failing all in-flight calls: channel closed");
        }
        for id in ids {
            if let Some((_, slot)) = self.pending.remove(&id) {
                let _ = slot.reply.send(Err(BridgeError::ChannelClosed));
            }
        }
    }

    /// Number of calls currently awaiting replies.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

/// Drive the channel's inbound side into the correlator.
///
/// This task is the only reader of the channel, which is what keeps two
/// callers from racing to consume each other's reply. Returns when the
/// channel half is gone for good.
pub async fn run_receive_loop(channel: Arc<Channel>, correlator: Arc<Correlator>) {
    loop {
        match channel.receive(RECEIVE_POLL).await {
            Ok(response) => correlator.dispatch_incoming(response),
            Err(ChannelError::Timeout) => {} // idle tick
            Err(ChannelError::Malformed(e)) => {
                warn!(error = %e, "discarding malformed frame");
            }
            Err(ChannelError::Closed) | Err(ChannelError::NotReady) => {
                correlator.fail_all_pending();
                // Suspend until a replacement peer attaches; if the channel
                // is gone entirely, stop.
                if channel.wait_ready().await.is_err() {
                    debug!("channel dropped; receive loop exiting");
                    return;
                }
            }
        }
    }
}
