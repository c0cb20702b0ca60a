//! The synchronous-call-to-asynchronous-channel bridge.
//!
//! A filesystem operation becomes a [`Correlator::call`]: allocate a fresh
//! id, park a pending slot, put the command on the channel, and suspend
//! until the matching reply resolves the slot or the deadline passes. The
//! [`run_receive_loop`] task is the channel's only reader and routes every
//! inbound reply to its slot by id — never by operation name, never by
//! arrival order.
//!
//! ```text
//!   caller ──call──▶ Correlator ──send──▶ Channel
//!   caller ◀─slot──  dispatch_incoming ◀──receive loop
//! ```

mod correlator;

pub use correlator::{run_receive_loop, Correlator, DEFAULT_CALL_TIMEOUT};

use wsfs_proto::RemoteError;

/// A call's failure modes, as seen by the operation dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The backend returned the empty sentinel where a record was required.
    #[error("no such entry")]
    NotFound,
    /// No reply arrived within the call's deadline.
    #[error("timed out waiting for the backend")]
    Timeout,
    /// The transport was lost before the reply arrived.
    #[error("channel closed")]
    ChannelClosed,
    /// The backend explicitly failed the command.
    #[error(transparent)]
    Remote(#[from] RemoteError),
    /// The reply arrived but did not decode into the expected shape.
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}
