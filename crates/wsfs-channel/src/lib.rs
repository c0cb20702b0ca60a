//! The duplex message channel.
//!
//! [`Channel`] is the consumer half the bridge talks to: `send` one command,
//! `receive` one response with a deadline, and observe the connection state.
//! [`ChannelEndpoint`] is the transport half: whatever owns the physical
//! connection attaches/detaches it and moves raw text frames in and out.
//! The WebSocket server in [`server`] drives the endpoint in production;
//! tests drive it directly.
//!
//! ```text
//!   bridge ──send──▶ Channel ═══ frames ═══ ChannelEndpoint ◀──pump── WebSocket
//!   bridge ◀─recv──                                        ──pump──▶
//! ```
//!
//! State machine: `Connecting → Ready → Closed`, `Ready` exactly once per
//! physical peer connection. A replacement connection re-enters `Ready`.
//! Readiness is a `watch` value, so [`Channel::wait_ready`] suspends
//! cooperatively instead of polling a flag.

pub mod server;

use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tracing::trace;

use wsfs_proto::{Command, Response};

/// Connection state of the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// No peer has connected yet.
    Connecting,
    /// A peer is attached; send and receive are live.
    Ready,
    /// The peer went away. May become `Ready` again if a new peer attaches.
    Closed,
}

/// Channel failures, as seen by the bridge.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("channel is not ready")]
    NotReady,
    #[error("channel closed")]
    Closed,
    #[error("timed out waiting for a message")]
    Timeout,
    #[error("malformed frame: {0}")]
    Malformed(String),
}

/// Consumer half of the channel.
pub struct Channel {
    state: watch::Receiver<ChannelState>,
    outbound: mpsc::UnboundedSender<String>,
    // Single-reader discipline: the receive loop is the only caller of
    // `receive`, and the mutex enforces it.
    inbound: Mutex<mpsc::UnboundedReceiver<String>>,
}

/// Transport half of the channel, owned by whatever holds the socket.
pub struct ChannelEndpoint {
    state: watch::Sender<ChannelState>,
    inbound: mpsc::UnboundedSender<String>,
    outbound: mpsc::UnboundedReceiver<String>,
}

/// Create a connected channel/endpoint pair in the `Connecting` state.
pub fn channel() -> (Channel, ChannelEndpoint) {
    let (state_tx, state_rx) = watch::channel(ChannelState::Connecting);
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    (
        Channel {
            state: state_rx,
            outbound: out_tx,
            inbound: Mutex::new(in_rx),
        },
        ChannelEndpoint {
            state: state_tx,
            inbound: in_tx,
            outbound: out_rx,
        },
    )
}

impl Channel {
    /// Current connection state.
    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    /// Suspend until a peer is attached and the channel is `Ready`.
    pub async fn wait_ready(&self) -> Result<(), ChannelError> {
        let mut state = self.state.clone();
        state
            .wait_for(|s| *s == ChannelState::Ready)
            .await
            .map(|_| ())
            .map_err(|_| ChannelError::Closed)
    }

    /// Serialize one command and hand it to the transport as a single
    /// complete message. Fails unless the channel is `Ready`.
    pub fn send(&self, command: &Command) -> Result<(), ChannelError> {
        match self.state() {
            ChannelState::Ready => {}
            ChannelState::Connecting => return Err(ChannelError::NotReady),
            ChannelState::Closed => return Err(ChannelError::Closed),
        }
        let text = serde_json::to_string(command)
            .map_err(|e| ChannelError::Malformed(e.to_string()))?;
        trace!(id = %command.id, command = %command.op.kind(), "channel send");
        self.outbound.send(text).map_err(|_| ChannelError::Closed)
    }

    /// Block up to `timeout` for the next inbound message.
    ///
    /// Returns `Closed` if the peer disconnects mid-wait (a frame already
    /// queued before the disconnect is still delivered first) and
    /// `Malformed` for a frame that is not a valid response, so the caller
    /// can log it and keep reading.
    pub async fn receive(&self, timeout: Duration) -> Result<Response, ChannelError> {
        let mut inbound = self.inbound.lock().await;
        let mut state = self.state.clone();

        tokio::select! {
            biased;

            frame = inbound.recv() => match frame {
                Some(text) => parse_frame(&text),
                None => Err(ChannelError::Closed),
            },
            res = state.wait_for(|s| *s == ChannelState::Closed) => {
                let _ = res;
                Err(ChannelError::Closed)
            }
            _ = tokio::time::sleep(timeout) => Err(ChannelError::Timeout),
        }
    }
}

fn parse_frame(text: &str) -> Result<Response, ChannelError> {
    serde_json::from_str(text).map_err(|e| ChannelError::Malformed(e.to_string()))
}

impl ChannelEndpoint {
    /// A peer connected: the channel becomes `Ready`.
    pub fn attach(&self) {
        let _ = self.state.send(ChannelState::Ready);
    }

    /// The peer went away: the channel becomes `Closed`.
    pub fn detach(&self) {
        let _ = self.state.send(ChannelState::Closed);
    }

    /// Deliver one raw inbound frame. Returns false if the channel half
    /// was dropped.
    pub fn push_inbound(&self, text: String) -> bool {
        self.inbound.send(text).is_ok()
    }

    /// Next outbound frame to put on the wire, or `None` when the channel
    /// half was dropped.
    pub async fn next_outbound(&mut self) -> Option<String> {
        self.outbound.recv().await
    }
}
