//! Inbound response messages.
//!
//! A [`Response`] echoes the command's id and name and carries either a
//! `data` payload or an `error`. The shape of `data` depends on the
//! operation, so it is held as raw JSON here and decoded into the typed
//! payload structs by the dispatcher.
//!
//! ```json
//! {"id":7,"command":"getattr","data":{"size":12,"mode":33188,"mtime":1710000000.0}}
//! {"id":9,"command":"read","data":{"data":"aGV5IQ=="}}
//! {"id":4,"command":"mkdir","error":{"code":13,"message":"denied"}}
//! ```

use serde::{Deserialize, Serialize};

use crate::command::OpKind;
use crate::{RequestId, WireBytes};

/// One reply from the peer, consumed exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: RequestId,
    pub command: OpKind,
    /// Operation-specific payload. Absent or `null` means an empty result,
    /// which for `getattr` is the "does not exist" sentinel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Set when the peer explicitly failed the command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RemoteError>,
}

impl Response {
    /// A successful reply carrying `data`.
    pub fn ok(id: RequestId, command: OpKind, data: serde_json::Value) -> Self {
        Self { id, command, data: Some(data), error: None }
    }

    /// An empty (acknowledgement-only) reply.
    pub fn ack(id: RequestId, command: OpKind) -> Self {
        Self { id, command, data: None, error: None }
    }

    /// A peer-reported failure.
    pub fn err(id: RequestId, command: OpKind, error: RemoteError) -> Self {
        Self { id, command, data: None, error: Some(error) }
    }
}

/// A failure the peer reported for one command. `code` is a POSIX errno
/// when the peer knows one.
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
#[error("remote error {code}: {}", .message.as_deref().unwrap_or("unspecified"))]
pub struct RemoteError {
    pub code: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

// ── Typed payloads decoded from `Response::data` ────────────────────────────

/// Reply to `open` and `create`: the peer-assigned file handle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HandleReply {
    pub fd: u64,
}

/// Reply to `read`: the bytes at the requested offset. Short reads signal
/// end-of-data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadReply {
    pub data: WireBytes,
}

/// Reply to `write`: how many bytes the peer accepted. A short count is not
/// an error, but it must be reported verbatim.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WriteReply {
    pub length: u64,
}
