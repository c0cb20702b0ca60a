//! Wire protocol types for wsfs.
//!
//! This crate is the protocol foundation: every message that crosses the
//! WebSocket is one of these types, serialized as a single JSON text frame.
//! It has **no internal wsfs dependencies** — a pure leaf crate that the
//! channel, bridge, and FUSE layers build on.
//!
//! # Message flow
//!
//! ```text
//! FUSE op ──▶ Command { id, command, path, … }   ──▶ peer
//! FUSE op ◀── Response { id, command, data | error } ◀── peer
//! ```
//!
//! Every command carries a [`RequestId`] that the reply must echo; replies are
//! matched by id alone, never by operation name. The `command` field in a
//! [`Response`] exists for payload-shape decoding and logging only.
//!
//! Binary buffers ([`WireBytes`]) cross the wire base64-encoded, since JSON
//! strings cannot carry arbitrary bytes.

pub mod attr;
pub mod command;
pub mod response;

pub use attr::FileAttrs;
pub use command::{Command, OpKind, Operation};
pub use response::{HandleReply, ReadReply, RemoteError, Response, WriteReply};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Identifier for one in-flight command.
///
/// Unique per call for as long as that call is outstanding; the reply must
/// echo it verbatim. Opaque on the wire (a JSON number).
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Raw bytes carried as a base64 string in JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WireBytes(pub Vec<u8>);

impl WireBytes {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }
}

impl From<Vec<u8>> for WireBytes {
    fn from(v: Vec<u8>) -> Self {
        Self(v)
    }
}

impl From<&[u8]> for WireBytes {
    fn from(v: &[u8]) -> Self {
        Self(v.to_vec())
    }
}

impl AsRef<[u8]> for WireBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Serialize for WireBytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use base64::Engine;
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for WireBytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use base64::Engine;
        let s = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(s.as_bytes())
            .map(WireBytes)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_id_is_transparent() {
        let id = RequestId(42);
        assert_eq!(serde_json::to_string(&id).unwrap(), "42");
        let back: RequestId = serde_json::from_str("42").unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn wire_bytes_round_trip() {
        let bytes = WireBytes(b"hey!".to_vec());
        let json = serde_json::to_string(&bytes).unwrap();
        assert_eq!(json, "\"aGV5IQ==\"");
        let back: WireBytes = serde_json::from_str(&json).unwrap();
        assert_eq!(back, bytes);
    }

    #[test]
    fn wire_bytes_rejects_bad_base64() {
        assert!(serde_json::from_str::<WireBytes>("\"not base64!!\"").is_err());
    }
}
